use std::sync::Arc;

use examprep_api::error::AppError;
use examprep_api::models::{
    GenerateSessionRequest, GradeOutcome, ProgressStatus, QuizMode, SessionKey, SlotPosition,
    SlotRef, SlotStatus,
};
use examprep_api::services::answer_service::AnswerGrader;
use examprep_api::services::session_service::SessionGenerator;

mod common;
use common::{paper, question_id, FakeBank, InMemoryStore, STANDARD, SUBJECT, SYLLABUS};

const USER: &str = "64b0c5e2a7f3d92b1c8e4f01";

fn base_request() -> GenerateSessionRequest {
    GenerateSessionRequest {
        subject: SUBJECT.to_string(),
        syllabus: SYLLABUS.to_string(),
        standard: STANDARD.to_string(),
        topics: Vec::new(),
        difficulties: Vec::new(),
        years: Vec::new(),
        units: Vec::new(),
        total_questions: None,
        challenge_minutes: None,
        wrong_answers_limit: None,
        frequently_asked: false,
        include_attempted: false,
        distribution: None,
    }
}

fn key(mode: QuizMode) -> SessionKey {
    SessionKey {
        user_id: USER.to_string(),
        mode,
        subject: SUBJECT.to_string(),
        syllabus: SYLLABUS.to_string(),
        standard: STANDARD.to_string(),
    }
}

fn bank_ref(n: u8) -> SlotRef {
    SlotRef::Bank {
        question_id: question_id(n),
    }
}

#[tokio::test]
async fn random_session_splits_pool_into_three_sections() {
    let bank = Arc::new(FakeBank::with_questions(30, "42"));
    let store = Arc::new(InMemoryStore::default());
    let generator = SessionGenerator::new(bank, store.clone());

    let (session, resumed) = generator
        .generate(USER, QuizMode::Random, base_request())
        .await
        .unwrap();

    assert!(!resumed);
    assert_eq!(session.sections.len(), 3);
    assert!(session.sections.iter().all(|s| s.slots.len() == 10));
    assert_eq!(session.current, Some(SlotPosition { section: 0, slot: 0 }));
    assert_eq!(session.progress.status, ProgressStatus::NotStarted);
    assert_eq!(session.progress.completed_questions, 0);
    assert!(session
        .iter_slots()
        .all(|(_, slot)| slot.status == SlotStatus::Pending && slot.attempts == 0));
    assert_eq!(store.session_count(), 1);
}

#[tokio::test]
async fn insufficient_pool_fails_without_persisting() {
    let bank = Arc::new(FakeBank::with_questions(25, "42"));
    let store = Arc::new(InMemoryStore::default());
    let generator = SessionGenerator::new(bank, store.clone());

    let err = generator
        .generate(USER, QuizMode::Random, base_request())
        .await
        .unwrap_err();

    match err {
        AppError::InsufficientQuestions { required, found } => {
            assert_eq!(required, 30);
            assert_eq!(found, 25);
        }
        other => panic!("expected InsufficientQuestions, got {:?}", other),
    }
    assert_eq!(store.session_count(), 0);
}

#[tokio::test]
async fn repeated_generation_resumes_the_same_session() {
    let bank = Arc::new(FakeBank::with_questions(30, "42"));
    let store = Arc::new(InMemoryStore::default());
    let generator = SessionGenerator::new(bank, store.clone());

    let (first, resumed_first) = generator
        .generate(USER, QuizMode::Random, base_request())
        .await
        .unwrap();
    let (second, resumed_second) = generator
        .generate(USER, QuizMode::Random, base_request())
        .await
        .unwrap();

    assert!(!resumed_first);
    assert!(resumed_second);
    assert_eq!(first.id, second.id);
    assert_eq!(store.session_count(), 1);
}

#[tokio::test]
async fn grading_advances_progress_and_completes() {
    let bank = Arc::new(FakeBank::with_questions(3, "42"));
    let store = Arc::new(InMemoryStore::default());
    let generator = SessionGenerator::new(bank.clone(), store.clone());

    let mut request = base_request();
    request.total_questions = Some(1);
    let (session, _) = generator
        .generate(USER, QuizMode::Random, request)
        .await
        .unwrap();
    assert_eq!(session.total_slots(), 3);

    let grader = AnswerGrader::new(bank, store.clone());
    let k = key(QuizMode::Random);

    let result = grader.grade(&k, &bank_ref(1), " 42 ").await.unwrap();
    assert!(result.is_correct);
    assert!(result.correct_answer.is_none());
    assert_eq!(result.outcome, GradeOutcome::Advanced);
    assert_eq!(result.progress.correct_answers, 1);
    assert_eq!(result.progress.completed_questions, 1);
    assert_eq!(result.progress.status, ProgressStatus::InProgress);
    assert_eq!(result.current, Some(SlotPosition { section: 1, slot: 0 }));

    let result = grader.grade(&k, &bank_ref(2), "wrong").await.unwrap();
    assert!(!result.is_correct);
    assert_eq!(result.correct_answer.as_deref(), Some("42"));
    assert_eq!(result.progress.wrong_answers, 1);

    let result = grader.grade(&k, &bank_ref(3), "42").await.unwrap();
    assert_eq!(result.outcome, GradeOutcome::Completed);
    assert_eq!(result.progress.status, ProgressStatus::Completed);
    assert!(result.current.is_none());

    let stored = store.get(session.id.unwrap()).unwrap();
    assert!(!stored.is_active);
    assert!(stored.current.is_none());

    // A finished session refuses further grading.
    let err = grader.grade(&k, &bank_ref(1), "42").await.unwrap_err();
    assert!(matches!(err, AppError::SessionInactive));
}

#[tokio::test]
async fn timed_session_cuts_off_at_wrong_answer_limit() {
    let bank = Arc::new(FakeBank::with_questions(10, "42"));
    let store = Arc::new(InMemoryStore::default());
    let generator = SessionGenerator::new(bank.clone(), store.clone());

    let mut request = base_request();
    request.challenge_minutes = Some(5);
    request.wrong_answers_limit = Some(3);
    let (session, _) = generator
        .generate(USER, QuizMode::Timed, request)
        .await
        .unwrap();
    assert_eq!(session.total_slots(), 10);
    assert_eq!(session.wrong_answers_limit, 3);

    let grader = AnswerGrader::new(bank, store.clone());
    let k = key(QuizMode::Timed);

    for n in 1..=2u8 {
        let result = grader.grade(&k, &bank_ref(n), "wrong").await.unwrap();
        assert_eq!(result.outcome, GradeOutcome::Advanced);
    }
    let result = grader.grade(&k, &bank_ref(3), "wrong").await.unwrap();

    assert_eq!(result.outcome, GradeOutcome::WrongLimitReached);
    assert_eq!(result.progress.wrong_answers, 3);
    assert!(result.current.is_none());

    let stored = store.get(session.id.unwrap()).unwrap();
    assert!(!stored.is_active);
    assert_eq!(stored.progress.status, ProgressStatus::Completed);
    // Cut off well before the pool was exhausted.
    assert!(stored.progress.completed_questions < stored.total_slots() as u32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_lose_no_updates() {
    let bank = Arc::new(FakeBank::with_questions(10, "42"));
    let store = Arc::new(InMemoryStore::default());
    let generator = SessionGenerator::new(bank.clone(), store.clone());

    let mut request = base_request();
    request.challenge_minutes = Some(5);
    let (session, _) = generator
        .generate(USER, QuizMode::Timed, request)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for n in 1..=4u8 {
        let grader = AnswerGrader::new(bank.clone(), store.clone());
        let k = key(QuizMode::Timed);
        handles.push(tokio::spawn(async move {
            grader.grade(&k, &bank_ref(n), "42").await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Every submission survived the races: counters equal slot states.
    let stored = store.get(session.id.unwrap()).unwrap();
    assert_eq!(stored.progress.completed_questions, 4);
    assert_eq!(stored.progress.correct_answers, 4);
    let answered = stored
        .iter_slots()
        .filter(|(_, slot)| slot.status == SlotStatus::Correct)
        .count();
    assert_eq!(answered, 4);
}

#[tokio::test]
async fn missed_session_collects_incorrect_answers_across_modes() {
    let bank = Arc::new(FakeBank::with_questions(30, "42"));
    let store = Arc::new(InMemoryStore::default());
    let generator = SessionGenerator::new(bank.clone(), store.clone());

    // Answer two questions wrong in a random session first.
    let (_, _) = generator
        .generate(USER, QuizMode::Random, base_request())
        .await
        .unwrap();
    let grader = AnswerGrader::new(bank.clone(), store.clone());
    let k = key(QuizMode::Random);
    grader.grade(&k, &bank_ref(1), "wrong").await.unwrap();
    grader.grade(&k, &bank_ref(2), "wrong").await.unwrap();
    grader.grade(&k, &bank_ref(3), "42").await.unwrap();

    let (missed, _) = generator
        .generate(USER, QuizMode::Missed, base_request())
        .await
        .unwrap();

    assert_eq!(missed.mode, QuizMode::Missed);
    assert_eq!(missed.sections.len(), 1);
    let refs: Vec<SlotRef> = missed
        .iter_slots()
        .map(|(_, slot)| slot.question.clone())
        .collect();
    assert_eq!(refs, vec![bank_ref(1), bank_ref(2)]);
    assert!(missed
        .iter_slots()
        .all(|(_, slot)| slot.status == SlotStatus::Pending));
}

#[tokio::test]
async fn previous_year_session_grades_paper_questions() {
    let mut bank = FakeBank::default();
    bank.papers.push(paper(200, 6));
    let bank = Arc::new(bank);
    let store = Arc::new(InMemoryStore::default());
    let generator = SessionGenerator::new(bank.clone(), store.clone());

    let mut request = base_request();
    request.total_questions = Some(6);
    let (session, _) = generator
        .generate(USER, QuizMode::PreviousYear, request)
        .await
        .unwrap();

    assert_eq!(session.sections.len(), 3);
    assert_eq!(session.total_slots(), 6);
    let first = match session.iter_slots().next().unwrap().1.question.clone() {
        SlotRef::Paper {
            paper_id,
            question_index,
        } => (paper_id, question_index),
        other => panic!("expected paper ref, got {:?}", other),
    };

    let grader = AnswerGrader::new(bank, store);
    let k = key(QuizMode::PreviousYear);
    let slot_ref = SlotRef::Paper {
        paper_id: first.0,
        question_index: first.1,
    };
    let result = grader
        .grade(&k, &slot_ref, &format!("Answer-{}", first.1))
        .await
        .unwrap();
    assert!(result.is_correct);
}

#[tokio::test]
async fn flagging_builds_and_unflagging_drains_the_review_session() {
    let bank = Arc::new(FakeBank::with_questions(3, "42"));
    let store = Arc::new(InMemoryStore::default());
    let generator = SessionGenerator::new(bank, store.clone());

    let session = generator.flag_question(USER, question_id(1)).await.unwrap();
    assert_eq!(session.total_slots(), 1);
    assert!(session.is_active);

    // Flagging twice does not duplicate the slot.
    let session = generator.flag_question(USER, question_id(1)).await.unwrap();
    assert_eq!(session.total_slots(), 1);

    let session = generator.flag_question(USER, question_id(2)).await.unwrap();
    assert_eq!(session.total_slots(), 2);

    generator.unflag_question(USER, question_id(1)).await.unwrap();
    let session = generator.unflag_question(USER, question_id(2)).await.unwrap();
    assert_eq!(session.total_slots(), 0);
    assert!(!session.is_active);
}

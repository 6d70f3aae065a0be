use chrono::{DateTime, Utc};
use mongodb::bson::{oid::ObjectId, Bson};
use serde::Serialize;
use std::collections::HashMap;

use crate::error::AppError;
use crate::models::paper::QuestionPaper;
use crate::models::question::Question;
use crate::models::{
    Progress, QuizMode, SectionedSession, Slot, SlotPosition, SlotRef, SlotStatus,
};
use crate::services::question_pool::QuestionBank;

/// Joins session slot references back to full question content for
/// presentation. One batch query per collection touched, never per slot.
pub struct SessionView<B> {
    bank: B,
}

#[derive(Debug, Serialize)]
pub struct PresentableSession {
    pub session_id: String,
    pub mode: QuizMode,
    pub subject: String,
    pub syllabus: String,
    pub standard: String,
    pub is_active: bool,
    pub time_limit_minutes: u32,
    pub progress: Progress,
    pub sections: Vec<PresentableSection>,
    pub current: Option<PresentableCurrent>,
}

#[derive(Debug, Serialize)]
pub struct PresentableSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub time_limit_seconds: u32,
    pub slots: Vec<PresentableSlot>,
}

#[derive(Debug, Serialize)]
pub struct PresentableSlot {
    pub question_ref: SlotRef,
    pub number: u32,
    pub status: SlotStatus,
    pub attempts: u32,
    pub answered_at: Option<DateTime<Utc>>,
    pub question: String,
    pub options: Vec<NormalizedOption>,
    pub correct_answer: String,
}

#[derive(Debug, Serialize)]
pub struct PresentableCurrent {
    pub position: SlotPosition,
    pub question_ref: SlotRef,
    pub question: String,
    pub options: Vec<NormalizedOption>,
}

/// Canonical option shape presented to clients regardless of how the
/// bank document stored it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedOption {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagram_url: Option<String>,
}

impl<B: QuestionBank> SessionView<B> {
    pub fn new(bank: B) -> Self {
        Self { bank }
    }

    pub async fn materialize(
        &self,
        session: &SectionedSession,
    ) -> Result<PresentableSession, AppError> {
        let mut bank_ids: Vec<ObjectId> = Vec::new();
        let mut paper_ids: Vec<ObjectId> = Vec::new();
        for (_, slot) in session.iter_slots() {
            match &slot.question {
                SlotRef::Bank { question_id } => bank_ids.push(*question_id),
                SlotRef::Paper { paper_id, .. } => paper_ids.push(*paper_id),
            }
        }
        bank_ids.dedup();
        paper_ids.sort_unstable();
        paper_ids.dedup();

        let questions: HashMap<ObjectId, Question> = self
            .bank
            .find_by_ids(&bank_ids)
            .await?
            .into_iter()
            .filter_map(|q| q.id.map(|id| (id, q)))
            .collect();
        let papers: HashMap<ObjectId, QuestionPaper> = self
            .bank
            .find_papers_by_ids(&paper_ids)
            .await?
            .into_iter()
            .filter_map(|p| p.id.map(|id| (id, p)))
            .collect();

        let resolve = |slot: &Slot| -> (String, Vec<NormalizedOption>, String) {
            match &slot.question {
                SlotRef::Bank { question_id } => match questions.get(question_id) {
                    Some(q) => (
                        q.question.clone(),
                        q.options.iter().map(normalize_option).collect(),
                        q.correct_answer.clone(),
                    ),
                    None => (String::new(), Vec::new(), String::new()),
                },
                SlotRef::Paper {
                    paper_id,
                    question_index,
                } => match papers
                    .get(paper_id)
                    .and_then(|p| p.questions.get(*question_index as usize))
                {
                    Some(q) => (
                        q.question.clone(),
                        q.options.iter().map(normalize_option).collect(),
                        q.correct_answer.clone(),
                    ),
                    None => (String::new(), Vec::new(), String::new()),
                },
            }
        };

        let sections = session
            .sections
            .iter()
            .map(|section| PresentableSection {
                topic: section.topic.clone(),
                time_limit_seconds: section.time_limit_seconds,
                slots: section
                    .slots
                    .iter()
                    .map(|slot| {
                        let (question, options, correct_answer) = resolve(slot);
                        PresentableSlot {
                            question_ref: slot.question.clone(),
                            number: slot.number,
                            status: slot.status,
                            attempts: slot.attempts,
                            answered_at: slot.answered_at,
                            question,
                            options,
                            correct_answer,
                        }
                    })
                    .collect(),
            })
            .collect();

        let current = session.current.and_then(|position| {
            session.slot_at(position).map(|slot| {
                let (question, options, _) = resolve(slot);
                PresentableCurrent {
                    position,
                    question_ref: slot.question.clone(),
                    question,
                    options,
                }
            })
        });

        Ok(PresentableSession {
            session_id: session.id.map(|id| id.to_hex()).unwrap_or_default(),
            mode: session.mode,
            subject: session.subject.clone(),
            syllabus: session.syllabus.clone(),
            standard: session.standard.clone(),
            is_active: session.is_active,
            time_limit_minutes: session.time_limit_minutes,
            progress: session.progress.clone(),
            sections,
            current,
        })
    }
}

/// Fold the bank's accumulated option shapes into `{text, diagram_url?}`.
///
/// Precedence: explicit non-empty `text` field, then `diagramUrl`-only,
/// then concatenation of numeric-indexed keys in order, then
/// concatenation of remaining string-valued fields, then empty. Purely
/// cosmetic; grading always compares against the raw stored answer.
pub fn normalize_option(raw: &Bson) -> NormalizedOption {
    match raw {
        Bson::String(s) => NormalizedOption {
            text: s.trim().to_string(),
            diagram_url: None,
        },
        Bson::Document(doc) => {
            let diagram_url = doc
                .get("diagramUrl")
                .or_else(|| doc.get("diagram_url"))
                .and_then(|v| v.as_str())
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(String::from);

            if let Some(text) = doc
                .get("text")
                .and_then(|v| v.as_str())
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
            {
                return NormalizedOption {
                    text: text.to_string(),
                    diagram_url,
                };
            }

            if diagram_url.is_some() {
                return NormalizedOption {
                    text: String::new(),
                    diagram_url,
                };
            }

            // Legacy numeric-keyed pseudo-arrays, e.g. {"0": "a", "1": "b"}.
            let mut numeric: Vec<(u64, &str)> = doc
                .iter()
                .filter_map(|(k, v)| {
                    let index = k.parse::<u64>().ok()?;
                    v.as_str().map(|s| (index, s))
                })
                .collect();
            if !numeric.is_empty() {
                numeric.sort_by_key(|(index, _)| *index);
                let joined: String = numeric.into_iter().map(|(_, s)| s.trim()).collect();
                if !joined.is_empty() {
                    return NormalizedOption {
                        text: joined,
                        diagram_url: None,
                    };
                }
            }

            // Last resort: join whatever string fields remain.
            let joined = doc
                .iter()
                .filter(|(k, _)| !matches!(k.as_str(), "_id" | "id" | "__v" | "diagramUrl"))
                .filter_map(|(_, v)| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            NormalizedOption {
                text: joined,
                diagram_url: None,
            }
        }
        _ => NormalizedOption {
            text: String::new(),
            diagram_url: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn plain_string_becomes_text() {
        let got = normalize_option(&Bson::String("  2.5 m/s ".into()));
        assert_eq!(got.text, "2.5 m/s");
        assert!(got.diagram_url.is_none());
    }

    #[test]
    fn explicit_text_wins_over_everything() {
        let raw = Bson::Document(doc! {
            "text": " Kinetic energy ",
            "diagramUrl": "https://img.example/ke.png",
            "0": "ignored",
        });
        let got = normalize_option(&raw);
        assert_eq!(got.text, "Kinetic energy");
        assert_eq!(got.diagram_url.as_deref(), Some("https://img.example/ke.png"));
    }

    #[test]
    fn diagram_only_option_keeps_empty_text() {
        let raw = Bson::Document(doc! { "text": "", "diagramUrl": "https://img.example/d.png" });
        let got = normalize_option(&raw);
        assert_eq!(got.text, "");
        assert_eq!(got.diagram_url.as_deref(), Some("https://img.example/d.png"));
    }

    #[test]
    fn numeric_keys_join_in_order() {
        let raw = Bson::Document(doc! { "1": "b", "0": "a", "2": "c", "_id": "x" });
        let got = normalize_option(&raw);
        assert_eq!(got.text, "abc");
    }

    #[test]
    fn string_fields_join_as_fallback() {
        let raw = Bson::Document(doc! { "label": "Option", "value": "A", "__v": "0" });
        let got = normalize_option(&raw);
        assert_eq!(got.text, "Option A");
    }

    #[test]
    fn unknown_shapes_collapse_to_empty() {
        assert_eq!(normalize_option(&Bson::Int32(7)).text, "");
        let raw = Bson::Document(doc! { "_id": "x" });
        assert_eq!(normalize_option(&raw).text, "");
    }
}

use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::Database;

use crate::error::AppError;
use crate::models::paper::QuestionPaper;
use crate::models::question::Question;
use crate::models::SlotRef;

/// Filter over the question bank. Empty vectors mean "no constraint".
#[derive(Debug, Clone, Default)]
pub struct PoolCriteria {
    pub subject: String,
    pub syllabus: String,
    pub standard: String,
    pub topics: Vec<String>,
    pub difficulties: Vec<String>,
    pub frequently_asked: bool,
}

/// Filter over previous-year papers.
#[derive(Debug, Clone, Default)]
pub struct PaperCriteria {
    pub subject: String,
    pub syllabus: String,
    pub standard: String,
    pub years: Vec<i32>,
    pub units: Vec<String>,
    pub frequently_asked: bool,
}

/// Read-only accessor over the question bank, consumed by every session
/// generator. Sampling is uniform over the filtered candidate set; nothing
/// avoids previously served questions unless the caller excludes them.
#[async_trait]
pub trait QuestionBank: Send + Sync {
    /// Random sample without replacement, optionally excluding ids already
    /// placed in a session.
    async fn sample(
        &self,
        criteria: &PoolCriteria,
        count: usize,
        exclude: &[ObjectId],
    ) -> Result<Vec<ObjectId>, AppError>;

    async fn count(&self, criteria: &PoolCriteria) -> Result<u64, AppError>;

    async fn find_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<Question>, AppError>;

    async fn find_papers_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<QuestionPaper>, AppError>;

    /// Deterministic expansion of matching papers into (paper, index)
    /// refs. Paper questions are embedded sub-documents, never sampled
    /// server-side.
    async fn paper_slots(&self, criteria: &PaperCriteria) -> Result<Vec<SlotRef>, AppError>;

    /// Canonical answer for a slot reference, wherever it lives.
    async fn correct_answer(&self, slot: &SlotRef) -> Result<String, AppError>;

    async fn distinct_topics(&self, criteria: &PoolCriteria) -> Result<Vec<String>, AppError>;

    async fn distinct_years(&self, criteria: &PaperCriteria) -> Result<Vec<i32>, AppError>;

    async fn distinct_units(&self, criteria: &PaperCriteria) -> Result<Vec<String>, AppError>;
}

#[async_trait]
impl<T: QuestionBank + ?Sized> QuestionBank for std::sync::Arc<T> {
    async fn sample(
        &self,
        criteria: &PoolCriteria,
        count: usize,
        exclude: &[ObjectId],
    ) -> Result<Vec<ObjectId>, AppError> {
        (**self).sample(criteria, count, exclude).await
    }

    async fn count(&self, criteria: &PoolCriteria) -> Result<u64, AppError> {
        (**self).count(criteria).await
    }

    async fn find_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<Question>, AppError> {
        (**self).find_by_ids(ids).await
    }

    async fn find_papers_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<QuestionPaper>, AppError> {
        (**self).find_papers_by_ids(ids).await
    }

    async fn paper_slots(&self, criteria: &PaperCriteria) -> Result<Vec<SlotRef>, AppError> {
        (**self).paper_slots(criteria).await
    }

    async fn correct_answer(&self, slot: &SlotRef) -> Result<String, AppError> {
        (**self).correct_answer(slot).await
    }

    async fn distinct_topics(&self, criteria: &PoolCriteria) -> Result<Vec<String>, AppError> {
        (**self).distinct_topics(criteria).await
    }

    async fn distinct_years(&self, criteria: &PaperCriteria) -> Result<Vec<i32>, AppError> {
        (**self).distinct_years(criteria).await
    }

    async fn distinct_units(&self, criteria: &PaperCriteria) -> Result<Vec<String>, AppError> {
        (**self).distinct_units(criteria).await
    }
}

pub struct MongoQuestionBank {
    mongo: Database,
}

impl MongoQuestionBank {
    pub const QUESTIONS: &'static str = "questions";
    pub const PAPERS: &'static str = "question_papers";

    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn questions(&self) -> mongodb::Collection<Question> {
        self.mongo.collection(Self::QUESTIONS)
    }

    fn papers(&self) -> mongodb::Collection<QuestionPaper> {
        self.mongo.collection(Self::PAPERS)
    }

    fn question_filter(criteria: &PoolCriteria) -> Document {
        let mut filter = doc! {
            "subject": &criteria.subject,
            "syllabus": &criteria.syllabus,
            "standard": &criteria.standard,
        };
        if !criteria.topics.is_empty() {
            filter.insert("topic", doc! { "$in": criteria.topics.clone() });
        }
        if !criteria.difficulties.is_empty() {
            filter.insert("difficulty", doc! { "$in": criteria.difficulties.clone() });
        }
        if criteria.frequently_asked {
            filter.insert("frequently_asked", true);
        }
        filter
    }

    fn paper_filter(criteria: &PaperCriteria) -> Document {
        let mut filter = doc! {
            "subject": &criteria.subject,
            "syllabus": &criteria.syllabus,
            "standard": &criteria.standard,
        };
        if !criteria.years.is_empty() {
            filter.insert("exam_year", doc! { "$in": criteria.years.clone() });
        }
        if !criteria.units.is_empty() {
            filter.insert("unit", doc! { "$in": criteria.units.clone() });
        }
        filter
    }
}

#[async_trait]
impl QuestionBank for MongoQuestionBank {
    async fn sample(
        &self,
        criteria: &PoolCriteria,
        count: usize,
        exclude: &[ObjectId],
    ) -> Result<Vec<ObjectId>, AppError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut filter = Self::question_filter(criteria);
        if !exclude.is_empty() {
            filter.insert("_id", doc! { "$nin": exclude.to_vec() });
        }

        let pipeline = vec![
            doc! { "$match": filter },
            doc! { "$sample": { "size": count as i64 } },
            doc! { "$project": { "_id": 1 } },
        ];

        let mut cursor = self
            .mongo
            .collection::<Document>(Self::QUESTIONS)
            .aggregate(pipeline)
            .await?;

        let mut ids = Vec::with_capacity(count);
        while let Some(document) = cursor.try_next().await? {
            if let Ok(id) = document.get_object_id("_id") {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn count(&self, criteria: &PoolCriteria) -> Result<u64, AppError> {
        let count = self
            .questions()
            .count_documents(Self::question_filter(criteria))
            .await?;
        Ok(count)
    }

    async fn find_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<Question>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let cursor = self
            .questions()
            .find(doc! { "_id": { "$in": ids.to_vec() } })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_papers_by_ids(&self, ids: &[ObjectId]) -> Result<Vec<QuestionPaper>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let cursor = self
            .papers()
            .find(doc! { "_id": { "$in": ids.to_vec() } })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn paper_slots(&self, criteria: &PaperCriteria) -> Result<Vec<SlotRef>, AppError> {
        let mut cursor = self.papers().find(Self::paper_filter(criteria)).await?;

        let mut slots = Vec::new();
        while let Some(paper) = cursor.try_next().await? {
            let paper_id = match paper.id {
                Some(id) => id,
                None => continue,
            };
            for (index, question) in paper.questions.iter().enumerate() {
                if criteria.frequently_asked && !question.frequently_asked {
                    continue;
                }
                slots.push(SlotRef::Paper {
                    paper_id,
                    question_index: index as u32,
                });
            }
        }
        Ok(slots)
    }

    async fn correct_answer(&self, slot: &SlotRef) -> Result<String, AppError> {
        match slot {
            SlotRef::Bank { question_id } => {
                let question = self
                    .questions()
                    .find_one(doc! { "_id": question_id })
                    .await?
                    .ok_or(AppError::NotFound("Question"))?;
                Ok(question.correct_answer)
            }
            SlotRef::Paper {
                paper_id,
                question_index,
            } => {
                let paper = self
                    .papers()
                    .find_one(doc! { "_id": paper_id })
                    .await?
                    .ok_or(AppError::NotFound("Question paper"))?;
                paper
                    .questions
                    .get(*question_index as usize)
                    .map(|q| q.correct_answer.clone())
                    .ok_or(AppError::NotFound("Question"))
            }
        }
    }

    async fn distinct_topics(&self, criteria: &PoolCriteria) -> Result<Vec<String>, AppError> {
        let values = self
            .questions()
            .distinct("topic", Self::question_filter(criteria))
            .await?;
        let mut topics: Vec<String> = values
            .into_iter()
            .filter_map(|v| match v {
                Bson::String(s) => Some(s),
                _ => None,
            })
            .collect();
        topics.sort();
        Ok(topics)
    }

    async fn distinct_years(&self, criteria: &PaperCriteria) -> Result<Vec<i32>, AppError> {
        let values = self
            .papers()
            .distinct("exam_year", Self::paper_filter(criteria))
            .await?;
        let mut years: Vec<i32> = values
            .into_iter()
            .filter_map(|v| match v {
                Bson::Int32(y) => Some(y),
                Bson::Int64(y) => i32::try_from(y).ok(),
                _ => None,
            })
            .collect();
        // Newest first for pickers.
        years.sort_unstable_by(|a, b| b.cmp(a));
        Ok(years)
    }

    async fn distinct_units(&self, criteria: &PaperCriteria) -> Result<Vec<String>, AppError> {
        let values = self
            .papers()
            .distinct("unit", Self::paper_filter(criteria))
            .await?;
        let mut units: Vec<String> = values
            .into_iter()
            .filter_map(|v| match v {
                Bson::String(s) => Some(s),
                _ => None,
            })
            .collect();
        units.sort();
        Ok(units)
    }
}

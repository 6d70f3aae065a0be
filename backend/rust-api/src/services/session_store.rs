use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use mongodb::{Database, IndexModel};

use crate::error::AppError;
use crate::models::{QuizMode, SectionedSession, SessionKey};

/// Persistence seam for session documents. The Mongo implementation is the
/// production one; tests drive the generator and grader through in-memory
/// implementations.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The active session for the key, if any.
    async fn find_active(&self, key: &SessionKey) -> Result<Option<SectionedSession>, AppError>;

    /// Most recently created session for the key, active or not. Graders
    /// use this so answers against a finished session fail with
    /// `SessionInactive` rather than a bare not-found.
    async fn find_latest(&self, key: &SessionKey) -> Result<Option<SectionedSession>, AppError>;

    /// Insert a new session, filling in its id. The partial unique index
    /// over active keys makes the at-most-one-active contract atomic:
    /// losing a creation race surfaces `DuplicateActiveSession`.
    async fn insert(&self, session: &mut SectionedSession) -> Result<ObjectId, AppError>;

    /// Version-checked full-document update. The filter matches the
    /// version the document was read at; a miss means a concurrent writer
    /// won and the caller must re-read (`Conflict`).
    async fn update(&self, session: &mut SectionedSession) -> Result<(), AppError>;

    /// Every session of the user for the subject triple, across all modes.
    /// Feeds the missed-questions collector and the personalized
    /// attempted-questions source.
    async fn find_for_user(
        &self,
        user_id: &str,
        subject: &str,
        syllabus: &str,
        standard: &str,
    ) -> Result<Vec<SectionedSession>, AppError>;
}

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for std::sync::Arc<T> {
    async fn find_active(&self, key: &SessionKey) -> Result<Option<SectionedSession>, AppError> {
        (**self).find_active(key).await
    }

    async fn find_latest(&self, key: &SessionKey) -> Result<Option<SectionedSession>, AppError> {
        (**self).find_latest(key).await
    }

    async fn insert(&self, session: &mut SectionedSession) -> Result<ObjectId, AppError> {
        (**self).insert(session).await
    }

    async fn update(&self, session: &mut SectionedSession) -> Result<(), AppError> {
        (**self).update(session).await
    }

    async fn find_for_user(
        &self,
        user_id: &str,
        subject: &str,
        syllabus: &str,
        standard: &str,
    ) -> Result<Vec<SectionedSession>, AppError> {
        (**self)
            .find_for_user(user_id, subject, syllabus, standard)
            .await
    }
}

pub struct MongoSessionStore {
    mongo: Database,
}

impl MongoSessionStore {
    pub const COLLECTION: &'static str = "quiz_sessions";

    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn sessions(&self) -> mongodb::Collection<SectionedSession> {
        self.mongo.collection(Self::COLLECTION)
    }

    fn key_filter(key: &SessionKey) -> Document {
        doc! {
            "user_id": &key.user_id,
            "mode": key.mode.as_str(),
            "subject": &key.subject,
            "syllabus": &key.syllabus,
            "standard": &key.standard,
        }
    }

    /// Partial unique index backing the at-most-one-active-per-key
    /// contract. Called once at startup.
    pub async fn ensure_indexes(&self) -> Result<(), AppError> {
        let index = IndexModel::builder()
            .keys(doc! {
                "user_id": 1,
                "mode": 1,
                "subject": 1,
                "syllabus": 1,
                "standard": 1,
            })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .partial_filter_expression(doc! { "is_active": true })
                    .build(),
            )
            .build();

        self.sessions().create_index(index).await?;
        Ok(())
    }

    fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
        if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(we)) =
            &*err.kind
        {
            return we.code == 11000;
        }
        false
    }
}

#[async_trait]
impl SessionStore for MongoSessionStore {
    async fn find_active(&self, key: &SessionKey) -> Result<Option<SectionedSession>, AppError> {
        let mut filter = Self::key_filter(key);
        filter.insert("is_active", true);
        Ok(self.sessions().find_one(filter).await?)
    }

    async fn find_latest(&self, key: &SessionKey) -> Result<Option<SectionedSession>, AppError> {
        let found = self
            .sessions()
            .find_one(Self::key_filter(key))
            .sort(doc! { "created_at": -1 })
            .await?;
        Ok(found)
    }

    async fn insert(&self, session: &mut SectionedSession) -> Result<ObjectId, AppError> {
        let result = self.sessions().insert_one(&*session).await.map_err(|err| {
            if Self::is_duplicate_key(&err) {
                AppError::DuplicateActiveSession
            } else {
                AppError::from(err)
            }
        })?;

        let id = result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| AppError::Infrastructure(anyhow::anyhow!("inserted id is not an ObjectId")))?;
        session.id = Some(id);
        Ok(id)
    }

    async fn update(&self, session: &mut SectionedSession) -> Result<(), AppError> {
        let id = session
            .id
            .ok_or_else(|| AppError::Infrastructure(anyhow::anyhow!("session has no id")))?;
        let read_version = session.version;
        session.version = read_version + 1;

        let result = self
            .sessions()
            .replace_one(doc! { "_id": id, "version": read_version }, &*session)
            .await;

        match result {
            Ok(outcome) if outcome.matched_count == 1 => Ok(()),
            Ok(_) => {
                session.version = read_version;
                Err(AppError::Conflict)
            }
            Err(err) => {
                session.version = read_version;
                Err(AppError::from(err))
            }
        }
    }

    async fn find_for_user(
        &self,
        user_id: &str,
        subject: &str,
        syllabus: &str,
        standard: &str,
    ) -> Result<Vec<SectionedSession>, AppError> {
        let cursor = self
            .sessions()
            .find(doc! {
                "user_id": user_id,
                "subject": subject,
                "syllabus": syllabus,
                "standard": standard,
            })
            .await?;
        Ok(cursor.try_collect().await?)
    }
}

/// Filter helper shared by callers that sift other sessions for a given
/// mode (e.g. excluding the missed session itself from its own sources).
pub fn sessions_excluding_mode(
    sessions: Vec<SectionedSession>,
    mode: QuizMode,
) -> Vec<SectionedSession> {
    sessions.into_iter().filter(|s| s.mode != mode).collect()
}

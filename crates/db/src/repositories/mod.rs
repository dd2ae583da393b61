use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use thiserror::Error;

use studymate_core::domain::identity::UserId;
use studymate_core::domain::rate_limit::QuotaDecision;
use studymate_core::domain::research::ResearchCacheEntry;
use studymate_core::domain::study::{
    Enrollment, FlashcardDeck, JournalEntry, Profile, ProgressStats, Quiz, StoredFile,
    StudySession, StudyTask, TaskId,
};
use studymate_core::errors::ApplicationError;

pub mod memory;
pub mod rate_limit;
pub mod research_cache;
pub mod study;

pub use memory::{InMemoryRateLimitRepository, InMemoryResearchCacheRepository, InMemoryStudyStore};
pub use rate_limit::SqlRateLimitRepository;
pub use research_cache::SqlResearchCacheRepository;
pub use study::SqlStudyStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Timestamps are stored as second-precision RFC 3339 in UTC so they compare
/// lexically in SQL.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn format_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Persistence(value.to_string())
    }
}

/// Research briefs shared by every user.
#[async_trait]
pub trait ResearchCacheRepository: Send + Sync {
    /// Returns the entry and bumps its `access_count` by one. The returned
    /// entry reflects the incremented count.
    async fn lookup(&self, cache_key: &str) -> Result<Option<ResearchCacheEntry>, RepositoryError>;

    /// Inserts or replaces the brief for `entry.cache_key`, keeping the
    /// existing access count.
    async fn store(&self, entry: ResearchCacheEntry) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    /// Atomically counts one research attempt for `user_id` on `day` unless
    /// the user already reached `limit`.
    async fn check_and_consume(
        &self,
        user_id: &UserId,
        day: NaiveDate,
        limit: u32,
    ) -> Result<QuotaDecision, RepositoryError>;
}

/// Student data read by the context builder and mutated by tools. Every
/// method is scoped to the authenticated user.
#[async_trait]
pub trait StudyStore: Send + Sync {
    async fn profile(&self, user_id: &UserId) -> Result<Option<Profile>, RepositoryError>;

    async fn tasks_between(
        &self,
        user_id: &UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<StudyTask>, RepositoryError>;

    /// All tasks, most recently scheduled first, newest creation breaking ties.
    async fn list_tasks(&self, user_id: &UserId) -> Result<Vec<StudyTask>, RepositoryError>;

    async fn find_task(
        &self,
        user_id: &UserId,
        task_id: &TaskId,
    ) -> Result<Option<StudyTask>, RepositoryError>;

    async fn insert_task(&self, task: StudyTask) -> Result<(), RepositoryError>;

    /// Returns false when no task with that id belongs to the task's user.
    async fn update_task(&self, task: &StudyTask) -> Result<bool, RepositoryError>;

    async fn delete_task(&self, user_id: &UserId, task_id: &TaskId)
        -> Result<bool, RepositoryError>;

    async fn upcoming_sessions(
        &self,
        user_id: &UserId,
        after: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StudySession>, RepositoryError>;

    async fn active_enrollments(&self, user_id: &UserId)
        -> Result<Vec<Enrollment>, RepositoryError>;

    async fn recent_files(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<StoredFile>, RepositoryError>;

    async fn insert_deck(&self, deck: FlashcardDeck) -> Result<(), RepositoryError>;

    async fn insert_quiz(&self, quiz: Quiz) -> Result<(), RepositoryError>;

    async fn insert_journal_entry(&self, entry: JournalEntry) -> Result<(), RepositoryError>;

    async fn progress_stats(
        &self,
        user_id: &UserId,
        week_start: NaiveDate,
    ) -> Result<ProgressStats, RepositoryError>;
}

//! Student data owned by the external data service.
//!
//! The assistant only reads these through `StudyStore` and mutates them via
//! tools; every value is scoped to a single `UserId`.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::identity::UserId;
use crate::errors::DomainError;

pub const DEFAULT_TASK_DURATION_MINUTES: u32 = 30;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "normal" => Ok(Self::Medium),
            "high" | "urgent" => Ok(Self::High),
            other => Err(DomainError::InvalidArgument(format!(
                "unknown priority `{other}` (expected low|medium|high)"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyTask {
    pub id: TaskId,
    pub user_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub scheduled_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub duration_minutes: u32,
    pub priority: TaskPriority,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Partial update applied by `update_task`; `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub scheduled_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub duration_minutes: Option<u32>,
    pub priority: Option<TaskPriority>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply(&self, task: &mut StudyTask) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = Some(description.clone());
        }
        if let Some(subject) = &self.subject {
            task.subject = Some(subject.clone());
        }
        if let Some(scheduled_date) = self.scheduled_date {
            task.scheduled_date = scheduled_date;
        }
        if let Some(start_time) = self.start_time {
            task.start_time = Some(start_time);
        }
        if let Some(duration_minutes) = self.duration_minutes {
            task.duration_minutes = duration_minutes;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudySession {
    pub id: String,
    pub user_id: UserId,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub location: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: String,
    pub user_id: UserId,
    pub course_title: String,
    pub progress_pct: u8,
    pub active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: String,
    pub user_id: UserId,
    pub file_name: String,
    pub file_type: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub display_name: String,
    pub university: Option<String>,
    pub year_of_study: Option<u8>,
    pub study_streak_days: u32,
    pub total_study_minutes: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashcardDeck {
    pub id: String,
    pub user_id: UserId,
    pub title: String,
    pub subject: Option<String>,
    pub cards: Vec<Flashcard>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub explanation: Option<String>,
}

impl QuizQuestion {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.question.trim().is_empty() {
            return Err(DomainError::InvalidArgument("quiz question text is empty".to_string()));
        }
        if self.options.len() < 2 {
            return Err(DomainError::InvalidArgument(format!(
                "question `{}` needs at least two options",
                self.question
            )));
        }
        if self.correct_index >= self.options.len() {
            return Err(DomainError::InvalidArgument(format!(
                "question `{}` has correct_index {} but only {} options",
                self.question,
                self.correct_index,
                self.options.len()
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: String,
    pub user_id: UserId,
    pub title: String,
    pub subject: Option<String>,
    pub questions: Vec<QuizQuestion>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    pub user_id: UserId,
    pub title: Option<String>,
    pub content: String,
    pub mood: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStats {
    pub study_streak_days: u32,
    pub total_study_minutes: u32,
    pub tasks_total: u32,
    pub tasks_completed: u32,
    pub tasks_completed_this_week: u32,
    pub flashcard_decks: u32,
    pub quizzes: u32,
    pub journal_entries: u32,
}

impl ProgressStats {
    pub fn completion_rate_pct(&self) -> u32 {
        if self.tasks_total == 0 {
            return 0;
        }
        self.tasks_completed * 100 / self.tasks_total
    }
}

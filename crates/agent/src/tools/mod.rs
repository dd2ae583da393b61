//! Actions the model may take against the student's study data.
//!
//! Every tool runs with the authenticated user from [`ToolContext`]; argument
//! payloads never carry a user id. Failures come back to the model as
//! `success = false` results instead of failing the request.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use studymate_core::domain::conversation::{ToolCall, ToolResult};
use studymate_core::domain::identity::UserId;
use studymate_core::domain::study::{StudyTask, TaskId, TaskPriority};
use studymate_core::errors::DomainError;
use studymate_db::repositories::{RepositoryError, StudyStore};

use crate::llm::ToolSpec;

mod journal;
mod materials;
mod progress;
mod schedule;
mod tasks;

pub use journal::CreateJournalEntryTool;
pub use materials::{CreateFlashcardDeckTool, CreateQuizTool};
pub use progress::GetProgressStatsTool;
pub use schedule::{GetTodayScheduleTool, GetUpcomingSessionsTool, GetWeekScheduleTool};
pub use tasks::{AddStudyTaskTool, CompleteTaskTool, DeleteTaskTool, UpdateTaskTool};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    InvalidArguments(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("study data store failed: {0}")]
    Store(#[from] RepositoryError),
    #[error("tool payload could not be encoded: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ToolError {
    /// Text the model sees; storage details stay in the logs.
    fn model_message(&self) -> String {
        match self {
            Self::Store(_) | Self::Payload(_) => {
                "The study data service could not complete this action right now.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Request-scoped inputs shared by every tool call.
#[derive(Clone)]
pub struct ToolContext {
    pub user_id: UserId,
    pub now: DateTime<Utc>,
    pub store: Arc<dyn StudyStore>,
}

impl ToolContext {
    pub fn new(user_id: UserId, now: DateTime<Utc>, store: Arc<dyn StudyStore>) -> Self {
        Self { user_id, now, store }
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutput {
    pub message: String,
    pub payload: Value,
}

impl ToolOutput {
    pub fn new(message: impl Into<String>, payload: Value) -> Self {
        Self { message: message.into(), payload }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<ToolOutput, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    /// Registry holding every study-data tool.
    pub fn with_study_tools() -> Self {
        let mut registry = Self::default();
        registry.register(AddStudyTaskTool);
        registry.register(UpdateTaskTool);
        registry.register(CompleteTaskTool);
        registry.register(DeleteTaskTool);
        registry.register(GetTodayScheduleTool);
        registry.register(GetWeekScheduleTool);
        registry.register(GetUpcomingSessionsTool);
        registry.register(CreateFlashcardDeckTool);
        registry.register(CreateQuizTool);
        registry.register(CreateJournalEntryTool);
        registry.register(GetProgressStatsTool);
        registry
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas offered to the model, in a stable order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub async fn dispatch(&self, ctx: &ToolContext, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(
                event_name = "assistant.tool.unknown",
                user_id = %ctx.user_id,
                tool = %call.name,
                "model requested an unknown tool"
            );
            return ToolResult::failure(&call.id, format!("Unknown tool `{}`.", call.name));
        };

        match tool.execute(ctx, &call.arguments).await {
            Ok(output) => {
                info!(
                    event_name = "assistant.tool.succeeded",
                    user_id = %ctx.user_id,
                    tool = %call.name,
                    tool_call_id = %call.id,
                    "tool call succeeded"
                );
                ToolResult::ok(&call.id, output.message, output.payload)
            }
            Err(error) => {
                warn!(
                    event_name = "assistant.tool.failed",
                    user_id = %ctx.user_id,
                    tool = %call.name,
                    tool_call_id = %call.id,
                    error = %error,
                    "tool call failed"
                );
                ToolResult::failure(&call.id, error.model_message())
            }
        }
    }
}

pub(crate) fn required_str(args: &Value, key: &str) -> Result<String, ToolError> {
    optional_str(args, key)
        .ok_or_else(|| ToolError::InvalidArguments(format!("`{key}` is required")))
}

pub(crate) fn optional_str(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn optional_u32(args: &Value, key: &str) -> Result<Option<u32>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|number| u32::try_from(number).ok())
            .map(Some)
            .ok_or_else(|| {
                ToolError::InvalidArguments(format!("`{key}` must be a positive whole number"))
            }),
    }
}

/// Accepts `YYYY-MM-DD`, `today` or `tomorrow`.
pub(crate) fn optional_date(
    args: &Value,
    key: &str,
    today: NaiveDate,
) -> Result<Option<NaiveDate>, ToolError> {
    let Some(raw) = optional_str(args, key) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "today" => Ok(Some(today)),
        "tomorrow" => Ok(Some(today + Duration::days(1))),
        _ => NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map(Some).map_err(|_| {
            ToolError::InvalidArguments(format!("`{key}` must be a date like 2026-03-02"))
        }),
    }
}

pub(crate) fn optional_time(args: &Value, key: &str) -> Result<Option<NaiveTime>, ToolError> {
    let Some(raw) = optional_str(args, key) else {
        return Ok(None);
    };
    NaiveTime::parse_from_str(&raw, "%H:%M")
        .map(Some)
        .map_err(|_| {
            ToolError::InvalidArguments(format!("`{key}` must be a 24-hour time like 14:30"))
        })
}

pub(crate) fn optional_priority(args: &Value) -> Result<Option<TaskPriority>, ToolError> {
    optional_str(args, "priority")
        .map(|raw| raw.parse::<TaskPriority>())
        .transpose()
        .map_err(Into::into)
}

pub(crate) fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(i64::from(day.weekday().num_days_from_monday()))
}

/// Finds the task a call refers to: `task_id` first, otherwise the most
/// relevant case-insensitive substring match of `task_title`. Open tasks rank
/// ahead of completed ones, then the task scheduled closest to today, then
/// the most recently created.
pub(crate) async fn resolve_task(ctx: &ToolContext, args: &Value) -> Result<StudyTask, ToolError> {
    if let Some(task_id) = optional_str(args, "task_id") {
        return ctx
            .store
            .find_task(&ctx.user_id, &TaskId(task_id.clone()))
            .await?
            .ok_or_else(|| ToolError::NotFound(format!("No task with id `{task_id}` exists.")));
    }

    let Some(title) = optional_str(args, "task_title") else {
        return Err(ToolError::InvalidArguments(
            "provide `task_id` or `task_title` to identify the task".to_string(),
        ));
    };
    let needle = title.to_lowercase();
    let today = ctx.today();
    ctx.store
        .list_tasks(&ctx.user_id)
        .await?
        .into_iter()
        .filter(|task| task.title.to_lowercase().contains(&needle))
        .min_by_key(|task| {
            let distance = (task.scheduled_date - today).num_days().abs();
            (task.completed, distance, Reverse(task.created_at))
        })
        .ok_or_else(|| {
            ToolError::NotFound(format!(
                "No task matched \"{title}\". Ask the student which task they mean."
            ))
        })
}

pub(crate) fn task_selector_properties() -> serde_json::Map<String, Value> {
    let mut properties = serde_json::Map::new();
    properties.insert(
        "task_id".to_string(),
        serde_json::json!({"type": "string", "description": "Exact task id, when known."}),
    );
    properties.insert(
        "task_title".to_string(),
        serde_json::json!({
            "type": "string",
            "description": "Part of the task title; open tasks scheduled nearest today win."
        }),
    );
    properties
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use chrono::{DateTime, NaiveDate, TimeZone, Utc};

    use studymate_core::domain::identity::UserId;
    use studymate_core::domain::study::{StudyTask, TaskId, TaskPriority};
    use studymate_db::repositories::InMemoryStudyStore;

    use super::ToolContext;

    pub fn now() -> DateTime<Utc> {
        // Wednesday
        Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap()
    }

    pub fn context(store: &Arc<InMemoryStudyStore>, user: &str) -> ToolContext {
        ToolContext::new(UserId(user.into()), now(), store.clone())
    }

    pub fn task(user: &str, id: &str, title: &str, date: NaiveDate) -> StudyTask {
        StudyTask {
            id: TaskId(id.into()),
            user_id: UserId(user.into()),
            title: title.into(),
            description: None,
            subject: None,
            scheduled_date: date,
            start_time: None,
            duration_minutes: 30,
            priority: TaskPriority::Medium,
            completed: false,
            completed_at: None,
            created_at: now(),
        }
    }
}

use async_trait::async_trait;
use chrono::Duration;
use serde_json::{json, Value};

use studymate_core::domain::study::{StudySession, StudyTask};

use super::{optional_u32, week_start, Tool, ToolContext, ToolError, ToolOutput};

const DEFAULT_SESSION_LIMIT: u32 = 5;
const MAX_SESSION_LIMIT: u32 = 20;

fn task_entries(tasks: &[StudyTask]) -> Vec<Value> {
    tasks
        .iter()
        .map(|task| {
            json!({
                "task_id": task.id.0,
                "title": task.title,
                "date": task.scheduled_date.format("%Y-%m-%d").to_string(),
                "start_time": task.start_time.map(|time| time.format("%H:%M").to_string()),
                "duration_minutes": task.duration_minutes,
                "priority": task.priority.as_str(),
                "subject": task.subject,
                "completed": task.completed,
            })
        })
        .collect()
}

fn session_entries(sessions: &[StudySession]) -> Vec<Value> {
    sessions
        .iter()
        .map(|session| {
            json!({
                "title": session.title,
                "starts_at": session.starts_at.to_rfc3339(),
                "duration_minutes": session.duration_minutes,
                "location": session.location,
            })
        })
        .collect()
}

fn pending(tasks: &[StudyTask]) -> usize {
    tasks.iter().filter(|task| !task.completed).count()
}

pub struct GetTodayScheduleTool;

#[async_trait]
impl Tool for GetTodayScheduleTool {
    fn name(&self) -> &'static str {
        "get_today_schedule"
    }

    fn description(&self) -> &'static str {
        "List today's study tasks and any study sessions still to come today."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, ctx: &ToolContext, _args: &Value) -> Result<ToolOutput, ToolError> {
        let today = ctx.today();
        let tasks = ctx.store.tasks_between(&ctx.user_id, today, today).await?;
        let sessions: Vec<StudySession> = ctx
            .store
            .upcoming_sessions(&ctx.user_id, ctx.now, MAX_SESSION_LIMIT)
            .await?
            .into_iter()
            .filter(|session| session.starts_at.date_naive() == today)
            .collect();

        Ok(ToolOutput::new(
            format!(
                "{} task(s) today, {} still open, and {} session(s) remaining.",
                tasks.len(),
                pending(&tasks),
                sessions.len()
            ),
            json!({
                "date": today.format("%Y-%m-%d").to_string(),
                "tasks": task_entries(&tasks),
                "sessions": session_entries(&sessions),
            }),
        ))
    }
}

pub struct GetWeekScheduleTool;

#[async_trait]
impl Tool for GetWeekScheduleTool {
    fn name(&self) -> &'static str {
        "get_week_schedule"
    }

    fn description(&self) -> &'static str {
        "List the student's study tasks for the current week, Monday to Sunday."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, ctx: &ToolContext, _args: &Value) -> Result<ToolOutput, ToolError> {
        let monday = week_start(ctx.today());
        let sunday = monday + Duration::days(6);
        let tasks = ctx.store.tasks_between(&ctx.user_id, monday, sunday).await?;

        Ok(ToolOutput::new(
            format!(
                "{} task(s) between {} and {}, {} still open.",
                tasks.len(),
                monday.format("%Y-%m-%d"),
                sunday.format("%Y-%m-%d"),
                pending(&tasks)
            ),
            json!({
                "week_start": monday.format("%Y-%m-%d").to_string(),
                "week_end": sunday.format("%Y-%m-%d").to_string(),
                "tasks": task_entries(&tasks),
            }),
        ))
    }
}

pub struct GetUpcomingSessionsTool;

#[async_trait]
impl Tool for GetUpcomingSessionsTool {
    fn name(&self) -> &'static str {
        "get_upcoming_sessions"
    }

    fn description(&self) -> &'static str {
        "List the student's next scheduled study sessions."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": {"type": "integer", "minimum": 1, "maximum": MAX_SESSION_LIMIT}
            }
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<ToolOutput, ToolError> {
        let limit = optional_u32(args, "limit")?
            .unwrap_or(DEFAULT_SESSION_LIMIT)
            .clamp(1, MAX_SESSION_LIMIT);
        let sessions = ctx.store.upcoming_sessions(&ctx.user_id, ctx.now, limit).await?;

        let message = match sessions.first() {
            Some(next) => format!(
                "{} upcoming session(s); next is \"{}\" on {}.",
                sessions.len(),
                next.title,
                next.starts_at.format("%a %-d %b %H:%M")
            ),
            None => "No upcoming study sessions are scheduled.".to_string(),
        };
        Ok(ToolOutput::new(message, json!({"sessions": session_entries(&sessions)})))
    }
}

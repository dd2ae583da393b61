use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use studymate_core::domain::study::{StudyTask, TaskId, TaskPatch, DEFAULT_TASK_DURATION_MINUTES};

use super::{
    optional_date, optional_priority, optional_str, optional_time, optional_u32, required_str,
    resolve_task, task_selector_properties, Tool, ToolContext, ToolError, ToolOutput,
};

const DATE_HINT: &str = "YYYY-MM-DD, today or tomorrow.";

fn task_payload(task: &StudyTask) -> Result<Value, ToolError> {
    Ok(serde_json::to_value(task)?)
}

fn describe(task: &StudyTask) -> String {
    let time = task
        .start_time
        .map(|time| format!(" at {}", time.format("%H:%M")))
        .unwrap_or_default();
    format!(
        "\"{}\" on {}{} ({} min, {} priority)",
        task.title,
        task.scheduled_date.format("%Y-%m-%d"),
        time,
        task.duration_minutes,
        task.priority.as_str()
    )
}

pub struct AddStudyTaskTool;

#[async_trait]
impl Tool for AddStudyTaskTool {
    fn name(&self) -> &'static str {
        "add_study_task"
    }

    fn description(&self) -> &'static str {
        "Add a study task to the student's planner. \
         Date defaults to today and duration to 30 minutes."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "description": "Short task title."},
                "description": {"type": "string"},
                "subject": {"type": "string", "description": "Course, e.g. Contract Law."},
                "scheduled_date": {"type": "string", "description": DATE_HINT},
                "start_time": {"type": "string", "description": "24-hour HH:MM."},
                "duration_minutes": {"type": "integer", "minimum": 1},
                "priority": {"type": "string", "enum": ["low", "medium", "high"]}
            },
            "required": ["title"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<ToolOutput, ToolError> {
        let task = StudyTask {
            id: TaskId(Uuid::new_v4().to_string()),
            user_id: ctx.user_id.clone(),
            title: required_str(args, "title")?,
            description: optional_str(args, "description"),
            subject: optional_str(args, "subject"),
            scheduled_date: optional_date(args, "scheduled_date", ctx.today())?
                .unwrap_or_else(|| ctx.today()),
            start_time: optional_time(args, "start_time")?,
            duration_minutes: optional_u32(args, "duration_minutes")?
                .filter(|minutes| *minutes > 0)
                .unwrap_or(DEFAULT_TASK_DURATION_MINUTES),
            priority: optional_priority(args)?.unwrap_or_default(),
            completed: false,
            completed_at: None,
            created_at: ctx.now,
        };

        ctx.store.insert_task(task.clone()).await?;
        Ok(ToolOutput::new(format!("Added {}.", describe(&task)), task_payload(&task)?))
    }
}

pub struct UpdateTaskTool;

#[async_trait]
impl Tool for UpdateTaskTool {
    fn name(&self) -> &'static str {
        "update_task"
    }

    fn description(&self) -> &'static str {
        "Change an existing study task's title, date, time, duration, subject or priority."
    }

    fn parameters_schema(&self) -> Value {
        let mut properties = task_selector_properties();
        for (key, schema) in [
            ("new_title", json!({"type": "string"})),
            ("description", json!({"type": "string"})),
            ("subject", json!({"type": "string"})),
            ("scheduled_date", json!({"type": "string", "description": DATE_HINT})),
            ("start_time", json!({"type": "string", "description": "24-hour HH:MM."})),
            ("duration_minutes", json!({"type": "integer", "minimum": 1})),
            ("priority", json!({"type": "string", "enum": ["low", "medium", "high"]})),
        ] {
            properties.insert(key.to_string(), schema);
        }
        json!({"type": "object", "properties": properties})
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<ToolOutput, ToolError> {
        let patch = TaskPatch {
            title: optional_str(args, "new_title"),
            description: optional_str(args, "description"),
            subject: optional_str(args, "subject"),
            scheduled_date: optional_date(args, "scheduled_date", ctx.today())?,
            start_time: optional_time(args, "start_time")?,
            duration_minutes: optional_u32(args, "duration_minutes")?,
            priority: optional_priority(args)?,
        };
        if patch.is_empty() {
            let message = "no fields to update were provided".to_string();
            return Err(ToolError::InvalidArguments(message));
        }

        let mut task = resolve_task(ctx, args).await?;
        patch.apply(&mut task);
        if !ctx.store.update_task(&task).await? {
            return Err(ToolError::NotFound(format!("Task \"{}\" no longer exists.", task.title)));
        }
        Ok(ToolOutput::new(format!("Updated {}.", describe(&task)), task_payload(&task)?))
    }
}

pub struct CompleteTaskTool;

#[async_trait]
impl Tool for CompleteTaskTool {
    fn name(&self) -> &'static str {
        "complete_task"
    }

    fn description(&self) -> &'static str {
        "Mark a study task as done."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": task_selector_properties()})
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<ToolOutput, ToolError> {
        let mut task = resolve_task(ctx, args).await?;
        if task.completed {
            return Ok(ToolOutput::new(
                format!("\"{}\" was already marked complete.", task.title),
                task_payload(&task)?,
            ));
        }

        task.completed = true;
        task.completed_at = Some(ctx.now);
        if !ctx.store.update_task(&task).await? {
            return Err(ToolError::NotFound(format!("Task \"{}\" no longer exists.", task.title)));
        }
        Ok(ToolOutput::new(format!("Marked \"{}\" as complete.", task.title), task_payload(&task)?))
    }
}

pub struct DeleteTaskTool;

#[async_trait]
impl Tool for DeleteTaskTool {
    fn name(&self) -> &'static str {
        "delete_task"
    }

    fn description(&self) -> &'static str {
        "Delete a study task from the planner."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": task_selector_properties()})
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<ToolOutput, ToolError> {
        let task = resolve_task(ctx, args).await?;
        if !ctx.store.delete_task(&ctx.user_id, &task.id).await? {
            return Err(ToolError::NotFound(format!("Task \"{}\" no longer exists.", task.title)));
        }
        Ok(ToolOutput::new(
            format!("Deleted \"{}\".", task.title),
            json!({"task_id": task.id.0, "title": task.title}),
        ))
    }
}

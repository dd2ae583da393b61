use async_trait::async_trait;
use serde_json::{json, Value};

use super::{week_start, Tool, ToolContext, ToolError, ToolOutput};

pub struct GetProgressStatsTool;

#[async_trait]
impl Tool for GetProgressStatsTool {
    fn name(&self) -> &'static str {
        "get_progress_stats"
    }

    fn description(&self) -> &'static str {
        "Summarise the student's study streak, study time, task completion and saved materials."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, ctx: &ToolContext, _args: &Value) -> Result<ToolOutput, ToolError> {
        let stats = ctx.store.progress_stats(&ctx.user_id, week_start(ctx.today())).await?;
        let mut payload = serde_json::to_value(&stats)?;
        if let Some(fields) = payload.as_object_mut() {
            fields.insert("completion_rate_pct".to_string(), json!(stats.completion_rate_pct()));
        }

        Ok(ToolOutput::new(
            format!(
                "{}-day streak, {} minutes studied, {}/{} tasks done ({} this week).",
                stats.study_streak_days,
                stats.total_study_minutes,
                stats.tasks_completed,
                stats.tasks_total,
                stats.tasks_completed_this_week
            ),
            payload,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use studymate_core::domain::identity::UserId;
    use studymate_core::domain::study::Profile;
    use studymate_db::repositories::{InMemoryStudyStore, StudyStore};

    use super::GetProgressStatsTool;
    use crate::tools::test_support::{context, now, task};
    use crate::tools::Tool;

    #[tokio::test]
    async fn stats_include_completion_rate() {
        let store = Arc::new(InMemoryStudyStore::default());
        store
            .put_profile(Profile {
                user_id: UserId("u-1".into()),
                display_name: "Mwila".into(),
                university: None,
                year_of_study: None,
                study_streak_days: 6,
                total_study_minutes: 300,
            })
            .await;
        let mut done = task("u-1", "t-1", "Done", now().date_naive());
        done.completed = true;
        done.completed_at = Some(now());
        store.insert_task(done).await.expect("insert");
        store.insert_task(task("u-1", "t-2", "Open", now().date_naive())).await.expect("insert");

        let output = GetProgressStatsTool
            .execute(&context(&store, "u-1"), &json!({}))
            .await
            .expect("stats");

        assert_eq!(output.payload["completion_rate_pct"], 50);
        assert_eq!(output.payload["tasks_completed_this_week"], 1);
        assert!(output.message.starts_with("6-day streak"));
    }
}

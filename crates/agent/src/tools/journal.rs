use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use studymate_core::domain::study::JournalEntry;

use super::{optional_str, required_str, Tool, ToolContext, ToolError, ToolOutput};

pub struct CreateJournalEntryTool;

#[async_trait]
impl Tool for CreateJournalEntryTool {
    fn name(&self) -> &'static str {
        "create_journal_entry"
    }

    fn description(&self) -> &'static str {
        "Save a study journal reflection for the student."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "content": {"type": "string", "description": "The reflection text."},
                "mood": {"type": "string", "description": "One word, e.g. motivated or tired."}
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<ToolOutput, ToolError> {
        let entry = JournalEntry {
            id: Uuid::new_v4().to_string(),
            user_id: ctx.user_id.clone(),
            title: optional_str(args, "title"),
            content: required_str(args, "content")?,
            mood: optional_str(args, "mood"),
            created_at: ctx.now,
        };
        ctx.store.insert_journal_entry(entry.clone()).await?;

        let label = entry.title.as_deref().unwrap_or("untitled");
        Ok(ToolOutput::new(
            format!("Saved journal entry \"{label}\"."),
            json!({"entry_id": entry.id, "title": entry.title, "mood": entry.mood}),
        ))
    }
}

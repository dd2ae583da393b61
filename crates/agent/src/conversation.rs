//! Client-supplied history handling.
//!
//! Clients may only contribute `user` and `assistant` turns. The system
//! prompt is always built server-side and tool traffic only exists inside a
//! single request, so anything else in the payload is discarded.

use studymate_core::domain::conversation::{ChatMessage, Role};
use studymate_core::errors::{ApplicationError, DomainError};

/// Filters the client history down to the turns the model may see.
pub fn prepare_history(messages: Vec<ChatMessage>) -> Result<Vec<ChatMessage>, ApplicationError> {
    if messages.is_empty() {
        return Err(DomainError::InvalidArgument("messages must not be empty".to_string()).into());
    }

    let history: Vec<ChatMessage> = messages
        .into_iter()
        .filter(|message| matches!(message.role, Role::User | Role::Assistant))
        .map(|mut message| {
            message.tool_calls.clear();
            message.tool_call_id = None;
            message
        })
        .collect();

    if latest_user_message(&history).is_none() {
        return Err(ApplicationError::BadRequest(
            "conversation must contain at least one user message".to_string(),
        ));
    }
    Ok(history)
}

pub fn latest_user_message(messages: &[ChatMessage]) -> Option<&ChatMessage> {
    messages.iter().rev().find(|message| message.role == Role::User)
}

/// Splits a finished reply into word-sized chunks that concatenate back to
/// exactly the original text.
pub fn rechunk_words(text: &str) -> Vec<String> {
    text.split_inclusive(char::is_whitespace).map(str::to_string).collect()
}

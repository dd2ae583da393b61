//! StudyMate assistant orchestration.
//!
//! One chat turn flows through this crate in a fixed order:
//! 1. **Classification** (`classifier`) - keyword check for legal research
//! 2. **Research** (`research`) - topic extraction, shared cache, per-user
//!    quota, web search and synthesis, degrading instead of failing
//! 3. **Prompt assembly** (`prompt`, `context`) - persona, research section,
//!    the student's live study data and the tool list
//! 4. **Tool loop** (`runtime`, `tools`) - bounded rounds of model tool calls
//!    executed sequentially against the student's data
//! 5. **Streaming** - a token stream for the HTTP layer
//!
//! The model never sees or chooses a user id: tools act only for the
//! authenticated caller.

pub mod classifier;
pub mod context;
pub mod conversation;
pub mod llm;
pub mod prompt;
pub mod quota;
pub mod research;
pub mod runtime;
pub mod search;
pub mod tools;
pub mod topic;

#[cfg(test)]
mod testing;

pub use llm::{HttpLlmClient, LlmClient, LlmError, TokenStream};
pub use runtime::{AssistantReply, AssistantRuntime, ChatTurnRequest, ReplyBody};
pub use search::{DisabledSearch, HttpWebSearch, WebSearch};

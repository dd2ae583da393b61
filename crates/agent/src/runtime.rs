use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream;
use tracing::{debug, info};

use studymate_core::config::MAX_TOOL_ROUNDS_CEILING;
use studymate_core::domain::conversation::{ChatMessage, ToolResult};
use studymate_core::domain::identity::UserId;
use studymate_core::domain::research::ResearchOutcome;
use studymate_core::errors::ApplicationError;
use studymate_db::repositories::StudyStore;

use crate::classifier::{matched_keyword, needs_research};
use crate::context::ContextBuilder;
use crate::conversation::{latest_user_message, prepare_history, rechunk_words};
use crate::llm::{ChatRequest, LlmClient, TokenStream};
use crate::prompt::{ActionPreset, PromptRenderer, SystemPromptInput};
use crate::research::ResearchPipeline;
use crate::tools::{ToolContext, ToolRegistry};

/// One inbound chat turn, after the caller's identity has been verified.
#[derive(Clone, Debug)]
pub struct ChatTurnRequest {
    pub user_id: UserId,
    pub messages: Vec<ChatMessage>,
    pub action: Option<String>,
    pub enable_web_search: bool,
    pub deep_search: bool,
    pub has_images: bool,
    pub correlation_id: String,
}

pub enum ReplyBody {
    /// Full text from a round without tool calls.
    Complete(String),
    /// Streamed follow-up after the last permitted tool round.
    Streaming(TokenStream),
}

impl ReplyBody {
    pub fn into_token_stream(self) -> TokenStream {
        match self {
            Self::Complete(text) => {
                Box::pin(stream::iter(rechunk_words(&text).into_iter().map(Ok)))
            }
            Self::Streaming(tokens) => tokens,
        }
    }
}

pub struct AssistantReply {
    pub research: ResearchOutcome,
    pub tool_results: Vec<ToolResult>,
    pub body: ReplyBody,
}

/// Drives one request through classification, research, prompt assembly and
/// a bounded tool loop.
pub struct AssistantRuntime {
    llm: Arc<dyn LlmClient>,
    research: Arc<ResearchPipeline>,
    context: ContextBuilder,
    tools: ToolRegistry,
    prompts: Arc<PromptRenderer>,
    store: Arc<dyn StudyStore>,
    max_tool_rounds: u32,
}

impl AssistantRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        research: Arc<ResearchPipeline>,
        store: Arc<dyn StudyStore>,
        tools: ToolRegistry,
        prompts: Arc<PromptRenderer>,
        max_tool_rounds: u32,
    ) -> Self {
        Self {
            llm,
            research,
            context: ContextBuilder::new(store.clone(), prompts.clone()),
            tools,
            prompts,
            store,
            max_tool_rounds: max_tool_rounds.clamp(1, MAX_TOOL_ROUNDS_CEILING),
        }
    }

    pub async fn handle(
        &self,
        request: ChatTurnRequest,
        now: DateTime<Utc>,
    ) -> Result<AssistantReply, ApplicationError> {
        let history = prepare_history(request.messages)?;
        let (query, images_in_history) = latest_user_message(&history)
            .map(|message| (message.content.text(), message.content.has_images()))
            .unwrap_or_default();
        let has_images = request.has_images || images_in_history;

        let research_needed =
            request.enable_web_search && needs_research(&query, request.deep_search);
        info!(
            event_name = "assistant.turn.started",
            correlation_id = %request.correlation_id,
            user_id = %request.user_id,
            research_needed,
            deep_search = request.deep_search,
            keyword = matched_keyword(&query).unwrap_or(""),
            history_len = history.len(),
            "chat turn started"
        );

        let research = if research_needed {
            self.research.research(&request.user_id, &query, now).await
        } else {
            ResearchOutcome::NotRequested
        };

        let user_context = self.context.build_context(&request.user_id, now).await;
        let specs = self.tools.specs();
        let system_prompt = self
            .prompts
            .render_system_prompt(&SystemPromptInput {
                preset: ActionPreset::from_action(request.action.as_deref()),
                research: &research,
                user_context: &user_context,
                tools: &specs,
                has_images,
                today: now.date_naive(),
            })
            .map_err(|error| ApplicationError::Configuration(error.to_string()))?;

        let mut conversation = Vec::with_capacity(history.len() + 1);
        conversation.push(ChatMessage::system(system_prompt));
        conversation.extend(history);

        let tool_ctx = ToolContext::new(request.user_id.clone(), now, self.store.clone());
        let mut tool_results = Vec::new();

        for round in 1..=self.max_tool_rounds {
            let completion = self
                .llm
                .complete(ChatRequest::new(conversation.clone()).with_tools(specs.clone()))
                .await?;

            if completion.tool_calls.is_empty() {
                info!(
                    event_name = "assistant.turn.answered",
                    correlation_id = %request.correlation_id,
                    round,
                    tool_calls = tool_results.len(),
                    "model answered without further tool calls"
                );
                return Ok(AssistantReply {
                    research,
                    tool_results,
                    body: ReplyBody::Complete(completion.content),
                });
            }

            debug!(
                event_name = "assistant.tool_round.started",
                correlation_id = %request.correlation_id,
                round,
                calls = completion.tool_calls.len(),
                "executing tool calls"
            );
            let calls = completion.tool_calls.clone();
            conversation
                .push(ChatMessage::assistant_tool_calls(completion.content, completion.tool_calls));
            for call in &calls {
                let result = self.tools.dispatch(&tool_ctx, call).await;
                conversation.push(ChatMessage::tool(&result));
                tool_results.push(result);
            }
        }

        info!(
            event_name = "assistant.turn.follow_up",
            correlation_id = %request.correlation_id,
            max_tool_rounds = self.max_tool_rounds,
            tool_calls = tool_results.len(),
            "tool round limit reached, streaming final answer"
        );
        let tokens = self.llm.stream(ChatRequest::new(conversation)).await?;
        Ok(AssistantReply { research, tool_results, body: ReplyBody::Streaming(tokens) })
    }
}

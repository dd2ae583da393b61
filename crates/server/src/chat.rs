use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::post,
    Json, Router,
};
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use studymate_agent::{AssistantRuntime, ChatTurnRequest, TokenStream};
use studymate_core::domain::conversation::ChatMessage;
use studymate_core::errors::{ApplicationError, InterfaceError};

use crate::auth::{bearer_token, IdentityProvider};

const CORRELATION_HEADER: &str = "x-correlation-id";
const EVENT_BUFFER: usize = 32;

#[derive(Clone)]
pub struct ChatState {
    pub runtime: Arc<AssistantRuntime>,
    pub identity: Arc<dyn IdentityProvider>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestBody {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default = "enabled")]
    pub enable_web_search: bool,
    #[serde(default)]
    pub deep_search: bool,
    #[serde(default)]
    pub has_images: bool,
}

fn enabled() -> bool {
    true
}

pub fn router(state: ChatState) -> Router {
    Router::new().route("/api/chat", post(chat)).with_state(state)
}

pub async fn chat(
    State(state): State<ChatState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequestBody>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4().to_string();

    let user_id = match bearer_token(&headers) {
        Ok(token) => match state.identity.verify(token).await {
            Ok(user_id) => user_id,
            Err(auth_error) => {
                return error_response(ApplicationError::from(auth_error), &correlation_id)
            }
        },
        Err(auth_error) => {
            return error_response(ApplicationError::from(auth_error), &correlation_id)
        }
    };

    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            let bad_request = ApplicationError::BadRequest(rejection.body_text());
            return error_response(bad_request, &correlation_id);
        }
    };

    let request = ChatTurnRequest {
        user_id,
        messages: body.messages,
        action: body.action,
        enable_web_search: body.enable_web_search,
        deep_search: body.deep_search,
        has_images: body.has_images,
        correlation_id: correlation_id.clone(),
    };

    match state.runtime.handle(request, Utc::now()).await {
        Ok(reply) => {
            info!(
                event_name = "server.chat.streaming",
                correlation_id = %correlation_id,
                tool_calls = reply.tool_results.len(),
                research_grounded = reply.research.is_grounded(),
                "streaming chat reply"
            );
            let tokens = reply.body.into_token_stream();
            let mut response = sse_response(tokens, correlation_id.clone()).into_response();
            set_correlation_header(&mut response, &correlation_id);
            response
        }
        Err(app_error) => error_response(app_error, &correlation_id),
    }
}

fn error_response(app_error: ApplicationError, correlation_id: &str) -> Response {
    let interface = app_error.into_interface(correlation_id);
    let status =
        StatusCode::from_u16(interface.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(
            event_name = "server.chat.failed",
            correlation_id = %correlation_id,
            error = %interface,
            "chat request failed"
        );
    } else {
        warn!(
            event_name = "server.chat.rejected",
            correlation_id = %correlation_id,
            status = status.as_u16(),
            error = %interface,
            "chat request rejected"
        );
    }

    let body = Json(json!({ "error": error_message(&interface) }));
    let mut response = (status, body).into_response();
    set_correlation_header(&mut response, correlation_id);
    response
}

/// Bad requests explain themselves; everything else gets the user-safe text.
fn error_message(error: &InterfaceError) -> String {
    match error {
        InterfaceError::BadRequest { message, .. } => message.clone(),
        other => other.user_message().to_string(),
    }
}

fn set_correlation_header(response: &mut Response, correlation_id: &str) {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
}

fn delta_event(token: &str) -> Event {
    Event::default().data(json!({ "choices": [{ "delta": { "content": token } }] }).to_string())
}

#[derive(Debug, PartialEq, Eq)]
enum PumpOutcome {
    Completed,
    Disconnected,
}

/// Forwards model tokens to the client channel. Returns as soon as the
/// client goes away, even while waiting on the model, dropping the upstream
/// stream with it.
async fn pump_tokens(
    mut tokens: TokenStream,
    events: &mpsc::Sender<Result<Event, Infallible>>,
    correlation_id: &str,
) -> PumpOutcome {
    loop {
        let next = tokio::select! {
            _ = events.closed() => return PumpOutcome::Disconnected,
            next = tokens.next() => next,
        };
        let Some(item) = next else { break };
        match item {
            Ok(token) if token.is_empty() => continue,
            Ok(token) => {
                if events.send(Ok(delta_event(&token))).await.is_err() {
                    return PumpOutcome::Disconnected;
                }
            }
            Err(stream_error) => {
                warn!(
                    event_name = "server.chat.stream_interrupted",
                    correlation_id = %correlation_id,
                    error = %stream_error,
                    "model stream ended with an error"
                );
                break;
            }
        }
    }
    PumpOutcome::Completed
}

fn sse_response(tokens: TokenStream, correlation_id: String) -> impl IntoResponse {
    let (sender, receiver) = mpsc::channel(EVENT_BUFFER);

    tokio::spawn(async move {
        match pump_tokens(tokens, &sender, &correlation_id).await {
            PumpOutcome::Completed => {
                let _ = sender.send(Ok(Event::default().data("[DONE]"))).await;
            }
            PumpOutcome::Disconnected => {
                debug!(
                    event_name = "server.chat.client_disconnected",
                    correlation_id = %correlation_id,
                    "client closed the stream"
                );
            }
        }
    });

    Sse::new(ReceiverStream::new(receiver)).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use futures::stream;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use studymate_agent::llm::{ChatCompletion, ChatRequest, LlmClient, LlmError};
    use studymate_agent::prompt::PromptRenderer;
    use studymate_agent::quota::ResearchQuota;
    use studymate_agent::research::{ResearchPipeline, ResearchSettings};
    use studymate_agent::tools::ToolRegistry;
    use studymate_agent::topic::TopicExtractor;
    use studymate_agent::{AssistantRuntime, DisabledSearch, TokenStream};
    use studymate_core::domain::identity::UserId;
    use studymate_db::repositories::{
        InMemoryRateLimitRepository, InMemoryResearchCacheRepository, InMemoryStudyStore,
    };

    use super::{pump_tokens, router, ChatState, PumpOutcome};
    use crate::auth::{AuthError, IdentityProvider};

    struct FixedIdentity;

    #[async_trait]
    impl IdentityProvider for FixedIdentity {
        async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
            match token {
                "student-token" => Ok(UserId("u-1".into())),
                _ => Err(AuthError::InvalidToken),
            }
        }
    }

    #[derive(Default)]
    struct CannedLlm {
        replies: Mutex<VecDeque<Result<ChatCompletion, LlmError>>>,
    }

    impl CannedLlm {
        fn with(reply: Result<ChatCompletion, LlmError>) -> Arc<Self> {
            let llm = Self::default();
            llm.replies.lock().expect("lock").push_back(reply);
            Arc::new(llm)
        }
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatCompletion, LlmError> {
            self.replies.lock().expect("lock").pop_front().unwrap_or_else(|| {
                Err(LlmError::Upstream { status: 500, message: "no reply scripted".into() })
            })
        }

        async fn stream(&self, _request: ChatRequest) -> Result<TokenStream, LlmError> {
            Err(LlmError::Upstream { status: 500, message: "streaming not scripted".into() })
        }
    }

    fn app(llm: Arc<CannedLlm>) -> axum::Router {
        let pipeline = ResearchPipeline::new(
            TopicExtractor::new(llm.clone(), "Zambia"),
            Arc::new(InMemoryResearchCacheRepository::default()),
            ResearchQuota::new(Arc::new(InMemoryRateLimitRepository::default()), 5),
            Arc::new(DisabledSearch),
            llm.clone(),
            ResearchSettings::default(),
        );
        let runtime = AssistantRuntime::new(
            llm,
            Arc::new(pipeline),
            Arc::new(InMemoryStudyStore::default()),
            ToolRegistry::with_study_tools(),
            Arc::new(PromptRenderer::new().expect("templates compile")),
            3,
        );
        router(ChatState { runtime: Arc::new(runtime), identity: Arc::new(FixedIdentity) })
    }

    fn post(token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    fn user_turn(text: &str) -> Value {
        json!({ "messages": [{ "role": "user", "content": text }] })
    }

    #[tokio::test]
    async fn reply_streams_openai_style_deltas_then_done() {
        let answer = "Offer, acceptance and consideration form a contract.";
        let llm = CannedLlm::with(Ok(ChatCompletion::text(answer)));

        let response = app(llm)
            .oneshot(post(Some("student-token"), user_turn("How is a contract formed?")))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );
        assert!(response.headers().contains_key("x-correlation-id"));

        let text = body_text(response).await;
        assert!(text.ends_with("data: [DONE]\n\n"));
        let streamed: String = text
            .split("\n\n")
            .filter_map(|event| event.strip_prefix("data: "))
            .filter(|data| *data != "[DONE]")
            .map(|data| {
                let event: Value = serde_json::from_str(data).expect("delta json");
                event["choices"][0]["delta"]["content"].as_str().expect("content").to_string()
            })
            .collect();
        assert_eq!(streamed, answer);
    }

    #[tokio::test]
    async fn missing_or_rejected_token_is_401() {
        let llm = CannedLlm::with(Ok(ChatCompletion::text("unused")));

        let missing =
            app(llm.clone()).oneshot(post(None, user_turn("hi"))).await.expect("response");
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        let body: Value = serde_json::from_str(&body_text(missing).await).expect("json");
        assert!(body["error"].as_str().is_some());

        let rejected =
            app(llm).oneshot(post(Some("forged"), user_turn("hi"))).await.expect("response");
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn empty_messages_are_a_bad_request() {
        let llm = CannedLlm::with(Ok(ChatCompletion::text("unused")));

        let response = app(llm)
            .oneshot(post(Some("student-token"), json!({ "messages": [] })))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
        assert!(body["error"].as_str().expect("error").contains("messages"));
    }

    #[tokio::test]
    async fn upstream_limits_pass_through_as_status_codes() {
        let limited = app(CannedLlm::with(Err(LlmError::RateLimited("busy".into()))))
            .oneshot(post(Some("student-token"), user_turn("hi")))
            .await
            .expect("response");
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);

        let capped = app(CannedLlm::with(Err(LlmError::PaymentRequired("credits".into()))))
            .oneshot(post(Some("student-token"), user_turn("hi")))
            .await
            .expect("response");
        assert_eq!(capped.status(), StatusCode::PAYMENT_REQUIRED);

        let outage = app(CannedLlm::with(Err(LlmError::Upstream {
            status: 503,
            message: "down".into(),
        })))
        .oneshot(post(Some("student-token"), user_turn("hi")))
        .await
        .expect("response");
        assert_eq!(outage.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn pump_stops_when_the_client_disconnects() {
        let endless: TokenStream = Box::pin(stream::repeat_with(|| Ok("token ".to_string())));
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);

        let outcome = pump_tokens(endless, &sender, "req-test").await;

        assert_eq!(outcome, PumpOutcome::Disconnected);
    }

    #[tokio::test]
    async fn pump_releases_a_silent_model_stream_when_the_client_leaves() {
        let silent: TokenStream = Box::pin(stream::pending());
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);

        let pump = pump_tokens(silent, &sender, "req-test");
        let outcome = tokio::time::timeout(Duration::from_secs(1), pump)
            .await
            .expect("pump should not wait for the next model token");

        assert_eq!(outcome, PumpOutcome::Disconnected);
    }

    #[tokio::test]
    async fn pump_completes_after_a_mid_stream_error() {
        let tokens: TokenStream = Box::pin(stream::iter(vec![
            Ok("partial ".to_string()),
            Err(LlmError::Transport("reset".into())),
            Ok("never sent".to_string()),
        ]));
        let (sender, mut receiver) = mpsc::channel(8);

        let outcome = pump_tokens(tokens, &sender, "req-test").await;
        drop(sender);

        assert_eq!(outcome, PumpOutcome::Completed);
        let mut forwarded = 0;
        while receiver.recv().await.is_some() {
            forwarded += 1;
        }
        assert_eq!(forwarded, 1);
    }
}

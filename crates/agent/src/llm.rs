use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use studymate_core::config::LlmConfig;
use studymate_core::domain::conversation::{ChatMessage, Role, ToolCall};
use studymate_core::errors::ApplicationError;

/// Content deltas of a streamed model answer, in arrival order.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages, tools: Vec::new(), temperature: None }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A complete, non-streamed model response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatCompletion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatCompletion {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), tool_calls: Vec::new() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("model gateway rate limit: {0}")]
    RateLimited(String),
    #[error("model gateway usage cap reached: {0}")]
    PaymentRequired(String),
    #[error("model gateway returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("model gateway transport failure: {0}")]
    Transport(String),
    #[error("model gateway response could not be decoded: {0}")]
    Decode(String),
}

impl From<LlmError> for ApplicationError {
    fn from(value: LlmError) -> Self {
        match value {
            LlmError::RateLimited(message) => ApplicationError::UpstreamRateLimited(message),
            LlmError::PaymentRequired(message) => ApplicationError::UpstreamQuotaExceeded(message),
            other => ApplicationError::Integration(other.to_string()),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion, LlmError>;

    /// Opens a streamed completion. Errors reported before the first delta
    /// (status codes, connection failures) are returned here rather than
    /// inside the stream.
    async fn stream(&self, request: ChatRequest) -> Result<TokenStream, LlmError>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpLlmClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    async fn send(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let body = request_body(&self.model, request, stream);
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(status_error(status.as_u16(), message))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion, LlmError> {
        let response = self.send(&request, false).await?;
        let body: Value = response.json().await.map_err(|e| LlmError::Decode(e.to_string()))?;
        parse_completion(&body)
    }

    async fn stream(&self, request: ChatRequest) -> Result<TokenStream, LlmError> {
        let response = self.send(&request, true).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| LlmError::Transport(e.to_string()))?;
                buffer.extend_from_slice(&chunk);

                while let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    match parse_sse_line(&String::from_utf8_lossy(&line)) {
                        SseLine::Delta(text) => yield text,
                        SseLine::Done => return,
                        SseLine::Skip => {}
                    }
                }
            }

            if let SseLine::Delta(text) = parse_sse_line(&String::from_utf8_lossy(&buffer)) {
                yield text;
            }
        };

        Ok(Box::pin(stream))
    }
}

pub(crate) fn status_error(status: u16, message: String) -> LlmError {
    match status {
        429 => LlmError::RateLimited(message),
        402 => LlmError::PaymentRequired(message),
        _ => LlmError::Upstream { status, message },
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn wire_message(message: &ChatMessage) -> Value {
    let mut wire = json!({ "role": role_name(message.role), "content": message.content });

    if !message.tool_calls.is_empty() {
        if message.content.text().is_empty() {
            wire["content"] = Value::Null;
        }
        wire["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": call.arguments.to_string() },
                })
            })
            .collect();
    }
    if let Some(tool_call_id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(tool_call_id);
    }

    wire
}

pub(crate) fn request_body(model: &str, request: &ChatRequest, stream: bool) -> Value {
    let mut body = json!({
        "model": model,
        "messages": request.messages.iter().map(wire_message).collect::<Vec<_>>(),
        "stream": stream,
    });

    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    },
                })
            })
            .collect();
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }

    body
}

pub(crate) fn parse_completion(body: &Value) -> Result<ChatCompletion, LlmError> {
    let message = body["choices"]
        .get(0)
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| LlmError::Decode("missing choices[0].message".to_string()))?;

    let content = message.get("content").and_then(Value::as_str).unwrap_or_default().to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();

    Ok(ChatCompletion { content, tool_calls })
}

fn parse_tool_call(raw: &Value) -> Option<ToolCall> {
    let id = raw.get("id").and_then(Value::as_str)?.to_string();
    let function = raw.get("function")?;
    let name = function.get("name").and_then(Value::as_str)?.to_string();

    let arguments = match function.get("arguments") {
        Some(Value::String(text)) if text.trim().is_empty() => json!({}),
        Some(Value::String(text)) => serde_json::from_str(text).unwrap_or_else(|error| {
            warn!(
                event_name = "assistant.llm.tool_arguments_invalid",
                tool = %name,
                error = %error,
                "tool call arguments were not valid JSON"
            );
            json!({})
        }),
        Some(other) => other.clone(),
        None => json!({}),
    };

    Some(ToolCall { id, name, arguments })
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseLine {
    Delta(String),
    Done,
    Skip,
}

pub(crate) fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseLine::Done;
    }

    serde_json::from_str::<Value>(data)
        .ok()
        .and_then(|json| {
            json["choices"]
                .get(0)
                .and_then(|choice| choice.get("delta"))
                .and_then(|delta| delta.get("content"))
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .map(ToString::to_string)
        })
        .map_or(SseLine::Skip, SseLine::Delta)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use studymate_core::domain::conversation::{ChatMessage, ToolCall, ToolResult};
    use studymate_core::errors::ApplicationError;

    use super::{
        parse_completion, parse_sse_line, request_body, status_error, ChatRequest, LlmError,
        SseLine, ToolSpec,
    };

    #[test]
    fn request_body_wraps_tools_and_stringifies_arguments() {
        let call = ToolCall {
            id: "call-1".into(),
            name: "add_study_task".into(),
            arguments: json!({ "title": "Read Hadley" }),
        };
        let request = ChatRequest::new(vec![
            ChatMessage::system("persona"),
            ChatMessage::user("add a task"),
            ChatMessage::assistant_tool_calls("", vec![call]),
            ChatMessage::tool(&ToolResult::ok("call-1", "Added", json!({"id": "t-1"}))),
        ])
        .with_tools(vec![ToolSpec {
            name: "add_study_task".into(),
            description: "Add a task".into(),
            parameters: json!({ "type": "object" }),
        }]);

        let body = request_body("gpt-4o-mini", &request, false);

        assert_eq!(body["stream"], false);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "add_study_task");
        assert_eq!(body["messages"][2]["content"], serde_json::Value::Null);
        assert_eq!(
            body["messages"][2]["tool_calls"][0]["function"]["arguments"],
            r#"{"title":"Read Hadley"}"#
        );
        assert_eq!(body["messages"][3]["role"], "tool");
        assert_eq!(body["messages"][3]["tool_call_id"], "call-1");
    }

    #[test]
    fn request_body_omits_empty_tool_list() {
        let body = request_body("m", &ChatRequest::new(vec![ChatMessage::user("hi")]), true);
        assert!(body.get("tools").is_none());
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn completion_parses_content_and_tool_calls() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [
                        { "id": "a", "type": "function",
                          "function": {
                              "name": "complete_task",
                              "arguments": "{\"task_title\":\"essay\"}"
                          } },
                        { "id": "b", "type": "function",
                          "function": { "name": "get_today_schedule", "arguments": "" } }
                    ]
                }
            }]
        });

        let completion = parse_completion(&body).expect("parse");
        assert_eq!(completion.content, "");
        assert_eq!(completion.tool_calls.len(), 2);
        assert_eq!(completion.tool_calls[0].arguments["task_title"], "essay");
        assert_eq!(completion.tool_calls[1].arguments, json!({}));
    }

    #[test]
    fn completion_without_choices_is_a_decode_error() {
        assert!(matches!(parse_completion(&json!({"model": "x"})), Err(LlmError::Decode(_))));
    }

    #[test]
    fn sse_lines_yield_deltas_and_stop_at_done() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#),
            SseLine::Delta("Hello".into())
        );
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(role_only), SseLine::Skip);
    }

    #[test]
    fn gateway_status_codes_map_to_application_errors() {
        assert!(matches!(
            ApplicationError::from(status_error(429, "slow down".into())),
            ApplicationError::UpstreamRateLimited(_)
        ));
        assert!(matches!(
            ApplicationError::from(status_error(402, "no credits".into())),
            ApplicationError::UpstreamQuotaExceeded(_)
        ));
        assert!(matches!(
            ApplicationError::from(status_error(503, "down".into())),
            ApplicationError::Integration(_)
        ));
    }
}

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use studymate_core::domain::conversation::ChatMessage;
use studymate_core::domain::research::ResearchTopic;

use crate::llm::{ChatRequest, LlmClient};

const FALLBACK_TOPIC_CHARS: usize = 100;

/// Reduces a free-text question to a `{topic, jurisdiction}` pair with one
/// model call. Never fails: malformed output falls back to the raw query.
pub struct TopicExtractor {
    llm: Arc<dyn LlmClient>,
    default_jurisdiction: String,
}

impl TopicExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, default_jurisdiction: impl Into<String>) -> Self {
        Self { llm, default_jurisdiction: default_jurisdiction.into() }
    }

    pub fn default_jurisdiction(&self) -> &str {
        &self.default_jurisdiction
    }

    pub async fn extract(&self, query: &str) -> ResearchTopic {
        let instruction = format!(
            "Extract the legal research topic and the jurisdiction from the student's question. \
             Respond with strict JSON only, exactly in the form \
             {{\"topic\": \"\", \"jurisdiction\": \"\"}}. \
             Keep the topic short (a few words). If no jurisdiction is mentioned, use \"{}\".",
            self.default_jurisdiction
        );
        let request =
            ChatRequest::new(vec![ChatMessage::system(instruction), ChatMessage::user(query)])
                .with_temperature(0.0);

        match self.llm.complete(request).await {
            Ok(completion) => parse_topic(&completion.content, query, &self.default_jurisdiction),
            Err(error) => {
                warn!(
                    event_name = "assistant.research.topic_extraction_failed",
                    error = %error,
                    "topic extraction failed, falling back to raw query"
                );
                fallback_topic(query, &self.default_jurisdiction)
            }
        }
    }
}

/// Reads the first JSON object in `output`, ignoring any prose around it.
pub fn parse_topic(output: &str, query: &str, default_jurisdiction: &str) -> ResearchTopic {
    let Some(start) = output.find('{') else {
        return fallback_topic(query, default_jurisdiction);
    };

    let parsed = serde_json::Deserializer::from_str(&output[start..]).into_iter::<Value>().next();
    let Some(Ok(Value::Object(object))) = parsed else {
        return fallback_topic(query, default_jurisdiction);
    };

    let field = |name: &str| {
        object
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    };

    let Some(topic) = field("topic") else {
        return fallback_topic(query, default_jurisdiction);
    };

    ResearchTopic {
        topic,
        jurisdiction: field("jurisdiction").unwrap_or_else(|| default_jurisdiction.to_string()),
    }
}

pub fn fallback_topic(query: &str, default_jurisdiction: &str) -> ResearchTopic {
    ResearchTopic {
        topic: query.trim().chars().take(FALLBACK_TOPIC_CHARS).collect(),
        jurisdiction: default_jurisdiction.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::llm::LlmError;
    use crate::testing::ScriptedLlm;

    use super::{parse_topic, TopicExtractor};

    #[test]
    fn parses_json_wrapped_in_prose_or_fences() {
        let output = "Sure!\n```json\n\
            {\"topic\": \"breach of contract damages\", \"jurisdiction\": \"Zambia\"}\n```";
        let topic = parse_topic(output, "raw", "Zambia");
        assert_eq!(topic.topic, "breach of contract damages");
        assert_eq!(topic.jurisdiction, "Zambia");
    }

    #[test]
    fn missing_jurisdiction_uses_default() {
        let output = r#"{"topic": "judicial review", "jurisdiction": ""}"#;
        let topic = parse_topic(output, "q", "Zambia");
        assert_eq!(topic.jurisdiction, "Zambia");
    }

    #[test]
    fn malformed_output_falls_back_to_truncated_query() {
        let query = "x".repeat(150);
        for output in ["no json here", "{\"topic\": ", "{\"jurisdiction\": \"Kenya\"}", "[1,2]"] {
            let topic = parse_topic(output, &query, "Zambia");
            assert_eq!(topic.topic.chars().count(), 100, "fallback for {output:?}");
            assert_eq!(topic.jurisdiction, "Zambia");
        }
    }

    #[tokio::test]
    async fn extractor_survives_model_failure() {
        let llm = Arc::new(ScriptedLlm::default());
        llm.push_complete_error(LlmError::Transport("connection reset".into()));
        let extractor = TopicExtractor::new(llm, "Zambia");

        let topic = extractor.extract("What is the leading case on estoppel?").await;
        assert_eq!(topic.topic, "What is the leading case on estoppel?");
        assert_eq!(topic.jurisdiction, "Zambia");
    }

    #[tokio::test]
    async fn extractor_uses_model_json() {
        let llm = Arc::new(ScriptedLlm::default());
        llm.push_complete_text(r#"{"topic":"estoppel","jurisdiction":"Kenya"}"#);
        let extractor = TopicExtractor::new(llm.clone(), "Zambia");

        let topic = extractor.extract("estoppel in Kenya?").await;
        assert_eq!(topic.topic, "estoppel");
        assert_eq!(topic.jurisdiction, "Kenya");
        assert_eq!(llm.complete_requests().len(), 1);
    }
}

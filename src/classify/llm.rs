//! Chat-completion client for the classification graph.
//!
//! The provider is any OpenAI-compatible endpoint; the base URL is injectable
//! so tests can point the client at a local stub. Responses are requested as
//! strict JSON (`response_format: json_object`) and parsed leniently: code
//! fences are stripped and, failing that, the outermost `{...}` is located.

use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

const CHAT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm api key is not configured")]
    MissingApiKey,
    #[error("llm http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("llm returned status {0}: {1}")]
    Status(u16, String),
    #[error("llm request timed out after {0:?}")]
    Timeout(Duration),
    #[error("llm response contained no content")]
    EmptyResponse,
}

/// One chat-completion call. `temperature` is set by the caller so the graph
/// can clamp classification calls independently of the configured default.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Minimal chat-model interface the graph depends on; mocked in tests.
#[cfg_attr(test, mockall::automock)]
#[rocket::async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError>;

    /// Identifier recorded on produced classifications.
    fn model_id(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
    response_format: Value,
}

#[derive(serde::Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(serde::Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(serde::Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, api_key: String, model: String) -> Self {
        let base = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url: base,
            api_key,
            model,
            http: reqwest::Client::new(),
        }
    }

    async fn dispatch(&self, request: &ChatRequest) -> Result<String, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let payload = WireRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: &request.system,
                },
                WireMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            response_format: serde_json::json!({"type": "json_object"}),
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            // Never echo prompt contents back into logs; status + length only.
            log::warn!(
                "llm request failed with status {} ({} byte body)",
                status,
                body.len()
            );
            return Err(LlmError::Status(status.as_u16(), body));
        }

        let parsed: WireResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

#[rocket::async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        match timeout(CHAT_REQUEST_TIMEOUT, self.dispatch(&request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(CHAT_REQUEST_TIMEOUT)),
        }
    }

    fn model_id(&self) -> String {
        self.model.clone()
    }
}

/// Parse model output as JSON, tolerating markdown fences and surrounding
/// prose. Returns the first parseable object.
pub fn parse_json_lenient(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    // Strip ``` / ```json fences.
    let unfenced = if trimmed.starts_with("```") {
        trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
    } else {
        trimmed
    };

    if let Ok(value) = serde_json::from_str::<Value>(unfenced) {
        return Some(value);
    }

    // Last resort: locate the outermost `{...}`.
    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&unfenced[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let value = parse_json_lenient(r#"{"category":"job_rejection"}"#).unwrap();
        assert_eq!(value["category"], "job_rejection");
    }

    #[test]
    fn strips_code_fences() {
        let text = "```json\n{\"confidence\": 0.9}\n```";
        let value = parse_json_lenient(text).unwrap();
        assert_eq!(value["confidence"], 0.9);
    }

    #[test]
    fn locates_outermost_object_in_prose() {
        let text = "Here is the result: {\"class\": \"job_alerts\"} hope that helps";
        let value = parse_json_lenient(text).unwrap();
        assert_eq!(value["class"], "job_alerts");
    }

    #[test]
    fn returns_none_for_garbage() {
        assert!(parse_json_lenient("no json here").is_none());
        assert!(parse_json_lenient("}{").is_none());
    }
}

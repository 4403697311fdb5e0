//! LLM gateway: prompt assembly, a pluggable chat-completion transport and
//! recovery of structured output.
//!
//! Every call is a single request with no retry. Transport failures are
//! classified into [`LlmError`] kinds that the HTTP layer maps to status
//! codes.

pub mod client;
pub mod prompts;
pub mod repair;

pub use client::OpenAiCompatClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM authentication failed: {0}")]
    Authentication(String),

    #[error("LLM rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("LLM network error: {0}")]
    Network(String),

    #[error("LLM request failed: {0}")]
    Unknown(String),

    /// The model answered, but not with usable output.
    #[error("{message}")]
    Output { message: String, raw: String },
}

impl LlmError {
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::Authentication(_) => "llm_authentication",
            LlmError::RateLimited(_) => "llm_rate_limited",
            LlmError::Network(_) => "llm_network",
            LlmError::Unknown(_) => "llm_unknown",
            LlmError::Output { .. } => "llm_output",
        }
    }

    /// Classify a non-success HTTP status from the provider.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status, body.trim());
        match status {
            401 | 403 => LlmError::Authentication(detail),
            429 => LlmError::RateLimited(detail),
            _ => LlmError::Unknown(detail),
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return LlmError::from_status(status.as_u16(), &err.to_string());
        }
        if err.is_connect() || err.is_timeout() || err.is_request() {
            LlmError::Network(err.to_string())
        } else {
            LlmError::Unknown(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// One chat-completion request with its sampling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_completion_tokens: u32,
    pub seed: Option<u64>,
}

/// Transport seam for chat completions.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Send one request and return the first choice's text.
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;
}

/// A message the user wants rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftMessage {
    pub text: String,
    pub speaker: String,
    #[serde(default)]
    pub addressees: Vec<String>,
}

/// Entry of a document's `users` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerProfile {
    #[serde(default)]
    pub speaker: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub speaker: String,
    pub text: String,
}

/// Optional tone directives for a rewrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewriteGuidance {
    pub temperament: Option<String>,
    pub style: Option<String>,
    pub length: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub model: String,
    pub reply: String,
}

/// Pick the part of a stored document to send for reshaping: a flat list as
/// is, a draft's `discussion` list, otherwise the whole document.
pub fn reshape_input(document: &Value) -> &Value {
    match document {
        Value::Object(obj) => match obj.get("discussion") {
            Some(items @ Value::Array(_)) => items,
            _ => document,
        },
        _ => document,
    }
}

#[derive(Clone)]
pub struct LlmGateway {
    model: Arc<dyn ChatModel>,
}

impl std::fmt::Debug for LlmGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmGateway")
            .field("model", &self.model.model_name())
            .finish()
    }
}

impl LlmGateway {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Turn a flat discussion export into a `{users, tree}` object.
    pub async fn reshape_discussion(&self, items: &Value) -> Result<Value, LlmError> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(prompts::RESHAPE_SYSTEM),
                ChatMessage::user(prompts::reshape_user(items)),
            ],
            temperature: 0.0,
            top_p: 0.7,
            max_completion_tokens: 8192,
            seed: Some(42),
        };
        let raw = self.model.complete(&request).await?;
        debug!(chars = raw.len(), "Reshape reply received");

        let value = repair::parse_model_json(&raw)?;
        if !value.is_object() {
            return Err(LlmError::Output {
                message: "model output is not a JSON object".to_string(),
                raw,
            });
        }
        info!(model = self.model_name(), "Reshaped discussion");
        Ok(value)
    }

    pub async fn generate_bio(
        &self,
        existing_bio: &str,
        messages: &[String],
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(prompts::BIO_SYSTEM),
                ChatMessage::user(prompts::bio_user(existing_bio, messages)),
            ],
            temperature: 1.2,
            top_p: 0.9,
            max_completion_tokens: 2048,
            seed: Some(42),
        };
        let reply = self.model.complete(&request).await?;
        Ok(reply.trim().to_string())
    }

    pub async fn rewrite_message(
        &self,
        draft: &DraftMessage,
        profile: Option<&SpeakerProfile>,
        history: &[HistoryMessage],
        guidance: &RewriteGuidance,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(prompts::REWRITE_SYSTEM),
                ChatMessage::user(prompts::rewrite_user(draft, profile, history, guidance)),
            ],
            temperature: 0.7,
            top_p: 0.9,
            max_completion_tokens: 1024,
            seed: None,
        };
        let reply = self.model.complete(&request).await?;
        Ok(strip_quotes(&reply))
    }

    pub async fn health(&self) -> Result<HealthReport, LlmError> {
        let request = ChatRequest {
            messages: vec![ChatMessage::user(prompts::HEALTH_PROMPT)],
            temperature: 0.0,
            top_p: 1.0,
            max_completion_tokens: 16,
            seed: None,
        };
        let reply = self.model.complete(&request).await?;
        Ok(HealthReport {
            model: self.model_name().to_string(),
            reply: reply.trim().to_string(),
        })
    }
}

const QUOTE_PAIRS: [(char, char); 4] = [
    ('"', '"'),
    ('\'', '\''),
    ('\u{201c}', '\u{201d}'),
    ('\u{2018}', '\u{2019}'),
];

/// Drop one pair of quotes wrapping the whole reply.
fn strip_quotes(reply: &str) -> String {
    let trimmed = reply.trim();
    for (open, close) in QUOTE_PAIRS {
        if let Some(inner) = trimmed
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedModel;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn reshape_repairs_trailing_comma() {
        let model = ScriptedModel::replying(
            "Sure!\n{\"users\": [{\"speaker\": \"A\", \"description\": \"d\"},], \
             \"tree\": {\"id\": \"1\", \"speaker\": \"A\", \"text\": \"hi\", \"children\": [],}}",
        );
        let gateway = LlmGateway::new(model.clone());
        let value = gateway
            .reshape_discussion(&json!([{"id": "1", "speaker": "A", "text": "hi", "target_id": "0"}]))
            .await
            .unwrap();
        assert_eq!(value["tree"]["speaker"], "A");

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests[0].temperature, 0.0);
        assert_eq!(requests[0].seed, Some(42));
        assert_eq!(requests[0].max_completion_tokens, 8192);
    }

    #[tokio::test]
    async fn reshape_rejects_non_object_output() {
        let gateway = LlmGateway::new(ScriptedModel::replying("[1, 2, 3]"));
        let err = gateway.reshape_discussion(&json!([])).await.unwrap_err();
        assert_eq!(err.kind(), "llm_output");
    }

    #[tokio::test]
    async fn transport_errors_pass_through() {
        let model = ScriptedModel::new(vec![Err(LlmError::RateLimited("slow".into()))]);
        let gateway = LlmGateway::new(model);
        let err = gateway.generate_bio("bio", &[]).await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited(_)));
    }

    #[tokio::test]
    async fn bio_is_trimmed_and_uses_bio_sampling() {
        let model = ScriptedModel::replying("  Alice argues plainly.\n");
        let gateway = LlmGateway::new(model.clone());
        let bio = gateway
            .generate_bio("Alice codes.", &["I disagree.".into()])
            .await
            .unwrap();
        assert_eq!(bio, "Alice argues plainly.");
        let requests = model.requests.lock().unwrap();
        assert_eq!(requests[0].temperature, 1.2);
        assert_eq!(requests[0].max_completion_tokens, 2048);
    }

    #[tokio::test]
    async fn rewrite_strips_quotes() {
        let gateway = LlmGateway::new(ScriptedModel::replying("\"Let's ship it, Bob.\"\n"));
        let draft = DraftMessage {
            text: "ship".into(),
            speaker: "Alice".into(),
            addressees: vec!["Bob".into()],
        };
        let text = gateway
            .rewrite_message(&draft, None, &[], &RewriteGuidance::default())
            .await
            .unwrap();
        assert_eq!(text, "Let's ship it, Bob.");
    }

    #[test]
    fn only_one_wrapping_quote_pair_is_removed() {
        assert_eq!(strip_quotes("the dogs'"), "the dogs'");
        assert_eq!(strip_quotes("'tis fine"), "'tis fine");
        assert_eq!(strip_quotes("\"'ok'\""), "'ok'");
        assert_eq!(strip_quotes("\u{201c}Hi there\u{201d}"), "Hi there");
        assert_eq!(strip_quotes("'the dogs''"), "the dogs'");
        assert_eq!(strip_quotes("\""), "\"");
    }

    #[test]
    fn status_codes_are_classified() {
        assert!(matches!(LlmError::from_status(401, ""), LlmError::Authentication(_)));
        assert!(matches!(LlmError::from_status(403, ""), LlmError::Authentication(_)));
        assert!(matches!(LlmError::from_status(429, ""), LlmError::RateLimited(_)));
        assert!(matches!(LlmError::from_status(500, ""), LlmError::Unknown(_)));
    }

    #[test]
    fn reshape_input_prefers_draft_discussion() {
        let draft = json!({"fileRef": "a.json", "discussion": [{"id": 1}]});
        assert_eq!(reshape_input(&draft), &json!([{"id": 1}]));
        let flat = json!([{"id": "1"}]);
        assert_eq!(reshape_input(&flat), &flat);
    }
}

//! Client for the generative text service (Gemini `generateContent`).
//!
//! The service is treated as untrusted: it can be slow, unavailable, refuse
//! on safety grounds, truncate its output, or return garbage. This module
//! only does transport and envelope extraction; deciding what a reply is
//! worth is the parser's and orchestrator's job.

use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::warn;

/// Base URL for the generative language API.
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1";

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Normal completion.
    Stop,

    /// The output-token budget was exhausted; the text is likely truncated.
    MaxTokens,

    /// The service refused to answer on safety grounds.
    Safety,

    /// Anything else, including an absent finish reason.
    Other,
}

impl FinishReason {
    /// Map the wire-format string, case-insensitively.
    pub fn from_wire(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "STOP" => FinishReason::Stop,
            "MAX_TOKENS" => FinishReason::MaxTokens,
            "SAFETY" => FinishReason::Safety,
            _ => FinishReason::Other,
        }
    }
}

/// One reply from the service, reduced to what the cascade needs.
#[derive(Debug, Clone)]
pub struct ModelReply {
    /// Whether the HTTP status was 2xx.
    pub http_ok: bool,

    /// Concatenated candidate text; empty on refusals and junk envelopes.
    pub text: String,

    pub finish_reason: FinishReason,
}

/// Transport-level failure of one attempt.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("generative service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("generative service call exceeded the {0:?} ceiling")]
    Timeout(Duration),
}

/// Abstraction over the generative transport so tests can script replies.
pub trait ModelClient {
    fn generate(
        &self,
        model: &str,
        prompt: &str,
        max_output_tokens: u32,
    ) -> impl Future<Output = Result<ModelReply, ModelError>> + Send;
}

/// reqwest-backed client for the hosted service.
#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    temperature: f64,
    request_timeout: Duration,
}

impl GeminiClient {
    /// Create a client against the hosted endpoint.
    pub fn new(api_key: &str, temperature: f64, request_timeout: Duration) -> Self {
        Self::with_base_url(GEMINI_API_BASE, api_key, temperature, request_timeout)
    }

    /// Create a client with a custom base URL (for testing).
    pub fn with_base_url(
        base_url: &str,
        api_key: &str,
        temperature: f64,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            temperature,
            request_timeout,
        }
    }
}

impl ModelClient for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<ModelReply, ModelError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url,
            model,
            urlencoding::encode(&self.api_key)
        );

        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }]
            }],
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": max_output_tokens
            }
        });

        // The ceiling is enforced here, not trusted to the service: one
        // unresponsive upstream call must not stall the request task.
        let send = self.client.post(&url).json(&payload).send();
        let response = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| ModelError::Timeout(self.request_timeout))??;

        let http_ok = response.status().is_success();
        let body = response.text().await?;
        let envelope: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

        Ok(extract_reply(http_ok, &envelope))
    }
}

/// Reduce a response envelope to text + finish reason.
fn extract_reply(http_ok: bool, envelope: &Value) -> ModelReply {
    let candidate = &envelope["candidates"][0];

    let finish_reason = candidate["finishReason"]
        .as_str()
        .map(FinishReason::from_wire)
        .unwrap_or(FinishReason::Other);

    if finish_reason == FinishReason::Safety {
        let block = envelope["promptFeedback"]["blockReason"]
            .as_str()
            .unwrap_or("(unknown)");
        warn!(block_reason = %block, "generative service refused on safety grounds");
        return ModelReply {
            http_ok,
            text: String::new(),
            finish_reason,
        };
    }

    let text = match candidate["content"]["parts"].as_array() {
        Some(parts) => parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
        // Some envelope variants carry the text directly on content.
        None => candidate["content"]["text"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .to_string(),
    };

    ModelReply {
        http_ok,
        text,
        finish_reason,
    }
}

//! Insights orchestration: metrics, prompt, attempt cascade, parse, report.
//!
//! The engine owns the only side-effectful control flow in the crate. Every
//! request walks one fixed cascade of model attempts and ends in exactly one
//! of two places: a parsed model answer or the deterministic fallback. No
//! failure class escapes to the caller; `source` is the only tell.

use std::env;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::fallback::{fallback_advice, fallback_report};
use crate::gemini::{FinishReason, ModelClient};
use crate::metrics;
use crate::model::{InsightsResponse, ReportResponse, ReportSource};
use crate::parser::{parse_rich_report, parse_simple_advice};
use crate::prompts;
use crate::storage::Storage;

/// Output budget for the first simple-advice attempt.
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 256;

/// Floor for the retry budget once an attempt came back truncated.
const ULTRA_RETRY_MIN_TOKENS: u32 = 320;

/// Floor for rich report attempts; the shape is much bigger than the advice.
const RICH_MIN_TOKENS: u32 = 1024;

const DEFAULT_TEMPERATURE: f64 = 0.2;

/// Ceiling for one model call, enforced caller-side.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const DEFAULT_PRIMARY_MODEL: &str = "gemini-2.5-flash";

/// Lighter model used for the last cascade step.
const DEFAULT_SECONDARY_MODEL: &str = "gemini-2.0-flash";

/// Read-only configuration for the engine, fixed at process start.
#[derive(Debug, Clone)]
pub struct InsightsConfig {
    /// Service credential. `None` disables the cascade entirely: every
    /// request is answered from the fallback without touching the network.
    pub api_key: Option<String>,

    pub primary_model: String,
    pub secondary_model: String,

    pub max_output_tokens: u32,
    pub temperature: f64,
    pub request_timeout: Duration,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            primary_model: DEFAULT_PRIMARY_MODEL.to_string(),
            secondary_model: DEFAULT_SECONDARY_MODEL.to_string(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl InsightsConfig {
    /// Build the configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_key = env::var("GOOGLE_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!("GOOGLE_API_KEY is not set; model calls will fall back");
        }

        Self {
            api_key,
            primary_model: env::var("FIRESHIELD_MODEL").unwrap_or(defaults.primary_model),
            secondary_model: env::var("FIRESHIELD_SECONDARY_MODEL")
                .unwrap_or(defaults.secondary_model),
            max_output_tokens: env::var("FIRESHIELD_MAX_OUTPUT_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_output_tokens),
            temperature: env::var("FIRESHIELD_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.temperature),
            request_timeout: defaults.request_timeout,
        }
    }
}

/// One step of a cascade: which model, which prompt, what budget.
struct Attempt<'a> {
    model: &'a str,
    prompt: &'a str,
    max_output_tokens: u32,
}

/// The insights engine, generic over the model transport so tests can
/// script replies instead of hitting the network.
#[derive(Clone)]
pub struct InsightsEngine<C> {
    config: InsightsConfig,
    client: C,
}

impl<C: ModelClient> InsightsEngine<C> {
    pub fn new(config: InsightsConfig, client: C) -> Self {
        Self { config, client }
    }

    /// Simple insights for a window: overview metrics plus short advice.
    pub async fn generate_insights(
        &self,
        storage: &Storage,
        window_hours: i64,
    ) -> anyhow::Result<InsightsResponse> {
        let now = Utc::now();
        let overview = metrics::overview_for_hours(storage, window_hours, now).await?;
        let severity = overview.severity;
        let metrics_value = serde_json::to_value(&overview)?;

        let fallback = |metrics_value| InsightsResponse {
            window_hours: overview.window_hours,
            model: self.config.primary_model.clone(),
            metrics: metrics_value,
            advice: fallback_advice(severity),
            source: ReportSource::Fallback,
        };

        if self.config.api_key.is_none() {
            return Ok(fallback(metrics_value));
        }

        let compact = prompts::compact_prompt(&overview, overview.window_hours);
        let ultra = prompts::ultra_compact_prompt(&overview);

        let attempts = [
            Attempt {
                model: &self.config.primary_model,
                prompt: &compact,
                max_output_tokens: self.config.max_output_tokens,
            },
            // Terser prompt and a raised budget: the retry that cures
            // truncation also covers plain malformed output.
            Attempt {
                model: &self.config.primary_model,
                prompt: &ultra,
                max_output_tokens: self.config.max_output_tokens.max(ULTRA_RETRY_MIN_TOKENS),
            },
            Attempt {
                model: &self.config.secondary_model,
                prompt: &ultra,
                max_output_tokens: ULTRA_RETRY_MIN_TOKENS,
            },
        ];

        match self
            .run_cascade(&attempts, |text| parse_simple_advice(text, severity))
            .await
        {
            Some((advice, model)) => Ok(InsightsResponse {
                window_hours: overview.window_hours,
                model,
                metrics: metrics_value,
                advice,
                source: ReportSource::Model,
            }),
            None => Ok(fallback(serde_json::to_value(&overview)?)),
        }
    }

    /// Rich awareness report for a window.
    pub async fn generate_report(
        &self,
        storage: &Storage,
        window_hours: i64,
    ) -> anyhow::Result<ReportResponse> {
        let now = Utc::now();
        let detailed = metrics::detailed_metrics(storage, window_hours, now).await?;
        let severity = detailed.severity;
        let metrics_value = serde_json::to_value(&detailed)?;

        let fallback = |metrics_value| ReportResponse {
            window_hours: detailed.window_hours,
            metrics: metrics_value,
            ai_report: fallback_report(severity),
            model: self.config.primary_model.clone(),
            source: ReportSource::Fallback,
        };

        if self.config.api_key.is_none() {
            return Ok(fallback(metrics_value));
        }

        let prompt = prompts::rich_report_prompt(&detailed);
        let budget = self.config.max_output_tokens.max(RICH_MIN_TOKENS);

        let attempts = [
            Attempt {
                model: &self.config.primary_model,
                prompt: &prompt,
                max_output_tokens: budget,
            },
            Attempt {
                model: &self.config.secondary_model,
                prompt: &prompt,
                max_output_tokens: budget,
            },
        ];

        match self.run_cascade(&attempts, parse_rich_report).await {
            Some((report, model)) => Ok(ReportResponse {
                window_hours: detailed.window_hours,
                metrics: metrics_value,
                ai_report: report,
                model,
                source: ReportSource::Model,
            }),
            None => Ok(fallback(serde_json::to_value(&detailed)?)),
        }
    }

    /// Walk a cascade in order; first attempt whose reply parses wins.
    ///
    /// Network errors, timeout-ceiling breaches, refusals, truncations, and
    /// unparseable bodies all fail the attempt and move on. Returns the
    /// parsed value together with the model that produced it.
    async fn run_cascade<T>(
        &self,
        attempts: &[Attempt<'_>],
        parse: impl Fn(&str) -> Option<T>,
    ) -> Option<(T, String)> {
        for (i, attempt) in attempts.iter().enumerate() {
            let reply = match self
                .client
                .generate(attempt.model, attempt.prompt, attempt.max_output_tokens)
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(
                        attempt = i + 1,
                        model = attempt.model,
                        error = %e,
                        "model attempt failed"
                    );
                    continue;
                }
            };

            info!(
                attempt = i + 1,
                model = attempt.model,
                http_ok = reply.http_ok,
                finish_reason = ?reply.finish_reason,
                body_preview = %preview(&reply.text, 400),
                "model attempt completed"
            );

            if reply.finish_reason == FinishReason::MaxTokens {
                info!(
                    attempt = i + 1,
                    model = attempt.model,
                    "reply truncated by the output budget"
                );
            }

            if reply.http_ok {
                if let Some(parsed) = parse(&reply.text) {
                    return Some((parsed, attempt.model.to_string()));
                }
            }

            warn!(
                attempt = i + 1,
                model = attempt.model,
                "attempt produced no usable advice"
            );
        }

        None
    }
}

/// Bounded preview of a model body for logs.
fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{head}...(truncated)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::{ModelError, ModelReply};
    use crate::model::{SamplePoint, Severity};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Scripted transport: pops a canned reply per call and records the
    /// calls it saw.
    #[derive(Clone, Default)]
    struct ScriptedClient {
        replies: Arc<Mutex<VecDeque<Result<ModelReply, ModelError>>>>,
        calls: Arc<Mutex<Vec<(String, String, u32)>>>,
    }

    impl ScriptedClient {
        fn push(&self, reply: Result<ModelReply, ModelError>) {
            self.replies.lock().unwrap().push_back(reply);
        }

        fn calls(&self) -> Vec<(String, String, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ModelClient for ScriptedClient {
        async fn generate(
            &self,
            model: &str,
            prompt: &str,
            max_output_tokens: u32,
        ) -> Result<ModelReply, ModelError> {
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), prompt.to_string(), max_output_tokens));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::Timeout(Duration::from_secs(1))))
        }
    }

    fn ok_reply(text: &str) -> Result<ModelReply, ModelError> {
        Ok(ModelReply {
            http_ok: true,
            text: text.to_string(),
            finish_reason: FinishReason::Stop,
        })
    }

    fn truncated_reply(text: &str) -> Result<ModelReply, ModelError> {
        Ok(ModelReply {
            http_ok: true,
            text: text.to_string(),
            finish_reason: FinishReason::MaxTokens,
        })
    }

    fn config_with_key() -> InsightsConfig {
        InsightsConfig {
            api_key: Some("test-key".to_string()),
            ..InsightsConfig::default()
        }
    }

    async fn storage_with_avg(tvoc: f64) -> Storage {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let now = Utc::now();
        for offset in 1..=4 {
            storage
                .insert_sample(
                    "dev-1",
                    &SamplePoint {
                        ts: now - chrono::Duration::minutes(offset),
                        tvoc_ppb: Some(tvoc),
                        voc_index: None,
                        eco2_ppm: None,
                        hum_rel: None,
                        temp_c: None,
                        formaldehyde_ppm: None,
                        benzene_ppm: None,
                    },
                )
                .await
                .unwrap();
        }
        storage
    }

    const GOOD_SIMPLE: &str =
        r#"{"summary":"Levels look fine.","actions":["Vent","Bag gear","Wash up"]}"#;

    const GOOD_RICH: &str = r#"{"summary":"Quiet window.","riskScore":12,
        "keyFindings":["low averages"],"recommendations":["keep venting"],
        "deconChecklist":["air out gear"]}"#;

    #[tokio::test]
    async fn test_first_attempt_success_is_model_sourced() {
        let storage = storage_with_avg(120.0).await;
        let client = ScriptedClient::default();
        client.push(ok_reply(GOOD_SIMPLE));
        let engine = InsightsEngine::new(config_with_key(), client.clone());

        let response = engine.generate_insights(&storage, 24).await.unwrap();

        assert_eq!(response.source, ReportSource::Model);
        assert_eq!(response.model, "gemini-2.5-flash");
        assert!(response.advice.decon_reminder.is_none());
        assert_eq!(client.calls().len(), 1);
        assert_eq!(response.metrics["severity"], "SAFE");
    }

    #[tokio::test]
    async fn test_missing_credential_falls_back_without_network() {
        let storage = storage_with_avg(120.0).await;
        let client = ScriptedClient::default();
        let engine = InsightsEngine::new(InsightsConfig::default(), client.clone());

        let response = engine.generate_insights(&storage, 24).await.unwrap();

        assert_eq!(response.source, ReportSource::Fallback);
        assert_eq!(
            response.advice.summary,
            crate::fallback::fallback_advice(Severity::Safe).summary
        );
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_truncation_retries_ultra_on_primary_then_secondary() {
        let storage = storage_with_avg(120.0).await;
        let client = ScriptedClient::default();
        client.push(truncated_reply(""));
        client.push(truncated_reply(""));
        client.push(ok_reply(GOOD_SIMPLE));
        let engine = InsightsEngine::new(config_with_key(), client.clone());

        let response = engine.generate_insights(&storage, 24).await.unwrap();

        let calls = client.calls();
        assert_eq!(calls.len(), 3);
        // Exactly one ultra-compact retry on the primary model first
        assert_eq!(calls[0].0, "gemini-2.5-flash");
        assert_eq!(calls[1].0, "gemini-2.5-flash");
        assert!(calls[1].1.contains("MINIFIED"));
        assert_eq!(calls[1].2, 320);
        assert_eq!(calls[2].0, "gemini-2.0-flash");
        assert_eq!(response.source, ReportSource::Model);
        assert_eq!(response.model, "gemini-2.0-flash");
    }

    #[tokio::test]
    async fn test_exhausted_cascade_falls_back_with_primary_model_name() {
        let storage = storage_with_avg(950.0).await;
        let client = ScriptedClient::default();
        for _ in 0..3 {
            client.push(Err(ModelError::Timeout(Duration::from_secs(1))));
        }
        let engine = InsightsEngine::new(config_with_key(), client.clone());

        let response = engine.generate_insights(&storage, 24).await.unwrap();

        assert_eq!(client.calls().len(), 3);
        assert_eq!(response.source, ReportSource::Fallback);
        assert_eq!(response.model, "gemini-2.5-flash");
        assert!(response.advice.decon_reminder.is_some());
    }

    #[tokio::test]
    async fn test_non_2xx_attempt_does_not_win() {
        let storage = storage_with_avg(120.0).await;
        let client = ScriptedClient::default();
        client.push(Ok(ModelReply {
            http_ok: false,
            text: GOOD_SIMPLE.to_string(),
            finish_reason: FinishReason::Stop,
        }));
        client.push(ok_reply(GOOD_SIMPLE));
        let engine = InsightsEngine::new(config_with_key(), client.clone());

        let response = engine.generate_insights(&storage, 24).await.unwrap();

        assert_eq!(client.calls().len(), 2);
        assert_eq!(response.source, ReportSource::Model);
    }

    #[tokio::test]
    async fn test_rich_cascade_is_two_attempts_then_fallback() {
        let storage = storage_with_avg(600.0).await;
        let client = ScriptedClient::default();
        client.push(ok_reply("no json here"));
        client.push(ok_reply("still no json"));
        let engine = InsightsEngine::new(config_with_key(), client.clone());

        let response = engine.generate_report(&storage, 24).await.unwrap();

        let calls = client.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "gemini-2.5-flash");
        assert_eq!(calls[1].0, "gemini-2.0-flash");
        assert!(calls[0].2 >= 1024);
        assert_eq!(response.source, ReportSource::Fallback);
        assert!(response.ai_report.policy_suggestion.is_some());
    }

    #[tokio::test]
    async fn test_rich_report_model_success() {
        let storage = storage_with_avg(120.0).await;
        let client = ScriptedClient::default();
        client.push(ok_reply(GOOD_RICH));
        let engine = InsightsEngine::new(config_with_key(), client.clone());

        let response = engine.generate_report(&storage, 24).await.unwrap();

        assert_eq!(response.source, ReportSource::Model);
        assert_eq!(response.ai_report.risk_score, 12);
        assert_eq!(response.metrics["samplesCount"], 4);
    }

    #[tokio::test]
    async fn test_safety_refusal_proceeds_through_cascade() {
        let storage = storage_with_avg(120.0).await;
        let client = ScriptedClient::default();
        client.push(Ok(ModelReply {
            http_ok: true,
            text: String::new(),
            finish_reason: FinishReason::Safety,
        }));
        client.push(ok_reply(GOOD_SIMPLE));
        let engine = InsightsEngine::new(config_with_key(), client.clone());

        let response = engine.generate_insights(&storage, 24).await.unwrap();

        assert_eq!(client.calls().len(), 2);
        assert_eq!(response.source, ReportSource::Model);
    }

    #[test]
    fn test_preview_bounds_long_bodies() {
        let long = "x".repeat(500);
        let shown = preview(&long, 400);

        assert!(shown.len() < 500);
        assert!(shown.ends_with("...(truncated)"));
        assert_eq!(preview("short", 400), "short");
    }
}

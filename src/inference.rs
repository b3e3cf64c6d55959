//! Remote inference client: response generation and bias evaluation with a
//! bounded, flat-delay retry loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::HarnessConfig;
use crate::gateway::{
    provider_from_config, ChatModel, ChatProvider, ChatRequest, ChatResponse, FinishReason,
    ProviderError,
};
use crate::prompts::{bias_evaluation_prompt, generation_prompt, parse_bias_evaluation, BiasEvaluation, EvaluationParseError};

/// Attempts, pause, and per-attempt bound of one remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_retries: u32,
    /// Flat pause between attempts.
    pub retry_delay: Duration,
    /// Bound on each attempt.
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay,
            call_timeout: config.call_timeout,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&HarnessConfig::default())
    }
}

/// Terminal errors of the inference client.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// No usable credential; raised at construction, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Retry budget exhausted.
    #[error("API error after {attempts} attempt(s): {message}")]
    Api {
        message: String,
        status: Option<u16>,
        attempts: u32,
    },
}

impl InferenceError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => *status,
            Self::Configuration(_) => None,
        }
    }
}

/// Failure of a single attempt. Always retried while budget remains.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("model returned an empty response")]
    Empty,
    #[error("malformed evaluation: {0}")]
    Malformed(#[from] EvaluationParseError),
}

impl AttemptError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Provider(e) => e.status(),
            _ => None,
        }
    }

    /// Short code for logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Provider(e) => e.code(),
            Self::Empty => "empty_response",
            Self::Malformed(_) => "malformed_evaluation",
        }
    }

    /// Whether a later attempt can plausibly succeed. Informational only:
    /// every failed attempt is retried while budget remains.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            Self::Empty | Self::Malformed(_) => true,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Provider(e) => e.request_id(),
            _ => None,
        }
    }
}

/// Client bound to one generation model.
pub struct InferenceClient {
    provider: Arc<dyn ChatProvider>,
    model: ChatModel,
    evaluator: ChatModel,
    policy: RetryPolicy,
}

impl std::fmt::Debug for InferenceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceClient")
            .field("model", &self.model)
            .field("evaluator", &self.evaluator)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl InferenceClient {
    /// Client talking to the configured OpenRouter endpoint.
    pub fn new(config: &HarnessConfig, model: impl Into<String>) -> Result<Self, InferenceError> {
        let provider = provider_from_config(config)
            .map_err(|e| InferenceError::Configuration(e.to_string()))?;
        Ok(Self::with_provider(provider, model, config))
    }

    /// Client over an arbitrary provider.
    pub fn with_provider(
        provider: Arc<dyn ChatProvider>,
        model: impl Into<String>,
        config: &HarnessConfig,
    ) -> Self {
        let model = ChatModel::new(model);
        let evaluator = config
            .evaluator_model
            .as_deref()
            .map(ChatModel::new)
            .unwrap_or_else(|| model.clone());
        Self {
            provider,
            model,
            evaluator,
            policy: RetryPolicy::from_config(config),
        }
    }

    pub fn model(&self) -> &str {
        self.model.model_id()
    }

    pub fn evaluator_model(&self) -> &str {
        self.evaluator.model_id()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Free-text answer to a research prompt.
    pub async fn generate_response(&self, prompt_text: &str) -> Result<String, InferenceError> {
        let request = ChatRequest::new(
            self.model.clone(),
            generation_prompt(prompt_text).to_messages(),
        )
        .temperature(0.7);

        self.call_with_retry("generate", request, |resp| {
            let text = resp.content.trim();
            if text.is_empty() {
                Err(AttemptError::Empty)
            } else {
                Ok(text.to_string())
            }
        })
        .await
    }

    /// Bias score and justification for a generated response.
    pub async fn evaluate_bias(&self, response_text: &str) -> Result<BiasEvaluation, InferenceError> {
        let request = ChatRequest::new(
            self.evaluator.clone(),
            bias_evaluation_prompt(response_text).to_messages(),
        )
        .json();

        self.call_with_retry("evaluate_bias", request, |resp| {
            let text = resp.content.trim();
            if text.is_empty() {
                return Err(AttemptError::Empty);
            }
            Ok(parse_bias_evaluation(text)?)
        })
        .await
    }

    async fn call_with_retry<T>(
        &self,
        operation: &'static str,
        request: ChatRequest,
        parse: impl Fn(ChatResponse) -> Result<T, AttemptError>,
    ) -> Result<T, InferenceError> {
        let attempts = self.policy.max_retries.max(1);
        let mut last_error: Option<AttemptError> = None;
        let mut last_status: Option<u16> = None;

        for attempt in 1..=attempts {
            let outcome = match timeout(self.policy.call_timeout, self.provider.chat(&request)).await {
                Ok(Ok(resp)) => {
                    debug!(
                        operation,
                        model = request.model.model_id(),
                        attempt,
                        input_tokens = resp.input_tokens,
                        output_tokens = resp.output_tokens,
                        latency_ms = resp.latency.as_millis() as u64,
                        finish_reason = ?resp.finish_reason,
                        "remote call returned"
                    );
                    if matches!(resp.finish_reason, FinishReason::Length | FinishReason::ContentFilter) {
                        warn!(
                            operation,
                            model = request.model.model_id(),
                            finish_reason = ?resp.finish_reason,
                            "response was cut short by the provider"
                        );
                    }
                    parse(resp)
                }
                Ok(Err(e)) => Err(AttemptError::Provider(e)),
                Err(_) => Err(AttemptError::Provider(ProviderError::Timeout(
                    self.policy.call_timeout,
                ))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if let Some(status) = err.status() {
                        last_status = Some(status);
                    }
                    warn!(
                        operation,
                        model = request.model.model_id(),
                        attempt,
                        max_attempts = attempts,
                        status = ?err.status(),
                        code = err.code(),
                        transient = err.is_transient(),
                        request_id = ?err.request_id(),
                        error = %err,
                        "remote call failed"
                    );
                    last_error = Some(err);
                    if attempt < attempts {
                        sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }

        let detail = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        let message = match last_status {
            Some(status) => format!("{operation} failed (status {status}): {detail}"),
            None => format!("{operation} failed: {detail}"),
        };
        Err(InferenceError::Api {
            message,
            status: last_status,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_fails_fast() {
        let config = HarnessConfig::default();
        let err = InferenceClient::new(&config, "test/model").unwrap_err();
        assert!(matches!(err, InferenceError::Configuration(_)));
    }

    #[test]
    fn evaluator_defaults_to_run_model() {
        let config = HarnessConfig {
            api_key: Some("sk-test".into()),
            ..HarnessConfig::default()
        };
        let client = InferenceClient::new(&config, "test/model").unwrap();
        assert_eq!(client.model(), "test/model");
        assert_eq!(client.evaluator_model(), "test/model");

        let config = HarnessConfig {
            evaluator_model: Some("judge/model".into()),
            ..config
        };
        let client = InferenceClient::new(&config, "test/model").unwrap();
        assert_eq!(client.evaluator_model(), "judge/model");
    }

    #[test]
    fn attempt_errors_classify_for_logs() {
        let unauthorized = AttemptError::from(ProviderError::provider_with_context(
            "openrouter",
            "bad key",
            false,
            crate::gateway::ErrorContext::new()
                .with_status(401)
                .with_request_id("req-9"),
        ));
        assert_eq!(unauthorized.code(), "provider_error");
        assert!(!unauthorized.is_transient());
        assert_eq!(unauthorized.request_id(), Some("req-9"));
        assert_eq!(unauthorized.status(), Some(401));

        let malformed = AttemptError::from(EvaluationParseError::Missing("score"));
        assert_eq!(malformed.code(), "malformed_evaluation");
        assert!(malformed.is_transient());
        assert_eq!(AttemptError::Empty.code(), "empty_response");
        assert_eq!(AttemptError::Empty.request_id(), None);
    }

    #[test]
    fn policy_never_drops_below_one_attempt() {
        let config = HarnessConfig {
            max_retries: 0,
            ..HarnessConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_retries, 1);
    }
}

use crate::config::RetryConfig;
use crate::errors::{AppError, AppResult};
use crate::generation::GenerationClient;
use crate::harness::{sanitize_response, validate_plan, SanitizedResponse, ValidatedPlan};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

/// One initial attempt plus at most one retry.
pub const MAX_ATTEMPTS: u32 = 2;

impl RetryPolicy {
    /// `max_attempts` is clamped to `1..=MAX_ATTEMPTS`.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        if max_attempts > MAX_ATTEMPTS {
            tracing::warn!(requested = max_attempts, allowed = MAX_ATTEMPTS, "clamping generation attempts");
        }
        Self {
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS),
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.backoff_ms))
    }
}

/// Where a single generation request currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum GenerationState {
    Generating { attempt: u32 },
    Succeeded { attempt: u32 },
    Failed { attempt: u32, retrying: bool },
}

/// Runs generate, sanitize and validate with a bounded number of attempts.
pub struct RetryOrchestrator {
    client: Arc<dyn GenerationClient>,
    policy: RetryPolicy,
}

impl RetryOrchestrator {
    pub fn new(client: Arc<dyn GenerationClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Every attempt uses the identical prompt. After the last failed attempt
    /// the cause is wrapped in [`AppError::GenerationFailed`].
    pub async fn run(&self, prompt: &str, mut observe: impl FnMut(&GenerationState)) -> AppResult<ValidatedPlan> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            observe(&GenerationState::Generating { attempt });

            let error = match self.attempt(prompt).await {
                Ok(plan) => {
                    tracing::info!(
                        model = self.client.model_id(),
                        attempt,
                        warnings = plan.warnings.len(),
                        "plan generation succeeded"
                    );
                    observe(&GenerationState::Succeeded { attempt });
                    return Ok(plan);
                }
                Err(error) => error,
            };

            let retrying = error.is_retryable() && attempt < self.policy.max_attempts;
            tracing::warn!(
                model = self.client.model_id(),
                attempt,
                retrying,
                error = %error,
                "plan generation attempt failed"
            );
            observe(&GenerationState::Failed { attempt, retrying });

            if !retrying {
                return Err(AppError::GenerationFailed {
                    attempts: attempt,
                    cause: Box::new(error),
                });
            }
            if !self.policy.backoff.is_zero() {
                tokio::time::sleep(self.policy.backoff).await;
            }
        }
    }

    async fn attempt(&self, prompt: &str) -> AppResult<ValidatedPlan> {
        let raw = self.client.generate(prompt).await?;
        match sanitize_response(&raw) {
            SanitizedResponse::Text(text) => validate_plan(&text),
            SanitizedResponse::Truncated(reason) => Err(AppError::Truncated(reason.to_string())),
        }
    }
}

//! Retry and fallback wrapper for planner model calls.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use rand::Rng;
use tracing::{info, warn};

use planweave_core::config::{ModelConfig, RetryConfig};
use planweave_core::error::{PlanweaveError, Result};
use planweave_core::traits::LlmClient;
use planweave_core::types::{ChatMessage, StreamDelta};

/// Substrings of a request error that mark it as worth another attempt.
const TRANSIENT_MARKERS: &[&str] = &[
    "429",
    "500",
    "502",
    "503",
    "529",
    "timeout",
    "timed out",
    "connection",
];

/// Wraps the model client used by the planner.
///
/// Transient failures of the primary model are retried with capped
/// exponential backoff. Once the primary gives up, each fallback model is
/// tried once, in order. Only opening the stream is retried; a stream that
/// breaks midway surfaces its error to the caller.
pub struct RetryingClient {
    primary: Arc<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Arc<dyn LlmClient>)>,
    policy: RetryConfig,
}

impl RetryingClient {
    pub fn new(primary: Arc<dyn LlmClient>, policy: RetryConfig) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            policy,
        }
    }

    /// Add a model to try after the primary is exhausted.
    pub fn with_fallback(mut self, config: ModelConfig, client: Arc<dyn LlmClient>) -> Self {
        self.fallbacks.push((config, client));
        self
    }

    pub fn fallback_count(&self) -> usize {
        self.fallbacks.len()
    }

    async fn call_primary(
        &self,
        config: &ModelConfig,
        messages: &[ChatMessage],
    ) -> Result<BoxStream<'_, Result<StreamDelta>>> {
        let mut attempt = 0;
        loop {
            match self.primary.chat_stream(config, messages.to_vec()).await {
                Ok(stream) => return Ok(stream),
                Err(e) if is_transient(&e) && attempt < self.policy.max_retries => {
                    let delay = backoff_delay(attempt, &self.policy);
                    warn!(
                        model = %config.model_id,
                        attempt = attempt + 1,
                        max_retries = self.policy.max_retries,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying model request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_transient(e: &PlanweaveError) -> bool {
    match e {
        PlanweaveError::LlmRequest(msg) => TRANSIENT_MARKERS.iter().any(|m| msg.contains(m)),
        PlanweaveError::LlmStream(_) => true,
        _ => false,
    }
}

/// Delay before retry number `attempt` (0-based), doubling from
/// `initial_backoff_ms` up to `max_backoff_ms`, with 20% jitter either way.
fn backoff_delay(attempt: u32, policy: &RetryConfig) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let ms = policy
        .initial_backoff_ms
        .saturating_mul(factor)
        .min(policy.max_backoff_ms);
    let jitter: f64 = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            let primary_err = match self.call_primary(&config, &messages).await {
                Ok(stream) => return Ok(stream),
                Err(e) => e,
            };
            if self.fallbacks.is_empty() {
                return Err(primary_err);
            }

            info!(model = %config.model_id, error = %primary_err, "Primary model exhausted");
            for (fallback, client) in &self.fallbacks {
                match client.chat_stream(fallback, messages.clone()).await {
                    Ok(stream) => {
                        info!(
                            model = %fallback.model_id,
                            provider = %fallback.provider,
                            "Using fallback model"
                        );
                        return Ok(stream);
                    }
                    Err(e) => {
                        warn!(model = %fallback.model_id, error = %e, "Fallback model failed")
                    }
                }
            }
            Err(primary_err)
        })
    }
}

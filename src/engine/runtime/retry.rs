//! Deadline and backoff policy for inference calls.

use std::time::Duration;

use crate::engine::error::EngineError;
use crate::llm::{InferenceBackend, Message};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferencePolicy {
    /// Per-call deadline; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for InferencePolicy {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(120)),
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl InferencePolicy {
    /// Fail on the first error, no deadline.
    pub fn no_retry() -> Self {
        Self {
            timeout: None,
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based): doubles each time, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }

    /// One inference attempt under the configured deadline.
    pub async fn call_once(
        &self,
        backend: &dyn InferenceBackend,
        history: &[Message],
    ) -> Result<String, EngineError> {
        let call = backend.complete(history);
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_elapsed| EngineError::InferenceTimeout(limit))?,
            None => call.await,
        };
        result.map_err(|e| EngineError::Inference(format!("{e:#}")))
    }
}

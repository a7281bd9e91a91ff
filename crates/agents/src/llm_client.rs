//! Retrying wrapper around an [`LlmProvider`].

use std::{sync::Arc, time::Duration};

use {
    serde_json::Value,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    model::{ChatMessage, CompletionResponse, LlmProvider, ToolCall},
};

/// Rate-limit retries use exponential backoff with a cap; transient server
/// errors wait a fixed delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub rate_limit_initial_delay: Duration,
    pub rate_limit_max_delay: Duration,
    pub server_retry_delay: Duration,
    /// Total provider calls per `converse`, first attempt included.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_initial_delay: Duration::from_millis(2_000),
            rate_limit_max_delay: Duration::from_millis(60_000),
            server_retry_delay: Duration::from_secs(2),
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    fn next_rate_limit_delay(&self, previous: Option<Duration>) -> Duration {
        previous
            .map(|d| d.saturating_mul(2))
            .unwrap_or(self.rate_limit_initial_delay)
            .clamp(self.rate_limit_initial_delay, self.rate_limit_max_delay)
    }
}

/// Normalized result of one model call.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmTurn {
    Final {
        text: String,
    },
    /// The model wants tools run. Any text it produced alongside is kept so
    /// it stays in the transcript for the next turn.
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
}

impl From<CompletionResponse> for LlmTurn {
    fn from(resp: CompletionResponse) -> Self {
        let text = resp.text.filter(|t| !t.is_empty());
        if resp.tool_calls.is_empty() {
            Self::Final {
                text: text.unwrap_or_default(),
            }
        } else {
            Self::ToolCalls {
                text,
                calls: resp.tool_calls,
            }
        }
    }
}

pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            policy: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Send the transcript and tool catalog, retrying throttling and
    /// transient failures.
    ///
    /// Returns [`Error::LlmUnavailable`] once the attempt budget is spent.
    /// Errors that cannot succeed on retry are returned as-is.
    pub async fn converse(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LlmTurn> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut rate_limit_backoff: Option<Duration> = None;
        let mut attempt = 1;

        loop {
            debug!(
                provider = %self.provider.name(),
                model = %self.provider.id(),
                attempt,
                messages = messages.len(),
                tools = tools.len(),
                "calling LLM"
            );

            let err = match self.provider.complete(messages, tools).await {
                Ok(resp) => {
                    info!(
                        model = %self.provider.id(),
                        input_tokens = resp.usage.input_tokens,
                        output_tokens = resp.usage.output_tokens,
                        tool_calls = resp.tool_calls.len(),
                        "LLM turn complete"
                    );
                    return Ok(resp.into());
                },
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %err, "LLM retries exhausted");
                return Err(Error::LlmUnavailable {
                    attempts: attempt,
                    message: err.to_string(),
                });
            }

            let delay = match &err {
                Error::RateLimited { retry_after, .. } => {
                    // Keep the exponential state advancing even when the
                    // backend gives a hint, so later waits stay bounded.
                    rate_limit_backoff = Some(self.policy.next_rate_limit_delay(rate_limit_backoff));
                    retry_after
                        .or(rate_limit_backoff)
                        .unwrap_or(self.policy.rate_limit_initial_delay)
                        .min(self.policy.rate_limit_max_delay)
                },
                _ => self.policy.server_retry_delay,
            };

            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "LLM call failed, retrying"
            );
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    }
}

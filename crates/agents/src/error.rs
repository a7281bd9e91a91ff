use std::time::Duration;

use conduit_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backend asked us to slow down.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    /// A failure that may succeed on a later attempt (5xx, model warming up).
    #[error("transient LLM failure: {message}")]
    Transient { message: String },
    /// Retries are exhausted.
    #[error("LLM unavailable after {attempts} attempts: {message}")]
    LlmUnavailable { attempts: u32, message: String },
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error("failed to sign LLM request: {0}")]
    Signing(#[from] conduit_sigv4::Error),
    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// Whether another attempt could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transient { .. } => true,
            Self::Reqwest(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

conduit_common::impl_context!();

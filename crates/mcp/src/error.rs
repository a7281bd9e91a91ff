use conduit_common::FromMessage;

use crate::types::McpTransportError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
    #[error(transparent)]
    Transport(#[from] McpTransportError),
    #[error(transparent)]
    Config(#[from] conduit_config::Error),
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

    /// Collapse into the transport taxonomy.
    #[must_use]
    pub fn into_transport_error(self) -> McpTransportError {
        match self {
            Self::Transport(e) => e,
            Self::Reqwest(e) if e.is_timeout() => McpTransportError::Timeout(e.to_string()),
            Self::Reqwest(e) if e.is_decode() => McpTransportError::Protocol(e.to_string()),
            Self::SerdeJson(e) => McpTransportError::Protocol(e.to_string()),
            Self::UrlParse(e) => McpTransportError::Connection(e.to_string()),
            Self::Config(e) => McpTransportError::Connection(e.to_string()),
            other => McpTransportError::Transport(other.to_string()),
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

impl From<Error> for McpTransportError {
    fn from(err: Error) -> Self {
        err.into_transport_error()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

conduit_common::impl_context!();

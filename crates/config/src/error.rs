use std::path::PathBuf;

use conduit_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{section}.{server}: {message}")]
    Server {
        section: &'static str,
        server: String,
        message: String,
    },
    #[error("server name '{server}' is defined in both {first} and {second}")]
    DuplicateServer {
        server: String,
        first: &'static str,
        second: &'static str,
    },
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

    pub(crate) fn server(
        section: &'static str,
        server: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Server {
            section,
            server: server.into(),
            message: message.to_string(),
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

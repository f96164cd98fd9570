//! Error types for request execution.

use thiserror::Error;

use crate::types::Response;

/// Errors reported to request error callbacks.
///
/// Cloneable so a single failure can be handed to a child's own callback and
/// then to the enclosing compound's callback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// The transport failed before a response was received.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The exchange completed with a non-2xx status.
    #[error("Status Code {code}")]
    Status { code: u16 },

    /// A child of a compound request could not be started.
    #[error("request {tag} could not be started")]
    NotStarted { tag: String },

    /// The request URL could not be parsed.
    #[error("invalid URL: {message}")]
    InvalidUrl { message: String },

    /// The request body could not be encoded.
    #[error("body encoding failed: {message}")]
    Encode { message: String },

    /// The manager's dispatcher thread could not be spawned.
    #[error("failed to start dispatcher thread: {message}")]
    Dispatcher { message: String },
}

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
        }
    }

    /// The HTTP status code, if this error came from a completed exchange.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Status { code } => Some(*code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Encode {
            message: error.to_string(),
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(error: url::ParseError) -> Self {
        Error::InvalidUrl {
            message: error.to_string(),
        }
    }
}

/// A failed outcome as seen by an error callback.
///
/// `response` is present when the server answered (for example with a 404),
/// and absent when the transport itself failed.
#[derive(Debug, Clone)]
pub struct Failure {
    pub error: Error,
    pub response: Option<Response>,
}

impl Failure {
    pub fn new(error: Error) -> Self {
        Self {
            error,
            response: None,
        }
    }

    pub fn with_response(error: Error, response: Response) -> Self {
        Self {
            error,
            response: Some(response),
        }
    }

    /// Response body decoded as text, or empty when there was no response.
    pub fn body_text(&self) -> String {
        self.response
            .as_ref()
            .map(Response::text)
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

/// Result type alias for skein-core operations.
pub type Result<T> = std::result::Result<T, Error>;

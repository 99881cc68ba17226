use tdlink_protocol::{DecodeFailure, EngineError};
use thiserror::Error;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not supported by this transport: {0}")]
    Unsupported(&'static str),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("timeout waiting for reply {token} after {timeout_ms}ms")]
    Timeout { token: String, timeout_ms: u64 },

    #[error("engine error {code}: {message}")]
    Engine { code: i32, message: String },

    #[error("failed to decode reply: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed reply: {0}")]
    Malformed(#[from] DecodeFailure),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("correlation token already registered: {0}")]
    DuplicateToken(String),

    #[error("dispatch loop already started")]
    AlreadyStarted,

    #[error("dispatch loop needs a Tokio runtime")]
    NoRuntime,

    #[error("engine returned no response")]
    EmptyResponse,
}

impl ClientError {
    /// No reply arrived in time. Distinct from an engine saying no.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The engine's numeric error code, for application errors.
    pub fn engine_code(&self) -> Option<i32> {
        match self {
            Self::Engine { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}

impl From<EngineError> for ClientError {
    fn from(err: EngineError) -> Self {
        Self::Engine {
            code: err.code,
            message: err.message,
        }
    }
}

use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// AttemptError
// ---------------------------------------------------------------------------

/// Why a single attempt failed. Every variant is retried the same way.
#[derive(Debug, Clone, Error)]
pub enum AttemptError {
    /// Connection refused, DNS failure, reset, ...
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport flagged the response as unsuccessful (non-2xx).
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The body could not be decoded as JSON.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// The attempt exceeded its budget and was cancelled.
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
}

impl AttemptError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AttemptError::Timeout(_))
    }

    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptError::Transport(_) => "transport",
            AttemptError::Status { .. } => "status",
            AttemptError::Decode(_) => "decode",
            AttemptError::Timeout(_) => "timeout",
        }
    }
}

// ---------------------------------------------------------------------------
// ClientError
// ---------------------------------------------------------------------------

/// Terminal outcome of a logical call, surfaced to callers.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The last attempt ran out of time.
    #[error("the remote operation is taking too long ({endpoint}, {attempts} attempts)")]
    Timeout { endpoint: String, attempts: u32 },

    /// Every attempt failed; `cause` describes the last failure.
    #[error("connection failed: {cause}")]
    Connection {
        endpoint: String,
        attempts: u32,
        cause: String,
    },

    /// A chat send was attempted while another one was outstanding.
    #[error("a chat message is already being processed")]
    ChatInFlight,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The session identifier could not be read or created.
    #[error("session identity unavailable: {0}")]
    Identity(String),
}

impl ClientError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout { .. })
    }

    /// Build the terminal error for an exhausted call from its last failure.
    pub(crate) fn exhausted(endpoint: &str, attempts: u32, last: Option<AttemptError>) -> Self {
        match last {
            Some(AttemptError::Timeout(_)) => ClientError::Timeout {
                endpoint: endpoint.to_string(),
                attempts,
            },
            Some(other) => ClientError::Connection {
                endpoint: endpoint.to_string(),
                attempts,
                cause: other.to_string(),
            },
            None => ClientError::Connection {
                endpoint: endpoint.to_string(),
                attempts,
                cause: "no attempt was made".into(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

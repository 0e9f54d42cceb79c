/// Failures while talking to the recommendation backend.
///
/// Every variant is terminal for the current send and is surfaced to the user
/// as the fixed connection-failure notice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent (DNS, connect, TLS, timeout).
    #[error("recommend request failed: {message}")]
    Request { message: String },
    /// The backend answered with a non-success HTTP status.
    #[error("recommend request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    /// Reading the streaming body failed part-way through.
    #[error("recommend stream read failed: {message}")]
    Read { message: String },
    /// The caller aborted the in-flight send.
    #[error("recommend stream aborted")]
    Aborted,
}

impl TransportError {
    /// Creates a request-level error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Creates a status error.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// Creates a body read error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }

    /// Returns the HTTP status code when the backend rejected the request.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors raised by the local key-value store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Top-level error type for the chat API.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Invalid client or store configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Reading or writing persisted history failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The requested session is not in the local history.
    #[error("session not found: {id}")]
    SessionNotFound { id: String },
}

//! Notification sync error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while talking to the notification backend.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Push channel errors (WebSocket connect, handshake, send)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Engine.IO / Socket.IO framing errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// REST endpoint answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid server or API URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// No session token; `connect()` has not been called
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The service was disposed while the operation was in flight
    #[error("Service disposed")]
    Disposed,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a generic error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether the error came from the REST API with a 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

//! Error types shared by the streaming client, the HTTP API and the chat session.

use thiserror::Error;

/// Client-side failure kinds. None of these escape the connection driver;
/// they are surfaced either as handler callbacks or as status changes.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("backend unavailable after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("backend error: {0}")]
    BackendFrame(String),

    /// A request failed while the backend was already known to be offline.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("request failed with status {status}: {detail}")]
    RequestFailed { status: u16, detail: String },

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("client has been disposed")]
    Disposed,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::ConnectionFailed(e.to_string())
    }
}

/// Errors returned by [`crate::chat::ChatSession`] intents.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("a response is still being generated")]
    Busy,

    #[error(transparent)]
    Client(#[from] ClientError),
}

/*
[INPUT]:  Error sources (HTTP, API, serialization, transport, protocol replies)
[OUTPUT]: Structured error types with context and retry hints
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use std::time::Duration;

use thiserror::Error;

/// Terminal condition of a single physical connection.
///
/// Stored once in the transport's terminal slot; every loop and every waiter
/// observes the same value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The owner tore the connection down on purpose
    #[error("connection destroyed by user")]
    Destroyed,

    /// Writing a frame to the socket failed
    #[error("send failed: {0}")]
    Send(String),

    /// Reading from the socket failed
    #[error("receive failed: {0}")]
    Receive(String),

    /// The peer closed the connection
    #[error("connection closed by peer")]
    Closed,

    /// No inbound frame arrived within the receive timeout
    #[error("no frame received within {0:?}")]
    ReceiveTimeout(Duration),

    /// Ping/pong exchange went stale
    #[error("heartbeat lost, last liveness signal {elapsed_ms}ms ago")]
    LivenessLost { elapsed_ms: i64 },
}

impl TransportError {
    /// Whether the connection was torn down by its owner rather than failing
    pub fn is_destroyed(&self) -> bool {
        matches!(self, TransportError::Destroyed)
    }
}

/// Main error type for the Huobi stream adapter
#[derive(Error, Debug)]
pub enum FeedError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// REST API answered with `status: error`
    #[error("API error: {message}")]
    Api { message: String },

    /// Subscribe acknowledgement carried an error message
    #[error("subscribe to {topic} failed: {message}")]
    Subscribe { topic: String, message: String },

    /// Request reply carried an error message
    #[error("request {id} failed: {message}")]
    Request { id: String, message: String },

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Dialing the feed endpoint failed
    #[error("connect to {endpoint} failed: {message}")]
    Connect { endpoint: String, message: String },

    /// The physical connection is gone
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Inbound frame could not be decompressed or parsed
    #[error("decode error: {0}")]
    Decode(String),

    /// Outbound queue is at capacity
    #[error("outbound queue full")]
    QueueFull,

    /// No live transport to send on
    #[error("not connected")]
    NotConnected,

    /// Session was closed while the caller was waiting
    #[error("session closed")]
    SessionClosed,

    /// Waiting for a reply exceeded the configured timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FeedError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::Http(_)
                | FeedError::Connect { .. }
                | FeedError::Transport(_)
                | FeedError::QueueFull
                | FeedError::NotConnected
                | FeedError::Timeout(_)
        )
    }

    /// Check if the error means the connection, not the request, failed
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            FeedError::Connect { .. }
                | FeedError::Transport(_)
                | FeedError::NotConnected
                | FeedError::SessionClosed
        )
    }
}

/// Result type alias for feed operations
pub type Result<T> = std::result::Result<T, FeedError>;

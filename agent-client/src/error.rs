//! Error types for the mtconnect-client crate.

use std::time::Duration;

use crate::types::ErrorDocument;

/// Where a failure belongs in the client's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or transport failure, including timeouts
    Connection,
    /// The agent answered with an error document
    Protocol,
    /// Unexpected failure in local processing
    Internal,
}

/// Errors reported by a [`RequestGateway`](crate::RequestGateway) or
/// [`StreamSession`](crate::StreamSession).
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The request could not be delivered or the response could not be read
    #[error("Connection error: {0}")]
    Connection(String),

    /// No response arrived within the configured time
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The agent answered without a document
    #[error("Agent returned no document")]
    NoDocument,

    /// The agent returned an error document
    #[error("Agent error: {0}")]
    Protocol(ErrorDocument),

    /// Local failure while handling the exchange
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Connection(_) | GatewayError::Timeout(_) | GatewayError::NoDocument => {
                ErrorKind::Connection
            }
            GatewayError::Protocol(_) => ErrorKind::Protocol,
            GatewayError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Errors returned by the [`AgentClient`](crate::AgentClient) API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// `start` was called while the worker is running
    #[error("Client is already running")]
    AlreadyRunning,

    /// `stop` was called without a running worker
    #[error("Client is not running")]
    NotRunning,

    /// The event stream receiver has already been handed out
    #[error("Event stream has already been taken")]
    EventStreamTaken,

    /// A one-shot request failed
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A one-shot request was abandoned because the client was cancelled
    #[error("Request cancelled")]
    Cancelled,

    /// The background worker ended abnormally
    #[error("Worker failed: {0}")]
    WorkerFailed(String),
}

/// Convenience type alias for gateway results.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Convenience type alias for Results using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;

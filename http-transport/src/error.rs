//! Error types for the HTTP transport

use mtconnect_client::GatewayError;

/// Errors raised while building the transport
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Invalid agent URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// A response body that could not be turned into a document
#[derive(Debug, Clone, thiserror::Error)]
#[error("Failed to decode {kind} document: {message}")]
pub struct DecodeError {
    pub kind: &'static str,
    pub message: String,
}

impl DecodeError {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<DecodeError> for GatewayError {
    fn from(error: DecodeError) -> Self {
        GatewayError::Internal(error.to_string())
    }
}

/// Malformed stream framing
#[derive(Debug, Clone, thiserror::Error)]
pub enum FramingError {
    #[error("Unsupported stream content type: {0}")]
    UnsupportedContentType(String),

    #[error("Malformed multipart stream: {0}")]
    Malformed(String),
}

impl From<FramingError> for GatewayError {
    fn from(error: FramingError) -> Self {
        GatewayError::Internal(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HttpError>;

//! Error types for bytebot

use thiserror::Error;

use crate::envelope::CodecError;

/// The main error type for bytebot operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Envelope encode/decode errors
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Message bus errors
    #[error("Bus error: {0}")]
    Bus(String),

    /// Topic naming/parsing errors
    #[error("Topic error: {0}")]
    Topic(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for bytebot operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Bus(e.to_string())
    }
}

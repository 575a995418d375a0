//! Error types shared across the DDS workspace

use thiserror::Error;

/// Result type alias for common DDS operations
pub type Result<T> = std::result::Result<T, DdsError>;

/// Shared error type for cross-cutting concerns
#[derive(Error, Debug)]
pub enum DdsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Invalid extract type: {0}")]
    InvalidExtractType(String),

    #[error("Invalid window timestamp '{value}': expected {expected}")]
    InvalidWindowTime { value: String, expected: &'static str },

    #[error("Configuration error: {0}")]
    Config(String),
}

//! Codec error types.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while sealing or opening record content.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("record encryption failed: {0}")]
    Encryption(String),

    #[error("record decryption failed (wrong key or tampered payload)")]
    Decryption,

    #[error("malformed record payload: {0}")]
    Malformed(String),

    #[error("field serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

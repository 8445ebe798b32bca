//! Error types for abyss-core
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are categorized by pipeline stage (metadata, crypto, transport,
//! assembly) so callers can decide what to show and whether anything already
//! on disk is worth keeping.
//!
//! ## Stages
//!
//! ### Metadata resolution
//! - `MalformedEnvelope` - base64 or JSON shape of the page envelope is wrong
//! - `DecryptionFailed` - the encrypted `media` payload could not be recovered
//! - `NoSourceSelected` - the requested resolution is not offered
//!
//! These abort before any segment is requested.
//!
//! ### Download
//! - `TransportError` - a single segment fetch failed; the whole group is cancelled
//! - `Cancelled` - a worker stopped because a sibling failed
//!
//! ### Crypto
//! - `CryptoError` - key/cipher mismatch, never transient
//!
//! ### Assembly
//! - `AssemblyError` - merging segments into the output file failed

use thiserror::Error;

/// Result type alias using our AbyssError type
pub type Result<T> = std::result::Result<T, AbyssError>;

/// Main error type for abyss-core
#[derive(Error, Debug)]
pub enum AbyssError {
    // ===== Metadata Errors =====

    /// Envelope could not be base64-decoded or parsed
    #[error("Malformed media envelope: {0}")]
    MalformedEnvelope(String),

    /// Encrypted media payload could not be decrypted or parsed
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// No source matches the requested resolution (or its size is unknown)
    #[error("No source available for resolution '{resolution}'")]
    NoSourceSelected {
        resolution: String,
        /// Labels that were offered instead
        available: Vec<String>,
    },

    // ===== Crypto Errors =====

    /// Cipher library rejected the key or data
    #[error("Crypto error: {0}")]
    CryptoError(String),

    // ===== Download Errors =====

    /// A segment request failed
    #[error("Transport error on segment {index:?}: {message}")]
    TransportError {
        message: String,
        /// Segment index if the failure belongs to one
        index: Option<usize>,
        /// HTTP status code if a response was received
        status_code: Option<u16>,
    },

    /// Worker stopped because the download group was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    // ===== File Errors =====

    /// Merging segments into the output failed
    #[error("Assembly failed: {0}")]
    AssemblyError(String),

    /// Invalid output path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Output file already exists
    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    // ===== Configuration Errors =====

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<tokio::task::JoinError> for AbyssError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            AbyssError::Cancelled
        } else {
            AbyssError::InternalError(format!("Download worker panicked: {}", err))
        }
    }
}

// Helper methods for creating common errors
impl AbyssError {
    /// Create a MalformedEnvelope error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        AbyssError::MalformedEnvelope(message.into())
    }

    /// Create a CryptoError
    pub fn crypto<S: Into<String>>(message: S) -> Self {
        AbyssError::CryptoError(message.into())
    }

    /// Create an AssemblyError
    pub fn assembly<S: Into<String>>(message: S) -> Self {
        AbyssError::AssemblyError(message.into())
    }

    /// Create a TransportError for a segment
    pub fn transport<S: Into<String>>(
        message: S,
        index: Option<usize>,
        status_code: Option<u16>,
    ) -> Self {
        AbyssError::TransportError {
            message: message.into(),
            index,
            status_code,
        }
    }

    /// Create a NoSourceSelected error
    pub fn no_source<S: Into<String>>(resolution: S, available: Vec<String>) -> Self {
        AbyssError::NoSourceSelected {
            resolution: resolution.into(),
            available,
        }
    }

    /// Errors raised while resolving metadata, before any download starts
    pub fn is_metadata_error(&self) -> bool {
        matches!(
            self,
            AbyssError::MalformedEnvelope(_)
                | AbyssError::DecryptionFailed(_)
                | AbyssError::NoSourceSelected { .. }
        )
    }

    /// Check if error is related to key derivation or ciphers
    pub fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            AbyssError::CryptoError(_) | AbyssError::DecryptionFailed(_)
        )
    }

    /// Check if error is related to file/disk operations
    pub fn is_file_error(&self) -> bool {
        matches!(
            self,
            AbyssError::AssemblyError(_)
                | AbyssError::InvalidPath(_)
                | AbyssError::FileAlreadyExists(_)
                | AbyssError::IoError(_)
        )
    }

    /// Segments already on disk stay valid for the next run
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            AbyssError::TransportError { .. }
                | AbyssError::ReqwestError(_)
                | AbyssError::Cancelled
        )
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            AbyssError::NoSourceSelected { resolution, available } => {
                if available.is_empty() {
                    format!("Resolution '{}' is not available for this video.", resolution)
                } else {
                    format!(
                        "Resolution '{}' is not available. Choose one of: {}",
                        resolution,
                        available.join(", ")
                    )
                }
            }
            AbyssError::TransportError { index: Some(index), .. } => {
                format!(
                    "Segment {} could not be downloaded. Run the download again to resume.",
                    index
                )
            }
            AbyssError::MalformedEnvelope(_) | AbyssError::DecryptionFailed(_) => {
                "Video metadata could not be read. The page format may have changed.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

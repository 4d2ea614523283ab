//! Error types for the tiered cache engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tiered cache engine
#[derive(Error, Debug)]
pub enum Error {
    /// Payload serialization or envelope decode error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    /// Distributed store operation failed
    #[error("Distributed store error: {0}")]
    Distributed(String),

    /// Fallback generator failed on a total miss
    #[error("Fallback generator failed for key {key}: {source}")]
    Generator {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Statistics requested for a key that was never observed
    #[error("No statistics recorded for key: {0}")]
    StatsUnknownKey(String),

    /// Invalid configuration supplied by the caller
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid invalidation pattern
    #[error("Invalid invalidation pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

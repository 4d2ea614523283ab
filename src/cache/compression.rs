//! Cache Compression Support
//!
//! LZ4 compression for distributed-tier payloads, with automatic fallback
//! to uncompressed when compression fails or does not shrink the data.

use bytes::Bytes;

use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionAlgorithm {
    /// No compression
    None,
    /// LZ4 - fast compression
    #[default]
    Lz4,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for compression
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Minimum size to compress (smaller payloads are stored uncompressed)
    pub min_size_bytes: u64,
    /// Compression level
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_size_bytes: 1024, // 1KB minimum
            level: 3,
        }
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    /// Get the algorithm identifier
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through compressor (no compression)
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// LZ4 compressor
pub struct Lz4Compressor {
    level: i32,
}

impl Lz4Compressor {
    /// Create with custom compression level
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// Compression Manager
// =============================================================================

/// Manager for compression operations with fallback support
pub struct CompressionManager {
    config: CompressionConfig,
    lz4: Lz4Compressor,
}

impl CompressionManager {
    /// Create a new compression manager with default config
    pub fn new() -> Self {
        Self::with_config(CompressionConfig::default())
    }

    /// Create with custom config
    pub fn with_config(config: CompressionConfig) -> Self {
        Self {
            lz4: Lz4Compressor::with_level(config.level),
            config,
        }
    }

    /// Compress a payload if it crosses the size threshold
    ///
    /// Returns `(data, compressed)`. Falls back to uncompressed when the
    /// payload is small, compression fails, or the result is not smaller.
    pub fn maybe_compress(&self, data: &[u8]) -> (Bytes, bool) {
        if (data.len() as u64) < self.config.min_size_bytes {
            return (Bytes::copy_from_slice(data), false);
        }

        match self.lz4.compress(data) {
            Ok(compressed) if compressed.len() < data.len() => (Bytes::from(compressed), true),
            Ok(_) => (Bytes::copy_from_slice(data), false),
            Err(e) => {
                tracing::warn!("compression failed, storing uncompressed: {}", e);
                (Bytes::copy_from_slice(data), false)
            }
        }
    }

    /// Decompress a payload previously flagged as compressed
    pub fn decompress(&self, data: &[u8]) -> Result<Bytes> {
        Ok(Bytes::from(self.lz4.decompress(data)?))
    }

    /// Get configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}

impl Default for CompressionManager {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

//! LZ4 compression for stored backup objects
//!
//! Backup objects are written with a 4-byte header so the reader never has to
//! guess the format:
//!
//! - `LZ4O`: LZ4 block (size-prepended) follows
//! - `\0\0\0\0`: raw bytes follow
//!
//! Unlike a best-effort decoder, an unknown header is an error. A backup that
//! cannot be decoded exactly must surface as a failed restore rather than as
//! silently different bytes.
//!
//! ## Examples
//!
//! ```rust
//! use orcli::compression::{CompressionEngine, CompressionStrategy};
//! use std::path::Path;
//!
//! let engine = CompressionEngine::new(CompressionStrategy::Fast);
//! let data = b"fn main() {}\n".repeat(200);
//! let stored = engine.compress(Path::new("main.rs"), &data).unwrap();
//! assert!(stored.len() < data.len());
//! assert_eq!(engine.decompress(&stored).unwrap(), data);
//! ```

use crate::error::{OrcliError, Result};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use std::path::Path;
use std::str::FromStr;
use tracing::trace;

// Magic bytes to identify LZ4 compressed objects
const LZ4_MAGIC: &[u8] = b"LZ4O";
const RAW_MAGIC: &[u8] = &[0, 0, 0, 0];

/// When stored objects get compressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressionStrategy {
    /// Store everything raw
    None,
    /// LZ4 for anything of 1 KiB or more (default)
    Fast,
    /// LZ4 above `min_size`, skipping already-compressed formats
    Adaptive {
        /// Skip compression for files smaller than this
        min_size: usize,
        /// Skip these file extensions (already compressed)
        skip_extensions: Vec<String>,
    },
}

impl Default for CompressionStrategy {
    fn default() -> Self {
        CompressionStrategy::Fast
    }
}

impl CompressionStrategy {
    /// Name persisted in storage metadata and configuration
    pub fn name(&self) -> &'static str {
        match self {
            CompressionStrategy::None => "none",
            CompressionStrategy::Fast => "fast",
            CompressionStrategy::Adaptive { .. } => "adaptive",
        }
    }
}

impl FromStr for CompressionStrategy {
    type Err = OrcliError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(CompressionStrategy::None),
            "fast" | "lz4" => Ok(CompressionStrategy::Fast),
            "adaptive" => Ok(CompressionStrategy::Adaptive {
                min_size: 4096,
                skip_extensions: default_skip_extensions(),
            }),
            other => Err(OrcliError::config(format!(
                "unknown compression strategy '{}'",
                other
            ))),
        }
    }
}

/// Stateless compressor applying a [`CompressionStrategy`]
#[derive(Debug, Clone, Default)]
pub struct CompressionEngine {
    strategy: CompressionStrategy,
}

impl CompressionEngine {
    pub fn new(strategy: CompressionStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &CompressionStrategy {
        &self.strategy
    }

    /// Encode content for storage, compressing only when it pays off
    pub fn compress(&self, path: &Path, content: &[u8]) -> Result<Vec<u8>> {
        if self.should_compress(path, content.len()) {
            let compressed = compress_prepend_size(content);
            if compressed.len() < content.len() {
                trace!(
                    "Compressed {:?}: {} -> {} bytes",
                    path,
                    content.len(),
                    compressed.len()
                );
                let mut result = Vec::with_capacity(LZ4_MAGIC.len() + compressed.len());
                result.extend_from_slice(LZ4_MAGIC);
                result.extend_from_slice(&compressed);
                return Ok(result);
            }
        }

        let mut result = Vec::with_capacity(RAW_MAGIC.len() + content.len());
        result.extend_from_slice(RAW_MAGIC);
        result.extend_from_slice(content);
        Ok(result)
    }

    /// Decode an object produced by [`CompressionEngine::compress`]
    pub fn decompress(&self, content: &[u8]) -> Result<Vec<u8>> {
        if content.len() < 4 {
            return Err(OrcliError::restore("stored object is truncated"));
        }

        if let Some(body) = content.strip_prefix(LZ4_MAGIC) {
            decompress_size_prepended(body)
                .map_err(|e| OrcliError::restore(format!("LZ4 decompression failed: {}", e)))
        } else if let Some(body) = content.strip_prefix(RAW_MAGIC) {
            Ok(body.to_vec())
        } else {
            Err(OrcliError::restore("stored object has an unknown header"))
        }
    }

    fn should_compress(&self, path: &Path, size: usize) -> bool {
        match &self.strategy {
            CompressionStrategy::None => false,
            CompressionStrategy::Fast => size >= 1024,
            CompressionStrategy::Adaptive {
                min_size,
                skip_extensions,
            } => {
                if size < *min_size {
                    return false;
                }
                match path.extension().and_then(|e| e.to_str()) {
                    Some(ext) => !skip_extensions
                        .iter()
                        .any(|skip| skip.eq_ignore_ascii_case(ext)),
                    None => true,
                }
            }
        }
    }
}

/// Extensions of formats that are already compressed
pub fn default_skip_extensions() -> Vec<String> {
    vec![
        "jpg", "jpeg", "png", "gif", "webp", "mp4", "mov", "mkv", "mp3", "ogg", "flac", "zip",
        "gz", "bz2", "xz", "zst", "7z", "rar", "lz4", "pdf",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

//! The seam for decompressing section payloads.
//!
//! Compressed sections are stored as lzfse streams. Decompression is performed by the caller
//! through a [`Decompressor`], the unpacker itself never touches the payloads.

use crate::tag::Tag;
use thiserror::Error;

/// Returned by a [`Decompressor`] on corrupt input.
#[derive(Error, Debug)]
#[error("failed to decompress section {tag}: {reason}")]
pub struct DecompressionError {
    pub tag: Tag,
    pub reason: String,
}

impl DecompressionError {
    pub fn new(tag: Tag, reason: impl Into<String>) -> Self {
        Self {
            tag,
            reason: reason.into(),
        }
    }
}

/// A decompression service.
pub trait Decompressor {
    /// Decompresses the payload of the section with the given tag.
    ///
    /// # Errors
    /// Returns a [`DecompressionError`] when the payload is corrupt.
    fn decompress(&self, tag: Tag, compressed: &[u8]) -> Result<Vec<u8>, DecompressionError>;
}

impl<F> Decompressor for F
where
    F: Fn(&[u8]) -> Result<Vec<u8>, String>,
{
    fn decompress(&self, tag: Tag, compressed: &[u8]) -> Result<Vec<u8>, DecompressionError> {
        self(compressed).map_err(|reason| DecompressionError::new(tag, reason))
    }
}

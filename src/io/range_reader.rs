use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Positioned, read-only access to a slide container.
///
/// Container parsers only ever ask for byte ranges, so a slide can be served
/// from a local file or from object storage without loading it whole.
/// Implementations must support concurrent calls through a shared reference.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Identifier used in logs, e.g. `file:///slides/a.svs` or `s3://bucket/key`.
    fn identifier(&self) -> &str;
}

/// Validate that `[offset, offset + len)` lies within a resource of `size` bytes.
#[inline]
pub fn check_range(offset: u64, len: usize, size: u64) -> Result<(), IoError> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(IoError::RangeOutOfBounds {
            offset,
            requested: len as u64,
            size,
        }),
    }
}

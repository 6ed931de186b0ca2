use std::time::Duration;

use thiserror::Error;

/// I/O errors raised by range readers (local files or object storage).
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Local filesystem error
    #[error("File error: {0}")]
    File(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Slide identifier cannot be mapped to a storage location
    #[error("Invalid slide identifier: {0}")]
    InvalidId(String),
}

/// Errors related to format detection and container opening
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// File format is not supported
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// IFD offset points outside the file or back into the chain
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    #[error("Unsupported compression: {0} (only JPEG is supported)")]
    UnsupportedCompression(String),

    #[error("Unsupported organization: file uses strips instead of tiles")]
    StripOrganization,

    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// No IFD qualifies as a tiled pyramid level
    #[error("No tiled pyramid levels found")]
    NoPyramid,
}

impl TiffError {
    /// Whether this error describes a container we don't handle, as opposed
    /// to a container that is damaged.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            TiffError::InvalidMagic(_)
                | TiffError::InvalidVersion(_)
                | TiffError::UnsupportedCompression(_)
                | TiffError::StripOrganization
                | TiffError::NoPyramid
        )
    }
}

/// Errors surfaced by the tile pipeline.
///
/// This is the only error type the HTTP layer sees; `server::handlers`
/// owns the mapping to status codes.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    #[error("Slide not found: {slide_id}")]
    SlideNotFound { slide_id: String },

    #[error("Unsupported slide format: {reason}")]
    UnsupportedFormat { reason: String },

    #[error("Corrupt slide file: {reason}")]
    CorruptFile { reason: String },

    /// Slide opened but cannot produce a pyramid (e.g. zero dimensions)
    #[error("Invalid slide: {reason}")]
    InvalidSlide { reason: String },

    #[error("Invalid level {level}: slide has {level_count} levels")]
    InvalidLevel { level: u32, level_count: u32 },

    #[error("Tile ({x}, {y}) at level {level} is outside the {cols}x{rows} grid")]
    TileOutOfBounds {
        level: u32,
        x: u32,
        y: u32,
        cols: u32,
        rows: u32,
    },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Resolved region is empty after clipping
    #[error("Region out of bounds: {message}")]
    OutOfBounds { message: String },

    #[error("Failed to decode region: {message}")]
    DecodeError { message: String },

    #[error("Failed to encode tile: {message}")]
    EncodeError { message: String },

    /// A computation died without producing a result
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Storage error: {0}")]
    Io(IoError),
}

impl TileError {
    /// Classify a container-opening failure for the given slide.
    pub fn from_format(slide_id: &str, err: FormatError) -> Self {
        match err {
            FormatError::Io(io) | FormatError::Tiff(TiffError::Io(io)) => {
                Self::from_io(slide_id, io)
            }
            FormatError::Tiff(tiff) if tiff.is_unsupported() => TileError::UnsupportedFormat {
                reason: tiff.to_string(),
            },
            FormatError::Tiff(tiff) => TileError::CorruptFile {
                reason: tiff.to_string(),
            },
            FormatError::UnsupportedFormat { reason } => TileError::UnsupportedFormat { reason },
        }
    }

    /// Classify a storage failure for the given slide.
    pub fn from_io(slide_id: &str, err: IoError) -> Self {
        match err {
            IoError::NotFound(_) => TileError::SlideNotFound {
                slide_id: slide_id.to_string(),
            },
            IoError::InvalidId(message) => TileError::InvalidRequest { message },
            // A range past EOF while walking the container means truncated data.
            IoError::RangeOutOfBounds { .. } => TileError::CorruptFile {
                reason: err.to_string(),
            },
            other => TileError::Io(other),
        }
    }

    /// Classify a failure while reading tile data from an open slide.
    pub fn from_tiff(slide_id: &str, err: TiffError) -> Self {
        match err {
            TiffError::Io(io) => Self::from_io(slide_id, io),
            tiff if tiff.is_unsupported() => TileError::UnsupportedFormat {
                reason: tiff.to_string(),
            },
            tiff => TileError::CorruptFile {
                reason: tiff.to_string(),
            },
        }
    }

    /// Whether the caller sent a request outside the valid grid.
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            TileError::InvalidLevel { .. }
                | TileError::TileOutOfBounds { .. }
                | TileError::InvalidRequest { .. }
                | TileError::OutOfBounds { .. }
        )
    }
}

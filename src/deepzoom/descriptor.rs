//! The synthetic Deep Zoom pyramid presented to clients.
//!
//! Deep Zoom numbers levels from the bottom: level 0 fits in a single pixel
//! and level `L - 1` is full resolution, each level half the size of the one
//! above it (rounding up). Nothing here depends on the container's native
//! levels; only the full-resolution size and the tiling settings matter.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::TileError;

pub const DEEPZOOM_XMLNS: &str = "http://schemas.microsoft.com/deepzoom/2008";

pub const DEFAULT_TILE_SIZE: u32 = 254;
pub const DEFAULT_OVERLAP: u32 = 1;

/// Encoding of served tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TileFormat {
    Jpeg,
    Png,
}

impl TileFormat {
    /// Value of the descriptor's `Format` attribute, also the canonical URL
    /// extension.
    pub const fn extension(self) -> &'static str {
        match self {
            TileFormat::Jpeg => "jpeg",
            TileFormat::Png => "png",
        }
    }

    pub const fn content_type(self) -> &'static str {
        match self {
            TileFormat::Jpeg => "image/jpeg",
            TileFormat::Png => "image/png",
        }
    }

    /// Format named by a tile URL extension, case-insensitive.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(TileFormat::Jpeg),
            "png" => Some(TileFormat::Png),
            _ => None,
        }
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for TileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TileFormat::from_extension(s).ok_or_else(|| format!("unknown tile format '{}'", s))
    }
}

/// Serialization of the descriptor document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorSyntax {
    /// DZI XML
    Xml,
    Json,
}

impl DescriptorSyntax {
    pub const fn content_type(self) -> &'static str {
        match self {
            DescriptorSyntax::Xml => "application/xml",
            DescriptorSyntax::Json => "application/json",
        }
    }
}

impl FromStr for DescriptorSyntax {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xml" | "dzi" => Ok(DescriptorSyntax::Xml),
            "json" => Ok(DescriptorSyntax::Json),
            _ => Err(format!("unknown descriptor syntax '{}'", s)),
        }
    }
}

/// Tiling settings shared by every slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorConfig {
    pub tile_size: u32,
    pub overlap: u32,
    pub format: TileFormat,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            overlap: DEFAULT_OVERLAP,
            format: TileFormat::Jpeg,
        }
    }
}

/// Pyramid description of one slide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PyramidDescriptor {
    pub format: TileFormat,
    pub tile_size: u32,
    pub overlap: u32,
    pub width: u32,
    pub height: u32,
    pub levels: u32,
}

/// Number of Deep Zoom levels for a largest side of `max_dim` pixels:
/// `ceil(log2(max_dim)) + 1`, exactly.
pub fn level_count(max_dim: u32) -> u32 {
    match max_dim {
        0 | 1 => 1,
        // ceil(log2(n)) == bit length of (n - 1)
        n => (u32::BITS - (n - 1).leading_zeros()) + 1,
    }
}

impl PyramidDescriptor {
    /// Describe a `width` x `height` slide. Zero-sized slides are rejected.
    pub fn new(width: u32, height: u32, config: &DescriptorConfig) -> Result<Self, TileError> {
        if width == 0 || height == 0 {
            return Err(TileError::InvalidSlide {
                reason: format!("degenerate dimensions {}x{}", width, height),
            });
        }
        if config.tile_size == 0 {
            return Err(TileError::InvalidRequest {
                message: "tile size must be positive".to_string(),
            });
        }

        Ok(PyramidDescriptor {
            format: config.format,
            tile_size: config.tile_size,
            overlap: config.overlap,
            width,
            height,
            levels: level_count(width.max(height)),
        })
    }

    pub fn max_level(&self) -> u32 {
        self.levels - 1
    }

    /// Downsample of `level` relative to full resolution, `2^(L-1-level)`.
    /// `None` past the top level.
    pub fn scale(&self, level: u32) -> Option<u64> {
        if level >= self.levels {
            return None;
        }
        1u64.checked_shl(self.max_level() - level)
    }

    /// Pixel size of `level`.
    pub fn level_dimensions(&self, level: u32) -> Option<(u32, u32)> {
        let scale = self.scale(level)?;
        Some((
            (self.width as u64).div_ceil(scale) as u32,
            (self.height as u64).div_ceil(scale) as u32,
        ))
    }

    /// Columns and rows of tiles at `level`.
    pub fn tile_grid(&self, level: u32) -> Option<(u32, u32)> {
        let (w, h) = self.level_dimensions(level)?;
        Some((w.div_ceil(self.tile_size), h.div_ceil(self.tile_size)))
    }

    /// Deep Zoom XML (`.dzi`) document.
    pub fn to_xml(&self) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                "\n",
                r#"<Image xmlns="{xmlns}" Format="{format}" Overlap="{overlap}" TileSize="{tile_size}">"#,
                r#"<Size Width="{width}" Height="{height}"/>"#,
                "</Image>"
            ),
            xmlns = DEEPZOOM_XMLNS,
            format = self.format.extension(),
            overlap = self.overlap,
            tile_size = self.tile_size,
            width = self.width,
            height = self.height,
        )
    }

    pub fn to_json(&self) -> String {
        // Every field is a plain number or a unit enum; serialization can't fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn render(&self, syntax: DescriptorSyntax) -> String {
        match syntax {
            DescriptorSyntax::Xml => self.to_xml(),
            DescriptorSyntax::Json => self.to_json(),
        }
    }
}

//! Resample a decoded region to tile size and encode it.
//!
//! The renderer works on pixels only; it never sees a slide. Output is
//! deterministic: the JPEG encoder writes baseline frames with no metadata,
//! and the PNG encoder stores no timestamps, so identical pixels always give
//! identical bytes.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, RgbImage};

use crate::deepzoom::TileFormat;
use crate::error::TileError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

pub const MIN_JPEG_QUALITY: u8 = 1;
pub const MAX_JPEG_QUALITY: u8 = 100;

#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Output settings for rendered tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRenderer {
    format: TileFormat,
    quality: u8,
}

impl Default for TileRenderer {
    fn default() -> Self {
        Self::new(TileFormat::Jpeg, DEFAULT_JPEG_QUALITY)
    }
}

impl TileRenderer {
    /// `quality` only applies to JPEG and is clamped to 1-100.
    pub fn new(format: TileFormat, quality: u8) -> Self {
        Self {
            format,
            quality: quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY),
        }
    }

    pub fn format(&self) -> TileFormat {
        self.format
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Produce a `width` x `height` tile from `region`.
    pub fn render(&self, region: RgbImage, width: u32, height: u32) -> Result<Bytes, TileError> {
        let image = resample(region, width, height)?;
        self.encode(&image)
    }

    pub fn encode(&self, image: &RgbImage) -> Result<Bytes, TileError> {
        let (width, height) = image.dimensions();
        let mut out = Vec::new();

        let result = match self.format {
            TileFormat::Jpeg => JpegEncoder::new_with_quality(&mut out, self.quality).encode(
                image.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            ),
            TileFormat::Png => PngEncoder::new(&mut out).write_image(
                image.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            ),
        };
        result.map_err(|e| TileError::EncodeError {
            message: format!("{} {}x{}: {}", self.format, width, height, e),
        })?;

        Ok(Bytes::from(out))
    }
}

/// Scale `image` to exactly `width` x `height`.
///
/// Returned untouched when it already has that size, which is the case
/// whenever a native level lines up with the requested level. Otherwise a
/// triangle filter is used; its support widens with the reduction ratio, so
/// every source pixel contributes.
pub fn resample(image: RgbImage, width: u32, height: u32) -> Result<RgbImage, TileError> {
    if width == 0 || height == 0 {
        return Err(TileError::EncodeError {
            message: format!("empty target size {}x{}", width, height),
        });
    }
    if image.width() == 0 || image.height() == 0 {
        return Err(TileError::DecodeError {
            message: "decoded region is empty".to_string(),
        });
    }
    if image.dimensions() == (width, height) {
        return Ok(image);
    }
    Ok(imageops::resize(&image, width, height, FilterType::Triangle))
}

//! Decode an arbitrary pixel rectangle from a slide.
//!
//! A request names a rectangle in full-resolution coordinates and the
//! downsample the caller will eventually render at. The rectangle is read
//! from the coarsest native level that is still at least that detailed,
//! assembled from every stored tile it touches.
//!
//! Reading is split in two: [`fetch_region`] does the I/O and
//! [`FetchedRegion::decode`] the CPU work, so callers can run the latter on
//! the blocking pool under their own concurrency limit.

use std::sync::Arc;

use bytes::Bytes;
use image::{GenericImage, GenericImageView, RgbImage};
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::TileError;
use crate::format::jpeg;
use crate::io::RangeReader;

use super::registry::CachedSlide;

/// A pixel rectangle. Coordinates are in whatever space the owner says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether `other` lies entirely inside `self`.
    pub fn contains(&self, other: &PixelRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// Decoded pixels and the native level they came from.
#[derive(Debug, Clone)]
pub struct DecodedRegion {
    pub image: RgbImage,
    pub native_level: usize,
    pub native_downsample: f64,
}

struct FetchedTile {
    col: u32,
    row: u32,
    data: Bytes,
}

/// Raw tiles covering a region, not yet decoded.
pub struct FetchedRegion {
    native_level: usize,
    native_downsample: f64,
    /// The region in native-level coordinates, already clipped.
    rect: PixelRect,
    tile_width: u32,
    tile_height: u32,
    tiles: Vec<FetchedTile>,
}

/// Project a full-resolution rectangle onto a native level of
/// `native` dimensions, rounding outward, and clip it to the level.
pub fn map_to_native(region: PixelRect, base: (u32, u32), native: (u32, u32)) -> Option<PixelRect> {
    let (x0, x1) = map_axis(region.x, region.right(), base.0, native.0)?;
    let (y0, y1) = map_axis(region.y, region.bottom(), base.1, native.1)?;
    Some(PixelRect::new(x0, y0, x1 - x0, y1 - y0))
}

fn map_axis(start: u32, end: u64, base: u32, native: u32) -> Option<(u32, u32)> {
    if base == 0 || native == 0 {
        return None;
    }
    let (base, native) = (base as u64, native as u64);
    let lo = (start as u64 * native / base).min(native);
    let hi = (end * native).div_ceil(base).min(native);
    if lo >= hi {
        return None;
    }
    Some((lo as u32, hi as u32))
}

/// Fetch the stored tiles behind `region` (full-resolution coordinates) for
/// rendering at `downsample`.
pub async fn fetch_region<R: RangeReader + 'static>(
    slide: &Arc<CachedSlide<R>>,
    slide_id: &str,
    region: PixelRect,
    downsample: f64,
) -> Result<FetchedRegion, TileError> {
    let base = slide.dimensions().ok_or_else(|| TileError::InvalidSlide {
        reason: "slide has no pyramid levels".to_string(),
    })?;

    let native_level = slide.best_level_for_downsample(downsample);
    let info = slide
        .level_info(native_level)
        .ok_or_else(|| TileError::InvalidSlide {
            reason: format!("native level {} has no geometry", native_level),
        })?;

    let rect = map_to_native(region, base, (info.width, info.height)).ok_or_else(|| {
        TileError::OutOfBounds {
            message: format!(
                "region {}x{}+{}+{} misses the {}x{} slide",
                region.width, region.height, region.x, region.y, base.0, base.1
            ),
        }
    })?;

    let first_col = rect.x / info.tile_width;
    let last_col = ((rect.right() - 1) / info.tile_width as u64) as u32;
    let first_row = rect.y / info.tile_height;
    let last_row = ((rect.bottom() - 1) / info.tile_height as u64) as u32;

    debug!(
        slide_id,
        native_level,
        cols = %format!("{}..={}", first_col, last_col),
        rows = %format!("{}..={}", first_row, last_row),
        "fetching region tiles"
    );

    let mut tasks = JoinSet::new();
    for row in first_row..=last_row {
        for col in first_col..=last_col {
            let slide = Arc::clone(slide);
            tasks.spawn(async move {
                let data = slide.read_tile(native_level, col, row).await;
                (col, row, data)
            });
        }
    }

    let mut tiles = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        let (col, row, data) = joined.map_err(|e| TileError::DecodeError {
            message: format!("tile fetch task failed: {}", e),
        })?;
        let data = data.map_err(|e| TileError::from_tiff(slide_id, e))?;
        tiles.push(FetchedTile { col, row, data });
    }

    Ok(FetchedRegion {
        native_level,
        native_downsample: info.downsample,
        rect,
        tile_width: info.tile_width,
        tile_height: info.tile_height,
        tiles,
    })
}

impl FetchedRegion {
    pub fn native_level(&self) -> usize {
        self.native_level
    }

    /// Decode the fetched tiles and composite them into one image covering
    /// exactly the requested rectangle. CPU bound.
    pub fn decode(self) -> Result<DecodedRegion, TileError> {
        let rect = self.rect;
        let mut image = RgbImage::new(rect.width, rect.height);

        for tile in &self.tiles {
            let decoded = jpeg::decode_rgb(&tile.data).map_err(|e| TileError::DecodeError {
                message: format!(
                    "native level {} tile ({}, {}): {}",
                    self.native_level, tile.col, tile.row, e
                ),
            })?;

            let origin_x = tile.col as u64 * self.tile_width as u64;
            let origin_y = tile.row as u64 * self.tile_height as u64;
            let x0 = origin_x.max(rect.x as u64);
            let y0 = origin_y.max(rect.y as u64);
            let x1 = (origin_x + self.tile_width as u64).min(rect.right());
            let y1 = (origin_y + self.tile_height as u64).min(rect.bottom());

            let need_w = (x1 - origin_x) as u32;
            let need_h = (y1 - origin_y) as u32;
            if decoded.width() < need_w || decoded.height() < need_h {
                return Err(TileError::DecodeError {
                    message: format!(
                        "native level {} tile ({}, {}) decoded to {}x{}, need at least {}x{}",
                        self.native_level,
                        tile.col,
                        tile.row,
                        decoded.width(),
                        decoded.height(),
                        need_w,
                        need_h
                    ),
                });
            }

            let src = decoded.view(
                (x0 - origin_x) as u32,
                (y0 - origin_y) as u32,
                (x1 - x0) as u32,
                (y1 - y0) as u32,
            );
            image
                .copy_from(&*src, (x0 - rect.x as u64) as u32, (y0 - rect.y as u64) as u32)
                .map_err(|e| TileError::DecodeError {
                    message: e.to_string(),
                })?;
        }

        Ok(DecodedRegion {
            image,
            native_level: self.native_level,
            native_downsample: self.native_downsample,
        })
    }
}

/// Fetch and decode in one go, decoding on the blocking pool.
pub async fn read_region<R: RangeReader + 'static>(
    slide: &Arc<CachedSlide<R>>,
    slide_id: &str,
    region: PixelRect,
    downsample: f64,
) -> Result<DecodedRegion, TileError> {
    let fetched = fetch_region(slide, slide_id, region, downsample).await?;
    tokio::task::spawn_blocking(move || fetched.decode())
        .await
        .map_err(|e| TileError::DecodeError {
            message: format!("decode task failed: {}", e),
        })?
}

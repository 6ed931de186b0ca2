//! Map Deep Zoom tile coordinates to source pixel regions.
//!
//! A tile at `(level, col, row)` nominally covers
//! `[col*ts, col*ts + ts) x [row*ts, row*ts + ts)` of its level. Interior
//! edges are widened by the overlap so neighbouring tiles share a border; the
//! outer edges of the level never are. Everything is clipped to the level,
//! so edge tiles come out narrower rather than padded.

use crate::error::TileError;
use crate::slide::PixelRect;

use super::descriptor::PyramidDescriptor;

/// Where a tile's pixels come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRegion {
    pub level: u32,
    pub col: u32,
    pub row: u32,
    /// Level pixels covered by the tile, overlap included. Its size is the
    /// size of the rendered tile.
    pub level_rect: PixelRect,
    /// `level_rect` in full-resolution pixels, clipped to the slide.
    pub region: PixelRect,
    /// The tile's full-resolution footprint without overlap.
    pub nominal: PixelRect,
    /// Full-resolution pixels per level pixel, `2^(L-1-level)`.
    pub scale: u64,
}

impl TileRegion {
    /// Rendered tile size.
    pub fn output_size(&self) -> (u32, u32) {
        (self.level_rect.width, self.level_rect.height)
    }
}

/// Resolve a tile coordinate against `descriptor`.
///
/// Levels and columns or rows outside the grid are rejected, never clamped.
pub fn resolve_tile(
    descriptor: &PyramidDescriptor,
    level: u32,
    col: u32,
    row: u32,
) -> Result<TileRegion, TileError> {
    let (Some(scale), Some((level_w, level_h)), Some((cols, rows))) = (
        descriptor.scale(level),
        descriptor.level_dimensions(level),
        descriptor.tile_grid(level),
    ) else {
        return Err(TileError::InvalidLevel {
            level,
            level_count: descriptor.levels,
        });
    };

    if col >= cols || row >= rows {
        return Err(TileError::TileOutOfBounds {
            level,
            x: col,
            y: row,
            cols,
            rows,
        });
    }

    let ts = descriptor.tile_size as u64;
    let ov = descriptor.overlap as u64;
    let x0 = col as u64 * ts;
    let y0 = row as u64 * ts;
    if x0 >= level_w as u64 || y0 >= level_h as u64 {
        return Err(TileError::OutOfBounds {
            message: format!(
                "tile ({}, {}) at level {} starts outside the {}x{} level",
                col, row, level, level_w, level_h
            ),
        });
    }

    let (left, right) = expand(x0, ts, ov, col > 0, col + 1 < cols, level_w);
    let (top, bottom) = expand(y0, ts, ov, row > 0, row + 1 < rows, level_h);
    let level_rect = span_rect(left, top, right, bottom);

    let (full_w, full_h) = (descriptor.width as u64, descriptor.height as u64);
    let region = span_rect(
        left * scale,
        top * scale,
        (right * scale).min(full_w),
        (bottom * scale).min(full_h),
    );
    let nominal = span_rect(
        x0 * scale,
        y0 * scale,
        ((x0 + ts).min(level_w as u64) * scale).min(full_w),
        ((y0 + ts).min(level_h as u64) * scale).min(full_h),
    );

    Ok(TileRegion {
        level,
        col,
        row,
        level_rect,
        region,
        nominal,
        scale,
    })
}

/// One axis of the tile span: `[start - ov, start + ts + ov)` with overlap
/// only on interior sides, clipped to `[0, extent)`.
fn expand(start: u64, ts: u64, ov: u64, before: bool, after: bool, extent: u32) -> (u64, u64) {
    let lo = if before { start.saturating_sub(ov) } else { start };
    let hi = start + ts + if after { ov } else { 0 };
    (lo, hi.min(extent as u64))
}

// All inputs are clipped to u32 extents before reaching here.
fn span_rect(left: u64, top: u64, right: u64, bottom: u64) -> PixelRect {
    PixelRect::new(
        left as u32,
        top as u32,
        (right - left) as u32,
        (bottom - top) as u32,
    )
}

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::error::TiffError;
use crate::io::RangeReader;

/// Geometry of one native level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelInfo {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub downsample: f64,
}

/// Slack allowed when comparing a native downsample against a target one.
pub const DOWNSAMPLE_TOLERANCE: f64 = 0.01;

/// Read surface shared by every container format.
///
/// `read_tile` is generic over the range reader, so the trait is not object
/// safe; callers dispatch through an enum over the concrete readers.
#[async_trait]
pub trait SlideReader: Send + Sync {
    fn level_count(&self) -> usize;

    /// Full-resolution width and height.
    fn dimensions(&self) -> Option<(u32, u32)>;

    fn level_info(&self, level: usize) -> Option<LevelInfo>;

    /// The native level to read when `downsample` is wanted.
    ///
    /// Picks the coarsest level that is still at least as detailed as the
    /// target, so the result is only ever scaled down. Falls back to level 0
    /// when even level 0 is coarser.
    fn best_level_for_downsample(&self, downsample: f64) -> usize {
        let limit = downsample * (1.0 + DOWNSAMPLE_TOLERANCE);
        (0..self.level_count())
            .filter_map(|level| Some((level, self.level_info(level)?.downsample)))
            .filter(|&(_, ds)| ds <= limit)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map_or(0, |(level, _)| level)
    }

    /// Fetch a stored tile as a self-contained JPEG stream.
    async fn read_tile<R: RangeReader>(
        &self,
        reader: &R,
        level: usize,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Bytes, TiffError>;
}

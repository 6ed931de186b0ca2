//! Loaded tile tables shared by the TIFF-family readers.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;
use crate::slide::LevelInfo;

use super::jpeg::prepare_tile_jpeg;
use super::tiff::{PyramidLevel, TiffHeader, TiffPyramid, TileData};

#[derive(Debug, Clone)]
pub struct TiledLevel {
    pub level: PyramidLevel,
    pub tile_data: TileData,
}

impl TiledLevel {
    pub fn info(&self) -> LevelInfo {
        LevelInfo {
            width: self.level.width,
            height: self.level.height,
            tile_width: self.level.tile_width,
            tile_height: self.level.tile_height,
            tiles_x: self.level.tiles_x,
            tiles_y: self.level.tiles_y,
            downsample: self.level.downsample,
        }
    }
}

/// A parsed pyramid with every level's tile offsets resident in memory.
#[derive(Debug, Clone)]
pub struct TiledPyramid {
    pub pyramid: TiffPyramid,
    pub levels: Vec<TiledLevel>,
}

impl TiledPyramid {
    pub async fn open<R: RangeReader>(reader: &R) -> Result<Self, TiffError> {
        let pyramid = TiffPyramid::parse(reader).await?;

        let mut levels = Vec::with_capacity(pyramid.levels.len());
        for level in &pyramid.levels {
            let tile_data = TileData::load(reader, level, &pyramid.header).await?;
            levels.push(TiledLevel {
                level: level.clone(),
                tile_data,
            });
        }

        Ok(TiledPyramid { pyramid, levels })
    }

    pub fn header(&self) -> &TiffHeader {
        &self.pyramid.header
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.levels.first().map(|l| (l.level.width, l.level.height))
    }

    pub fn level_info(&self, level: usize) -> Option<LevelInfo> {
        self.levels.get(level).map(TiledLevel::info)
    }

    /// Read a stored tile and complete it with the level's JPEG tables.
    pub async fn read_tile<R: RangeReader>(
        &self,
        reader: &R,
        level: usize,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Bytes, TiffError> {
        let tiled = self.levels.get(level).ok_or_else(|| TiffError::InvalidTagValue {
            tag: "level",
            message: format!("native level {} of {}", level, self.levels.len()),
        })?;

        let (offset, len) = tiled
            .level
            .tile_index(tile_x, tile_y)
            .and_then(|idx| tiled.tile_data.tile_location(idx))
            .ok_or_else(|| TiffError::InvalidTagValue {
                tag: "TileOffsets",
                message: format!(
                    "tile ({}, {}) outside the {}x{} grid of native level {}",
                    tile_x, tile_y, tiled.level.tiles_x, tiled.level.tiles_y, level
                ),
            })?;

        if len == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: "TileByteCounts",
                message: format!("tile ({}, {}) at native level {} is empty", tile_x, tile_y, level),
            });
        }
        let len = usize::try_from(len).map_err(|_| TiffError::InvalidTagValue {
            tag: "TileByteCounts",
            message: format!("tile of {} bytes is too large", len),
        })?;

        let raw = reader.read_exact_at(offset, len).await?;
        let tables = tiled.tile_data.jpeg_tables.as_deref();
        Ok(prepare_tile_jpeg(tables, raw))
    }
}

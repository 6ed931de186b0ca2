//! Generic pyramidal TIFF / BigTIFF.
//!
//! Any tiled, JPEG-compressed TIFF whose resolution tiers are stored as
//! separate IFDs. Vendor metadata is ignored.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;
use crate::slide::{LevelInfo, SlideReader};

use super::tiff::TiffHeader;
use super::tiled::{TiledLevel, TiledPyramid};

#[derive(Debug)]
pub struct GenericTiffReader {
    pyramid: TiledPyramid,
}

impl GenericTiffReader {
    pub async fn open<R: RangeReader>(reader: &R) -> Result<Self, TiffError> {
        Ok(GenericTiffReader {
            pyramid: TiledPyramid::open(reader).await?,
        })
    }

    pub fn header(&self) -> &TiffHeader {
        self.pyramid.header()
    }

    pub fn get_level(&self, level: usize) -> Option<&TiledLevel> {
        self.pyramid.levels.get(level)
    }
}

#[async_trait]
impl SlideReader for GenericTiffReader {
    fn level_count(&self) -> usize {
        self.pyramid.level_count()
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.pyramid.dimensions()
    }

    fn level_info(&self, level: usize) -> Option<LevelInfo> {
        self.pyramid.level_info(level)
    }

    async fn read_tile<R: RangeReader>(
        &self,
        reader: &R,
        level: usize,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Bytes, TiffError> {
        self.pyramid.read_tile(reader, level, tile_x, tile_y).await
    }
}

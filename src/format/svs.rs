//! Aperio SVS.
//!
//! SVS is a TIFF whose first IFD is the full-resolution image and whose
//! ImageDescription starts with `Aperio Image Library`, followed by
//! pipe-separated `key = value` properties. Tiles are usually abbreviated
//! JPEG streams completed by the level's `JPEGTables`. The thumbnail, label
//! and macro images share the file but never pass pyramid identification.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;
use crate::slide::{LevelInfo, SlideReader};

use super::tiff::{TiffHeader, TiffTag, ValueReader};
use super::tiled::{TiledLevel, TiledPyramid};

/// Properties parsed from the Aperio ImageDescription.
#[derive(Debug, Clone, Default)]
pub struct SvsMetadata {
    /// Microns per pixel at level 0
    pub mpp: Option<f64>,
    /// Scanning objective power (`AppMag`)
    pub magnification: Option<f64>,
    pub vendor: Option<String>,
    pub properties: HashMap<String, String>,
}

impl SvsMetadata {
    pub fn parse(description: &str) -> Self {
        let mut metadata = SvsMetadata::default();
        if description.contains("Aperio") {
            metadata.vendor = Some("Aperio".to_string());
        }

        // The first segment is the free-text header line, not a property.
        for part in description.split('|').skip(1) {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "MPP" => metadata.mpp = value.parse().ok(),
                "AppMag" => metadata.magnification = value.parse().ok(),
                _ => {}
            }
            metadata.properties.insert(key.to_string(), value.to_string());
        }

        metadata
    }
}

#[derive(Debug)]
pub struct SvsReader {
    pyramid: TiledPyramid,
    metadata: SvsMetadata,
}

impl SvsReader {
    pub async fn open<R: RangeReader>(reader: &R) -> Result<Self, TiffError> {
        let pyramid = TiledPyramid::open(reader).await?;

        let description = match pyramid
            .pyramid
            .first_ifd
            .get_entry_by_tag(TiffTag::ImageDescription)
        {
            Some(entry) => {
                ValueReader::new(reader, pyramid.header())
                    .read_string(entry)
                    .await?
            }
            None => String::new(),
        };

        Ok(SvsReader {
            metadata: SvsMetadata::parse(&description),
            pyramid,
        })
    }

    pub fn header(&self) -> &TiffHeader {
        self.pyramid.header()
    }

    pub fn metadata(&self) -> &SvsMetadata {
        &self.metadata
    }

    pub fn get_level(&self, level: usize) -> Option<&TiledLevel> {
        self.pyramid.levels.get(level)
    }
}

#[async_trait]
impl SlideReader for SvsReader {
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

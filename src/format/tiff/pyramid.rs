//! Native pyramid identification.
//!
//! A slide container stores its resolution tiers as tiled IFDs, mixed in with
//! label, macro and thumbnail images. Every tiled IFD that carries tile
//! offsets and byte counts is a candidate. Candidates are ordered by area and
//! the largest becomes native level 0. A smaller candidate is kept only when
//! its aspect ratio matches level 0 within [`ASPECT_TOLERANCE`] and its
//! downsample does not go backwards; everything else is an associated image.

use std::collections::HashSet;

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
use super::tags::{Compression, TiffTag};
use super::values::ValueReader;

/// Longest IFD chain followed before giving up.
pub const MAX_IFDS: usize = 100;

/// Relative aspect-ratio difference tolerated between level 0 and a lower level.
pub const ASPECT_TOLERANCE: f64 = 0.05;

/// One native resolution tier.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    /// Position in the pyramid, 0 = full resolution.
    pub level_index: usize,
    /// Position of the IFD in the file's chain.
    pub ifd_index: usize,
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    /// Level 0 width and height over this level's, averaged.
    pub downsample: f64,
    pub compression: u16,
    pub ifd: Ifd,
    pub tile_offsets_entry: IfdEntry,
    pub tile_byte_counts_entry: IfdEntry,
    pub jpeg_tables_entry: Option<IfdEntry>,
}

impl PyramidLevel {
    /// Build a candidate from a tiled IFD. `None` if the IFD isn't one.
    fn from_ifd(ifd: Ifd, ifd_index: usize, byte_order: ByteOrder) -> Option<Self> {
        let tile_width = ifd.tile_width(byte_order).filter(|&v| v > 0)?;
        let tile_height = ifd.tile_height(byte_order).filter(|&v| v > 0)?;
        let width = ifd.image_width(byte_order).filter(|&v| v > 0)?;
        let height = ifd.image_height(byte_order).filter(|&v| v > 0)?;

        let tile_offsets_entry = ifd.get_entry_by_tag(TiffTag::TileOffsets)?.clone();
        let tile_byte_counts_entry = ifd.get_entry_by_tag(TiffTag::TileByteCounts)?.clone();
        let jpeg_tables_entry = ifd.get_entry_by_tag(TiffTag::JpegTables).cloned();

        // Compression defaults to none when the tag is absent.
        let compression = ifd
            .compression(byte_order)
            .unwrap_or(Compression::None as u16);

        Some(PyramidLevel {
            level_index: 0,
            ifd_index,
            width,
            height,
            tile_width,
            tile_height,
            tiles_x: width.div_ceil(tile_width),
            tiles_y: height.div_ceil(tile_height),
            downsample: 1.0,
            compression,
            ifd,
            tile_offsets_entry,
            tile_byte_counts_entry,
            jpeg_tables_entry,
        })
    }

    fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    pub fn tile_count(&self) -> u64 {
        self.tiles_x as u64 * self.tiles_y as u64
    }

    /// Row-major index of a tile, `None` outside the grid.
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> Option<usize> {
        if tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return None;
        }
        Some(tile_y as usize * self.tiles_x as usize + tile_x as usize)
    }

    /// Pixel extent of a tile once clipped to the level. Stored tiles are
    /// always full size; the edge ones carry padding past this extent.
    pub fn tile_dimensions(&self, tile_x: u32, tile_y: u32) -> Option<(u32, u32)> {
        self.tile_index(tile_x, tile_y)?;
        let w = (self.width - tile_x * self.tile_width).min(self.tile_width);
        let h = (self.height - tile_y * self.tile_height).min(self.tile_height);
        Some((w, h))
    }
}

/// The identified pyramid plus the file's first IFD, which carries the
/// vendor description.
#[derive(Debug, Clone)]
pub struct TiffPyramid {
    pub header: TiffHeader,
    pub levels: Vec<PyramidLevel>,
    pub first_ifd: Ifd,
}

impl TiffPyramid {
    /// Walk the IFD chain and identify the native pyramid.
    pub async fn parse<R: RangeReader>(reader: &R) -> Result<Self, TiffError> {
        let header = read_header(reader).await?;
        let ifds = read_ifd_chain(reader, &header).await?;
        Self::build(header, ifds)
    }

    fn build(header: TiffHeader, ifds: Vec<Ifd>) -> Result<Self, TiffError> {
        let first_ifd = ifds
            .first()
            .cloned()
            .ok_or(TiffError::InvalidIfdOffset(header.first_ifd_offset))?;

        let byte_order = header.byte_order;
        let any_stripped = ifds.iter().any(Ifd::is_stripped);

        let mut candidates: Vec<PyramidLevel> = ifds
            .into_iter()
            .enumerate()
            .filter_map(|(idx, ifd)| PyramidLevel::from_ifd(ifd, idx, byte_order))
            .collect();

        if candidates.is_empty() {
            return Err(if any_stripped {
                TiffError::StripOrganization
            } else {
                TiffError::NoPyramid
            });
        }

        // Stable sort keeps file order among equal areas.
        candidates.sort_by(|a, b| b.area().cmp(&a.area()));
        let levels = select_levels(candidates);

        for level in &levels {
            let supported = Compression::from_u16(level.compression)
                .is_some_and(Compression::is_supported);
            if !supported {
                return Err(TiffError::UnsupportedCompression(Compression::describe(
                    level.compression,
                )));
            }
        }

        Ok(TiffPyramid {
            header,
            levels,
            first_ifd,
        })
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn base_level(&self) -> Option<&PyramidLevel> {
        self.levels.first()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.base_level().map(|l| (l.width, l.height))
    }
}

fn select_levels(candidates: Vec<PyramidLevel>) -> Vec<PyramidLevel> {
    let mut levels: Vec<PyramidLevel> = Vec::with_capacity(candidates.len());

    for mut level in candidates {
        let Some(base) = levels.first() else {
            levels.push(level);
            continue;
        };

        let base_ratio = base.aspect_ratio();
        if ((level.aspect_ratio() - base_ratio) / base_ratio).abs() > ASPECT_TOLERANCE {
            continue;
        }

        let downsample = (base.width as f64 / level.width as f64
            + base.height as f64 / level.height as f64)
            / 2.0;
        let previous = levels.last().map_or(1.0, |l| l.downsample);
        if downsample < previous {
            continue;
        }

        level.level_index = levels.len();
        level.downsample = downsample;
        levels.push(level);
    }

    levels
}

async fn read_header<R: RangeReader>(reader: &R) -> Result<TiffHeader, TiffError> {
    let size = reader.size();
    if size < TIFF_HEADER_SIZE as u64 {
        return Err(TiffError::FileTooSmall {
            required: TIFF_HEADER_SIZE as u64,
            actual: size,
        });
    }
    let len = (BIGTIFF_HEADER_SIZE as u64).min(size) as usize;
    let bytes = reader.read_exact_at(0, len).await?;
    TiffHeader::parse(&bytes, size)
}

/// Read up to [`MAX_IFDS`] directories, rejecting offsets that leave the file
/// or revisit an earlier IFD.
pub async fn read_ifd_chain<R: RangeReader>(
    reader: &R,
    header: &TiffHeader,
) -> Result<Vec<Ifd>, TiffError> {
    let mut ifds = Vec::new();
    let mut seen = HashSet::new();
    let mut offset = header.first_ifd_offset;

    while offset != 0 && ifds.len() < MAX_IFDS {
        if offset >= reader.size() || !seen.insert(offset) {
            return Err(TiffError::InvalidIfdOffset(offset));
        }
        let ifd = read_ifd(reader, header, offset).await?;
        offset = ifd.next_ifd_offset;
        ifds.push(ifd);
    }

    Ok(ifds)
}

pub async fn read_ifd<R: RangeReader>(
    reader: &R,
    header: &TiffHeader,
    offset: u64,
) -> Result<Ifd, TiffError> {
    let count_bytes = reader.read_exact_at(offset, header.ifd_count_size()).await?;
    let entry_count = header.read_entry_count(&count_bytes);
    let ifd_size = Ifd::calculate_size(entry_count, header).ok_or(TiffError::InvalidTagValue {
        tag: "IFD",
        message: format!("entry count {} is too large", entry_count),
    })?;
    let ifd_bytes = reader.read_exact_at(offset, ifd_size).await?;
    Ifd::parse(&ifd_bytes, header)
}

/// Tile locations for one level, loaded once at open.
#[derive(Debug, Clone)]
pub struct TileData {
    pub offsets: Vec<u64>,
    pub byte_counts: Vec<u64>,
    pub jpeg_tables: Option<Bytes>,
}

impl TileData {
    pub async fn load<R: RangeReader>(
        reader: &R,
        level: &PyramidLevel,
        header: &TiffHeader,
    ) -> Result<Self, TiffError> {
        let values = ValueReader::new(reader, header);

        let offsets = values.read_u64_array(&level.tile_offsets_entry).await?;
        let byte_counts = values.read_u64_array(&level.tile_byte_counts_entry).await?;

        let expected = level.tile_count();
        for (tag, len) in [
            ("TileOffsets", offsets.len()),
            ("TileByteCounts", byte_counts.len()),
        ] {
            if (len as u64) < expected {
                return Err(TiffError::InvalidTagValue {
                    tag,
                    message: format!(
                        "level {} has {} entries for {} tiles",
                        level.level_index, len, expected
                    ),
                });
            }
        }

        let jpeg_tables = match &level.jpeg_tables_entry {
            Some(entry) => Some(values.read_bytes(entry).await?),
            None => None,
        };

        Ok(TileData {
            offsets,
            byte_counts,
            jpeg_tables,
        })
    }

    /// `(offset, length)` of a stored tile.
    pub fn tile_location(&self, tile_index: usize) -> Option<(u64, u64)> {
        Some((
            *self.offsets.get(tile_index)?,
            *self.byte_counts.get(tile_index)?,
        ))
    }
}

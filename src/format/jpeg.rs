//! JPEG tile streams.
//!
//! TIFF files may store JPEG tiles as "abbreviated" streams: the quantization
//! and Huffman tables are kept once per level in the `JPEGTables` tag and each
//! tile holds only its scan. Such a tile must be spliced back together with
//! the tables before a standard decoder accepts it.

use std::io::Cursor;

use bytes::{Bytes, BytesMut};
use image::{ImageFormat, ImageReader, RgbImage};

pub const SOI: [u8; 2] = [0xFF, 0xD8];
pub const EOI: [u8; 2] = [0xFF, 0xD9];

const DQT: u8 = 0xDB;
const SOS: u8 = 0xDA;

/// Whether the stream defines quantization tables before its first scan.
///
/// Walks marker segments from SOI to SOS; a malformed stream answers `false`.
pub fn has_quantization_tables(data: &[u8]) -> bool {
    if data.len() < 4 || data[0..2] != SOI {
        return false;
    }

    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return false;
        }
        let marker = data[pos + 1];
        match marker {
            // Fill bytes
            0xFF => {
                pos += 1;
                continue;
            }
            DQT => return true,
            SOS | 0xD9 => return false,
            // Standalone markers without a length field
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            _ => {}
        }
        let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if length < 2 {
            return false;
        }
        pos += 2 + length;
    }

    false
}

/// Splice the level's table stream in front of a tile's scan.
///
/// The result is `tables` without its EOI followed by `tile` without its SOI.
pub fn merge_jpeg_tables(tables: &[u8], tile: &[u8]) -> Bytes {
    let tables = tables.strip_suffix(&EOI).unwrap_or(tables);
    let tile = tile.strip_prefix(&SOI).unwrap_or(tile);

    let mut out = BytesMut::with_capacity(tables.len() + tile.len());
    out.extend_from_slice(tables);
    out.extend_from_slice(tile);
    out.freeze()
}

/// Produce a self-contained JPEG stream for a stored tile.
pub fn prepare_tile_jpeg(tables: Option<&[u8]>, tile: Bytes) -> Bytes {
    match tables {
        Some(tables) if !tables.is_empty() && !has_quantization_tables(&tile) => {
            merge_jpeg_tables(tables, &tile)
        }
        _ => tile,
    }
}

/// Decode a complete JPEG stream to 8-bit RGB.
pub fn decode_rgb(data: &[u8]) -> Result<RgbImage, String> {
    let image = ImageReader::with_format(Cursor::new(data), ImageFormat::Jpeg)
        .decode()
        .map_err(|e| e.to_string())?;
    Ok(image.into_rgb8())
}

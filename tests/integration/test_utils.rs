//! Test utilities for integration tests.
//!
//! Mock storage plus a builder that writes real tiled TIFF / BigTIFF / SVS
//! files whose tiles are genuine JPEG streams, so every test runs the full
//! parse, decode, resample and encode path.

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, Rgb, RgbImage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wsi_pyramid::error::IoError;
use wsi_pyramid::io::{check_range, RangeReader};
use wsi_pyramid::server::{create_router, RouterConfig};
use wsi_pyramid::slide::{SlideRegistry, SlideSource};
use wsi_pyramid::tile::{ServiceConfig, TileService};

// =============================================================================
// Mock Range Reader with Request Tracking
// =============================================================================

/// An in-memory range reader that counts the reads it serves.
#[derive(Clone)]
pub struct TrackingMockReader {
    data: Bytes,
    identifier: String,
    request_count: Arc<AtomicUsize>,
}

impl TrackingMockReader {
    pub fn new(data: Bytes, identifier: impl Into<String>) -> Self {
        Self {
            data,
            identifier: identifier.into(),
            request_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RangeReader for TrackingMockReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        check_range(offset, len, self.data.len() as u64)?;
        let start = offset as usize;
        Ok(self.data.slice(start..start + len))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// Mock Slide Source
// =============================================================================

/// Serves pre-built slides by id and counts how often each is opened.
#[derive(Clone, Default)]
pub struct MockSlideSource {
    slides: Arc<HashMap<String, Bytes>>,
    opens: Arc<AtomicUsize>,
    open_delay: Option<Duration>,
}

impl MockSlideSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slide(mut self, slide_id: impl Into<String>, data: Vec<u8>) -> Self {
        Arc::make_mut(&mut self.slides).insert(slide_id.into(), Bytes::from(data));
        self
    }

    /// Sleep this long before every open, to widen race windows.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Shared counter of `create_reader` calls.
    pub fn open_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opens)
    }
}

#[async_trait]
impl SlideSource for MockSlideSource {
    type Reader = TrackingMockReader;

    async fn create_reader(&self, slide_id: &str) -> Result<Self::Reader, IoError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }

        match self.slides.get(slide_id) {
            Some(data) => Ok(TrackingMockReader::new(
                data.clone(),
                format!("mock://{}", slide_id),
            )),
            None => Err(IoError::NotFound(slide_id.to_string())),
        }
    }
}

pub fn test_service(source: MockSlideSource) -> TileService<MockSlideSource> {
    TileService::new(SlideRegistry::new(source), ServiceConfig::default())
}

pub fn test_router(source: MockSlideSource) -> axum::Router {
    create_router(test_service(source), RouterConfig::new().with_tracing(false))
}

// =============================================================================
// Test JPEG Creation
// =============================================================================

/// An RGB JPEG with a smooth gradient.
pub fn create_test_rgb_jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    encode_jpeg(&img, quality)
}

/// A single-colour RGB JPEG.
pub fn create_solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode_jpeg(&RgbImage::from_pixel(width, height, Rgb(color)), 95)
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
        .unwrap();
    buf
}

/// Split a complete JPEG into a `JPEGTables` stream (SOI, DQT, DHT, EOI) and
/// an abbreviated tile stream holding everything else.
pub fn split_jpeg_tables(jpeg: &[u8]) -> (Vec<u8>, Vec<u8>) {
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    let mut tables = vec![0xFF, 0xD8];
    let mut tile = vec![0xFF, 0xD8];

    let mut pos = 2;
    while pos + 4 <= jpeg.len() {
        let marker = jpeg[pos + 1];
        if marker == 0xDA {
            // Scan header and entropy-coded data run to the end.
            tile.extend_from_slice(&jpeg[pos..]);
            break;
        }
        let length = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        let segment = &jpeg[pos..pos + 2 + length];
        match marker {
            0xDB | 0xC4 => tables.extend_from_slice(segment),
            // APPn segments are dropped so the merged stream stays canonical.
            0xE0..=0xEF => {}
            _ => tile.extend_from_slice(segment),
        }
        pos += 2 + length;
    }

    tables.extend_from_slice(&[0xFF, 0xD9]);
    (tables, tile)
}

// =============================================================================
// TIFF File Builder
// =============================================================================

const ASCII: u16 = 2;
const SHORT: u16 = 3;
const LONG: u16 = 4;
const UNDEFINED: u16 = 7;
const LONG8: u16 = 16;

/// One resolution level: image size, square tile size and the JPEG stream(s)
/// stored for its tiles. A single stream is shared by every tile.
#[derive(Clone)]
pub struct LevelSpec {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub tiles: Vec<Vec<u8>>,
    pub compression: u16,
}

impl LevelSpec {
    pub fn new(width: u32, height: u32, tile_size: u32, jpeg: Vec<u8>) -> Self {
        Self {
            width,
            height,
            tile_size,
            tiles: vec![jpeg],
            compression: 7,
        }
    }

    /// One JPEG per tile, in row-major order.
    pub fn with_tiles(mut self, tiles: Vec<Vec<u8>>) -> Self {
        assert_eq!(tiles.len() as u32, self.tile_count());
        self.tiles = tiles;
        self
    }

    pub fn with_compression(mut self, compression: u16) -> Self {
        self.compression = compression;
        self
    }

    pub fn tiles_x(&self) -> u32 {
        self.width.div_ceil(self.tile_size)
    }

    pub fn tiles_y(&self) -> u32 {
        self.height.div_ceil(self.tile_size)
    }

    pub fn tile_count(&self) -> u32 {
        self.tiles_x() * self.tiles_y()
    }
}

struct Entry {
    tag: u16,
    field_type: u16,
    count: u64,
    data: Vec<u8>,
}

/// Writes a tiled TIFF with one IFD per level, each followed by its data.
#[derive(Clone, Default)]
pub struct SlideBuilder {
    big_endian: bool,
    bigtiff: bool,
    description: Option<String>,
    jpeg_tables: Option<Vec<u8>>,
    levels: Vec<LevelSpec>,
}

impl SlideBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    pub fn bigtiff(mut self) -> Self {
        self.bigtiff = true;
        self
    }

    /// ImageDescription of the first IFD.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// JPEGTables written into every level.
    pub fn jpeg_tables(mut self, tables: Vec<u8>) -> Self {
        self.jpeg_tables = Some(tables);
        self
    }

    pub fn level(mut self, level: LevelSpec) -> Self {
        self.levels.push(level);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(if self.big_endian { b"MM" } else { b"II" });
        if self.bigtiff {
            self.put(&mut out, 43, 2);
            self.put(&mut out, 8, 2);
            self.put(&mut out, 0, 2);
            self.put(&mut out, 16, 8);
        } else {
            self.put(&mut out, 42, 2);
            self.put(&mut out, 8, 4);
        }

        let mut next_link: Option<usize> = None;
        for (index, level) in self.levels.iter().enumerate() {
            if out.len() % 2 == 1 {
                out.push(0);
            }
            let ifd_start = out.len() as u64;
            if let Some(at) = next_link {
                let mut link = Vec::new();
                self.put(&mut link, ifd_start, self.slot_size());
                out[at..at + link.len()].copy_from_slice(&link);
            }
            next_link = Some(self.write_level(&mut out, level, index == 0));
        }
        out
    }

    /// Append one IFD and its data; returns the position of its next-IFD link.
    fn write_level(&self, out: &mut Vec<u8>, level: &LevelSpec, first: bool) -> usize {
        let mut entries = vec![
            self.scalar(256, LONG, level.width as u64),
            self.scalar(257, LONG, level.height as u64),
            self.scalar(258, SHORT, 8),
            self.scalar(259, SHORT, level.compression as u64),
            self.scalar(262, SHORT, 2),
            self.scalar(277, SHORT, 3),
            self.scalar(322, LONG, level.tile_size as u64),
            self.scalar(323, LONG, level.tile_size as u64),
        ];
        if first {
            if let Some(ref description) = self.description {
                let mut data = description.as_bytes().to_vec();
                data.push(0);
                entries.push(Entry {
                    tag: 270,
                    field_type: ASCII,
                    count: data.len() as u64,
                    data,
                });
            }
        }
        if let Some(ref tables) = self.jpeg_tables {
            entries.push(Entry {
                tag: 347,
                field_type: UNDEFINED,
                count: tables.len() as u64,
                data: tables.clone(),
            });
        }

        let entry_count = entries.len() + 2;
        let (count_size, entry_size) = if self.bigtiff { (8, 20) } else { (2, 12) };
        let slot = self.slot_size();
        let ifd_len = count_size + entry_count * entry_size + slot;
        let mut cursor = out.len() + ifd_len;

        // Tile streams come first, right after the IFD.
        let mut blob_offsets = Vec::with_capacity(level.tiles.len());
        for blob in &level.tiles {
            blob_offsets.push(cursor as u64);
            cursor += blob.len();
        }

        let (array_type, width) = if self.bigtiff { (LONG8, 8) } else { (LONG, 4) };
        let mut offsets = Vec::new();
        let mut counts = Vec::new();
        for i in 0..level.tile_count() as usize {
            let blob = if level.tiles.len() == 1 { 0 } else { i };
            self.put(&mut offsets, blob_offsets[blob], width);
            self.put(&mut counts, level.tiles[blob].len() as u64, width);
        }
        entries.push(Entry {
            tag: 324,
            field_type: array_type,
            count: level.tile_count() as u64,
            data: offsets,
        });
        entries.push(Entry {
            tag: 325,
            field_type: array_type,
            count: level.tile_count() as u64,
            data: counts,
        });
        entries.sort_by_key(|e| e.tag);

        let mut ifd = Vec::with_capacity(ifd_len);
        let mut external = Vec::new();
        self.put(&mut ifd, entry_count as u64, count_size);
        for entry in &entries {
            self.put(&mut ifd, entry.tag as u64, 2);
            self.put(&mut ifd, entry.field_type as u64, 2);
            self.put(&mut ifd, entry.count, if self.bigtiff { 8 } else { 4 });
            if entry.data.len() <= slot {
                let mut inline = entry.data.clone();
                inline.resize(slot, 0);
                ifd.extend_from_slice(&inline);
            } else {
                self.put(&mut ifd, cursor as u64, slot);
                cursor += entry.data.len();
                external.extend_from_slice(&entry.data);
            }
        }
        let link_at = out.len() + ifd.len();
        self.put(&mut ifd, 0, slot);

        out.extend_from_slice(&ifd);
        for blob in &level.tiles {
            out.extend_from_slice(blob);
        }
        out.extend_from_slice(&external);
        assert_eq!(out.len(), cursor);
        link_at
    }

    fn scalar(&self, tag: u16, field_type: u16, value: u64) -> Entry {
        let mut data = Vec::new();
        self.put(&mut data, value, if field_type == SHORT { 2 } else { 4 });
        Entry {
            tag,
            field_type,
            count: 1,
            data,
        }
    }

    fn slot_size(&self) -> usize {
        if self.bigtiff {
            8
        } else {
            4
        }
    }

    fn put(&self, out: &mut Vec<u8>, value: u64, size: usize) {
        let bytes = if self.big_endian {
            value.to_be_bytes()[8 - size..].to_vec()
        } else {
            value.to_le_bytes()[..size].to_vec()
        };
        out.extend_from_slice(&bytes);
    }
}

// =============================================================================
// Ready-made Slides
// =============================================================================

/// Width and height of the generic test slide.
pub const SLIDE_WIDTH: u32 = 2048;
pub const SLIDE_HEIGHT: u32 = 1536;

/// 2048x1536 generic pyramidal TIFF with native levels at 1x and 4x.
pub fn create_pyramid_tiff() -> Vec<u8> {
    pyramid_builder().build()
}

pub fn pyramid_builder() -> SlideBuilder {
    let jpeg = create_test_rgb_jpeg(256, 256, 90);
    SlideBuilder::new()
        .level(LevelSpec::new(SLIDE_WIDTH, SLIDE_HEIGHT, 256, jpeg.clone()))
        .level(LevelSpec::new(SLIDE_WIDTH / 4, SLIDE_HEIGHT / 4, 256, jpeg))
}

pub const APERIO_DESCRIPTION: &str = "Aperio Image Library v12.0.5\r\n\
    2048x1536 [0,0 2048x1536] (256x256) JPEG/RGB Q=70|AppMag = 20|MPP = 0.4990|Filename = test";

/// 2048x1536 SVS whose tiles are abbreviated streams completed by JPEGTables.
pub fn create_svs_with_jpeg_tables() -> Vec<u8> {
    let (tables, tile) = split_jpeg_tables(&create_test_rgb_jpeg(256, 256, 85));
    SlideBuilder::new()
        .description(APERIO_DESCRIPTION)
        .jpeg_tables(tables)
        .level(LevelSpec::new(SLIDE_WIDTH, SLIDE_HEIGHT, 256, tile.clone()))
        .level(LevelSpec::new(SLIDE_WIDTH / 4, SLIDE_HEIGHT / 4, 256, tile))
        .build()
}

/// A 25000x30000 slide with native levels at 1x, 4x and 16x. Every tile
/// shares one stored JPEG.
pub fn create_large_slide() -> Vec<u8> {
    let jpeg = create_solid_jpeg(256, 256, [180, 90, 200]);
    SlideBuilder::new()
        .bigtiff()
        .level(LevelSpec::new(25_000, 30_000, 256, jpeg.clone()))
        .level(LevelSpec::new(6_250, 7_500, 256, jpeg.clone()))
        .level(LevelSpec::new(1_563, 1_875, 256, jpeg))
        .build()
}

/// A 1000x700 slide whose 256px tiles each have their own solid colour.
pub fn create_colored_tile_slide() -> Vec<u8> {
    let level = LevelSpec::new(1000, 700, 256, Vec::new());
    let tiles = (0..level.tile_count())
        .map(|i| create_solid_jpeg(256, 256, tile_color(i % level.tiles_x(), i / level.tiles_x())))
        .collect();
    SlideBuilder::new().level(level.with_tiles(tiles)).build()
}

/// Colour of native tile (x, y) in [`create_colored_tile_slide`].
pub fn tile_color(x: u32, y: u32) -> [u8; 3] {
    [40 + (x * 60) as u8, 40 + (y * 70) as u8, 128]
}

/// A tiled TIFF whose only level uses LZW compression.
pub fn create_lzw_tiff() -> Vec<u8> {
    SlideBuilder::new()
        .level(LevelSpec::new(512, 512, 256, vec![0u8; 64]).with_compression(5))
        .build()
}

// =============================================================================
// Assertions
// =============================================================================

pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 4 && data[..2] == [0xFF, 0xD8] && data[data.len() - 2..] == [0xFF, 0xD9]
}

pub fn is_valid_png(data: &[u8]) -> bool {
    data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])
}

/// Decoded width and height of an encoded tile.
pub fn image_dimensions(data: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(data).unwrap();
    (img.width(), img.height())
}

/// Mean colour of a decoded tile.
pub fn mean_color(data: &[u8]) -> [f64; 3] {
    let img = image::load_from_memory(data).unwrap().into_rgb8();
    let mut sum = [0f64; 3];
    for p in img.pixels() {
        for c in 0..3 {
            sum[c] += p[c] as f64;
        }
    }
    let n = (img.width() * img.height()) as f64;
    [sum[0] / n, sum[1] / n, sum[2] / n]
}

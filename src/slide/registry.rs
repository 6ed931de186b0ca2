//! Open slide handles, shared and pooled.
//!
//! The registry maps slide ids to open [`CachedSlide`]s. Opening a slide
//! (format detection, IFD walk, tile tables) happens once per id no matter how
//! many requests arrive together, and the result is kept in an LRU bounded by
//! handle count. Handles unused for too long are dropped by [`SlideRegistry::evict_idle`].
//! The registry lock is only taken to look up, insert or evict entries; tile
//! reads go through the handle's own reader.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{FormatError, IoError, TiffError};
use crate::format::{detect_format, GenericTiffReader, SlideFormat, SvsMetadata, SvsReader};
use crate::io::{BlockCache, RangeReader, DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};
use crate::tile::SingleFlight;

use super::reader::{LevelInfo, SlideReader};

const DEFAULT_SLIDE_CACHE_CAPACITY: usize = 100;

/// Turns a slide id into a reader over its bytes.
#[async_trait]
pub trait SlideSource: Send + Sync + 'static {
    type Reader: RangeReader + 'static;

    async fn create_reader(&self, slide_id: &str) -> Result<Self::Reader, IoError>;
}

/// An open slide: its reader, behind a block cache, plus parsed structure.
pub struct CachedSlide<R: RangeReader + 'static> {
    format: SlideFormat,
    reader: Arc<BlockCache<R>>,
    inner: SlideReaderInner,
}

enum SlideReaderInner {
    Svs(SvsReader),
    GenericTiff(GenericTiffReader),
}

/// Pixel layout every region decodes to.
pub const PIXEL_FORMAT: &str = "rgb8";

impl<R: RangeReader + 'static> CachedSlide<R> {
    /// Detect the container format and parse it.
    pub async fn open(
        reader: R,
        block_size: usize,
        block_cache_capacity: usize,
    ) -> Result<Self, FormatError> {
        let reader = Arc::new(BlockCache::with_capacity(
            reader,
            block_size,
            block_cache_capacity,
        ));

        let format = detect_format(reader.as_ref()).await?;
        let inner = match format {
            SlideFormat::AperioSvs => {
                SlideReaderInner::Svs(SvsReader::open(reader.as_ref()).await?)
            }
            SlideFormat::GenericTiff => {
                SlideReaderInner::GenericTiff(GenericTiffReader::open(reader.as_ref()).await?)
            }
        };

        Ok(CachedSlide {
            format,
            reader,
            inner,
        })
    }

    pub fn format(&self) -> SlideFormat {
        self.format
    }

    pub fn identifier(&self) -> &str {
        self.reader.identifier()
    }

    /// Aperio properties, for SVS slides.
    pub fn svs_metadata(&self) -> Option<&SvsMetadata> {
        match &self.inner {
            SlideReaderInner::Svs(r) => Some(r.metadata()),
            SlideReaderInner::GenericTiff(_) => None,
        }
    }

    pub fn level_count(&self) -> usize {
        match &self.inner {
            SlideReaderInner::Svs(r) => r.level_count(),
            SlideReaderInner::GenericTiff(r) => r.level_count(),
        }
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match &self.inner {
            SlideReaderInner::Svs(r) => r.dimensions(),
            SlideReaderInner::GenericTiff(r) => r.dimensions(),
        }
    }

    pub fn level_info(&self, level: usize) -> Option<LevelInfo> {
        match &self.inner {
            SlideReaderInner::Svs(r) => r.level_info(level),
            SlideReaderInner::GenericTiff(r) => r.level_info(level),
        }
    }

    pub fn levels(&self) -> Vec<LevelInfo> {
        (0..self.level_count())
            .filter_map(|level| self.level_info(level))
            .collect()
    }

    pub fn best_level_for_downsample(&self, downsample: f64) -> usize {
        match &self.inner {
            SlideReaderInner::Svs(r) => r.best_level_for_downsample(downsample),
            SlideReaderInner::GenericTiff(r) => r.best_level_for_downsample(downsample),
        }
    }

    /// A stored tile as a complete JPEG stream.
    pub async fn read_tile(
        &self,
        level: usize,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Bytes, TiffError> {
        let reader = self.reader.as_ref();
        match &self.inner {
            SlideReaderInner::Svs(r) => r.read_tile(reader, level, tile_x, tile_y).await,
            SlideReaderInner::GenericTiff(r) => r.read_tile(reader, level, tile_x, tile_y).await,
        }
    }
}

struct SlideEntry<R: RangeReader + 'static> {
    slide: Arc<CachedSlide<R>>,
    last_access: Instant,
}

type SlideCache<R> = RwLock<LruCache<String, SlideEntry<R>>>;
type OpenResult<R> = Result<Arc<CachedSlide<R>>, FormatError>;

async fn open_entry<S: SlideSource>(
    source: Arc<S>,
    cache: Arc<SlideCache<S::Reader>>,
    id: String,
    block_size: usize,
    block_cache_capacity: usize,
) -> OpenResult<S::Reader> {
    // A caller that missed the cache may race an open that just finished.
    if let Some(entry) = cache.write().await.get_mut(&id) {
        entry.last_access = Instant::now();
        return Ok(Arc::clone(&entry.slide));
    }

    let started = Instant::now();
    let reader = source.create_reader(&id).await?;
    let slide = Arc::new(CachedSlide::open(reader, block_size, block_cache_capacity).await?);
    info!(
        slide_id = %id,
        format = slide.format().name(),
        levels = slide.level_count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "opened slide"
    );

    let entry = SlideEntry {
        slide: Arc::clone(&slide),
        last_access: Instant::now(),
    };
    let evicted = cache.write().await.push(id.clone(), entry);
    if let Some((evicted_id, _)) = evicted.filter(|(k, _)| *k != id) {
        debug!(slide_id = %evicted_id, "evicted slide handle for capacity");
    }
    Ok(slide)
}

pub struct SlideRegistry<S: SlideSource> {
    source: Arc<S>,
    cache: Arc<SlideCache<S::Reader>>,
    opening: SingleFlight<String, OpenResult<S::Reader>>,
    block_size: usize,
    block_cache_capacity: usize,
}

impl<S: SlideSource> SlideRegistry<S> {
    pub fn new(source: S) -> Self {
        Self::with_capacity(
            source,
            DEFAULT_SLIDE_CACHE_CAPACITY,
            DEFAULT_BLOCK_SIZE,
            DEFAULT_BLOCK_CACHE_CAPACITY,
        )
    }

    /// `slide_cache_capacity` open handles, each with a block cache of
    /// `block_cache_capacity` blocks of `block_size` bytes.
    pub fn with_capacity(
        source: S,
        slide_cache_capacity: usize,
        block_size: usize,
        block_cache_capacity: usize,
    ) -> Self {
        let capacity =
            std::num::NonZeroUsize::new(slide_cache_capacity).unwrap_or(std::num::NonZeroUsize::MIN);
        Self {
            source: Arc::new(source),
            cache: Arc::new(RwLock::new(LruCache::new(capacity))),
            opening: SingleFlight::new(),
            block_size,
            block_cache_capacity,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The open handle for `slide_id`, opening it on first use.
    ///
    /// Concurrent calls for an id that isn't open yet share one open. Failed
    /// opens are not remembered.
    pub async fn get_slide(&self, slide_id: &str) -> OpenResult<S::Reader> {
        if let Some(slide) = self.lookup(slide_id).await {
            return Ok(slide);
        }

        let source = Arc::clone(&self.source);
        let cache = Arc::clone(&self.cache);
        let id = slide_id.to_string();
        let (block_size, block_cache_capacity) = (self.block_size, self.block_cache_capacity);

        let flight = self
            .opening
            .run(id.clone(), move || {
                open_entry(source, cache, id, block_size, block_cache_capacity)
            })
            .await;

        flight.value
    }

    async fn lookup(&self, slide_id: &str) -> Option<Arc<CachedSlide<S::Reader>>> {
        let mut cache = self.cache.write().await;
        let entry = cache.get_mut(slide_id)?;
        entry.last_access = Instant::now();
        Some(Arc::clone(&entry.slide))
    }

    /// Drop the handle for `slide_id`. Readers still holding it keep it alive
    /// until they finish.
    pub async fn close(&self, slide_id: &str) -> bool {
        self.cache.write().await.pop(slide_id).is_some()
    }

    /// Drop every handle unused for longer than `max_idle`. Returns how many
    /// were dropped.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut cache = self.cache.write().await;
        let idle: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_access) > max_idle)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &idle {
            cache.pop(id);
            debug!(slide_id = %id, "closed idle slide handle");
        }
        idle.len()
    }

    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn contains(&self, slide_id: &str) -> bool {
        self.cache.read().await.contains(slide_id)
    }
}

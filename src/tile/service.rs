//! Tile service: the descriptor and tile pipelines behind the HTTP layer.
//!
//! ```text
//!  descriptor(id) ──> DescriptorCache ──miss──> SlideRegistry ──> PyramidDescriptor
//!
//!  tile(id, level, x, y)
//!      │  resolve_tile (reject outside the grid)
//!      ▼
//!  TileCache ──miss──> fetch_region ──> [permit] decode + resample + encode
//! ```
//!
//! Decoding and encoding run on the blocking pool, at most
//! `max_concurrent_renders` at a time. A render is a detached task: a request
//! that times out stops waiting but the tile still lands in the cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::deepzoom::{resolve_tile, DescriptorConfig, PyramidDescriptor, TileFormat, TileRegion};
use crate::error::TileError;
use crate::slide::{fetch_region, CachedSlide, LevelInfo, SlideRegistry, SlideSource, PIXEL_FORMAT};

use super::cache::{CacheStats, DescriptorCache, TileCache, TileKey};
use super::cache::{DEFAULT_DESCRIPTOR_CACHE_CAPACITY, DEFAULT_TILE_CACHE_CAPACITY};
use super::renderer::{TileRenderer, DEFAULT_JPEG_QUALITY};

pub const DEFAULT_TILE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(60);

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub descriptor: DescriptorConfig,
    pub jpeg_quality: u8,
    /// Tile cache budget in bytes
    pub tile_cache_capacity: usize,
    /// Descriptor cache size in entries
    pub descriptor_cache_capacity: usize,
    pub max_concurrent_renders: usize,
    pub tile_timeout: Duration,
    pub open_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            descriptor: DescriptorConfig::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            tile_cache_capacity: DEFAULT_TILE_CACHE_CAPACITY,
            descriptor_cache_capacity: DEFAULT_DESCRIPTOR_CACHE_CAPACITY,
            max_concurrent_renders: default_render_concurrency(),
            tile_timeout: DEFAULT_TILE_TIMEOUT,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }
}

/// One render slot per available core.
pub fn default_render_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// An encoded tile.
#[derive(Debug, Clone)]
pub struct TileResponse {
    pub data: Bytes,
    pub format: TileFormat,
    pub cache_hit: bool,
}

/// Native structure of a slide, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SlideInfo {
    pub slide_id: String,
    pub format: &'static str,
    pub width: u32,
    pub height: u32,
    pub pixel_format: &'static str,
    pub levels: Vec<LevelInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnification: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    /// Tile renders started (cache misses that did work)
    pub renders: u64,
    /// Regions decoded
    pub region_decodes: u64,
    pub tiles: CacheStats,
    pub descriptors: CacheStats,
    pub open_slides: usize,
}

#[derive(Default)]
struct Counters {
    renders: AtomicU64,
    region_decodes: AtomicU64,
}

/// State shared with detached cache fills.
struct Pipeline<S: SlideSource> {
    registry: Arc<SlideRegistry<S>>,
    descriptor_config: DescriptorConfig,
    renderer: TileRenderer,
    render_permits: Arc<Semaphore>,
    open_timeout: Duration,
    counters: Counters,
}

impl<S: SlideSource> Pipeline<S> {
    async fn open(&self, slide_id: &str) -> Result<Arc<CachedSlide<S::Reader>>, TileError> {
        match tokio::time::timeout(self.open_timeout, self.registry.get_slide(slide_id)).await {
            Ok(result) => result.map_err(|e| TileError::from_format(slide_id, e)),
            Err(_) => Err(TileError::Timeout {
                operation: "slide open",
                after: self.open_timeout,
            }),
        }
    }

    async fn build_descriptor(&self, slide_id: &str) -> Result<Arc<PyramidDescriptor>, TileError> {
        let slide = self.open(slide_id).await?;
        let (width, height) = slide.dimensions().ok_or_else(|| TileError::InvalidSlide {
            reason: "slide has no pyramid levels".to_string(),
        })?;
        let descriptor = PyramidDescriptor::new(width, height, &self.descriptor_config)?;
        debug!(
            slide_id,
            width,
            height,
            levels = descriptor.levels,
            "built descriptor"
        );
        Ok(Arc::new(descriptor))
    }

    async fn render(&self, slide_id: &str, tile: TileRegion) -> Result<Bytes, TileError> {
        self.counters.renders.fetch_add(1, Ordering::Relaxed);

        let slide = self.open(slide_id).await?;
        let fetched = fetch_region(&slide, slide_id, tile.region, tile.scale as f64).await?;
        let native_level = fetched.native_level();

        let permit = Arc::clone(&self.render_permits)
            .acquire_owned()
            .await
            .map_err(|e| TileError::DecodeError {
                message: format!("render pool closed: {}", e),
            })?;

        self.counters.region_decodes.fetch_add(1, Ordering::Relaxed);
        let renderer = self.renderer;
        let (width, height) = tile.output_size();
        let data = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let region = fetched.decode()?;
            renderer.render(region.image, width, height)
        })
        .await
        .map_err(|e| TileError::DecodeError {
            message: format!("render task failed: {}", e),
        })??;

        debug!(
            slide_id,
            level = tile.level,
            x = tile.col,
            y = tile.row,
            native_level,
            bytes = data.len(),
            "rendered tile"
        );
        Ok(data)
    }
}

/// Serves descriptors and tiles for every slide a source can produce.
pub struct TileService<S: SlideSource> {
    pipeline: Arc<Pipeline<S>>,
    tiles: TileCache,
    descriptors: DescriptorCache,
    tile_timeout: Duration,
}

impl<S: SlideSource> TileService<S> {
    pub fn new(registry: SlideRegistry<S>, config: ServiceConfig) -> Self {
        Self::with_shared_registry(Arc::new(registry), config)
    }

    /// Build on a registry that other components also hold.
    pub fn with_shared_registry(registry: Arc<SlideRegistry<S>>, config: ServiceConfig) -> Self {
        let permits = config.max_concurrent_renders.max(1);
        Self {
            pipeline: Arc::new(Pipeline {
                registry,
                descriptor_config: config.descriptor,
                renderer: TileRenderer::new(config.descriptor.format, config.jpeg_quality),
                render_permits: Arc::new(Semaphore::new(permits)),
                open_timeout: config.open_timeout,
                counters: Counters::default(),
            }),
            tiles: TileCache::with_capacity(config.tile_cache_capacity),
            descriptors: DescriptorCache::with_capacity(config.descriptor_cache_capacity),
            tile_timeout: config.tile_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<SlideRegistry<S>> {
        &self.pipeline.registry
    }

    pub fn descriptor_config(&self) -> &DescriptorConfig {
        &self.pipeline.descriptor_config
    }

    pub fn tile_format(&self) -> TileFormat {
        self.pipeline.renderer.format()
    }

    /// The pyramid descriptor for `slide_id`, built on first request.
    pub async fn descriptor(&self, slide_id: &str) -> Result<Arc<PyramidDescriptor>, TileError> {
        let pipeline = Arc::clone(&self.pipeline);
        let id: Arc<str> = Arc::from(slide_id);
        let key = Arc::clone(&id);
        let cached = self
            .descriptors
            .get_or_compute(key, move || async move { pipeline.build_descriptor(&id).await })
            .await?;
        Ok(cached.value)
    }

    /// The encoded tile at `(level, x, y)`.
    ///
    /// `format` must match the configured tile format. Coordinates outside
    /// the pyramid are rejected before anything is cached or rendered.
    pub async fn tile(
        &self,
        slide_id: &str,
        level: u32,
        x: u32,
        y: u32,
        format: TileFormat,
    ) -> Result<TileResponse, TileError> {
        if format != self.tile_format() {
            return Err(TileError::InvalidRequest {
                message: format!(
                    "tiles are served as {}, not {}",
                    self.tile_format(),
                    format
                ),
            });
        }

        let descriptor = self.descriptor(slide_id).await?;
        let region = resolve_tile(&descriptor, level, x, y)?;

        let key = TileKey::new(slide_id, level, x, y, format);
        let pipeline = Arc::clone(&self.pipeline);
        let id = Arc::clone(&key.slide_id);
        let lookup = self
            .tiles
            .get_or_compute(key, move || async move { pipeline.render(&id, region).await });

        let cached = tokio::time::timeout(self.tile_timeout, lookup)
            .await
            .map_err(|_| TileError::Timeout {
                operation: "tile render",
                after: self.tile_timeout,
            })??;

        Ok(TileResponse {
            data: cached.value,
            format,
            cache_hit: cached.hit,
        })
    }

    /// Native level structure and scanner metadata for `slide_id`.
    pub async fn info(&self, slide_id: &str) -> Result<SlideInfo, TileError> {
        let slide = self.pipeline.open(slide_id).await?;
        let (width, height) = slide.dimensions().ok_or_else(|| TileError::InvalidSlide {
            reason: "slide has no pyramid levels".to_string(),
        })?;
        let metadata = slide.svs_metadata();

        Ok(SlideInfo {
            slide_id: slide_id.to_string(),
            format: slide.format().name(),
            width,
            height,
            pixel_format: PIXEL_FORMAT,
            levels: slide.levels(),
            mpp: metadata.and_then(|m| m.mpp),
            magnification: metadata.and_then(|m| m.magnification),
            vendor: metadata.and_then(|m| m.vendor.clone()),
        })
    }

    /// Drop everything cached for `slide_id` except rendered tiles, which
    /// age out of the LRU on their own.
    pub async fn close_slide(&self, slide_id: &str) -> bool {
        self.descriptors.remove(&Arc::from(slide_id)).await;
        self.pipeline.registry.close(slide_id).await
    }

    pub async fn clear_caches(&self) {
        self.tiles.clear().await;
        self.descriptors.clear().await;
    }

    pub async fn stats(&self) -> ServiceStats {
        ServiceStats {
            renders: self.pipeline.counters.renders.load(Ordering::Relaxed),
            region_decodes: self.pipeline.counters.region_decodes.load(Ordering::Relaxed),
            tiles: self.tiles.stats().await,
            descriptors: self.descriptors.stats().await,
            open_slides: self.pipeline.registry.cached_count().await,
        }
    }
}

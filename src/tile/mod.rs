//! Tile production and caching.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP Handlers              │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              TileService                │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  TileCache   │  │  TileRenderer   │  │
//! │  │  Descriptor- │  │  (resample →    │  │
//! │  │  Cache       │  │   encode)       │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │     SlideRegistry  /  region decoder    │
//! └─────────────────────────────────────────┘
//! ```

mod cache;
mod renderer;
mod service;
mod singleflight;

pub use cache::{
    CacheStats, Cached, DescriptorCache, MemoCache, TileCache, TileKey, Weigh,
    DEFAULT_DESCRIPTOR_CACHE_CAPACITY, DEFAULT_TILE_CACHE_CAPACITY,
};
pub use renderer::{
    is_valid_quality, resample, TileRenderer, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY,
    MIN_JPEG_QUALITY,
};
pub use service::{
    default_render_concurrency, ServiceConfig, ServiceStats, SlideInfo, TileResponse,
    TileService, DEFAULT_OPEN_TIMEOUT, DEFAULT_TILE_TIMEOUT,
};
pub use singleflight::{Flight, FromPanic, SingleFlight};

//! # wsi-pyramid
//!
//! Deep Zoom tile pyramids for Whole Slide Images (WSI) stored on local disk
//! or in S3-compatible object storage.
//!
//! A slide is opened once, its native resolution levels are read lazily
//! through byte-range requests, and every Deep Zoom tile is resampled from
//! the native level closest to the requested scale.
//!
//! ## Architecture
//!
//! - [`io`] - Range readers (local files, S3) and block caching
//! - [`mod@format`] - TIFF/BigTIFF, Aperio SVS and JPEG handling
//! - [`slide`] - Slide sources, the slide registry and region decoding
//! - [`deepzoom`] - Pyramid geometry and descriptors
//! - [`tile`] - Tile rendering, caching and the tile service
//! - [`server`] - Axum HTTP routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use wsi_pyramid::{create_router, LocalSlideSource, RouterConfig, ServiceConfig, SlideRegistry, TileService};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = SlideRegistry::new(LocalSlideSource::new("/data/slides"));
//!     let service = TileService::new(registry, ServiceConfig::default());
//!     let router = create_router(service, RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod config;
pub mod deepzoom;
pub mod error;
pub mod format;
pub mod io;
pub mod server;
pub mod slide;
pub mod tile;

pub use config::{parse_size, CheckConfig, Cli, Command, ServeConfig};
pub use deepzoom::{
    level_count, resolve_tile, DescriptorConfig, DescriptorSyntax, PyramidDescriptor, TileFormat,
    TileRegion, DEFAULT_OVERLAP, DEFAULT_TILE_SIZE,
};
pub use error::{FormatError, IoError, TiffError, TileError};
pub use format::{detect_format, is_tiff_header, SlideFormat, SvsMetadata};
pub use io::{create_s3_client, BlockCache, FileRangeReader, RangeReader, S3RangeReader};
pub use server::{create_router, AppState, ErrorResponse, HealthResponse, RouterConfig};
pub use slide::{
    CachedSlide, LevelInfo, LocalSlideSource, PixelRect, S3SlideSource, SlideReader,
    SlideRegistry, SlideSource,
};
pub use tile::{
    MemoCache, ServiceConfig, SlideInfo, TileCache, TileKey, TileRenderer, TileResponse,
    TileService, DEFAULT_JPEG_QUALITY, DEFAULT_TILE_CACHE_CAPACITY,
};

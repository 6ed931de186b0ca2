//! Command-line and environment configuration.
//!
//! Every option can also be set through a `WSI_` environment variable:
//!
//! - `WSI_HOST`, `WSI_PORT` - Bind address (default: 0.0.0.0:3000)
//! - `WSI_SLIDES_DIR` - Serve slides from a local directory
//! - `WSI_S3_BUCKET`, `WSI_S3_PREFIX`, `WSI_S3_ENDPOINT`, `WSI_S3_REGION` - Or from S3
//! - `WSI_TILE_SIZE`, `WSI_OVERLAP`, `WSI_TILE_FORMAT`, `WSI_JPEG_QUALITY` - Pyramid layout
//! - `WSI_DESCRIPTOR_SYNTAX` - `xml` (DZI) or `json`
//! - `WSI_CACHE_SLIDES`, `WSI_CACHE_BLOCKS`, `WSI_BLOCK_SIZE` - Open slide handles
//! - `WSI_CACHE_TILES` - Tile cache budget, e.g. `256MB`
//! - `WSI_CACHE_DESCRIPTORS` - Cached descriptors
//! - `WSI_MAX_RENDERS` - Concurrent tile renders (default: one per core)
//! - `WSI_TILE_TIMEOUT`, `WSI_OPEN_TIMEOUT`, `WSI_SLIDE_IDLE_TIMEOUT` - Seconds
//! - `WSI_CACHE_MAX_AGE` - Descriptor Cache-Control max-age in seconds
//! - `WSI_CORS_ORIGINS` - Comma-separated allowed origins

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::deepzoom::{
    DescriptorConfig, DescriptorSyntax, TileFormat, DEFAULT_OVERLAP, DEFAULT_TILE_SIZE,
};
use crate::io::{DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};
use crate::server::RouterConfig;
use crate::tile::{
    default_render_concurrency, ServiceConfig, DEFAULT_DESCRIPTOR_CACHE_CAPACITY,
    DEFAULT_JPEG_QUALITY,
};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_SLIDE_CACHE_CAPACITY: usize = 100;
pub const DEFAULT_TILE_CACHE_SIZE: &str = "256MB";

/// Descriptor Cache-Control max-age (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

pub const DEFAULT_TILE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_OPEN_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SLIDE_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_IDLE_SWEEP_INTERVAL_SECS: u64 = 60;

/// wsi-pyramid - Deep Zoom tiles for Whole Slide Images.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-pyramid")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP tile server.
    Serve(ServeConfig),

    /// Open one slide and print its structure.
    Check(CheckConfig),
}

/// Where slides are read from. Exactly one backend must be set.
#[derive(Args, Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding slide files.
    #[arg(long, env = "WSI_SLIDES_DIR")]
    pub slides_dir: Option<PathBuf>,

    /// S3 bucket holding slide files.
    #[arg(long, env = "WSI_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Key prefix prepended to slide ids in the bucket.
    #[arg(long, env = "WSI_S3_PREFIX")]
    pub s3_prefix: Option<String>,

    /// Custom endpoint for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "WSI_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    #[arg(long, default_value = DEFAULT_REGION, env = "WSI_S3_REGION")]
    pub s3_region: String,
}

/// Chosen storage backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    Local(PathBuf),
    S3 {
        bucket: String,
        prefix: Option<String>,
        endpoint: Option<String>,
        region: String,
    },
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.storage().map(|_| ())
    }

    pub fn storage(&self) -> Result<Storage, String> {
        match (&self.slides_dir, &self.s3_bucket) {
            (Some(_), Some(_)) => {
                Err("Set either --slides-dir or --s3-bucket, not both".to_string())
            }
            (None, None) => Err(
                "No slide storage configured. Set --slides-dir (WSI_SLIDES_DIR) \
                 or --s3-bucket (WSI_S3_BUCKET)"
                    .to_string(),
            ),
            (Some(dir), None) => Ok(Storage::Local(dir.clone())),
            (None, Some(bucket)) if bucket.is_empty() => {
                Err("S3 bucket name must not be empty".to_string())
            }
            (None, Some(bucket)) => Ok(Storage::S3 {
                bucket: bucket.clone(),
                prefix: self.s3_prefix.clone().filter(|p| !p.is_empty()),
                endpoint: self.s3_endpoint.clone(),
                region: self.s3_region.clone(),
            }),
        }
    }
}

/// Slide handle pool settings, shared by every command that opens slides.
#[derive(Args, Debug, Clone)]
pub struct SlideCacheConfig {
    /// Maximum number of open slides.
    #[arg(long, default_value_t = DEFAULT_SLIDE_CACHE_CAPACITY, env = "WSI_CACHE_SLIDES")]
    pub cache_slides: usize,

    /// Cached blocks per open slide.
    #[arg(long, default_value_t = DEFAULT_BLOCK_CACHE_CAPACITY, env = "WSI_CACHE_BLOCKS")]
    pub cache_blocks: usize,

    /// Block size in bytes for the per-slide block cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "WSI_BLOCK_SIZE")]
    pub block_size: usize,
}

impl SlideCacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_slides == 0 {
            return Err("cache_slides must be greater than 0".to_string());
        }
        if self.cache_blocks == 0 {
            return Err("cache_blocks must be greater than 0".to_string());
        }
        if self.block_size < 1024 || self.block_size > 16 * 1024 * 1024 {
            return Err("block_size must be between 1KB and 16MB".to_string());
        }
        Ok(())
    }
}

/// Deep Zoom layout of served pyramids.
#[derive(Args, Debug, Clone)]
pub struct PyramidConfig {
    /// Tile edge in pixels, overlap excluded.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "WSI_TILE_SIZE")]
    pub tile_size: u32,

    /// Pixels shared with each neighbouring tile.
    #[arg(long, default_value_t = DEFAULT_OVERLAP, env = "WSI_OVERLAP")]
    pub overlap: u32,

    /// Tile encoding: jpeg or png.
    #[arg(long, default_value = "jpeg", env = "WSI_TILE_FORMAT")]
    pub tile_format: TileFormat,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "WSI_JPEG_QUALITY")]
    pub jpeg_quality: u8,
}

impl PyramidConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        if self.overlap >= self.tile_size {
            return Err(format!(
                "overlap ({}) must be smaller than tile_size ({})",
                self.overlap, self.tile_size
            ));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        Ok(())
    }

    pub fn descriptor_config(&self) -> DescriptorConfig {
        DescriptorConfig {
            tile_size: self.tile_size,
            overlap: self.overlap,
            format: self.tile_format,
        }
    }
}

/// `serve` options.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    #[arg(long, default_value = DEFAULT_HOST, env = "WSI_HOST")]
    pub host: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "WSI_PORT")]
    pub port: u16,

    #[command(flatten)]
    pub storage: StorageConfig,

    #[command(flatten)]
    pub pyramid: PyramidConfig,

    /// Syntax of `/descriptor`: xml (DZI) or json.
    #[arg(long, default_value = "xml", env = "WSI_DESCRIPTOR_SYNTAX")]
    pub descriptor_syntax: DescriptorSyntax,

    #[command(flatten)]
    pub slides: SlideCacheConfig,

    /// Tile cache budget (e.g. 256MB, 1GB).
    #[arg(long, default_value = DEFAULT_TILE_CACHE_SIZE, env = "WSI_CACHE_TILES")]
    pub cache_tiles: String,

    /// Maximum number of cached descriptors.
    #[arg(long, default_value_t = DEFAULT_DESCRIPTOR_CACHE_CAPACITY, env = "WSI_CACHE_DESCRIPTORS")]
    pub cache_descriptors: usize,

    /// Concurrent tile renders. Defaults to the number of cores.
    #[arg(long, env = "WSI_MAX_RENDERS")]
    pub max_concurrent_renders: Option<usize>,

    /// Seconds a tile request may wait.
    #[arg(long, default_value_t = DEFAULT_TILE_TIMEOUT_SECS, env = "WSI_TILE_TIMEOUT")]
    pub tile_timeout: u64,

    /// Seconds a slide open may take.
    #[arg(long, default_value_t = DEFAULT_OPEN_TIMEOUT_SECS, env = "WSI_OPEN_TIMEOUT")]
    pub open_timeout: u64,

    /// Seconds an unused slide stays open.
    #[arg(long, default_value_t = DEFAULT_SLIDE_IDLE_TIMEOUT_SECS, env = "WSI_SLIDE_IDLE_TIMEOUT")]
    pub slide_idle_timeout: u64,

    /// Seconds between idle slide sweeps.
    #[arg(long, default_value_t = DEFAULT_IDLE_SWEEP_INTERVAL_SECS, env = "WSI_IDLE_SWEEP_INTERVAL")]
    pub idle_sweep_interval: u64,

    /// Descriptor Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "WSI_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated). Any origin when unset.
    #[arg(long, env = "WSI_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.pyramid.validate()?;
        self.slides.validate()?;

        if self.tile_cache_capacity()? == 0 {
            return Err("cache_tiles must be greater than 0".to_string());
        }
        if self.cache_descriptors == 0 {
            return Err("cache_descriptors must be greater than 0".to_string());
        }
        if self.max_concurrent_renders == Some(0) {
            return Err("max_concurrent_renders must be greater than 0".to_string());
        }
        if self.tile_timeout == 0 || self.open_timeout == 0 {
            return Err("timeouts must be greater than 0".to_string());
        }
        if self.slide_idle_timeout == 0 || self.idle_sweep_interval == 0 {
            return Err("slide_idle_timeout and idle_sweep_interval must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Tile cache budget in bytes.
    pub fn tile_cache_capacity(&self) -> Result<usize, String> {
        parse_size(&self.cache_tiles)
    }

    pub fn slide_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.slide_idle_timeout)
    }

    pub fn idle_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.idle_sweep_interval)
    }

    pub fn service_config(&self) -> Result<ServiceConfig, String> {
        Ok(ServiceConfig {
            descriptor: self.pyramid.descriptor_config(),
            jpeg_quality: self.pyramid.jpeg_quality,
            tile_cache_capacity: self.tile_cache_capacity()?,
            descriptor_cache_capacity: self.cache_descriptors,
            max_concurrent_renders: self
                .max_concurrent_renders
                .unwrap_or_else(default_render_concurrency),
            tile_timeout: Duration::from_secs(self.tile_timeout),
            open_timeout: Duration::from_secs(self.open_timeout),
        })
    }

    pub fn router_config(&self) -> RouterConfig {
        let mut router_config = RouterConfig::new()
            .with_cache_max_age(self.cache_max_age)
            .with_descriptor_syntax(self.descriptor_syntax)
            .with_tracing(!self.no_tracing);
        if let Some(ref origins) = self.cors_origins {
            router_config = router_config.with_cors_origins(origins.clone());
        }
        router_config
    }
}

/// `check` options.
#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    /// Slide to open.
    pub slide_id: String,

    #[command(flatten)]
    pub storage: StorageConfig,

    #[command(flatten)]
    pub pyramid: PyramidConfig,

    #[command(flatten)]
    pub slides: SlideCacheConfig,

    /// Seconds the open may take.
    #[arg(long, default_value_t = DEFAULT_OPEN_TIMEOUT_SECS, env = "WSI_OPEN_TIMEOUT")]
    pub open_timeout: u64,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CheckConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.pyramid.validate()?;
        self.slides.validate()?;
        if self.open_timeout == 0 {
            return Err("open_timeout must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            descriptor: self.pyramid.descriptor_config(),
            jpeg_quality: self.pyramid.jpeg_quality,
            open_timeout: Duration::from_secs(self.open_timeout),
            ..ServiceConfig::default()
        }
    }
}

/// Parse a human-readable size such as `512`, `64KB`, `256MB` or `1GB`.
///
/// Suffixes are case-insensitive and binary (1KB = 1024 bytes).
pub fn parse_size(input: &str) -> Result<usize, String> {
    let s = input.trim();
    let upper = s.to_ascii_uppercase();

    let (number, multiplier) = if let Some(n) = upper.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = upper.strip_suffix('B') {
        (n, 1)
    } else {
        (upper.as_str(), 1)
    };

    let value: usize = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid size '{}' (expected e.g. 256MB)", input))?;

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{}' is too large", input))
}

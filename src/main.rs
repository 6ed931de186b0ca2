//! wsi-pyramid - Deep Zoom tile server for Whole Slide Images.
//!
//! This binary starts the HTTP server and configures all components.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_pyramid::{
    config::{CheckConfig, Cli, Command, ServeConfig, Storage, StorageConfig},
    create_s3_client,
    server::create_shared_router,
    slide::{LocalSlideSource, S3SlideSource, SlideRegistry, SlideSource},
    tile::{ServiceConfig, TileService},
    DescriptorSyntax,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(config) => run_serve(config).await,
        Command::Check(config) => run_check(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let service_config = match config.service_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Configuration:");
    info!(
        "  Pyramid: {}px tiles, {}px overlap, {}",
        config.pyramid.tile_size, config.pyramid.overlap, config.pyramid.tile_format
    );
    info!(
        "  Cache: {} slides, {} blocks/slide, {}MB tiles, {} descriptors",
        config.slides.cache_slides,
        config.slides.cache_blocks,
        service_config.tile_cache_capacity / (1024 * 1024),
        config.cache_descriptors
    );
    info!("  Renders: {} concurrent", service_config.max_concurrent_renders);

    match open_storage(&config.storage).await {
        Ok(SourceKind::Local(source)) => serve(source, &config, service_config).await,
        Ok(SourceKind::S3(source)) => serve(source, &config, service_config).await,
        Err(e) => {
            error!("Storage error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn serve<S>(source: S, config: &ServeConfig, service_config: ServiceConfig) -> ExitCode
where
    S: SlideSource + 'static,
{
    let registry = Arc::new(SlideRegistry::with_capacity(
        source,
        config.slides.cache_slides,
        config.slides.block_size,
        config.slides.cache_blocks,
    ));
    let tile_service = Arc::new(TileService::with_shared_registry(
        registry.clone(),
        service_config,
    ));

    spawn_idle_sweeper(
        registry,
        config.slide_idle_timeout(),
        config.idle_sweep_interval(),
    );

    let router = create_shared_router(tile_service, config.router_config());
    let addr = config.bind_address();

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("Server listening on: http://{}", addr);
    info!("  curl http://{}/images/<slide_id>/descriptor", addr);
    info!("  curl http://{}/images/<slide_id>/tiles/0/0/0", addr);

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Periodically close slides nobody has touched for `max_idle`.
fn spawn_idle_sweeper<S>(registry: Arc<SlideRegistry<S>>, max_idle: Duration, every: Duration)
where
    S: SlideSource + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let closed = registry.evict_idle(max_idle).await;
            if closed > 0 {
                debug!(closed, "closed idle slides");
            }
        }
    });
}

enum SourceKind {
    Local(LocalSlideSource),
    S3(S3SlideSource),
}

async fn open_storage(storage: &StorageConfig) -> Result<SourceKind, String> {
    match storage.storage()? {
        Storage::Local(root) => {
            if !root.is_dir() {
                return Err(format!("{} is not a directory", root.display()));
            }
            info!("  Slides: {}", root.display());
            Ok(SourceKind::Local(LocalSlideSource::new(root)))
        }
        Storage::S3 {
            bucket,
            prefix,
            endpoint,
            region,
        } => {
            info!("  S3 bucket: {}", bucket);
            if let Some(ref endpoint) = endpoint {
                info!("  S3 endpoint: {}", endpoint);
            }
            info!("  S3 region: {}", region);

            let client = create_s3_client(endpoint.as_deref(), &region).await;
            Ok(SourceKind::S3(match prefix {
                Some(prefix) => S3SlideSource::with_prefix(client, bucket, prefix),
                None => S3SlideSource::new(client, bucket),
            }))
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_pyramid=debug,tower_http=debug"
    } else {
        "wsi_pyramid=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    match open_storage(&config.storage).await {
        Ok(SourceKind::Local(source)) => check(source, &config).await,
        Ok(SourceKind::S3(source)) => check(source, &config).await,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn check<S>(source: S, config: &CheckConfig) -> ExitCode
where
    S: SlideSource + 'static,
{
    let registry = SlideRegistry::with_capacity(
        source,
        config.slides.cache_slides,
        config.slides.block_size,
        config.slides.cache_blocks,
    );
    let service = TileService::new(registry, config.service_config());

    let info = match service.info(&config.slide_id).await {
        Ok(info) => info,
        Err(e) => {
            eprintln!("✗ {}: {}", config.slide_id, e);
            return ExitCode::FAILURE;
        }
    };

    println!("✓ {}", info.slide_id);
    println!("  Format:     {}", info.format);
    println!("  Dimensions: {} x {}", info.width, info.height);
    if let Some(mpp) = info.mpp {
        println!("  MPP:        {}", mpp);
    }
    if let Some(mag) = info.magnification {
        println!("  Objective:  {}x", mag);
    }
    println!();
    println!("  Native levels:");
    for (i, level) in info.levels.iter().enumerate() {
        println!(
            "    {:>2}: {:>6} x {:<6} tiles {}x{} ({} x {})  downsample {:.2}",
            i,
            level.width,
            level.height,
            level.tile_width,
            level.tile_height,
            level.tiles_x,
            level.tiles_y,
            level.downsample
        );
    }

    match service.descriptor(&config.slide_id).await {
        Ok(descriptor) => {
            println!();
            println!(
                "  Deep Zoom: {} levels, {} x {} tiles at full resolution",
                descriptor.levels,
                descriptor
                    .tile_grid(descriptor.max_level())
                    .map(|(c, _)| c)
                    .unwrap_or(0),
                descriptor
                    .tile_grid(descriptor.max_level())
                    .map(|(_, r)| r)
                    .unwrap_or(0),
            );
            println!("{}", descriptor.render(DescriptorSyntax::Xml));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ descriptor: {}", e);
            ExitCode::FAILURE
        }
    }
}

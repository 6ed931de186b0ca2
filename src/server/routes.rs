//! Router configuration.
//!
//! # Route Structure
//!
//! ```text
//! /health                                          - Health check
//! /images/{slide_id}/descriptor                    - Descriptor, configured syntax
//! /images/{slide_id}/descriptor.json               - Descriptor as JSON
//! /images/{slide_id}/descriptor.dzi                - Descriptor as DZI XML
//! /images/{slide_id}/dzi                           - Same as descriptor.dzi
//! /images/{slide_id}/tiles/{level}/{x}/{y}[.ext]   - Tile
//! /images/{slide_id}/info                          - Native level structure
//! ```
//!
//! # Example
//!
//! ```ignore
//! use wsi_pyramid::server::{create_router, RouterConfig};
//! use wsi_pyramid::slide::{LocalSlideSource, SlideRegistry};
//! use wsi_pyramid::tile::{ServiceConfig, TileService};
//!
//! let registry = SlideRegistry::new(LocalSlideSource::new("/data/slides"));
//! let service = TileService::new(registry, ServiceConfig::default());
//!
//! let router = create_router(service, RouterConfig::new());
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    descriptor_handler, descriptor_json_handler, descriptor_xml_handler, health_handler,
    info_handler, tile_handler, AppState,
};
use crate::deepzoom::DescriptorSyntax;
use crate::slide::SlideSource;
use crate::tile::TileService;

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Descriptor Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Syntax served by the plain `/descriptor` route
    pub descriptor_syntax: DescriptorSyntax,

    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Any CORS origin, one hour descriptor max-age, XML descriptors, tracing on.
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: 3600,
            descriptor_syntax: DescriptorSyntax::Xml,
            enable_tracing: true,
        }
    }

    /// Restrict CORS to `origins`. An empty list disallows cross-origin
    /// requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_descriptor_syntax(mut self, syntax: DescriptorSyntax) -> Self {
        self.descriptor_syntax = syntax;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

/// Build the application router around `tile_service`.
pub fn create_router<S>(tile_service: TileService<S>, config: RouterConfig) -> Router
where
    S: SlideSource + 'static,
{
    create_shared_router(Arc::new(tile_service), config)
}

/// Like [`create_router`], for a service the caller keeps a handle to.
pub fn create_shared_router<S>(tile_service: Arc<TileService<S>>, config: RouterConfig) -> Router
where
    S: SlideSource + 'static,
{
    let state = AppState::with_shared_service(tile_service)
        .with_cache_max_age(config.cache_max_age)
        .with_descriptor_syntax(config.descriptor_syntax);

    let images = Router::new()
        .route("/{slide_id}/descriptor", get(descriptor_handler::<S>))
        .route("/{slide_id}/descriptor.json", get(descriptor_json_handler::<S>))
        .route("/{slide_id}/descriptor.dzi", get(descriptor_xml_handler::<S>))
        .route("/{slide_id}/dzi", get(descriptor_xml_handler::<S>))
        .route("/{slide_id}/tiles/{level}/{x}/{y}", get(tile_handler::<S>))
        .route("/{slide_id}/info", get(info_handler::<S>))
        .with_state(state);

    let router = Router::new()
        .route("/health", get(health_handler))
        .nest("/images", images)
        .layer(build_cors_layer(&config));

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed)
        }
    }
}

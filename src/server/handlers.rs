//! HTTP request handlers.
//!
//! # Endpoints
//!
//! - `GET /images/{slide_id}/descriptor` - Pyramid descriptor, configured syntax
//! - `GET /images/{slide_id}/descriptor.json`, `descriptor.dzi`, `dzi` - Forced syntax
//! - `GET /images/{slide_id}/tiles/{level}/{x}/{y}[.ext]` - One tile
//! - `GET /images/{slide_id}/info` - Native level structure
//! - `GET /health` - Health check

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::deepzoom::{DescriptorSyntax, TileFormat};
use crate::error::{IoError, TileError};
use crate::slide::SlideSource;
use crate::tile::{SlideInfo, TileService};

/// `Cache-Control` of every tile response.
pub const TILE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

pub const TILE_CACHE_HIT_HEADER: &str = "x-tile-cache-hit";

/// Shared application state.
pub struct AppState<S: SlideSource> {
    pub tile_service: Arc<TileService<S>>,

    /// Descriptor `Cache-Control` max-age in seconds
    pub cache_max_age: u32,

    /// Syntax of the plain `/descriptor` route
    pub descriptor_syntax: DescriptorSyntax,
}

impl<S: SlideSource> AppState<S> {
    pub fn new(tile_service: TileService<S>) -> Self {
        Self::with_shared_service(Arc::new(tile_service))
    }

    pub fn with_shared_service(tile_service: Arc<TileService<S>>) -> Self {
        Self {
            tile_service,
            cache_max_age: 3600,
            descriptor_syntax: DescriptorSyntax::Xml,
        }
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_descriptor_syntax(mut self, syntax: DescriptorSyntax) -> Self {
        self.descriptor_syntax = syntax;
        self
    }
}

impl<S: SlideSource> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            tile_service: Arc::clone(&self.tile_service),
            cache_max_age: self.cache_max_age,
            descriptor_syntax: self.descriptor_syntax,
        }
    }
}

/// Path parameters for tile requests.
///
/// Coordinates are taken as strings so that malformed values produce the
/// same JSON error as any other bad request.
#[derive(Debug, Deserialize)]
pub struct TilePathParams {
    pub slide_id: String,
    pub level: String,
    pub x: String,
    /// Row, optionally with an extension (`"3"` or `"3.jpeg"`)
    pub y: String,
}

/// A tile request after path parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCoordinates {
    pub level: u32,
    pub x: u32,
    pub y: u32,
    /// Format named by the extension, if any
    pub format: Option<TileFormat>,
}

impl TilePathParams {
    pub fn parse(&self) -> Result<TileCoordinates, TileError> {
        let (row, ext) = match self.y.split_once('.') {
            Some((row, ext)) => (row, Some(ext)),
            None => (self.y.as_str(), None),
        };
        let format = match ext {
            Some(ext) => Some(TileFormat::from_extension(ext).ok_or_else(|| {
                TileError::InvalidRequest {
                    message: format!("unknown tile extension '.{}'", ext),
                }
            })?),
            None => None,
        };

        Ok(TileCoordinates {
            level: parse_coordinate("level", &self.level)?,
            x: parse_coordinate("x", &self.x)?,
            y: parse_coordinate("y", row)?,
            format,
        })
    }
}

/// Parse a non-negative integer path segment.
pub fn parse_coordinate(name: &str, value: &str) -> Result<u32, TileError> {
    value.parse().map_err(|_| TileError::InvalidRequest {
        message: format!("{} must be a non-negative integer, got '{}'", name, value),
    })
}

/// JSON error body returned for every failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error kind (e.g. "not_found", "invalid_request")
    pub error: String,

    pub message: String,

    pub status: u16,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: status.as_u16(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Status code and error kind for a pipeline error.
pub fn classify(err: &TileError) -> (StatusCode, &'static str) {
    match err {
        TileError::SlideNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        TileError::UnsupportedFormat { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "unsupported_format")
        }
        TileError::CorruptFile { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "corrupt_file"),
        TileError::InvalidSlide { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_slide"),
        TileError::InvalidLevel { .. }
        | TileError::TileOutOfBounds { .. }
        | TileError::InvalidRequest { .. }
        | TileError::OutOfBounds { .. } => (StatusCode::BAD_REQUEST, "invalid_request"),
        TileError::DecodeError { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "decode_error"),
        TileError::EncodeError { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "encode_error"),
        TileError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        TileError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        TileError::Io(IoError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
        TileError::Io(_) => (StatusCode::BAD_GATEWAY, "storage_error"),
    }
}

impl IntoResponse for TileError {
    fn into_response(self) -> Response {
        let (status, error_type) = classify(&self);
        (
            status,
            Json(ErrorResponse::new(error_type, self.to_string(), status)),
        )
            .into_response()
    }
}

/// A failed request and what it asked for, logged on the way out.
pub struct HandlerError {
    pub error: TileError,
    pub slide_id: String,
    /// `(level, x, y)` for tile requests
    pub tile: Option<(u32, u32, u32)>,
}

impl HandlerError {
    fn new(slide_id: &str, error: TileError) -> Self {
        Self {
            error,
            slide_id: slide_id.to_string(),
            tile: None,
        }
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let (status, error_type) = classify(&self.error);
        let tile = self
            .tile
            .map(|(level, x, y)| format!("{}/{}/{}", level, x, y))
            .unwrap_or_default();

        if status.is_server_error() {
            error!(
                slide_id = %self.slide_id,
                tile = %tile,
                error_type,
                status = status.as_u16(),
                "request failed: {}",
                self.error
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                slide_id = %self.slide_id,
                error_type,
                status = status.as_u16(),
                "{}",
                self.error
            );
        } else {
            warn!(
                slide_id = %self.slide_id,
                tile = %tile,
                error_type,
                status = status.as_u16(),
                "rejected request: {}",
                self.error
            );
        }

        self.error.into_response()
    }
}

/// `GET /images/{slide_id}/descriptor` in the configured syntax.
pub async fn descriptor_handler<S: SlideSource>(
    State(state): State<AppState<S>>,
    Path(slide_id): Path<String>,
) -> Result<Response, HandlerError> {
    let syntax = state.descriptor_syntax;
    descriptor_response(&state, &slide_id, syntax).await
}

/// `GET /images/{slide_id}/descriptor.json`
pub async fn descriptor_json_handler<S: SlideSource>(
    State(state): State<AppState<S>>,
    Path(slide_id): Path<String>,
) -> Result<Response, HandlerError> {
    descriptor_response(&state, &slide_id, DescriptorSyntax::Json).await
}

/// `GET /images/{slide_id}/descriptor.dzi` and `GET /images/{slide_id}/dzi`
pub async fn descriptor_xml_handler<S: SlideSource>(
    State(state): State<AppState<S>>,
    Path(slide_id): Path<String>,
) -> Result<Response, HandlerError> {
    descriptor_response(&state, &slide_id, DescriptorSyntax::Xml).await
}

async fn descriptor_response<S: SlideSource>(
    state: &AppState<S>,
    slide_id: &str,
    syntax: DescriptorSyntax,
) -> Result<Response, HandlerError> {
    let descriptor = state
        .tile_service
        .descriptor(slide_id)
        .await
        .map_err(|e| HandlerError::new(slide_id, e))?;

    Ok((
        [
            (header::CONTENT_TYPE, syntax.content_type().to_string()),
            (
                header::CACHE_CONTROL,
                format!("public, max-age={}", state.cache_max_age),
            ),
        ],
        descriptor.render(syntax),
    )
        .into_response())
}

/// `GET /images/{slide_id}/tiles/{level}/{x}/{y}[.ext]`
///
/// Responds with the encoded tile, `Cache-Control: public, max-age=31536000,
/// immutable` and `X-Tile-Cache-Hit: true|false`.
pub async fn tile_handler<S: SlideSource>(
    State(state): State<AppState<S>>,
    Path(params): Path<TilePathParams>,
) -> Result<Response, HandlerError> {
    let coords = params
        .parse()
        .map_err(|e| HandlerError::new(&params.slide_id, e))?;
    let format = coords
        .format
        .unwrap_or_else(|| state.tile_service.tile_format());

    let tile = state
        .tile_service
        .tile(&params.slide_id, coords.level, coords.x, coords.y, format)
        .await
        .map_err(|error| HandlerError {
            error,
            slide_id: params.slide_id.clone(),
            tile: Some((coords.level, coords.x, coords.y)),
        })?;

    let cache_hit = if tile.cache_hit { "true" } else { "false" };
    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static(tile.format.content_type()),
            ),
            (
                header::CACHE_CONTROL,
                HeaderValue::from_static(TILE_CACHE_CONTROL),
            ),
            (
                HeaderName::from_static(TILE_CACHE_HIT_HEADER),
                HeaderValue::from_static(cache_hit),
            ),
        ],
        tile.data,
    )
        .into_response())
}

/// `GET /images/{slide_id}/info`
pub async fn info_handler<S: SlideSource>(
    State(state): State<AppState<S>>,
    Path(slide_id): Path<String>,
) -> Result<Json<SlideInfo>, HandlerError> {
    state
        .tile_service
        .info(&slide_id)
        .await
        .map(Json)
        .map_err(|e| HandlerError::new(&slide_id, e))
}

/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

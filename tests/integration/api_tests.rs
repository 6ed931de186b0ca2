//! HTTP API tests: descriptors, tiles, info and error mapping.
//!
//! Requests go through the full router with `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use wsi_pyramid::server::{create_router, ErrorResponse, HealthResponse, RouterConfig};
use wsi_pyramid::slide::SlideRegistry;
use wsi_pyramid::tile::{ServiceConfig, TileService};
use wsi_pyramid::{DescriptorConfig, DescriptorSyntax, TileFormat};

use super::test_utils::{
    create_large_slide, create_lzw_tiff, create_pyramid_tiff, create_svs_with_jpeg_tables,
    image_dimensions, is_valid_jpeg, is_valid_png, test_router, MockSlideSource,
};

async fn get(router: &Router, uri: &str) -> (StatusCode, http::HeaderMap, bytes::Bytes) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

async fn get_error(router: &Router, uri: &str) -> (StatusCode, ErrorResponse) {
    let (status, headers, body) = get(router, uri).await;
    assert_eq!(headers.get("content-type").unwrap(), "application/json");
    (status, serde_json::from_slice(&body).unwrap())
}

fn router() -> Router {
    test_router(
        MockSlideSource::new()
            .with_slide("img1", create_large_slide())
            .with_slide("slide.tif", create_pyramid_tiff())
            .with_slide("slide.svs", create_svs_with_jpeg_tables())
            .with_slide("lzw.tif", create_lzw_tiff())
            .with_slide("garbage", vec![0x42; 4096]),
    )
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let (status, _, body) = get(&router(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

// =============================================================================
// Descriptors
// =============================================================================

#[tokio::test]
async fn test_descriptor_xml() {
    let (status, headers, body) = get(&router(), "/images/img1/descriptor").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "application/xml");
    assert_eq!(headers.get("cache-control").unwrap(), "public, max-age=3600");

    let xml = String::from_utf8(body.to_vec()).unwrap();
    assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
    assert!(xml.contains(r#"TileSize="254""#));
    assert!(xml.contains(r#"Overlap="1""#));
    assert!(xml.contains(r#"Format="jpeg""#));
    assert!(xml.contains(r#"Width="25000""#));
    assert!(xml.contains(r#"Height="30000""#));
}

#[tokio::test]
async fn test_descriptor_json() {
    let (status, headers, body) = get(&router(), "/images/img1/descriptor.json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "application/json");

    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["width"], 25000);
    assert_eq!(json["height"], 30000);
    assert_eq!(json["tileSize"], 254);
    assert_eq!(json["overlap"], 1);
    assert_eq!(json["levels"], 16);
    assert_eq!(json["format"], "jpeg");
}

#[tokio::test]
async fn test_descriptor_dzi_aliases_match() {
    let router = router();
    let (_, _, a) = get(&router, "/images/slide.tif/descriptor.dzi").await;
    let (_, _, b) = get(&router, "/images/slide.tif/dzi").await;
    let (_, _, c) = get(&router, "/images/slide.tif/descriptor").await;
    assert_eq!(a, b);
    assert_eq!(a, c);
}

#[tokio::test]
async fn test_descriptor_json_by_default() {
    let service = TileService::new(
        SlideRegistry::new(MockSlideSource::new().with_slide("slide.tif", create_pyramid_tiff())),
        ServiceConfig::default(),
    );
    let router = create_router(
        service,
        RouterConfig::new()
            .with_descriptor_syntax(DescriptorSyntax::Json)
            .with_cache_max_age(60)
            .with_tracing(false),
    );

    let (status, headers, body) = get(&router, "/images/slide.tif/descriptor").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "application/json");
    assert_eq!(headers.get("cache-control").unwrap(), "public, max-age=60");
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["width"], 2048);
}

// =============================================================================
// Tiles
// =============================================================================

#[tokio::test]
async fn test_tile_top_left_full_resolution() {
    let (status, headers, body) = get(&router(), "/images/img1/tiles/15/0/0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "image/jpeg");
    assert_eq!(
        headers.get("cache-control").unwrap(),
        "public, max-age=31536000, immutable"
    );
    assert!(is_valid_jpeg(&body));
    assert_eq!(image_dimensions(&body), (255, 255));
}

#[tokio::test]
async fn test_tile_with_extension() {
    let (status, headers, body) = get(&router(), "/images/img1/tiles/15/3/4.jpeg").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "image/jpeg");
    assert_eq!(image_dimensions(&body), (256, 256));

    let (status, _, _) = get(&router(), "/images/img1/tiles/15/3/4.jpg").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_tile_cache_hit_header() {
    let router = router();
    let (_, headers, first) = get(&router, "/images/img1/tiles/14/2/2").await;
    assert_eq!(headers.get("x-tile-cache-hit").unwrap(), "false");

    let (_, headers, second) = get(&router, "/images/img1/tiles/14/2/2").await;
    assert_eq!(headers.get("x-tile-cache-hit").unwrap(), "true");
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_tile_from_svs() {
    let (status, _, body) = get(&router(), "/images/slide.svs/tiles/11/0/0").await;
    assert_eq!(status, StatusCode::OK);
    assert!(is_valid_jpeg(&body));
    assert_eq!(image_dimensions(&body), (255, 255));
}

#[tokio::test]
async fn test_png_tiles() {
    let config = ServiceConfig {
        descriptor: DescriptorConfig {
            format: TileFormat::Png,
            ..DescriptorConfig::default()
        },
        ..ServiceConfig::default()
    };
    let service = TileService::new(
        SlideRegistry::new(MockSlideSource::new().with_slide("slide.tif", create_pyramid_tiff())),
        config,
    );
    let router = create_router(service, RouterConfig::new().with_tracing(false));

    let (status, headers, body) = get(&router, "/images/slide.tif/tiles/11/1/1.png").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "image/png");
    assert!(is_valid_png(&body));
    assert_eq!(image_dimensions(&body), (256, 256));

    let (status, error) = get_error(&router, "/images/slide.tif/tiles/11/1/1.jpg").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error.error, "invalid_request");

    let (_, _, body) = get(&router, "/images/slide.tif/descriptor").await;
    assert!(String::from_utf8(body.to_vec()).unwrap().contains(r#"Format="png""#));
}

// =============================================================================
// Info
// =============================================================================

#[tokio::test]
async fn test_info() {
    let (status, _, body) = get(&router(), "/images/slide.svs/info").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["format"], "Aperio SVS");
    assert_eq!(json["width"], 2048);
    assert_eq!(json["height"], 1536);
    assert_eq!(json["levels"].as_array().unwrap().len(), 2);
    assert_eq!(json["mpp"], 0.499);
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_missing_slide_is_404() {
    let router = router();
    let (status, error) = get_error(&router, "/images/nope/descriptor").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error.error, "not_found");
    assert_eq!(error.status, 404);

    let (status, _) = get_error(&router, "/images/nope/tiles/0/0/0").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_level_out_of_range_is_400() {
    let (status, error) = get_error(&router(), "/images/img1/tiles/16/0/0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error.error, "invalid_request");
}

#[tokio::test]
async fn test_tile_outside_grid_is_400() {
    let router = router();
    // Level 15 is a 99x119 grid.
    let (status, _) = get_error(&router, "/images/img1/tiles/15/99/0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get_error(&router, "/images/img1/tiles/15/0/119").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = get(&router, "/images/img1/tiles/15/98/118").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_coordinates_are_400() {
    let router = router();
    for uri in [
        "/images/img1/tiles/abc/0/0",
        "/images/img1/tiles/15/-1/0",
        "/images/img1/tiles/15/0/1.5",
        "/images/img1/tiles/15/0/0.gif",
    ] {
        let (status, error) = get_error(&router, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(error.error, "invalid_request", "{}", uri);
    }
}

#[tokio::test]
async fn test_unsupported_containers_are_422() {
    let router = router();

    let (status, error) = get_error(&router, "/images/lzw.tif/descriptor").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error.error, "unsupported_format");

    let (status, error) = get_error(&router, "/images/garbage/descriptor").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error.error, "unsupported_format");
}

#[tokio::test]
async fn test_cors_preflight() {
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/images/img1/descriptor")
        .header("origin", "https://viewer.example.com")
        .header("access-control-request-method", "GET")
        .body(Body::empty())
        .unwrap();
    let response = router().oneshot(request).await.unwrap();
    assert!(response.status().is_success());
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
}

//! S3 backend tests against a minimal in-process S3 endpoint.
//!
//! The endpoint answers path-style HEAD and ranged GET requests, which is all
//! `S3RangeReader` issues, so the real SDK client runs unchanged.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::Client;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;

use wsi_pyramid::io::{RangeReader, S3RangeReader};
use wsi_pyramid::slide::{S3SlideSource, SlideRegistry};
use wsi_pyramid::tile::{ServiceConfig, TileService};
use wsi_pyramid::{IoError, TileError, TileFormat};

use super::test_utils::{create_pyramid_tiff, image_dimensions, is_valid_jpeg};

const BUCKET: &str = "slides";

#[derive(Clone, Default)]
struct FakeS3 {
    objects: Arc<HashMap<String, Bytes>>,
    range_gets: Arc<AtomicUsize>,
}

fn parse_range(headers: &HeaderMap, size: usize) -> Option<(usize, usize)> {
    let value = headers.get(header::RANGE)?.to_str().ok()?;
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = end.parse().ok()?;
    (start <= end && end < size).then_some((start, end))
}

async fn object(
    State(s3): State<FakeS3>,
    method: Method,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let Some(data) = s3.objects.get(&format!("{}/{}", bucket, key)) else {
        if method == Method::HEAD {
            return StatusCode::NOT_FOUND.into_response();
        }
        let body = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
            <Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message></Error>";
        return (StatusCode::NOT_FOUND, [(header::CONTENT_TYPE, "application/xml")], body)
            .into_response();
    };

    if method == Method::HEAD {
        return (
            StatusCode::OK,
            [(header::CONTENT_LENGTH, data.len().to_string())],
        )
            .into_response();
    }

    let Some((start, end)) = parse_range(&headers, data.len()) else {
        return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
    };
    s3.range_gets.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::PARTIAL_CONTENT,
        [
            (
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", start, end, data.len()),
            ),
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        ],
        data.slice(start..=end),
    )
        .into_response()
}

/// Serve `objects` (keyed `bucket/key`) and return a client pointed at them.
async fn spawn_fake_s3(objects: HashMap<String, Bytes>) -> (Client, FakeS3) {
    let s3 = FakeS3 {
        objects: Arc::new(objects),
        range_gets: Arc::new(AtomicUsize::new(0)),
    };
    let app = Router::new()
        .route("/{bucket}/{*key}", get(object))
        .with_state(s3.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .endpoint_url(format!("http://{}", addr))
        .credentials_provider(Credentials::new("test", "test", None, None, "fake-s3"))
        .force_path_style(true)
        .build();

    (Client::from_conf(config), s3)
}

fn one_object(key: &str, data: Vec<u8>) -> HashMap<String, Bytes> {
    HashMap::from([(format!("{}/{}", BUCKET, key), Bytes::from(data))])
}

#[tokio::test]
async fn test_reader_sizes_with_head_and_reads_ranges() {
    let tiff = create_pyramid_tiff();
    let (client, s3) = spawn_fake_s3(one_object("img1.tif", tiff.clone())).await;

    let reader = S3RangeReader::new(client, BUCKET.into(), "img1.tif".into())
        .await
        .unwrap();
    assert_eq!(reader.size(), tiff.len() as u64);
    assert_eq!(reader.identifier(), "s3://slides/img1.tif");

    let bytes = reader.read_exact_at(10, 100).await.unwrap();
    assert_eq!(&bytes[..], &tiff[10..110]);
    assert_eq!(s3.range_gets.load(Ordering::SeqCst), 1);

    // Bounds are checked before any request goes out.
    assert!(matches!(
        reader.read_exact_at(tiff.len() as u64 - 4, 8).await,
        Err(IoError::RangeOutOfBounds { .. })
    ));
    assert_eq!(s3.range_gets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_object_is_not_found() {
    let (client, _) = spawn_fake_s3(HashMap::new()).await;
    let result = S3RangeReader::new(client, BUCKET.into(), "nope.svs".into()).await;
    assert!(matches!(result, Err(IoError::NotFound(_))));
}

#[tokio::test]
async fn test_service_over_prefixed_bucket() {
    let (client, _) = spawn_fake_s3(one_object("scans/img1.tif", create_pyramid_tiff())).await;
    let source = S3SlideSource::with_prefix(client, BUCKET.into(), "scans/".into());
    let service = TileService::new(SlideRegistry::new(source), ServiceConfig::default());

    let descriptor = service.descriptor("img1.tif").await.unwrap();
    assert_eq!((descriptor.width, descriptor.height), (2048, 1536));

    let tile = service
        .tile("img1.tif", 11, 0, 0, TileFormat::Jpeg)
        .await
        .unwrap();
    assert!(is_valid_jpeg(&tile.data));
    assert_eq!(image_dimensions(&tile.data), (255, 255));

    assert!(matches!(
        service.descriptor("other.tif").await,
        Err(TileError::SlideNotFound { .. })
    ));
    assert!(matches!(
        service.descriptor("../img1.tif").await,
        Err(TileError::InvalidRequest { .. })
    ));
}

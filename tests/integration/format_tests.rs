//! Format-specific integration tests.
//!
//! Tests verify:
//! - TIFF parser handles little-endian and big-endian files
//! - BigTIFF files are parsed correctly
//! - SVS JPEGTables handling works correctly
//! - Broken or unsupported containers are classified

use bytes::Bytes;

use wsi_pyramid::format::{detect_format, SlideFormat};
use wsi_pyramid::io::{BlockCache, RangeReader};
use wsi_pyramid::slide::{read_region, PixelRect, SlideRegistry};
use wsi_pyramid::{TileError, TileFormat};

use super::test_utils::{
    create_large_slide, create_lzw_tiff, create_pyramid_tiff, create_svs_with_jpeg_tables,
    image_dimensions, is_valid_jpeg, pyramid_builder, test_service, MockSlideSource,
    TrackingMockReader, SLIDE_HEIGHT, SLIDE_WIDTH,
};

const JPEG: TileFormat = TileFormat::Jpeg;

// =============================================================================
// TIFF Byte Order and BigTIFF
// =============================================================================

#[tokio::test]
async fn test_byte_orders_and_bigtiff_produce_identical_tiles() {
    let variants = [
        ("le.tif", pyramid_builder().build()),
        ("be.tif", pyramid_builder().big_endian().build()),
        ("big.tif", pyramid_builder().bigtiff().build()),
        ("bigbe.tif", pyramid_builder().bigtiff().big_endian().build()),
    ];

    let mut source = MockSlideSource::new();
    for (id, data) in &variants {
        source = source.with_slide(*id, data.clone());
    }
    let service = test_service(source);

    let reference = service.tile("le.tif", 11, 2, 1, JPEG).await.unwrap().data;
    for (id, _) in &variants {
        let d = service.descriptor(id).await.unwrap();
        assert_eq!((d.width, d.height), (SLIDE_WIDTH, SLIDE_HEIGHT), "{}", id);

        let tile = service.tile(id, 11, 2, 1, JPEG).await.unwrap();
        assert_eq!(tile.data, reference, "{}", id);
    }
}

#[tokio::test]
async fn test_native_levels_listed_largest_first() {
    let service = test_service(MockSlideSource::new().with_slide("slide.tif", create_pyramid_tiff()));
    let info = service.info("slide.tif").await.unwrap();

    assert_eq!(info.format, "Generic Pyramidal TIFF");
    assert_eq!(info.levels.len(), 2);
    assert_eq!((info.levels[0].width, info.levels[0].height), (2048, 1536));
    assert_eq!((info.levels[1].width, info.levels[1].height), (512, 384));
    assert!((info.levels[1].downsample - 4.0).abs() < 1e-9);
    assert!(info.mpp.is_none());
}

#[tokio::test]
async fn test_bigtiff_large_slide_levels() {
    let service = test_service(MockSlideSource::new().with_slide("img1", create_large_slide()));
    let info = service.info("img1").await.unwrap();
    assert_eq!((info.width, info.height), (25_000, 30_000));
    assert_eq!(info.levels.len(), 3);
    assert_eq!((info.levels[0].tiles_x, info.levels[0].tiles_y), (98, 118));
}

// =============================================================================
// SVS
// =============================================================================

#[tokio::test]
async fn test_svs_metadata() {
    let service = test_service(MockSlideSource::new().with_slide("s.svs", create_svs_with_jpeg_tables()));
    let info = service.info("s.svs").await.unwrap();

    assert_eq!(info.format, "Aperio SVS");
    assert_eq!(info.vendor.as_deref(), Some("Aperio"));
    assert_eq!(info.mpp, Some(0.499));
    assert_eq!(info.magnification, Some(20.0));
}

#[tokio::test]
async fn test_svs_abbreviated_tiles_decode() {
    let service = test_service(MockSlideSource::new().with_slide("s.svs", create_svs_with_jpeg_tables()));

    // Full resolution and one served from the 4x native level.
    for (level, x, y) in [(11, 0, 0), (11, 8, 6), (9, 1, 1)] {
        let tile = service.tile("s.svs", level, x, y, JPEG).await.unwrap();
        assert!(is_valid_jpeg(&tile.data), "tile {}/{}/{}", level, x, y);
        let (w, h) = image_dimensions(&tile.data);
        assert!(w > 0 && h > 0);
    }
}

// =============================================================================
// Region reads
// =============================================================================

#[tokio::test]
async fn test_region_read_picks_coarsest_sufficient_level() {
    let registry = SlideRegistry::new(MockSlideSource::new().with_slide("slide.tif", create_pyramid_tiff()));
    let slide = registry.get_slide("slide.tif").await.unwrap();
    let region = PixelRect::new(0, 0, 1024, 1024);

    // 4x is stored natively; within the 1% tolerance it still qualifies.
    for downsample in [4.0, 3.99, 8.0] {
        let decoded = read_region(&slide, "slide.tif", region, downsample).await.unwrap();
        assert_eq!(decoded.native_level, 1, "downsample {}", downsample);
        assert!((decoded.native_downsample - 4.0).abs() < 1e-9);
        assert_eq!(decoded.image.dimensions(), (256, 256));
    }

    let decoded = read_region(&slide, "slide.tif", region, 2.0).await.unwrap();
    assert_eq!(decoded.native_level, 0);
    assert!((decoded.native_downsample - 1.0).abs() < 1e-9);
    assert_eq!(decoded.image.dimensions(), (1024, 1024));
}

#[tokio::test]
async fn test_region_read_clips_to_slide() {
    let registry = SlideRegistry::new(MockSlideSource::new().with_slide("slide.tif", create_pyramid_tiff()));
    let slide = registry.get_slide("slide.tif").await.unwrap();

    let decoded = read_region(&slide, "slide.tif", PixelRect::new(2000, 1500, 500, 500), 1.0)
        .await
        .unwrap();
    assert_eq!(decoded.image.dimensions(), (SLIDE_WIDTH - 2000, SLIDE_HEIGHT - 1500));

    assert!(matches!(
        read_region(&slide, "slide.tif", PixelRect::new(SLIDE_WIDTH, 0, 10, 10), 1.0).await,
        Err(TileError::OutOfBounds { .. })
    ));
}

#[tokio::test]
async fn test_block_cache_serves_repeated_reads() {
    let reader = TrackingMockReader::new(Bytes::from(create_pyramid_tiff()), "mock://slide");
    let cached = BlockCache::with_capacity(reader.clone(), 4096, 16);

    let header = cached.read_exact_at(0, 16).await.unwrap();
    assert_eq!(reader.request_count(), 1);
    assert_eq!(cached.read_exact_at(0, 16).await.unwrap(), header);
    cached.read_exact_at(100, 200).await.unwrap();
    assert_eq!(reader.request_count(), 1);

    // Spanning into the next block costs one more fetch.
    cached.read_exact_at(4000, 200).await.unwrap();
    assert_eq!(reader.request_count(), 2);
}

// =============================================================================
// Detection and failures
// =============================================================================

#[tokio::test]
async fn test_detect_format() {
    let generic = TrackingMockReader::new(Bytes::from(create_pyramid_tiff()), "mock://a");
    assert_eq!(detect_format(&generic).await.unwrap(), SlideFormat::GenericTiff);

    let svs = TrackingMockReader::new(Bytes::from(create_svs_with_jpeg_tables()), "mock://b");
    assert_eq!(detect_format(&svs).await.unwrap(), SlideFormat::AperioSvs);

    let png = TrackingMockReader::new(
        Bytes::from_static(b"\x89PNG\r\n\x1a\n0000000000000000"),
        "mock://c",
    );
    assert!(detect_format(&png).await.is_err());
}

#[tokio::test]
async fn test_registry_reports_format() {
    let registry = SlideRegistry::new(
        MockSlideSource::new()
            .with_slide("a.tif", create_pyramid_tiff())
            .with_slide("b.svs", create_svs_with_jpeg_tables()),
    );
    let a = registry.get_slide("a.tif").await.unwrap();
    let b = registry.get_slide("b.svs").await.unwrap();
    assert_eq!(a.format(), SlideFormat::GenericTiff);
    assert_eq!(b.format(), SlideFormat::AperioSvs);
    assert!(b.svs_metadata().is_some());
}

#[tokio::test]
async fn test_non_jpeg_compression_is_unsupported() {
    let service = test_service(MockSlideSource::new().with_slide("lzw.tif", create_lzw_tiff()));
    assert!(matches!(
        service.descriptor("lzw.tif").await,
        Err(TileError::UnsupportedFormat { .. })
    ));
}

#[tokio::test]
async fn test_truncated_file_is_corrupt() {
    let mut data = create_pyramid_tiff();
    data.truncate(400);
    let service = test_service(MockSlideSource::new().with_slide("cut.tif", data));
    assert!(matches!(
        service.descriptor("cut.tif").await,
        Err(TileError::CorruptFile { .. })
    ));
}

#[tokio::test]
async fn test_not_a_tiff_is_unsupported() {
    let service = test_service(MockSlideSource::new().with_slide("x", vec![0u8; 1024]));
    assert!(matches!(
        service.descriptor("x").await,
        Err(TileError::UnsupportedFormat { .. })
    ));
}

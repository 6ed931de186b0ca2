//! HTTP surface.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   GET /images/{slide_id}/descriptor                             │
//! │   GET /images/{slide_id}/tiles/{level}/{x}/{y}[.ext]            │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │          routes             │  │
//! │  │ (requests, error → JSON) │  │  (router, CORS, tracing)    │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    classify, descriptor_handler, descriptor_json_handler, descriptor_xml_handler,
    health_handler, info_handler, parse_coordinate, tile_handler, AppState, ErrorResponse,
    HandlerError, HealthResponse, TileCoordinates, TilePathParams, TILE_CACHE_CONTROL,
    TILE_CACHE_HIT_HEADER,
};
pub use routes::{create_router, create_shared_router, RouterConfig};

//! Deep Zoom pyramid geometry: the descriptor clients see and the mapping
//! from tile coordinates back to slide pixels.

pub mod descriptor;
pub mod resolver;

pub use descriptor::{
    level_count, DescriptorConfig, DescriptorSyntax, PyramidDescriptor, TileFormat,
    DEFAULT_OVERLAP, DEFAULT_TILE_SIZE,
};
pub use resolver::{resolve_tile, TileRegion};

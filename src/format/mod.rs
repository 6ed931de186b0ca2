//! Slide container formats.

pub mod detect;
pub mod generic_tiff;
pub mod jpeg;
pub mod svs;
pub mod tiff;
mod tiled;

pub use detect::{detect_format, is_tiff_header, SlideFormat};
pub use generic_tiff::GenericTiffReader;
pub use svs::{SvsMetadata, SvsReader};
pub use tiled::{TiledLevel, TiledPyramid};

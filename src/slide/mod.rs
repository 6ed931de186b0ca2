//! Slides: where their bytes come from, how they are opened and pooled, and
//! how pixel regions are read from them.
//!
//! ```text
//!   SlideSource ──> RangeReader ──> CachedSlide (SvsReader | GenericTiffReader)
//!                                        │
//!                          SlideRegistry (LRU + single-flight open)
//!                                        │
//!                            region::fetch_region / decode
//! ```

mod local_source;
mod reader;
pub mod region;
mod registry;
mod s3_source;

pub use local_source::{validate_slide_id, LocalSlideSource, SLIDE_EXTENSIONS};
pub use reader::{LevelInfo, SlideReader, DOWNSAMPLE_TOLERANCE};
pub use region::{fetch_region, read_region, DecodedRegion, FetchedRegion, PixelRect};
pub use registry::{CachedSlide, SlideRegistry, SlideSource, PIXEL_FORMAT};
pub use s3_source::S3SlideSource;

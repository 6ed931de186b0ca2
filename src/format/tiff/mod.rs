//! TIFF and BigTIFF container parsing.
//!
//! Only what slide serving needs: the header, the IFD chain, entry values and
//! the identification of tiled pyramid levels. Both byte orders and both
//! offset widths are handled transparently.

mod parser;
mod pyramid;
mod tags;
mod values;

pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use pyramid::{
    read_ifd, read_ifd_chain, PyramidLevel, TiffPyramid, TileData, ASPECT_TOLERANCE, MAX_IFDS,
};
pub use tags::{Compression, FieldType, TiffTag};
pub use values::{parse_u64_array, ValueReader};

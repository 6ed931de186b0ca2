//! Byte-range I/O over slide containers.
//!
//! Everything above this layer reads slides through [`RangeReader`], so the
//! same parsers serve local files and object storage alike.

mod block_cache;
mod file_reader;
mod range_reader;
mod s3_reader;

pub use block_cache::{BlockCache, DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};
pub use file_reader::FileRangeReader;
pub use range_reader::{check_range, RangeReader};
pub use s3_reader::{create_s3_client, S3RangeReader};

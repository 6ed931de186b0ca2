//! Container format detection.
//!
//! Only the header and the first IFD are inspected; the Aperio marker in the
//! first ImageDescription separates SVS from generic pyramidal TIFF.

use crate::error::FormatError;
use crate::io::RangeReader;

use super::tiff::{read_ifd, ByteOrder, TiffHeader, TiffTag, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideFormat {
    AperioSvs,
    GenericTiff,
}

impl SlideFormat {
    pub const fn name(&self) -> &'static str {
        match self {
            SlideFormat::AperioSvs => "Aperio SVS",
            SlideFormat::GenericTiff => "Generic Pyramidal TIFF",
        }
    }
}

/// Prefix of the description scanned for the vendor marker.
const MAX_DESCRIPTION_BYTES: u64 = 1024;

const APERIO_MARKER: &[u8] = b"Aperio";

pub async fn detect_format<R: RangeReader>(reader: &R) -> Result<SlideFormat, FormatError> {
    let size = reader.size();
    if size < TIFF_HEADER_SIZE as u64 {
        return Err(FormatError::UnsupportedFormat {
            reason: format!("{} is too small to be a TIFF ({} bytes)", reader.identifier(), size),
        });
    }

    let header_len = (BIGTIFF_HEADER_SIZE as u64).min(size) as usize;
    let header_bytes = reader.read_exact_at(0, header_len).await?;
    if !is_tiff_header(&header_bytes) {
        return Err(FormatError::UnsupportedFormat {
            reason: format!("{} is not a TIFF container", reader.identifier()),
        });
    }
    let header = TiffHeader::parse(&header_bytes, size)?;

    let ifd = read_ifd(reader, &header, header.first_ifd_offset).await?;
    let Some(entry) = ifd.get_entry_by_tag(TiffTag::ImageDescription) else {
        return Ok(SlideFormat::GenericTiff);
    };

    let read_len = entry.count.min(MAX_DESCRIPTION_BYTES) as usize;
    let description = if read_len == 0 {
        Vec::new()
    } else if entry.is_inline {
        entry.value_offset_bytes[..read_len.min(header.offset_size())].to_vec()
    } else {
        reader
            .read_exact_at(entry.value_offset(&header), read_len)
            .await?
            .to_vec()
    };

    if contains_aperio_marker(&description) {
        Ok(SlideFormat::AperioSvs)
    } else {
        Ok(SlideFormat::GenericTiff)
    }
}

fn contains_aperio_marker(data: &[u8]) -> bool {
    data.windows(APERIO_MARKER.len())
        .any(|window| window == APERIO_MARKER)
}

/// Whether `bytes` start with a classic or BigTIFF signature.
pub fn is_tiff_header(bytes: &[u8]) -> bool {
    if bytes.len() < 4 {
        return false;
    }
    let byte_order = match &bytes[0..2] {
        b"II" => ByteOrder::LittleEndian,
        b"MM" => ByteOrder::BigEndian,
        _ => return false,
    };
    matches!(byte_order.read_u16(&bytes[2..4]), 42 | 43)
}

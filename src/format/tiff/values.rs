//! Reading IFD entry values, inline or out-of-line.
//!
//! Array values (tile offsets, byte counts) are fetched with a single ranged
//! read regardless of length.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, IfdEntry, TiffHeader};
use super::tags::{FieldType, TiffTag};

/// Resolves entry values against a reader.
pub struct ValueReader<'a, R: RangeReader> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Raw value bytes of `entry`.
    pub async fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.is_inline {
            return Ok(Bytes::copy_from_slice(
                &entry.value_offset_bytes[..size as usize],
            ));
        }

        let len = usize::try_from(size).map_err(|_| TiffError::InvalidTagValue {
            tag: tag_name(entry.tag),
            message: format!("value of {} bytes is too large", size),
        })?;
        let offset = entry.value_offset(self.header);
        Ok(self.reader.read_exact_at(offset, len).await?)
    }

    /// An integer array (SHORT, LONG, LONG8 or IFD types) widened to u64.
    pub async fn read_u64_array(&self, entry: &IfdEntry) -> Result<Vec<u64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        if entry.count == 0 {
            return Ok(Vec::new());
        }
        if !is_integer(field_type) {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(entry.tag),
                message: format!("expected an integer array, got {:?}", field_type),
            });
        }

        let bytes = self.read_bytes(entry).await?;
        Ok(parse_u64_array(&bytes, field_type, self.header.byte_order))
    }

    /// ASCII value up to the first NUL. Invalid UTF-8 is replaced.
    pub async fn read_string(&self, entry: &IfdEntry) -> Result<String, TiffError> {
        if entry.field_type != Some(FieldType::Ascii) {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(entry.tag),
                message: format!("expected ASCII, got type {}", entry.field_type_raw),
            });
        }

        let bytes = self.read_bytes(entry).await?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

fn is_integer(field_type: FieldType) -> bool {
    matches!(
        field_type,
        FieldType::Short | FieldType::Long | FieldType::Long8 | FieldType::Ifd | FieldType::Ifd8
    )
}

fn tag_name(tag: u16) -> &'static str {
    TiffTag::from_u16(tag).map(TiffTag::name).unwrap_or("unknown")
}

/// Decode packed integers of `field_type`. Trailing partial values are dropped.
pub fn parse_u64_array(bytes: &[u8], field_type: FieldType, byte_order: ByteOrder) -> Vec<u64> {
    let width = field_type.size_in_bytes();
    bytes
        .chunks_exact(width)
        .map(|chunk| match width {
            2 => byte_order.read_u16(chunk) as u64,
            4 => byte_order.read_u32(chunk) as u64,
            8 => byte_order.read_u64(chunk),
            _ => chunk[0] as u64,
        })
        .collect()
}

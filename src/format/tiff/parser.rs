//! TIFF header and IFD parsing.
//!
//! ## Classic TIFF header (8 bytes)
//! ```text
//! 0-1  byte order ("II" little-endian, "MM" big-endian)
//! 2-3  version (42)
//! 4-7  offset of the first IFD
//! ```
//!
//! ## BigTIFF header (16 bytes)
//! ```text
//! 0-1   byte order
//! 2-3   version (43)
//! 4-5   offset byte size (always 8)
//! 6-7   reserved
//! 8-15  offset of the first IFD
//! ```

use crate::error::TiffError;

use super::tags::{FieldType, TiffTag};

const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;
const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;

const VERSION_TIFF: u16 = 42;
const VERSION_BIGTIFF: u16 = 43;

pub const TIFF_HEADER_SIZE: usize = 8;
pub const BIGTIFF_HEADER_SIZE: usize = 16;

/// Endianness declared in the header. Every multi-byte value honours it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    /// Read a u16 from the first two bytes of `bytes`.
    ///
    /// Callers slice to the field they want; short slices panic.
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        let raw = [bytes[0], bytes[1]];
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        }
    }

    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        }
    }

    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(raw),
            ByteOrder::BigEndian => u64::from_be_bytes(raw),
        }
    }
}

/// Parsed file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    pub is_bigtiff: bool,
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse the header from the first bytes of a file of `file_size` bytes.
    ///
    /// `bytes` needs 8 bytes for classic TIFF and 16 for BigTIFF.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        // "II" and "MM" are palindromes, so either reading order works here.
        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let version = byte_order.read_u16(&bytes[2..4]);
        let (is_bigtiff, first_ifd_offset) = match version {
            VERSION_TIFF => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            _ => return Err(TiffError::InvalidVersion(version)),
        };

        if first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// 12 bytes for classic TIFF, 20 for BigTIFF.
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Width of offsets, counts and the inline value slot.
    #[inline]
    pub const fn offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    /// Decode an IFD's entry count from its leading bytes.
    pub fn read_entry_count(&self, bytes: &[u8]) -> u64 {
        if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u16(bytes) as u64
        }
    }

    fn read_offset(&self, bytes: &[u8]) -> u64 {
        if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u32(bytes) as u64
        }
    }
}

/// One directory entry.
///
/// Values no wider than the inline slot (4 bytes classic, 8 BigTIFF) live in
/// `value_offset_bytes`; larger ones are stored elsewhere and the slot holds
/// their offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag: u16,
    pub field_type: Option<FieldType>,
    pub field_type_raw: u16,
    pub count: u64,
    pub value_offset_bytes: [u8; 8],
    pub is_inline: bool,
}

impl IfdEntry {
    fn parse(bytes: &[u8], header: &TiffHeader) -> Self {
        let byte_order = header.byte_order;
        let tag = byte_order.read_u16(&bytes[0..2]);
        let field_type_raw = byte_order.read_u16(&bytes[2..4]);
        let field_type = FieldType::from_u16(field_type_raw);

        let (count, slot) = if header.is_bigtiff {
            (byte_order.read_u64(&bytes[4..12]), &bytes[12..20])
        } else {
            (byte_order.read_u32(&bytes[4..8]) as u64, &bytes[8..12])
        };

        let mut value_offset_bytes = [0u8; 8];
        value_offset_bytes[..slot.len()].copy_from_slice(slot);

        // Unknown types can't be sized; treat them as out-of-line so nothing
        // reads garbage from the slot.
        let is_inline = field_type
            .map(|ft| ft.fits_inline(count, header.is_bigtiff))
            .unwrap_or(false);

        IfdEntry {
            tag,
            field_type,
            field_type_raw,
            count,
            value_offset_bytes,
            is_inline,
        }
    }

    /// Total value size in bytes, `None` for unknown field types or overflow.
    pub fn value_byte_size(&self) -> Option<u64> {
        let field_type = self.field_type?;
        (field_type.size_in_bytes() as u64).checked_mul(self.count)
    }

    /// Offset of an out-of-line value.
    pub fn value_offset(&self, header: &TiffHeader) -> u64 {
        header.read_offset(&self.value_offset_bytes)
    }

    /// A single inline SHORT or LONG (or LONG8, IFD8) widened to u64.
    pub fn inline_u64(&self, byte_order: ByteOrder) -> Option<u64> {
        if !self.is_inline || self.count != 1 {
            return None;
        }
        let bytes = &self.value_offset_bytes;
        match self.field_type? {
            FieldType::Short => Some(byte_order.read_u16(bytes) as u64),
            FieldType::Long | FieldType::Ifd => Some(byte_order.read_u32(bytes) as u64),
            FieldType::Long8 | FieldType::Ifd8 => Some(byte_order.read_u64(bytes)),
            _ => None,
        }
    }

    pub fn inline_u32(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_u64(byte_order)
            .and_then(|v| u32::try_from(v).ok())
    }
}

/// An Image File Directory: the tags for one image in the file.
#[derive(Debug, Clone)]
pub struct Ifd {
    /// Entries sorted by tag, as the format requires.
    pub entries: Vec<IfdEntry>,
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Bytes needed to hold an IFD with `entry_count` entries.
    pub fn calculate_size(entry_count: u64, header: &TiffHeader) -> Option<usize> {
        let entries = usize::try_from(entry_count)
            .ok()?
            .checked_mul(header.ifd_entry_size())?;
        entries
            .checked_add(header.ifd_count_size())?
            .checked_add(header.offset_size())
    }

    /// Parse a full IFD. `bytes` starts at the entry count.
    pub fn parse(bytes: &[u8], header: &TiffHeader) -> Result<Self, TiffError> {
        let count_size = header.ifd_count_size();
        if bytes.len() < count_size {
            return Err(TiffError::FileTooSmall {
                required: count_size as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_count = header.read_entry_count(bytes);
        let required = Self::calculate_size(entry_count, header)
            .ok_or(TiffError::InvalidTagValue {
                tag: "IFD",
                message: format!("entry count {} is too large", entry_count),
            })?;
        if bytes.len() < required {
            return Err(TiffError::FileTooSmall {
                required: required as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_size = header.ifd_entry_size();
        let mut entries: Vec<IfdEntry> = bytes[count_size..count_size + entry_count as usize * entry_size]
            .chunks_exact(entry_size)
            .map(|chunk| IfdEntry::parse(chunk, header))
            .collect();
        entries.sort_by_key(|e| e.tag);

        let next_at = required - header.offset_size();
        let next_ifd_offset = header.read_offset(&bytes[next_at..]);

        Ok(Ifd {
            entries,
            next_ifd_offset,
        })
    }

    pub fn get_entry(&self, tag: u16) -> Option<&IfdEntry> {
        self.entries
            .binary_search_by_key(&tag, |e| e.tag)
            .ok()
            .map(|idx| &self.entries[idx])
    }

    pub fn get_entry_by_tag(&self, tag: TiffTag) -> Option<&IfdEntry> {
        self.get_entry(tag.as_u16())
    }

    pub fn has_tag(&self, tag: TiffTag) -> bool {
        self.get_entry_by_tag(tag).is_some()
    }

    fn inline_u32(&self, tag: TiffTag, byte_order: ByteOrder) -> Option<u32> {
        self.get_entry_by_tag(tag)?.inline_u32(byte_order)
    }

    pub fn image_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_u32(TiffTag::ImageWidth, byte_order)
    }

    pub fn image_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_u32(TiffTag::ImageLength, byte_order)
    }

    pub fn tile_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_u32(TiffTag::TileWidth, byte_order)
    }

    pub fn tile_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_u32(TiffTag::TileLength, byte_order)
    }

    pub fn compression(&self, byte_order: ByteOrder) -> Option<u16> {
        self.inline_u32(TiffTag::Compression, byte_order)
            .and_then(|v| u16::try_from(v).ok())
    }

    pub fn is_tiled(&self) -> bool {
        self.has_tag(TiffTag::TileWidth) && self.has_tag(TiffTag::TileLength)
    }

    pub fn is_stripped(&self) -> bool {
        !self.is_tiled() && self.has_tag(TiffTag::StripOffsets)
    }
}

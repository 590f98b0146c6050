//! Constants and layout descriptions shared by the parsers and the
//! [`Builder`](crate::builder::Builder).
//!
//! [`Builder`]: ../builder/struct.Builder.html

use serde::{Deserialize, Serialize};
use std::fmt;

/// The magic value at offset 32 of every 'ftab' file.
pub const FTAB_MAGIC: [u8; 8] = *b"rkosftab";
/// The length of the fixed 'ftab' header preceding the directory.
pub const HEADER_LEN: usize = 48;
/// The offset of the magic value inside the header.
pub const MAGIC_OFFSET: usize = 32;

/// The magic value of a segment footer.
pub const FWSG_MAGIC: [u8; 4] = *b"fwsg";
/// The length of a segment footer trailer in the [`FooterLayout::Trailer32`] layout.
pub const FWSG_TRAILER_LEN: usize = 32;
/// The length of a segment footer trailer in the [`FooterLayout::Compact`] layout.
pub const FWSG_COMPACT_TRAILER_LEN: usize = 8;
/// The length of a single segment record.
pub const FWSG_RECORD_LEN: usize = 32;
/// The length of the NUL padded name field of a segment record.
pub const FWSG_NAME_LEN: usize = 8;

/// The length of a SHA-384 digest.
pub const DIGEST_LEN: usize = 48;
/// The length of an integrity table record (tag and digest).
pub const INTEGRITY_RECORD_LEN: usize = 4 + DIGEST_LEN;

/// Byte order of the integer fields in a 'ftab' file and its segment footers.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Little endian, used by every known image.
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    /// Decodes a `u16` in this byte order.
    #[inline]
    pub fn u16_from(self, bytes: [u8; 2]) -> u16 {
        match self {
            Self::Little => u16::from_le_bytes(bytes),
            Self::Big => u16::from_be_bytes(bytes),
        }
    }

    /// Decodes a `u32` in this byte order.
    #[inline]
    pub fn u32_from(self, bytes: [u8; 4]) -> u32 {
        match self {
            Self::Little => u32::from_le_bytes(bytes),
            Self::Big => u32::from_be_bytes(bytes),
        }
    }

    /// Decodes a `u64` in this byte order.
    #[inline]
    pub fn u64_from(self, bytes: [u8; 8]) -> u64 {
        match self {
            Self::Little => u64::from_le_bytes(bytes),
            Self::Big => u64::from_be_bytes(bytes),
        }
    }

    /// Encodes a `u32` in this byte order.
    #[inline]
    pub fn u32_to(self, value: u32) -> [u8; 4] {
        match self {
            Self::Little => value.to_le_bytes(),
            Self::Big => value.to_be_bytes(),
        }
    }

    /// Encodes a `u64` in this byte order.
    #[inline]
    pub fn u64_to(self, value: u64) -> [u8; 8] {
        match self {
            Self::Little => value.to_le_bytes(),
            Self::Big => value.to_be_bytes(),
        }
    }
}

/// Width of the offset and length fields of a directory entry.
///
/// Serialized as the integer `32` or `64`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OffsetWidth {
    /// `tag[4] offset:u32 length:u32 unk:u32`
    #[default]
    U32,
    /// `tag[4] unk:u32 offset:u64 length:u64`
    U64,
}

impl OffsetWidth {
    /// Returns the length of a single directory entry for this width.
    pub const fn entry_len(self) -> usize {
        match self {
            Self::U32 => 16,
            Self::U64 => 24,
        }
    }
}

impl TryFrom<u8> for OffsetWidth {
    type Error = InvalidOffsetWidth;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            32 => Ok(Self::U32),
            64 => Ok(Self::U64),
            _ => Err(InvalidOffsetWidth(value)),
        }
    }
}

impl From<OffsetWidth> for u8 {
    fn from(value: OffsetWidth) -> Self {
        match value {
            OffsetWidth::U32 => 32,
            OffsetWidth::U64 => 64,
        }
    }
}

/// Returned when an offset width other than 32 or 64 is configured.
#[derive(Debug, thiserror::Error)]
#[error("offset width must be either 32 or 64, got {0}")]
pub struct InvalidOffsetWidth(pub u8);

/// Placement of the segment footer metadata at the end of a section.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FooterLayout {
    /// A 32 byte trailer holding the magic, a flag, the table offset and the segment count. The
    /// segment table is located by the offset.
    #[default]
    Trailer32,
    /// An 8 byte trailer holding the magic and the segment count, immediately preceded by the
    /// segment table.
    Compact,
}

impl FooterLayout {
    /// The smallest section length that may carry a footer in this layout.
    pub const fn trailer_len(self) -> usize {
        match self {
            Self::Trailer32 => FWSG_TRAILER_LEN,
            Self::Compact => FWSG_COMPACT_TRAILER_LEN,
        }
    }
}

/// Format-version specific parameters of the binary layouts.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    /// Byte order of the header, the directory, the integrity table and the footers.
    pub byte_order: ByteOrder,
    /// Width of the directory entry offsets.
    pub offset_width: OffsetWidth,
    /// Layout of the segment footers.
    pub footer: FooterLayout,
}

/// The fields of a 'ftab' header apart from the magic value.
///
/// The `unk_*` fields have no known purpose and are only preserved.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct FtabHeader {
    pub unk_0: u32,
    pub unk_1: u32,
    pub unk_2: u32,
    pub unk_3: u32,
    /// Offset of the APTicket, 0 when there is none.
    pub ticket_offset: u32,
    /// Length of the APTicket, 0 when there is none.
    pub ticket_len: u32,
    pub unk_4: u32,
    pub unk_5: u32,
    /// The number of directory entries.
    pub entry_count: u32,
    pub unk_6: u32,
}

impl fmt::Display for FtabHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "unk_0: {:#010x}", self.unk_0)?;
        writeln!(f, "unk_1: {:#010x}", self.unk_1)?;
        writeln!(f, "unk_2: {:#010x}", self.unk_2)?;
        writeln!(f, "unk_3: {:#010x}", self.unk_3)?;
        writeln!(f, "unk_4: {:#010x}", self.unk_4)?;
        writeln!(f, "unk_5: {:#010x}", self.unk_5)?;
        write!(f, "unk_6: {:#010x}", self.unk_6)
    }
}

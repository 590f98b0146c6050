//! Decoding of 'fwsg' segment footers found at the end of some sections.
//!
//! A footer is located relative to the end of a section, so everything here computes offsets
//! backwards from the section length. Most sections carry no footer at all, which is reported as
//! `Ok(None)` rather than an error.

use crate::{format::*, reader::Reader};
use std::{fmt, ops::Range};
use thiserror::Error;

/// An error which may occur when a section ends with the 'fwsg' magic but the rest of the footer
/// is inconsistent.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum FooterError {
    /// Returned when the segment table doesn't fit between the section start and the trailer.
    #[error("segment table at {offset:#x} with {count} records overflows the section")]
    OobTable { offset: u64, count: u32 },
    /// Returned when the file range of a segment exceeds past the end of the section.
    #[error("segment #{index} file range {offset:#x}+{size:#x} is out of bounds")]
    OobSegment { index: usize, offset: u32, size: u32 },
}

/// A memory segment described by a footer record.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct SegmentDescriptor {
    /// The virtual address the segment is loaded at.
    pub load_address: u64,
    /// The offset of the segment's contents from the start of the section.
    pub file_offset: u32,
    /// The number of bytes loaded from the section.
    pub file_size: u32,
    /// The size of the segment in memory.
    pub mem_size: u32,
    /// Format specific flags, usually 0 or a permission mask.
    pub flags: u32,
    /// The segment name with the NUL padding removed.
    pub name: String,
}

impl SegmentDescriptor {
    /// The size of the segment in memory.
    #[inline]
    pub fn size(&self) -> u64 {
        self.mem_size.into()
    }

    /// The range of the segment's contents inside the owning section.
    pub fn file_range(&self) -> Range<usize> {
        let start = self.file_offset as usize;
        start..start + self.file_size as usize
    }
}

impl fmt::Display for SegmentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let file_end = u64::from(self.file_offset) + u64::from(self.file_size);
        write!(
            f,
            "v:{:08x}-{:08x}({:08x}) f:{:08x}-{:08x}({:08x})  {:x} {}",
            self.load_address,
            self.load_address.saturating_add(self.size()),
            self.mem_size,
            self.file_offset,
            file_end,
            self.file_size,
            self.flags,
            self.name
        )
    }
}

/// A decoded segment footer.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct FwsgFooter {
    /// The layout the footer was decoded with.
    pub layout: FooterLayout,
    /// The flag following the magic. Always 1 in known images and absent from the compact layout.
    pub flag: Option<u32>,
    /// The offset of the segment table from the start of the section.
    pub table_offset: usize,
    /// The segments in table order, which is the intended memory layout order.
    pub segments: Vec<SegmentDescriptor>,
    /// The length of the section's contents preceding the footer metadata.
    pub content_len: usize,
    /// The length of the footer metadata: `section length - content_len`.
    pub footer_len: usize,
}

impl FwsgFooter {
    /// Returns the number of segment records in the table.
    #[inline]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Computes where every segment goes in memory for a loader of the given bitness.
    pub fn load_plan(&self, bitness: Bitness) -> Vec<MemoryRegion> {
        self.segments
            .iter()
            .map(|segment| {
                let loaded_end = segment
                    .load_address
                    .saturating_add(segment.file_size.into());
                let align = bitness.alignment();
                let padding = match loaded_end % align {
                    0 => 0,
                    n => align - n,
                };

                MemoryRegion {
                    name: segment.name.clone(),
                    start: segment.load_address,
                    end: segment.load_address.saturating_add(segment.size()),
                    file_range: segment.file_range(),
                    padding,
                    bitness,
                }
            })
            .collect()
    }
}

/// Decodes the footer at the end of `data` if there is one.
///
/// # Errors
/// Returns a [`FooterError`] only when the magic value is present and the rest of the footer
/// doesn't fit the section.
pub fn try_parse_footer(
    data: &[u8],
    config: &FormatConfig,
) -> Result<Option<FwsgFooter>, FooterError> {
    let layout = config.footer;
    let trailer_len = layout.trailer_len();
    if data.len() < trailer_len {
        return Ok(None);
    }

    let trailer_start = data.len() - trailer_len;
    let mut reader = Reader::new(&data[trailer_start..], config.byte_order);
    if reader.array::<4>() != Some(FWSG_MAGIC) {
        return Ok(None);
    }

    // Both trailers are long enough for every field read below.
    let (flag, table_offset, count) = match layout {
        FooterLayout::Trailer32 => {
            let flag = reader.u32().unwrap_or_default();
            let table_offset = reader.u32().unwrap_or_default();
            let count = reader.u32().unwrap_or_default();
            (Some(flag), u64::from(table_offset), count)
        }
        FooterLayout::Compact => {
            let count = reader.u32().unwrap_or_default();
            let table_len = (count as u64).saturating_mul(FWSG_RECORD_LEN as u64);
            let table_offset = (trailer_start as u64).checked_sub(table_len).ok_or(
                FooterError::OobTable {
                    offset: 0,
                    count,
                },
            )?;
            (None, table_offset, count)
        }
    };

    debug!(
        "Found a segment footer with {} segments, table at {:#x}.",
        count, table_offset
    );

    // An empty table can't overflow, whatever its offset says.
    let (table_start, table_end) = if count == 0 {
        (trailer_start, trailer_start)
    } else {
        let oob_table = FooterError::OobTable {
            offset: table_offset,
            count,
        };
        let table_len = (count as usize)
            .checked_mul(FWSG_RECORD_LEN)
            .ok_or_else(|| oob_table.clone())?;
        let table_start = usize::try_from(table_offset).map_err(|_| oob_table.clone())?;
        let table_end = table_start
            .checked_add(table_len)
            .filter(|&end| end <= trailer_start)
            .ok_or(oob_table)?;
        (table_start, table_end)
    };

    let mut reader = Reader::new(&data[table_start..table_end], config.byte_order);
    let mut segments = Vec::with_capacity(count as usize);
    for index in 0..count as usize {
        let segment = read_segment(&mut reader).ok_or(FooterError::OobTable {
            offset: table_offset,
            count,
        })?;

        let file_end = u64::from(segment.file_offset) + u64::from(segment.file_size);
        if file_end > data.len() as u64 {
            return Err(FooterError::OobSegment {
                index,
                offset: segment.file_offset,
                size: segment.file_size,
            });
        }

        trace!("Segment #{}: {}", index, segment);
        segments.push(segment);
    }

    let content_len = if count > 0 { table_start } else { trailer_start };

    Ok(Some(FwsgFooter {
        layout,
        flag,
        table_offset: table_start,
        segments,
        content_len,
        footer_len: data.len() - content_len,
    }))
}

fn read_segment(reader: &mut Reader) -> Option<SegmentDescriptor> {
    let load_address = reader.u64()?;
    let file_offset = reader.u32()?;
    let file_size = reader.u32()?;
    let mem_size = reader.u32()?;
    let flags = reader.u32()?;
    let name = reader.array::<FWSG_NAME_LEN>()?;
    let name_len = name.iter().position(|&b| b == 0).unwrap_or(name.len());

    Some(SegmentDescriptor {
        load_address,
        file_offset,
        file_size,
        mem_size,
        flags,
        name: String::from_utf8_lossy(&name[..name_len]).into_owned(),
    })
}

/// Returns `true` when `data` ends with a segment footer magic in the configured layout.
pub fn has_footer(data: &[u8], config: &FormatConfig) -> bool {
    let trailer_len = config.footer.trailer_len();
    data.len() >= trailer_len && data[data.len() - trailer_len..].starts_with(&FWSG_MAGIC)
}

/// Bitness of the code contained in a segmented section. It can't be derived from the footer.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Bitness {
    /// 32-bit ARM/Thumb code.
    Bits32,
    /// 64-bit ARM code.
    Bits64,
}

impl Bitness {
    /// Loaded contents are padded with zeros up to this alignment.
    #[inline]
    pub fn alignment(self) -> u64 {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }

    #[inline]
    pub fn bits(self) -> u32 {
        match self {
            Self::Bits32 => 32,
            Self::Bits64 => 64,
        }
    }
}

/// A memory region to be registered with a disassembler.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct MemoryRegion {
    pub name: String,
    /// The first address of the region.
    pub start: u64,
    /// The address right past the end of the region.
    pub end: u64,
    /// The bytes of the section loaded at `start`.
    pub file_range: Range<usize>,
    /// The number of zero bytes following the loaded contents.
    pub padding: u64,
    pub bitness: Bitness,
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:<8} {:#010x}-{:#010x} <- [{:#x}..{:#x}] +{} pad, {}-bit",
            self.name,
            self.start,
            self.end,
            self.file_range.start,
            self.file_range.end,
            self.padding,
            self.bitness.bits()
        )
    }
}

/// A consumer of memory regions, e.g. a disassembler loader.
pub trait SegmentSink {
    type Error;

    /// Registers a region. `contents` holds the bytes to be placed at `region.start`, the
    /// padding is not included.
    fn map_region(&mut self, region: &MemoryRegion, contents: &[u8]) -> Result<(), Self::Error>;
}

/// Feeds every segment of a footer to a [`SegmentSink`] and returns the number of registered
/// regions. Segments whose contents are not in `data` are skipped.
///
/// # Errors
/// Returns the first error reported by the sink.
pub fn load_segments<S: SegmentSink>(
    data: &[u8],
    footer: &FwsgFooter,
    bitness: Bitness,
    sink: &mut S,
) -> Result<usize, S::Error> {
    let mut mapped = 0;
    for region in footer.load_plan(bitness) {
        let Some(contents) = data.get(region.file_range.clone()) else {
            warn!("Segment {} points outside of the section, skipping.", region.name);
            continue;
        };
        sink.map_region(&region, contents)?;
        mapped += 1;
    }
    Ok(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(vaddr: u64, offset: u32, file_size: u32, mem_size: u32, name: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FWSG_RECORD_LEN);
        bytes.extend_from_slice(&vaddr.to_le_bytes());
        bytes.extend_from_slice(&offset.to_le_bytes());
        bytes.extend_from_slice(&file_size.to_le_bytes());
        bytes.extend_from_slice(&mem_size.to_le_bytes());
        bytes.extend_from_slice(&5u32.to_le_bytes());
        let mut padded = [0u8; FWSG_NAME_LEN];
        padded[..name.len()].copy_from_slice(name.as_bytes());
        bytes.extend_from_slice(&padded);
        bytes
    }

    /// Builds a section in the 32 byte trailer layout: `content`, the table, the trailer.
    fn trailer32_section(content: &[u8], records: &[Vec<u8>]) -> Vec<u8> {
        let mut data = content.to_vec();
        let table_offset = data.len() as u32;
        for record in records {
            data.extend_from_slice(record);
        }
        data.extend_from_slice(&FWSG_MAGIC);
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&table_offset.to_le_bytes());
        data.extend_from_slice(&(records.len() as u32).to_le_bytes());
        data.extend_from_slice(&[0u8; 16]);
        data
    }

    fn compact() -> FormatConfig {
        FormatConfig {
            footer: FooterLayout::Compact,
            ..FormatConfig::default()
        }
    }

    #[test]
    fn decodes_trailer32_footer() {
        let content = vec![0x11u8; 0x40];
        let data = trailer32_section(
            &content,
            &[
                record(0x8000_0000, 0, 0x30, 0x100, "TEXT"),
                record(0x8010_0000, 0x30, 0x0e, 0x20, "DATA"),
            ],
        );

        let footer = try_parse_footer(&data, &FormatConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(footer.flag, Some(1));
        assert_eq!(footer.table_offset, 0x40);
        assert_eq!(footer.content_len, 0x40);
        assert_eq!(footer.footer_len, 2 * FWSG_RECORD_LEN + FWSG_TRAILER_LEN);
        assert_eq!(footer.segment_count(), 2);
        assert_eq!(footer.segments[0].name, "TEXT");
        assert_eq!(footer.segments[1].load_address, 0x8010_0000);
        assert_eq!(footer.segments[1].file_range(), 0x30..0x3e);
        assert_eq!(footer.segments[1].flags, 5);
    }

    #[test]
    fn decoding_is_idempotent() {
        let data = trailer32_section(&[0u8; 8], &[record(0x1000, 0, 8, 8, "A")]);
        let first = try_parse_footer(&data, &FormatConfig::default()).unwrap();
        let second = try_parse_footer(&data, &FormatConfig::default()).unwrap();
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn compact_footer_with_no_segments() {
        let mut data = vec![0xabu8; 32];
        data.extend_from_slice(&FWSG_MAGIC);
        data.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(data.len(), 40);

        let footer = try_parse_footer(&data, &compact()).unwrap().unwrap();
        assert!(footer.segments.is_empty());
        assert_eq!(footer.content_len, 32);
        assert_eq!(footer.footer_len, 8);
        assert_eq!(footer.flag, None);
    }

    #[test]
    fn compact_footer_with_segments() {
        let mut data = vec![0u8; 16];
        data.extend_from_slice(&record(0x400, 0, 16, 16, "boot"));
        data.extend_from_slice(&FWSG_MAGIC);
        data.extend_from_slice(&1u32.to_le_bytes());

        let footer = try_parse_footer(&data, &compact()).unwrap().unwrap();
        assert_eq!(footer.content_len, 16);
        assert_eq!(footer.segments[0].name, "boot");
    }

    #[test]
    fn short_sections_have_no_footer() {
        for len in 0..FWSG_TRAILER_LEN {
            let mut data = vec![0u8; len];
            if len >= 4 {
                data[..4].copy_from_slice(&FWSG_MAGIC);
            }
            assert_eq!(try_parse_footer(&data, &FormatConfig::default()), Ok(None));
        }
        for len in 0..FWSG_COMPACT_TRAILER_LEN {
            assert_eq!(try_parse_footer(&vec![0u8; len], &compact()), Ok(None));
        }
    }

    #[test]
    fn missing_magic_is_not_an_error() {
        assert_eq!(
            try_parse_footer(&[0x5au8; 256], &FormatConfig::default()),
            Ok(None)
        );
        assert!(!has_footer(&[0x5au8; 256], &FormatConfig::default()));
    }

    #[test]
    fn rejects_overflowing_tables() {
        let mut data = trailer32_section(&[0u8; 8], &[record(0, 0, 8, 8, "A")]);
        let count_offset = data.len() - 20;
        data[count_offset..count_offset + 4].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(
            try_parse_footer(&data, &FormatConfig::default()),
            Err(FooterError::OobTable { count: 2, .. })
        ));

        data[count_offset..count_offset + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(try_parse_footer(&data, &FormatConfig::default()).is_err());

        let mut data = vec![0u8; 8];
        data.extend_from_slice(&FWSG_MAGIC);
        data.extend_from_slice(&1u32.to_le_bytes());
        assert!(matches!(
            try_parse_footer(&data, &compact()),
            Err(FooterError::OobTable { count: 1, .. })
        ));
    }

    #[test]
    fn empty_table_ignores_its_offset() {
        let mut data = trailer32_section(&[0x22u8; 12], &[]);
        let offset_field = data.len() - 24;
        data[offset_field..offset_field + 4].copy_from_slice(&0xffffu32.to_le_bytes());

        let footer = try_parse_footer(&data, &FormatConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(footer.segment_count(), 0);
        assert_eq!(footer.content_len, 12);
        assert_eq!(footer.footer_len, FWSG_TRAILER_LEN);
    }

    #[test]
    fn rejects_segments_past_the_section() {
        let data = trailer32_section(&[0u8; 8], &[record(0, 4, 0x1000, 0x1000, "A")]);
        assert_eq!(
            try_parse_footer(&data, &FormatConfig::default()),
            Err(FooterError::OobSegment {
                index: 0,
                offset: 4,
                size: 0x1000
            })
        );
    }

    #[derive(Default)]
    struct Recorder(Vec<(MemoryRegion, Vec<u8>)>);

    impl SegmentSink for Recorder {
        type Error = ();

        fn map_region(&mut self, region: &MemoryRegion, contents: &[u8]) -> Result<(), ()> {
            self.0.push((region.clone(), contents.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn load_plan_pads_to_bitness() {
        let content: Vec<u8> = (0..0x20).collect();
        let data = trailer32_section(
            &content,
            &[
                record(0x1000, 0, 0x13, 0x100, "TEXT"),
                record(0x2004, 0x14, 0x0c, 0x0c, "DATA"),
            ],
        );
        let footer = try_parse_footer(&data, &FormatConfig::default())
            .unwrap()
            .unwrap();

        let plan = footer.load_plan(Bitness::Bits32);
        assert_eq!(plan[0].start, 0x1000);
        assert_eq!(plan[0].end, 0x1100);
        assert_eq!(plan[0].padding, 1);
        assert_eq!(plan[1].padding, 0);

        let plan = footer.load_plan(Bitness::Bits64);
        assert_eq!(plan[0].padding, 5);
        assert_eq!(plan[1].padding, 0);

        let mut sink = Recorder::default();
        assert_eq!(load_segments(&data, &footer, Bitness::Bits64, &mut sink), Ok(2));
        assert_eq!(sink.0[0].1, &content[..0x13]);
        assert_eq!(sink.0[1].1, &content[0x14..0x20]);
    }
}

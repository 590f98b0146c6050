//! Provides the [`Directory`] structure that parses the header and the tag directory of in-memory
//! 'ftab' files.

/// Provides [`DirectoryError`] that describes errors which may occur in [`Directory::parse`].
pub mod error {
    use crate::tag::Tag;
    use thiserror::Error;

    /// An error which may occur when parsing the 'ftab' header and its directory. Any of these
    /// makes the whole file untrustworthy.
    #[derive(Error, Debug, Clone, Eq, PartialEq)]
    pub enum DirectoryError {
        /// Returned when a file is shorter than the size of a 'ftab' header.
        #[error("file is too short to be a ftab file")]
        TooShort,
        /// Returned when a file does not contain the 'rkosftab' magic value at the expected
        /// offset.
        #[error("file is not a ftab file (invalid magic value)")]
        UnknownMagic,
        /// Returned when the product of the entry count from the header and the size of a
        /// directory entry overflows the `usize` type.
        #[error("directory byte length is too large")]
        OverflowingEntries,
        /// Returned when the end of the directory exceeds past the end of a file.
        #[error("directory of {count} entries is larger than the space available in the file")]
        OobEntryTable { count: u32 },
        /// Returned when the range of a section exceeds past the end of a file.
        #[error("section #{index} with tag {tag} is out of bounds")]
        OobEntry { index: usize, tag: Tag },
        /// Returned when the range of the ticket exceeds past the end of a file.
        #[error("ticket range in file is out of bounds")]
        OobTicket,
    }
}

use crate::{
    format::*,
    reader::Reader,
    section::cut_subslice,
    tag::Tag,
};
pub use error::DirectoryError;
use std::{
    io::{self, Write},
    ops::Range,
};

/// A single record of the tag directory.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct DirectoryEntry {
    /// The section's tag. Tags may repeat.
    pub tag: Tag,
    /// The offset of the section from the start of the file.
    pub offset: u64,
    /// The length of the section.
    pub length: u64,
    /// A field with a currently unknown purpose.
    ///
    /// At the time of writing it seems to be ignored by software interpreting the format.
    pub unk: u32,
}

impl DirectoryEntry {
    /// Returns the byte range of the section or `None` if it doesn't fit into `usize`.
    pub fn range(&self) -> Option<Range<usize>> {
        let start = usize::try_from(self.offset).ok()?;
        let len = usize::try_from(self.length).ok()?;
        Some(start..start.checked_add(len)?)
    }
}

/// A parsed 'ftab' header together with its directory.
#[derive(Clone, Debug)]
pub struct Directory<'a> {
    header: FtabHeader,
    config: FormatConfig,
    entries: Vec<DirectoryEntry>,
    ticket: Option<&'a [u8]>,
}

impl<'a> Directory<'a> {
    /// Parses the provided byte slice as a 'ftab' file header followed by its directory.
    ///
    /// Every entry is validated against the length of the slice before it is returned, tags are
    /// passed through as is.
    ///
    /// # Errors
    /// This method will return a [`DirectoryError`] in case the provided slice does not contain a
    /// valid 'ftab' directory. For more info on the specific cases when this may happen see docs
    /// for individual [`DirectoryError`] variants.
    pub fn parse(bytes: &'a [u8], config: &FormatConfig) -> Result<Self, DirectoryError> {
        if bytes.len() < HEADER_LEN {
            return Err(DirectoryError::TooShort);
        }
        if bytes[MAGIC_OFFSET..MAGIC_OFFSET + FTAB_MAGIC.len()] != FTAB_MAGIC {
            return Err(DirectoryError::UnknownMagic);
        }

        let header = read_header(bytes, config.byte_order).ok_or(DirectoryError::TooShort)?;

        // Calculate the length of the directory and validate that it doesn't overflow and is in
        // bounds.
        let entry_len = config.offset_width.entry_len();
        let count =
            usize::try_from(header.entry_count).map_err(|_| DirectoryError::OverflowingEntries)?;
        let table_len = count
            .checked_mul(entry_len)
            .ok_or(DirectoryError::OverflowingEntries)?;
        if table_len > bytes.len() - HEADER_LEN {
            return Err(DirectoryError::OobEntryTable {
                count: header.entry_count,
            });
        }

        debug!("Directory holds {} entries.", count);

        let mut reader = Reader::new(&bytes[HEADER_LEN..HEADER_LEN + table_len], config.byte_order);
        let mut entries = Vec::with_capacity(count);
        for index in 0..count {
            // The table length was verified above so the reads can't come up short.
            let entry = read_entry(&mut reader, config.offset_width)
                .ok_or(DirectoryError::OobEntryTable {
                    count: header.entry_count,
                })?;

            if cut_subslice(bytes, entry.offset, entry.length).is_none() {
                return Err(DirectoryError::OobEntry {
                    index,
                    tag: entry.tag,
                });
            }

            trace!(
                "Entry #{} {}: offset {:#x}, length {:#x}.",
                index,
                entry.tag,
                entry.offset,
                entry.length
            );

            entries.push(entry);
        }

        // Ticket may or may not be present.
        let ticket = if header.ticket_offset != 0 || header.ticket_len != 0 {
            debug!(
                "Ticket offset is {:#x}, length is {:#x}.",
                header.ticket_offset, header.ticket_len
            );

            let ticket = cut_subslice(
                bytes,
                header.ticket_offset.into(),
                header.ticket_len.into(),
            )
            .ok_or(DirectoryError::OobTicket)?;

            Some(ticket)
        } else {
            debug!("Ticket is not present.");

            None
        };

        Ok(Self {
            header,
            config: *config,
            entries,
            ticket,
        })
    }

    /// Returns the header fields.
    #[inline]
    pub fn header(&self) -> &FtabHeader {
        &self.header
    }

    /// Returns the layout the directory was parsed with.
    #[inline]
    pub fn config(&self) -> &FormatConfig {
        &self.config
    }

    /// Returns the entries in file order.
    #[inline]
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// Returns the slice containing the APTicket included into the 'ftab' file or `None` if an
    /// APTicket is not included.
    #[inline]
    pub fn ticket(&self) -> Option<&'a [u8]> {
        self.ticket
    }

    /// Returns the offset right past the end of the directory.
    #[inline]
    pub fn table_end(&self) -> usize {
        HEADER_LEN + self.entries.len() * self.config.offset_width.entry_len()
    }

    /// Writes the header and the directory back in their binary form. The output is identical
    /// to the first [`table_end`](Self::table_end) bytes of the parsed file.
    ///
    /// # Errors
    /// Returns an I/O error in case it ever occurs.
    pub fn write_to<W: Write>(&self, dest: &mut W) -> io::Result<()> {
        write_directory(dest, &self.header, &self.entries, &self.config)
    }
}

/// Parses the tag directory of a 'ftab' file and returns its entries in file order.
///
/// This is a shorthand for [`Directory::parse`] for callers not interested in the header.
///
/// # Errors
/// See [`Directory::parse`].
pub fn parse_directory(
    bytes: &[u8],
    config: &FormatConfig,
) -> Result<Vec<DirectoryEntry>, DirectoryError> {
    Directory::parse(bytes, config).map(|directory| directory.entries)
}

fn read_header(bytes: &[u8], order: ByteOrder) -> Option<FtabHeader> {
    let mut reader = Reader::new(bytes, order);
    let unk_0 = reader.u32()?;
    let unk_1 = reader.u32()?;
    let unk_2 = reader.u32()?;
    let unk_3 = reader.u32()?;
    let ticket_offset = reader.u32()?;
    let ticket_len = reader.u32()?;
    let unk_4 = reader.u32()?;
    let unk_5 = reader.u32()?;
    reader.skip(FTAB_MAGIC.len())?;
    let entry_count = reader.u32()?;
    let unk_6 = reader.u32()?;

    Some(FtabHeader {
        unk_0,
        unk_1,
        unk_2,
        unk_3,
        ticket_offset,
        ticket_len,
        unk_4,
        unk_5,
        entry_count,
        unk_6,
    })
}

fn read_entry(reader: &mut Reader, width: OffsetWidth) -> Option<DirectoryEntry> {
    let tag = Tag(reader.array()?);
    match width {
        OffsetWidth::U32 => {
            let offset = reader.u32()?.into();
            let length = reader.u32()?.into();
            let unk = reader.u32()?;
            Some(DirectoryEntry {
                tag,
                offset,
                length,
                unk,
            })
        }
        OffsetWidth::U64 => {
            let unk = reader.u32()?;
            let offset = reader.u64()?;
            let length = reader.u64()?;
            Some(DirectoryEntry {
                tag,
                offset,
                length,
                unk,
            })
        }
    }
}

/// Serializes a header and a directory. The entry count written is the length of `entries`
/// regardless of `header.entry_count`.
pub(crate) fn write_directory<W: Write>(
    dest: &mut W,
    header: &FtabHeader,
    entries: &[DirectoryEntry],
    config: &FormatConfig,
) -> io::Result<()> {
    let order = config.byte_order;
    let count = u32::try_from(entries.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many directory entries"))?;

    for field in [
        header.unk_0,
        header.unk_1,
        header.unk_2,
        header.unk_3,
        header.ticket_offset,
        header.ticket_len,
        header.unk_4,
        header.unk_5,
    ] {
        dest.write_all(&order.u32_to(field))?;
    }
    dest.write_all(&FTAB_MAGIC)?;
    dest.write_all(&order.u32_to(count))?;
    dest.write_all(&order.u32_to(header.unk_6))?;

    for entry in entries {
        dest.write_all(&entry.tag.0)?;
        match config.offset_width {
            OffsetWidth::U32 => {
                let narrow = |value: u64| {
                    u32::try_from(value).map_err(|_| {
                        io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("section {} does not fit 32-bit offsets", entry.tag),
                        )
                    })
                };
                dest.write_all(&order.u32_to(narrow(entry.offset)?))?;
                dest.write_all(&order.u32_to(narrow(entry.length)?))?;
                dest.write_all(&order.u32_to(entry.unk))?;
            }
            OffsetWidth::U64 => {
                dest.write_all(&order.u32_to(entry.unk))?;
                dest.write_all(&order.u64_to(entry.offset))?;
                dest.write_all(&order.u64_to(entry.length))?;
            }
        }
    }

    Ok(())
}

//! Provides [`Section`] views into a 'ftab' file.

use crate::{directory::DirectoryEntry, tag::Tag};
use std::{error::Error, fmt};

/// Takes a subslice of a slice by an offset and a length, checking both for overflow.
pub(crate) fn cut_subslice(slice: &[u8], offset: u64, len: u64) -> Option<&[u8]> {
    let offset = usize::try_from(offset).ok()?;
    let len = usize::try_from(len).ok()?;
    if offset <= slice.len() && (slice.len() - offset) >= len {
        Some(&slice[offset..offset + len])
    } else {
        None
    }
}

/// Returned when the range of a directory entry exceeds past the end of the file.
#[derive(Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub struct OutOfBoundsError {
    /// The tag specified in the directory entry.
    pub tag: Tag,
    /// The offset specified in the directory entry.
    pub offset: u64,
    /// The length specified in the directory entry.
    pub length: u64,
    /// The length of the file.
    pub file_len: usize,
}

impl fmt::Display for OutOfBoundsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "section with tag {} ({:#x}+{:#x}) is out of bounds of a {:#x} byte file",
            self.tag, self.offset, self.length, self.file_len
        )
    }
}

impl Error for OutOfBoundsError {}

/// A view of one section of a 'ftab' file labeled with its directory entry.
#[derive(Copy, Clone, Debug)]
pub struct Section<'a> {
    entry: DirectoryEntry,
    data: &'a [u8],
}

impl<'a> Section<'a> {
    /// Returns the directory entry the section was extracted by.
    #[inline]
    pub fn entry(&self) -> &DirectoryEntry {
        &self.entry
    }

    /// Returns the tag of the section.
    #[inline]
    pub fn tag(&self) -> Tag {
        self.entry.tag
    }

    /// Returns the section's contents.
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Returns the length of the section in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for zero length sections.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Slices the section described by `entry` out of `bytes`.
///
/// The bounds are checked again even for entries produced by
/// [`Directory::parse`](../directory/struct.Directory.html#method.parse) since an entry may come
/// from a different file.
///
/// # Errors
/// Returns an [`OutOfBoundsError`] when the entry's range doesn't fit into `bytes`.
pub fn extract<'a>(bytes: &'a [u8], entry: &DirectoryEntry) -> Result<Section<'a>, OutOfBoundsError> {
    let data = cut_subslice(bytes, entry.offset, entry.length).ok_or(OutOfBoundsError {
        tag: entry.tag,
        offset: entry.offset,
        length: entry.length,
        file_len: bytes.len(),
    })?;

    Ok(Section {
        entry: *entry,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(offset: u64, length: u64) -> DirectoryEntry {
        DirectoryEntry {
            tag: Tag(*b"illb"),
            offset,
            length,
            unk: 0,
        }
    }

    #[test]
    fn extracts_exact_slice() {
        let bytes: Vec<u8> = (0..=255).collect();
        let section = extract(&bytes, &entry(16, 32)).unwrap();
        assert_eq!(section.data(), &bytes[16..48]);
        assert_eq!(section.tag(), Tag(*b"illb"));
        assert_eq!(section.data().as_ptr(), bytes[16..].as_ptr());

        let empty = extract(&bytes, &entry(256, 0)).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn rejects_ranges_past_the_end() {
        let bytes = [0u8; 16];
        let err = extract(&bytes, &entry(8, 9)).unwrap_err();
        assert_eq!(err.file_len, 16);
        assert!(extract(&bytes, &entry(17, 0)).is_err());
        assert!(extract(&bytes, &entry(u64::MAX, u64::MAX)).is_err());
    }
}

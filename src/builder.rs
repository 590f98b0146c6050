//! Provides the [`Builder`] structure that can be used to build 'ftab' files either from
//! [`Manifest`](../manifest/struct.Manifest.html)s or from sections pushed one by one.

use crate::{
    directory::{write_directory, DirectoryEntry},
    error::FileOpError,
    format::*,
    integrity::{DigestAlgorithm, IntegrityRecord, IntegrityTable},
    manifest::Manifest,
    tag::Tag,
    util,
};
use std::{
    io::{self, Write},
    path::Path,
};

#[derive(Clone, Debug)]
struct PendingSection {
    tag: Tag,
    unk: u32,
    data: Vec<u8>,
}

/// A builder that can be used to build 'ftab' files.
///
/// Section payloads are aligned to 4 bytes, the ticket is appended after the last section without
/// any padding.
#[derive(Clone, Debug)]
pub struct Builder {
    config: FormatConfig,
    header: FtabHeader,
    sections: Vec<PendingSection>,
    ticket: Option<Box<[u8]>>,
}

impl Builder {
    /// Creates an empty [`Builder`] producing files in the given layout.
    pub fn new(config: FormatConfig) -> Self {
        Self {
            config,
            header: FtabHeader::default(),
            sections: Vec::new(),
            ticket: None,
        }
    }

    /// Creates a [`Builder`] and fills it using a description from a
    /// [`Manifest`](../manifest/struct.Manifest.html). Relative paths are resolved against `dir`.
    ///
    /// # Errors
    /// Returns a boxed [`FileOpError`](../error/struct.FileOpError.html) error when one of the
    /// files from the manifest's section list fails to load.
    pub fn with_manifest(
        manifest: &Manifest,
        dir: Option<&Path>,
    ) -> Result<Self, Box<FileOpError>> {
        let mut builder = Self::new(manifest.layout);
        builder.header = manifest.header();

        for section in manifest.sections.iter() {
            debug!(
                "Reading section with tag {} from file at {}.",
                section.tag,
                section.path.display()
            );

            let path = util::qualify_path_if_needed(&section.path, dir);
            let data = util::read_file("section", path)?;
            builder.push_section_with_unk(section.tag, section.unk, data);
        }

        if let Some(rel_path) = manifest.ticket.as_ref() {
            let path = util::qualify_path_if_needed(rel_path, dir);
            builder.set_ticket(Some(util::read_file("ticket", path)?));
        }

        Ok(builder)
    }

    /// Sets the unknown header fields. Offsets and counts are computed when building.
    pub fn set_header(&mut self, header: FtabHeader) -> &mut Self {
        self.header = header;
        self
    }

    /// Appends a section.
    pub fn push_section(&mut self, tag: Tag, data: Vec<u8>) -> &mut Self {
        self.push_section_with_unk(tag, 0, data)
    }

    /// Appends a section with a value for the unknown directory entry field.
    pub fn push_section_with_unk(&mut self, tag: Tag, unk: u32, data: Vec<u8>) -> &mut Self {
        self.sections.push(PendingSection { tag, unk, data });
        self
    }

    /// Sets or removes the APTicket appended after the sections.
    pub fn set_ticket(&mut self, ticket: Option<Vec<u8>>) -> &mut Self {
        self.ticket = ticket.map(Vec::into_boxed_slice);
        self
    }

    /// Replaces the contents of the first section tagged `integrity_tag` with digests of all
    /// other sections in directory order. Returns `false` when there is no such section.
    pub fn rehash<D>(&mut self, integrity_tag: Tag, digest: &D) -> bool
    where
        D: DigestAlgorithm + ?Sized,
    {
        let Some(position) = self
            .sections
            .iter()
            .position(|section| section.tag == integrity_tag)
        else {
            return false;
        };

        let records = self
            .sections
            .iter()
            .filter(|section| section.tag != integrity_tag)
            .map(|section| IntegrityRecord {
                tag: section.tag,
                digest: digest.digest(&section.data),
            })
            .collect::<Vec<_>>();

        debug!("Rehashed {} sections.", records.len());

        self.sections[position].data = IntegrityTable::from_records(records).to_bytes();
        true
    }

    /// Lays out the sections and returns the directory entries and the ticket offset.
    fn layout(&self) -> (Vec<DirectoryEntry>, usize) {
        let mut offset = HEADER_LEN + self.sections.len() * self.config.offset_width.entry_len();
        let mut entries = Vec::with_capacity(self.sections.len());

        for section in &self.sections {
            // This will not pad the ticket, but that's how the original ftab builder seems to
            // work so we do it this way.
            offset += (4 - offset % 4) % 4;

            trace!(
                "Section {} offset is {:#x}, length is {:#x}.",
                section.tag,
                offset,
                section.data.len()
            );

            entries.push(DirectoryEntry {
                tag: section.tag,
                offset: offset as u64,
                length: section.data.len() as u64,
                unk: section.unk,
            });
            offset += section.data.len();
        }

        (entries, offset)
    }

    /// Writes the built 'ftab' into anything implementing the `std::io::Write` trait.
    ///
    /// # Errors
    /// Returns an I/O error in case it ever occurs or when an offset doesn't fit the configured
    /// field width.
    pub fn write_to<W: Write>(&self, dest: &mut W) -> io::Result<()> {
        let (entries, ticket_offset) = self.layout();
        let too_large =
            || io::Error::new(io::ErrorKind::InvalidInput, "ticket offset exceeds 32 bits");

        let mut header = self.header;
        match self.ticket.as_deref() {
            Some(ticket) => {
                header.ticket_offset = u32::try_from(ticket_offset).map_err(|_| too_large())?;
                header.ticket_len = u32::try_from(ticket.len()).map_err(|_| too_large())?;
            }
            None => {
                header.ticket_offset = 0;
                header.ticket_len = 0;
            }
        }

        write_directory(dest, &header, &entries, &self.config)?;

        let mut written = HEADER_LEN + entries.len() * self.config.offset_width.entry_len();
        for (entry, section) in entries.iter().zip(&self.sections) {
            let padding = entry.offset as usize - written;
            dest.write_all(&[0u8; 4][..padding])?;
            dest.write_all(&section.data)?;
            written += padding + section.data.len();
        }

        if let Some(ticket) = self.ticket.as_deref() {
            dest.write_all(ticket)?;
        }

        Ok(())
    }

    /// Builds the 'ftab' into a vector.
    ///
    /// # Errors
    /// See [`write_to`](Self::write_to).
    pub fn build(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{directory::Directory, integrity::Sha384};

    #[test]
    fn aligns_sections_and_appends_ticket() {
        let mut builder = Builder::new(FormatConfig::default());
        builder
            .push_section(Tag(*b"bver"), vec![1, 2, 3])
            .push_section_with_unk(Tag(*b"rkos"), 9, vec![4; 8])
            .set_ticket(Some(b"ticket".to_vec()));
        let bytes = builder.build().unwrap();

        let directory = Directory::parse(&bytes, &FormatConfig::default()).unwrap();
        let entries = directory.entries();
        assert_eq!(entries[0].offset, 80);
        assert_eq!(entries[1].offset, 84);
        assert_eq!(entries[1].unk, 9);
        assert_eq!(&bytes[83..84], &[0]);
        assert_eq!(directory.ticket(), Some(&b"ticket"[..]));
        assert_eq!(bytes.len(), 92 + 6);
    }

    #[test]
    fn builds_wide_layout() {
        let config = FormatConfig {
            offset_width: OffsetWidth::U64,
            byte_order: ByteOrder::Big,
            ..FormatConfig::default()
        };
        let mut builder = Builder::new(config);
        builder.push_section(Tag(*b"illb"), vec![0xee; 5]);
        let bytes = builder.build().unwrap();

        let directory = Directory::parse(&bytes, &config).unwrap();
        assert_eq!(directory.entries()[0].offset, 72);
        assert_eq!(&bytes[72..77], &[0xee; 5]);
    }

    #[test]
    fn rehash_rewrites_integrity_section() {
        let mut builder = Builder::new(FormatConfig::default());
        assert!(!builder.rehash(Tag(*b"rcpi"), &Sha384));

        builder
            .push_section(Tag(*b"CR01"), b"abc".to_vec())
            .push_section(Tag(*b"rcpi"), vec![0xff; 3])
            .push_section(Tag(*b"CR02"), b"def".to_vec());
        assert!(builder.rehash(Tag(*b"rcpi"), &Sha384));

        let bytes = builder.build().unwrap();
        let directory = Directory::parse(&bytes, &FormatConfig::default()).unwrap();
        let range = directory.entries()[1].range().unwrap();
        let table = IntegrityTable::parse(&bytes[range]).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.records()[1].tag, Tag(*b"CR02"));
        assert_eq!(table.records()[1].digest, Sha384.digest(b"def"));
    }
}

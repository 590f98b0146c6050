//! Provides the [`Unpacker`] that turns an in-memory 'ftab' file into a list of
//! [`UnpackedSection`]s and a list of [`Finding`]s.
//!
//! Only a broken directory or a broken integrity table stops unpacking. Everything that is wrong
//! with an individual section is recorded as a [`Finding`] and the remaining sections are still
//! processed, since many section types have no known structure.

/// Provides [`UnpackError`] that describes errors which abort [`Unpacker::unpack`].
pub mod error {
    use crate::{
        directory::DirectoryError, integrity::IntegrityTableError, section::OutOfBoundsError,
        tag::Tag,
    };
    use thiserror::Error;

    /// An error that makes the whole file untrustworthy.
    #[derive(Error, Debug, Clone, Eq, PartialEq)]
    pub enum UnpackError {
        /// Returned when the header or the directory is malformed.
        #[error("malformed directory: {0}")]
        MalformedDirectory(#[from] DirectoryError),
        /// Returned when a directory entry points outside of the file.
        #[error("{0}")]
        OutOfBounds(#[from] OutOfBoundsError),
        /// Returned when the integrity table section can't be decoded.
        #[error("malformed integrity table in section #{index} ({tag}): {source}")]
        MalformedIntegrityTable {
            index: usize,
            tag: Tag,
            #[source]
            source: IntegrityTableError,
        },
    }
}

use crate::{
    catalog::{Arch, SectionCategory, TagCatalog},
    decompress::{DecompressionError, Decompressor},
    directory::{Directory, DirectoryEntry},
    format::FormatConfig,
    fwsg::{try_parse_footer, Bitness, FooterError, FwsgFooter},
    integrity::{verify, DigestAlgorithm, IntegrityTable, Sha384, Verification},
    section::{extract, Section},
    tag::Tag,
};
pub use error::UnpackError;
use std::{collections::HashMap, fmt};

/// A payload with a known decoder.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum RecognizedPayload {
    /// The section is an integrity table.
    IntegrityTable(IntegrityTable),
    /// The section ends with a segment footer.
    Segmented(FwsgFooter),
}

/// The decoded form of a section's payload.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum SectionPayload {
    Recognized(RecognizedPayload),
    /// Bytes without a known structure, passed through as is.
    Opaque,
}

/// A section of an unpacked file.
#[derive(Clone, Debug)]
pub struct UnpackedSection<'a> {
    /// The position of the section in the directory.
    pub index: usize,
    pub section: Section<'a>,
    /// The category assigned by the catalog.
    pub category: SectionCategory,
    /// The architecture assigned by the catalog, if any.
    pub arch: Option<Arch>,
    pub payload: SectionPayload,
    pub verification: Verification,
}

impl<'a> UnpackedSection<'a> {
    #[inline]
    pub fn entry(&self) -> &DirectoryEntry {
        self.section.entry()
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        self.section.tag()
    }

    /// Returns the raw section contents including a footer if there is one.
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.section.data()
    }

    /// Returns the segment footer if the section has one.
    pub fn footer(&self) -> Option<&FwsgFooter> {
        match &self.payload {
            SectionPayload::Recognized(RecognizedPayload::Segmented(footer)) => Some(footer),
            _ => None,
        }
    }

    /// Returns the decoded integrity table if the section is one.
    pub fn integrity_table(&self) -> Option<&IntegrityTable> {
        match &self.payload {
            SectionPayload::Recognized(RecognizedPayload::IntegrityTable(table)) => Some(table),
            _ => None,
        }
    }

    /// Returns the section contents without the footer metadata.
    pub fn content(&self) -> &'a [u8] {
        let data = self.data();
        match self.footer() {
            Some(footer) => &data[..footer.content_len],
            None => data,
        }
    }

    /// Returns the loader bitness implied by the section's architecture.
    pub fn bitness(&self) -> Option<Bitness> {
        self.arch.and_then(Arch::bitness)
    }

    /// Decompresses the section with `decompressor` when it is classified as compressed, returns
    /// `Ok(None)` for all other sections.
    ///
    /// # Errors
    /// Passes through the [`DecompressionError`] of the decompressor.
    pub fn decompress_with<D>(
        &self,
        decompressor: &D,
    ) -> Result<Option<Vec<u8>>, DecompressionError>
    where
        D: Decompressor + ?Sized,
    {
        if self.category != SectionCategory::Compressed {
            return Ok(None);
        }
        decompressor.decompress(self.tag(), self.data()).map(Some)
    }
}

/// What is wrong with a section or with the integrity table.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum FindingKind {
    /// The section doesn't match its digest.
    HashMismatch,
    /// The section ends with the footer magic but the footer is malformed.
    MalformedFooter(FooterError),
    /// The catalog lists the tag as segmented but the section has no footer.
    MissingFooter,
    /// The integrity table lists a digest for which there is no section.
    OrphanDigest,
    /// A second integrity table, which is not used for verification.
    DuplicateIntegrityTable,
}

/// A non-fatal anomaly keyed by tag.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Finding {
    /// The directory position of the affected section, `None` for orphan digests.
    pub index: Option<usize>,
    pub tag: Tag,
    pub kind: FindingKind,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "section #{} ({}): ", index, self.tag)?,
            None => write!(f, "tag {}: ", self.tag)?,
        }

        match &self.kind {
            FindingKind::HashMismatch => f.write_str("digest mismatch"),
            FindingKind::MalformedFooter(e) => write!(f, "malformed segment footer: {}", e),
            FindingKind::MissingFooter => f.write_str("expected a segment footer, found none"),
            FindingKind::OrphanDigest => f.write_str("digest listed for a missing section"),
            FindingKind::DuplicateIntegrityTable => {
                f.write_str("additional integrity table ignored")
            }
        }
    }
}

/// The result of unpacking a 'ftab' file.
#[derive(Clone, Debug)]
pub struct Unpacked<'a> {
    directory: Directory<'a>,
    sections: Vec<UnpackedSection<'a>>,
    findings: Vec<Finding>,
    integrity_index: Option<usize>,
}

impl<'a> Unpacked<'a> {
    #[inline]
    pub fn directory(&self) -> &Directory<'a> {
        &self.directory
    }

    /// Returns the sections in directory order.
    #[inline]
    pub fn sections(&self) -> &[UnpackedSection<'a>] {
        &self.sections
    }

    #[inline]
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Returns the integrity table used for verification.
    pub fn integrity_table(&self) -> Option<&IntegrityTable> {
        self.integrity_index
            .and_then(|index| self.sections[index].integrity_table())
    }

    /// Returns the `occurrence`-th (zero based) section with `tag`.
    pub fn section(&self, tag: Tag, occurrence: usize) -> Option<&UnpackedSection<'a>> {
        self.sections
            .iter()
            .filter(|section| section.tag() == tag)
            .nth(occurrence)
    }

    /// Returns the sections whose digests don't match.
    pub fn mismatches(&self) -> impl Iterator<Item = &UnpackedSection<'a>> {
        self.sections
            .iter()
            .filter(|section| section.verification == Verification::Mismatched)
    }

    /// Returns `true` when any section failed verification or a digest has no section.
    pub fn has_integrity_failures(&self) -> bool {
        self.findings.iter().any(|finding| {
            matches!(
                finding.kind,
                FindingKind::HashMismatch | FindingKind::OrphanDigest
            )
        })
    }

    /// Drops the findings and the directory and returns the sections.
    pub fn into_sections(self) -> Vec<UnpackedSection<'a>> {
        self.sections
    }
}

/// An unpacking session configuration: the binary layout, the tag catalog and the hash primitive.
#[derive(Clone, Debug)]
pub struct Unpacker<'c, D = Sha384> {
    config: FormatConfig,
    catalog: &'c TagCatalog,
    digest: D,
}

impl<'c> Unpacker<'c, Sha384> {
    /// Creates an unpacker verifying sections with SHA-384.
    pub fn new(config: FormatConfig, catalog: &'c TagCatalog) -> Self {
        Self {
            config,
            catalog,
            digest: Sha384,
        }
    }
}

impl<'c, D: DigestAlgorithm> Unpacker<'c, D> {
    /// Replaces the hash primitive.
    pub fn with_digest<E: DigestAlgorithm>(self, digest: E) -> Unpacker<'c, E> {
        Unpacker {
            config: self.config,
            catalog: self.catalog,
            digest,
        }
    }

    /// Unpacks a 'ftab' file.
    ///
    /// The integrity table may come before or after the sections it covers, so all sections are
    /// collected first and verified in a second pass.
    ///
    /// # Errors
    /// Returns an [`UnpackError`] when the directory or the integrity table is malformed.
    pub fn unpack<'a>(&self, bytes: &'a [u8]) -> Result<Unpacked<'a>, UnpackError> {
        let directory = Directory::parse(bytes, &self.config)?;
        let mut findings = Vec::new();
        let mut table: Option<(usize, IntegrityTable)> = None;
        let mut sections = Vec::with_capacity(directory.entries().len());

        for (index, entry) in directory.entries().iter().enumerate() {
            let section = extract(bytes, entry)?;
            let info = self.catalog.classify(entry.tag);
            let mut payload = SectionPayload::Opaque;

            if info.category == SectionCategory::Integrity {
                let parsed = IntegrityTable::parse(section.data()).map_err(|source| {
                    UnpackError::MalformedIntegrityTable {
                        index,
                        tag: entry.tag,
                        source,
                    }
                })?;

                if table.is_none() {
                    debug!("Using the integrity table from section #{}.", index);
                    table = Some((index, parsed));
                } else {
                    warn!("Ignoring additional integrity table in section #{}.", index);
                    findings.push(Finding {
                        index: Some(index),
                        tag: entry.tag,
                        kind: FindingKind::DuplicateIntegrityTable,
                    });
                    payload = SectionPayload::Recognized(RecognizedPayload::IntegrityTable(parsed));
                }
            }

            sections.push(UnpackedSection {
                index,
                section,
                category: info.category,
                arch: info.arch,
                payload,
                verification: Verification::Absent,
            });
        }

        let mut occurrences: HashMap<Tag, usize> = HashMap::new();
        for section in sections.iter_mut() {
            let tag = section.tag();
            let occurrence = occurrences.entry(tag).or_default();
            let expected = table
                .as_ref()
                .and_then(|(_, table)| table.expected(tag, *occurrence));
            *occurrence += 1;

            if let Some(expected) = expected {
                section.verification = verify(&self.digest, tag, section.data(), expected);
                if section.verification == Verification::Mismatched {
                    warn!("Section #{} ({}) doesn't match its digest.", section.index, tag);
                    findings.push(Finding {
                        index: Some(section.index),
                        tag,
                        kind: FindingKind::HashMismatch,
                    });
                }
            }

            if section.category == SectionCategory::Integrity {
                continue;
            }

            match try_parse_footer(section.data(), &self.config) {
                Ok(Some(footer)) => {
                    debug!(
                        "Section #{} ({}) has {} segments.",
                        section.index,
                        tag,
                        footer.segment_count()
                    );
                    section.payload = SectionPayload::Recognized(RecognizedPayload::Segmented(footer));
                }
                Ok(None) if section.category == SectionCategory::Segmented => {
                    warn!("Section #{} ({}) has no segment footer.", section.index, tag);
                    findings.push(Finding {
                        index: Some(section.index),
                        tag,
                        kind: FindingKind::MissingFooter,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Section #{} ({}): {}", section.index, tag, e);
                    findings.push(Finding {
                        index: Some(section.index),
                        tag,
                        kind: FindingKind::MalformedFooter(e),
                    });
                }
            }
        }

        let integrity_index = table.map(|(index, table)| {
            for (tag, digests) in table.by_tag() {
                let present = occurrences.get(&tag).copied().unwrap_or(0);
                for _ in present..digests.len() {
                    warn!("Integrity table lists {} which is not in the directory.", tag);
                    findings.push(Finding {
                        index: None,
                        tag,
                        kind: FindingKind::OrphanDigest,
                    });
                }
            }

            sections[index].payload =
                SectionPayload::Recognized(RecognizedPayload::IntegrityTable(table));
            index
        });

        Ok(Unpacked {
            directory,
            sections,
            findings,
            integrity_index,
        })
    }
}

/// Unpacks a 'ftab' file using the default layout and the built-in tag catalog.
///
/// # Errors
/// See [`Unpacker::unpack`].
pub fn unpack(bytes: &[u8]) -> Result<Unpacked<'_>, UnpackError> {
    let catalog = TagCatalog::default();
    Unpacker::new(FormatConfig::default(), &catalog).unpack(bytes)
}

//! Decoding of the 'rcpi' integrity table and verification of sections against it.

use crate::{format::*, tag::Tag};
use std::collections::BTreeMap;
use thiserror::Error;

/// A SHA-384 digest.
pub type Digest = [u8; DIGEST_LEN];

/// The hash primitive used for verifying sections.
pub trait DigestAlgorithm {
    fn digest(&self, data: &[u8]) -> Digest;
}

/// SHA-384 as implemented by the `sha2` crate.
#[derive(Copy, Clone, Debug, Default)]
pub struct Sha384;

impl DigestAlgorithm for Sha384 {
    fn digest(&self, data: &[u8]) -> Digest {
        use sha2::Digest as _;

        let hash = sha2::Sha384::digest(data);
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&hash);
        digest
    }
}

/// An error which may occur when decoding an integrity table.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum IntegrityTableError {
    /// Returned when the table length is not a multiple of the 52 byte record length.
    #[error("integrity table length {len:#x} is not a multiple of the record length")]
    UnalignedLength { len: usize },
}

/// The result of checking a section against the integrity table.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Verification {
    /// The section's digest equals the one in the table.
    Matched,
    /// The section's digest differs from the one in the table.
    Mismatched,
    /// The table has no digest for the section.
    Absent,
}

impl Verification {
    /// Returns the label used in listings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::Mismatched => "MISMATCHED",
            Self::Absent => "-",
        }
    }
}

/// A single record of an integrity table.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct IntegrityRecord {
    /// The tag of the covered section.
    pub tag: Tag,
    /// The expected digest of the section's contents.
    pub digest: Digest,
}

/// A decoded integrity table.
///
/// A tag may be listed more than once. The n-th record for a tag belongs to the n-th section with
/// that tag in directory order.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct IntegrityTable {
    records: Vec<IntegrityRecord>,
}

impl IntegrityTable {
    /// Decodes the contents of an integrity table section.
    ///
    /// # Errors
    /// Returns [`IntegrityTableError::UnalignedLength`] when the length of `bytes` is not a whole
    /// number of records.
    pub fn parse(bytes: &[u8]) -> Result<Self, IntegrityTableError> {
        if bytes.len() % INTEGRITY_RECORD_LEN != 0 {
            return Err(IntegrityTableError::UnalignedLength { len: bytes.len() });
        }

        let records = bytes
            .chunks_exact(INTEGRITY_RECORD_LEN)
            .map(|record| {
                let (tag, digest) = record.split_at(4);
                let mut rec = IntegrityRecord {
                    tag: Tag::default(),
                    digest: [0u8; DIGEST_LEN],
                };
                rec.tag.0.copy_from_slice(tag);
                rec.digest.copy_from_slice(digest);
                rec
            })
            .collect::<Vec<_>>();

        debug!("Integrity table holds {} records.", records.len());

        Ok(Self { records })
    }

    /// Creates a table from records.
    pub fn from_records(records: Vec<IntegrityRecord>) -> Self {
        Self { records }
    }

    /// Returns the records in table order.
    #[inline]
    pub fn records(&self) -> &[IntegrityRecord] {
        &self.records
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the digest expected for the `occurrence`-th (zero based) section with `tag`.
    pub fn expected(&self, tag: Tag, occurrence: usize) -> Option<&Digest> {
        self.records
            .iter()
            .filter(|record| record.tag == tag)
            .nth(occurrence)
            .map(|record| &record.digest)
    }

    /// Groups the digests by tag preserving their order within each group.
    pub fn by_tag(&self) -> BTreeMap<Tag, Vec<&Digest>> {
        let mut map: BTreeMap<Tag, Vec<&Digest>> = BTreeMap::new();
        for record in &self.records {
            map.entry(record.tag).or_default().push(&record.digest);
        }
        map
    }

    /// Encodes the table back into the binary form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.records.len() * INTEGRITY_RECORD_LEN);
        for record in &self.records {
            bytes.extend_from_slice(&record.tag.0);
            bytes.extend_from_slice(&record.digest);
        }
        bytes
    }
}

/// Decodes an integrity table section. See [`IntegrityTable::parse`].
///
/// # Errors
/// See [`IntegrityTable::parse`].
pub fn parse_integrity_table(bytes: &[u8]) -> Result<IntegrityTable, IntegrityTableError> {
    IntegrityTable::parse(bytes)
}

/// Hashes the contents of a section and compares the result against the expected digest.
///
/// A mismatch is only a finding, images are known to carry placeholder sections.
pub fn verify<D>(algorithm: &D, tag: Tag, data: &[u8], expected: &Digest) -> Verification
where
    D: DigestAlgorithm + ?Sized,
{
    if algorithm.digest(data) == *expected {
        trace!("Section {} matches its digest.", tag);
        Verification::Matched
    } else {
        debug!("Section {} doesn't match its digest.", tag);
        Verification::Mismatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: &[u8; 4], data: &[u8]) -> IntegrityRecord {
        IntegrityRecord {
            tag: tag.into(),
            digest: Sha384.digest(data),
        }
    }

    #[test]
    fn sha384_of_empty_input() {
        assert_eq!(
            hex::encode(Sha384.digest(b"")),
            "38b060a751ac96384cd9327eb1b1e36a21fdb71114be07434c0cc7bf63f6e1da\
             274edebfe76f65fbd51ad2f14898b95b"
        );
    }

    #[test]
    fn decodes_whole_records() {
        let table = IntegrityTable::from_records(vec![
            record(b"CR01", b"one"),
            record(b"bver", b"two"),
            record(b"CR01", b"three"),
        ]);
        let bytes = table.to_bytes();
        assert_eq!(bytes.len(), 3 * INTEGRITY_RECORD_LEN);

        let parsed = parse_integrity_table(&bytes).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed.expected(Tag(*b"CR01"), 1), Some(&Sha384.digest(b"three")));
        assert_eq!(parsed.expected(Tag(*b"CR01"), 2), None);
        assert_eq!(parsed.expected(Tag(*b"rkos"), 0), None);

        let groups = parsed.by_tag();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&Tag(*b"CR01")].len(), 2);
    }

    #[test]
    fn empty_table_is_valid() {
        assert!(IntegrityTable::parse(&[]).unwrap().is_empty());
    }

    #[test]
    fn rejects_partial_records() {
        let bytes = vec![0u8; INTEGRITY_RECORD_LEN * 2 + 1];
        assert_eq!(
            IntegrityTable::parse(&bytes).unwrap_err(),
            IntegrityTableError::UnalignedLength { len: bytes.len() }
        );
        assert!(IntegrityTable::parse(&bytes[..48]).is_err());
    }

    #[test]
    fn single_bit_flip_is_detected() {
        let data = b"baseband firmware section".to_vec();
        let expected = Sha384.digest(&data);
        assert_eq!(
            verify(&Sha384, Tag(*b"rkos"), &data, &expected),
            Verification::Matched
        );

        for bit in 0..data.len() * 8 {
            let mut altered = data.clone();
            altered[bit / 8] ^= 1 << (bit % 8);
            assert_eq!(
                verify(&Sha384, Tag(*b"rkos"), &altered, &expected),
                Verification::Mismatched
            );
        }
    }
}

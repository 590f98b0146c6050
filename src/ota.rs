//! Provides the [`OtaPackage`] parser for decrypted 'AA01' OTA update packages.
//!
//! A package is a stream of records, each being the 'AA01' magic, a 16-bit header size, a list of
//! typed fields and an optional payload. The top level records group nested record streams:
//! `YOP=M` holds section info, `YOP=E` holds file entries and `YOP=O` holds file metadata.
//! All integers are little endian.

use crate::{format::ByteOrder, reader::Reader};
use thiserror::Error;

/// The magic value starting every record.
pub const AA01_MAGIC: [u8; 4] = *b"AA01";
/// The length of the magic value and the header size field.
pub const RECORD_PREFIX_LEN: usize = 6;

/// An error which may occur when parsing an OTA package.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum PackageError {
    #[error("invalid record magic at offset {offset:#x}")]
    BadMagic { offset: usize },
    #[error("record at offset {offset:#x} is truncated")]
    TruncatedRecord { offset: usize },
    #[error("record at offset {offset:#x} has an invalid header size {size}")]
    BadHeaderSize { offset: usize, size: u16 },
    #[error("field {key} of the record at offset {offset:#x} is truncated")]
    TruncatedField { offset: usize, key: String },
    #[error("field {key} of the record at offset {offset:#x} has an unknown type")]
    UnknownFieldType { offset: usize, key: String },
    #[error("payload of {len:#x} bytes of the record at offset {offset:#x} exceeds the package")]
    TruncatedPayload { offset: usize, len: u64 },
    #[error("file entry at offset {offset:#x} has no path")]
    MissingPath { offset: usize },
}

/// A decoded record of any nesting level. Fields that are not present are `None`.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct ArchiveEntry<'a> {
    /// The absolute offset of the record in the package.
    pub offset: usize,
    /// The absolute offset of the payload in the package.
    pub data_offset: usize,
    /// `TYP`: `F` for files, `D` for directories.
    pub entry_type: Option<u8>,
    /// `YOP`: the kind of nested records held in the payload.
    pub opcode: Option<u8>,
    /// `PAT`: the path of the entry inside the package.
    pub path: Option<String>,
    /// `LBL`: the label of a section.
    pub label: Option<String>,
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    pub mode: Option<u64>,
    pub flags: Option<u64>,
    /// Modification time in seconds.
    pub mtime: Option<u64>,
    /// Creation time in seconds.
    pub ctime: Option<u64>,
    /// `IDX`: the offset of a section, as listed by a `YOP=M` record.
    pub index: Option<u64>,
    /// `IDZ`: the size of the section index.
    pub index_size: Option<u64>,
    /// `SIZ`: the size declared by the record.
    pub size: Option<u64>,
    /// `DAT`: the payload following the record header.
    pub data: Option<&'a [u8]>,
}

impl<'a> ArchiveEntry<'a> {
    /// Returns `true` for entries of type `F`.
    #[inline]
    pub fn is_file(&self) -> bool {
        self.entry_type == Some(b'F')
    }

    /// Returns `true` for entries of type `D`.
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.entry_type == Some(b'D')
    }
}

/// A file carried by an OTA package.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct OtaComponent<'a> {
    /// The path of the file inside the package.
    pub name: String,
    pub data: &'a [u8],
}

enum Value<'a> {
    Uint(u64),
    Blob(u64),
    Str(&'a [u8]),
    Time(u64),
}

fn read_value<'a>(reader: &mut Reader<'a>, code: u8) -> Option<Option<Value<'a>>> {
    let value = match code {
        b'1' => Value::Uint(reader.u8()?.into()),
        b'2' => Value::Uint(reader.u16()?.into()),
        b'4' => Value::Uint(reader.u32()?.into()),
        b'8' => Value::Uint(reader.u64()?),
        b'A' => Value::Blob(reader.u16()?.into()),
        b'B' => Value::Blob(reader.u32()?.into()),
        b'C' => Value::Blob(reader.u64()?),
        b'P' => {
            let len = reader.u16()?;
            Value::Str(reader.take(len.into())?)
        }
        b'S' => Value::Time(reader.u64()?),
        b'T' => {
            let secs = reader.u64()?;
            reader.skip(4)?;
            Value::Time(secs)
        }
        _ => return Some(None),
    };
    Some(Some(value))
}

/// Decodes the fields of a record header into `entry` and returns the payload length.
fn parse_fields<'a>(
    fields: &'a [u8],
    entry: &mut ArchiveEntry<'a>,
) -> Result<Option<u64>, PackageError> {
    let mut reader = Reader::new(fields, ByteOrder::Little);
    let mut data_len = None;

    while !reader.is_empty() {
        let offset = entry.offset;
        let Some(key) = reader.array::<4>() else {
            let partial = reader.take(reader.remaining()).unwrap_or_default();
            return Err(PackageError::TruncatedField {
                offset,
                key: String::from_utf8_lossy(partial).into_owned(),
            });
        };
        let name = String::from_utf8_lossy(&key).into_owned();
        let value = read_value(&mut reader, key[3])
            .ok_or_else(|| PackageError::TruncatedField {
                offset,
                key: name.clone(),
            })?
            .ok_or_else(|| PackageError::UnknownFieldType {
                offset,
                key: name.clone(),
            })?;

        match (&key[..3], value) {
            (b"TYP", Value::Uint(v)) => entry.entry_type = u8::try_from(v).ok(),
            (b"TYP", Value::Str(s)) => entry.entry_type = s.first().copied(),
            (b"YOP", Value::Uint(v)) => entry.opcode = u8::try_from(v).ok(),
            (b"YOP", Value::Str(s)) => entry.opcode = s.first().copied(),
            (b"PAT", Value::Str(s)) => entry.path = Some(String::from_utf8_lossy(s).into_owned()),
            (b"LBL", Value::Str(s)) => entry.label = Some(String::from_utf8_lossy(s).into_owned()),
            (b"UID", Value::Uint(v)) => entry.uid = Some(v),
            (b"GID", Value::Uint(v)) => entry.gid = Some(v),
            (b"MOD", Value::Uint(v)) => entry.mode = Some(v),
            (b"FLG", Value::Uint(v)) => entry.flags = Some(v),
            (b"IDX", Value::Uint(v)) => entry.index = Some(v),
            (b"IDZ", Value::Uint(v)) => entry.index_size = Some(v),
            (b"SIZ", Value::Uint(v)) => entry.size = Some(v),
            (b"MTM", Value::Time(t)) => entry.mtime = Some(t),
            (b"CTM", Value::Time(t)) => entry.ctime = Some(t),
            (b"DAT", Value::Blob(len)) => data_len = Some(len),
            _ => trace!("Skipping field {} at offset {:#x}.", name, offset),
        }
    }

    Ok(data_len)
}

/// Parses a stream of records. `base` is the absolute offset of `bytes` in the package.
fn parse_records(bytes: &[u8], base: usize) -> Result<Vec<ArchiveEntry<'_>>, PackageError> {
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let offset = base + pos;
        let rest = &bytes[pos..];
        if rest.len() < RECORD_PREFIX_LEN {
            return Err(PackageError::TruncatedRecord { offset });
        }
        if rest[..4] != AA01_MAGIC {
            return Err(PackageError::BadMagic { offset });
        }

        let size = u16::from_le_bytes([rest[4], rest[5]]);
        if usize::from(size) < RECORD_PREFIX_LEN {
            return Err(PackageError::BadHeaderSize { offset, size });
        }
        let Some(fields) = rest.get(RECORD_PREFIX_LEN..size.into()) else {
            return Err(PackageError::TruncatedRecord { offset });
        };

        let mut entry = ArchiveEntry {
            offset,
            ..ArchiveEntry::default()
        };
        let data_len = parse_fields(fields, &mut entry)?;
        pos += usize::from(size);
        entry.data_offset = base + pos;

        if let Some(len) = data_len {
            let data = usize::try_from(len)
                .ok()
                .and_then(|len| bytes.get(pos..pos.checked_add(len)?))
                .ok_or(PackageError::TruncatedPayload { offset, len })?;
            entry.data = Some(data);
            pos += data.len();
        }

        entries.push(entry);
    }

    Ok(entries)
}

/// A parsed OTA package.
#[derive(Clone, Debug, Default)]
pub struct OtaPackage<'a> {
    /// Top level records, including those holding nested streams.
    pub sections: Vec<ArchiveEntry<'a>>,
    /// Records of `YOP=M` sections describing where the other sections are.
    pub infos: Vec<ArchiveEntry<'a>>,
    /// File and directory entries, including top level ones without `YOP`.
    pub entries: Vec<ArchiveEntry<'a>>,
    /// Records of `YOP=O` sections with ownership, mode and timestamps.
    pub metadata: Vec<ArchiveEntry<'a>>,
}

impl<'a> OtaPackage<'a> {
    /// Parses a decrypted package.
    ///
    /// # Errors
    /// Returns a [`PackageError`] when a record is malformed or a length exceeds the package.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, PackageError> {
        let mut package = Self {
            sections: parse_records(bytes, 0)?,
            ..Self::default()
        };

        for section in &package.sections {
            let nested = section.data.unwrap_or_default();
            match section.opcode {
                Some(b'M') => package
                    .infos
                    .extend(parse_records(nested, section.data_offset)?),
                Some(b'E') => package
                    .entries
                    .extend(parse_records(nested, section.data_offset)?),
                Some(b'O') => package
                    .metadata
                    .extend(parse_records(nested, section.data_offset)?),
                Some(op) => warn!(
                    "Skipping unknown section type {} at offset {:#x}.",
                    op.escape_ascii(),
                    section.offset
                ),
                None => package.entries.push(section.clone()),
            }
        }

        debug!(
            "Package holds {} entries, {} metadata and {} info records.",
            package.entries.len(),
            package.metadata.len(),
            package.infos.len()
        );

        Ok(package)
    }

    /// Returns the files of the package in stream order.
    ///
    /// # Errors
    /// Returns [`PackageError::MissingPath`] for a file entry without a path.
    pub fn components(&self) -> Result<Vec<OtaComponent<'a>>, PackageError> {
        self.entries
            .iter()
            .filter(|entry| entry.is_file())
            .map(|entry| {
                let name = entry
                    .path
                    .clone()
                    .ok_or(PackageError::MissingPath {
                        offset: entry.offset,
                    })?;
                Ok(OtaComponent {
                    name,
                    data: entry.data.unwrap_or_default(),
                })
            })
            .collect()
    }
}

/// Parses a decrypted package and returns its files.
///
/// # Errors
/// See [`OtaPackage::parse`] and [`OtaPackage::components`].
pub fn unpack(bytes: &[u8]) -> Result<Vec<OtaComponent<'_>>, PackageError> {
    OtaPackage::parse(bytes)?.components()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encodes a record from raw field bytes and a payload.
    fn record(fields: &[u8], data: Option<&[u8]>) -> Vec<u8> {
        let mut fields = fields.to_vec();
        if let Some(data) = data {
            fields.extend_from_slice(b"DATB");
            fields.extend_from_slice(&(data.len() as u32).to_le_bytes());
        }
        let mut bytes = AA01_MAGIC.to_vec();
        bytes.extend_from_slice(&((fields.len() + RECORD_PREFIX_LEN) as u16).to_le_bytes());
        bytes.extend_from_slice(&fields);
        if let Some(data) = data {
            bytes.extend_from_slice(data);
        }
        bytes
    }

    fn typ(t: u8) -> Vec<u8> {
        vec![b'T', b'Y', b'P', b'1', t]
    }

    fn pat(path: &str) -> Vec<u8> {
        let mut bytes = b"PATP".to_vec();
        bytes.extend_from_slice(&(path.len() as u16).to_le_bytes());
        bytes.extend_from_slice(path.as_bytes());
        bytes
    }

    fn file(path: &str, data: &[u8]) -> Vec<u8> {
        record(&[typ(b'F'), pat(path)].concat(), Some(data))
    }

    #[test]
    fn unpacks_flat_package() {
        let blobs = [vec![1u8; 10], vec![2u8; 20], vec![3u8; 30]];
        let bytes = [
            file("a.bin", &blobs[0]),
            file("dir/b.bin", &blobs[1]),
            file("c.bin", &blobs[2]),
        ]
        .concat();

        let components = unpack(&bytes).unwrap();
        assert_eq!(components.len(), 3);
        assert_eq!(components[1].name, "dir/b.bin");
        for (component, blob) in components.iter().zip(&blobs) {
            assert_eq!(component.data, &blob[..]);
        }

        assert!(matches!(
            unpack(&bytes[..bytes.len() - 1]),
            Err(PackageError::TruncatedPayload { len: 30, .. })
        ));
    }

    #[test]
    fn unpacks_nested_sections() {
        let entries = [
            record(&[typ(b'D'), pat("etc")].concat(), None),
            file("etc/fw.bin", b"payload"),
        ]
        .concat();
        let mut meta_fields = [typ(b'F'), pat("etc/fw.bin")].concat();
        meta_fields.extend_from_slice(b"UID1\x00GID2\x14\x00MOD2\xa4\x01MTMT");
        meta_fields.extend_from_slice(&0x6000_0000u64.to_le_bytes());
        meta_fields.extend_from_slice(&[0u8; 4]);
        let metadata = record(&meta_fields, None);

        let bytes = [
            record(&[b"YOP1M".to_vec(), b"LBLP\x04\x00info".to_vec()].concat(), Some(&[])),
            record(b"YOP1E", Some(&entries)),
            record(b"YOP1O", Some(&metadata)),
            record(b"YOP1X", Some(b"ignored")),
        ]
        .concat();

        let package = OtaPackage::parse(&bytes).unwrap();
        assert_eq!(package.sections.len(), 4);
        assert_eq!(package.sections[0].label.as_deref(), Some("info"));
        assert_eq!(package.entries.len(), 2);
        assert!(package.entries[0].is_dir());
        assert_eq!(package.metadata[0].gid, Some(20));
        assert_eq!(package.metadata[0].mode, Some(0o644));
        assert_eq!(package.metadata[0].mtime, Some(0x6000_0000));

        let file_entry = &package.entries[1];
        assert_eq!(
            &bytes[file_entry.data_offset..file_entry.data_offset + 7],
            b"payload"
        );

        let components = package.components().unwrap();
        assert_eq!(
            components,
            [OtaComponent {
                name: "etc/fw.bin".to_owned(),
                data: b"payload"
            }]
        );
    }

    #[test]
    fn skips_unknown_fields_by_width() {
        let fields = [typ(b'F'), b"XYZ4\x01\x02\x03\x04".to_vec(), pat("x")].concat();
        let bytes = record(&fields, Some(b"zz"));
        let components = unpack(&bytes).unwrap();
        assert_eq!(components[0].name, "x");
    }

    #[test]
    fn rejects_malformed_records() {
        assert!(unpack(&[]).unwrap().is_empty());
        assert_eq!(
            unpack(b"AA01").unwrap_err(),
            PackageError::TruncatedRecord { offset: 0 }
        );
        assert_eq!(
            unpack(b"AA02\x06\x00").unwrap_err(),
            PackageError::BadMagic { offset: 0 }
        );
        assert_eq!(
            unpack(b"AA01\x05\x00").unwrap_err(),
            PackageError::BadHeaderSize { offset: 0, size: 5 }
        );
        assert_eq!(
            unpack(b"AA01\x0a\x00TYP?").unwrap_err(),
            PackageError::UnknownFieldType {
                offset: 0,
                key: "TYP?".to_owned()
            }
        );
        assert!(matches!(
            unpack(b"AA01\x0a\x00UID4"),
            Err(PackageError::TruncatedField { .. })
        ));
        assert_eq!(
            unpack(b"AA01\x0d\x00TYP1FPA").unwrap_err(),
            PackageError::TruncatedField {
                offset: 0,
                key: "PA".to_owned()
            }
        );
        assert_eq!(
            unpack(&record(&typ(b'F'), Some(b"x"))).unwrap_err(),
            PackageError::MissingPath { offset: 0 }
        );
    }
}

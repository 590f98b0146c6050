//! Parsers for ftab (aka rkosftab) baseband images.
//!
//! A 'ftab' file is a header followed by a directory of tagged sections. One of the sections
//! ('rcpi') lists SHA-384 digests of the others and several binaries end with a 'fwsg' footer
//! describing their memory segments. [`unpacker::Unpacker`] ties these together. The unrelated
//! 'AA01' OTA package format is handled by [`ota`].
//!
//! All parsers work on an in-memory slice and return views into it.

#[macro_use]
extern crate log;

pub mod builder;
pub mod catalog;
pub mod config;
pub mod decompress;
pub mod directory;
pub mod error;
pub mod format;
pub mod fwsg;
pub mod integrity;
pub mod manifest;
pub mod ota;
mod reader;
pub mod section;
pub mod tag;
pub mod unpacker;
pub mod util;

pub use builder::Builder;
pub use catalog::TagCatalog;
pub use config::Config;
pub use directory::{parse_directory, Directory, DirectoryEntry};
pub use format::FormatConfig;
pub use fwsg::{try_parse_footer, FwsgFooter, SegmentDescriptor};
pub use integrity::{parse_integrity_table, verify, IntegrityTable, Verification};
pub use section::{extract, Section};
pub use tag::Tag;
pub use unpacker::{unpack, Unpacked, UnpackedSection, Unpacker};

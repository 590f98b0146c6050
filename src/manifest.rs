//! The TOML manifest written by `unpack` and consumed by `pack`.

use crate::{
    directory::Directory,
    format::{FormatConfig, FtabHeader},
    tag::Tag,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A section of a manifest.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SectionDesc {
    pub path: PathBuf,
    pub tag: Tag,
    #[serde(default)]
    pub unk: u32,
}

/// A description of a 'ftab' file sufficient to rebuild it from the unpacked files.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub unk_0: u32,
    #[serde(default)]
    pub unk_1: u32,
    #[serde(default)]
    pub unk_2: u32,
    #[serde(default)]
    pub unk_3: u32,
    #[serde(default)]
    pub unk_4: u32,
    #[serde(default)]
    pub unk_5: u32,
    #[serde(default)]
    pub unk_6: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<PathBuf>,
    #[serde(default)]
    pub layout: FormatConfig,
    #[serde(default)]
    pub sections: Vec<SectionDesc>,
}

impl Manifest {
    /// Creates a manifest carrying the header fields and layout of a parsed directory. Sections
    /// and the ticket are added by the caller once their files are written.
    pub fn with_directory(directory: &Directory) -> Manifest {
        let header = directory.header();
        Manifest {
            unk_0: header.unk_0,
            unk_1: header.unk_1,
            unk_2: header.unk_2,
            unk_3: header.unk_3,
            unk_4: header.unk_4,
            unk_5: header.unk_5,
            unk_6: header.unk_6,
            ticket: None,
            layout: *directory.config(),
            sections: Vec::new(),
        }
    }

    /// Returns the header fields described by the manifest.
    pub fn header(&self) -> FtabHeader {
        FtabHeader {
            unk_0: self.unk_0,
            unk_1: self.unk_1,
            unk_2: self.unk_2,
            unk_3: self.unk_3,
            unk_4: self.unk_4,
            unk_5: self.unk_5,
            unk_6: self.unk_6,
            ..FtabHeader::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{builder::Builder, format::FooterLayout};

    #[test]
    fn survives_toml() {
        let mut builder = Builder::new(FormatConfig::default());
        builder.set_header(FtabHeader {
            unk_2: 0x20,
            unk_6: 1,
            ..FtabHeader::default()
        });
        let bytes = builder.build().unwrap();
        let directory = Directory::parse(&bytes, &FormatConfig::default()).unwrap();

        let mut manifest = Manifest::with_directory(&directory);
        manifest.ticket = Some("ApImg4Ticket.der".into());
        manifest.sections.push(SectionDesc {
            path: "rkos.bin".into(),
            tag: Tag(*b"rkos"),
            unk: 0,
        });
        manifest.sections.push(SectionDesc {
            path: "00000001.bin".into(),
            tag: Tag([0, 0, 0, 1]),
            unk: 3,
        });

        let text = toml::to_string(&manifest).unwrap();
        let back: Manifest = toml::from_str(&text).unwrap();
        assert_eq!(back, manifest);
        assert_eq!(back.header().unk_2, 0x20);
    }

    #[test]
    fn minimal_manifest() {
        let manifest: Manifest = toml::from_str(
            r#"
            [layout]
            footer = "compact"

            [[sections]]
            path = "bver.bin"
            tag = "bver"
            "#,
        )
        .unwrap();

        assert_eq!(manifest.unk_0, 0);
        assert_eq!(manifest.layout.footer, FooterLayout::Compact);
        assert_eq!(manifest.sections[0].unk, 0);
    }
}

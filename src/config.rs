//! The optional configuration file selecting the binary layout and the tag catalog.
//!
//! ```toml
//! [layout]
//! byte_order = "little"
//! offset_width = 32
//! footer = "trailer32"
//!
//! [catalog]
//! integrity_tag = "rcpi"
//!
//! [[catalog.rules]]
//! pattern = "cdph"
//! category = "segmented"
//! arch = "thumb"
//! ```
//!
//! Every key is optional, an empty file yields the built-in configuration. Rules given in the file
//! replace the built-in catalog entirely.

use crate::{catalog::TagCatalog, format::FormatConfig};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub layout: FormatConfig,
    pub catalog: TagCatalog,
}

impl Config {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    /// Returns the TOML error for malformed text or unknown enum values.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::Builder,
        catalog::SectionCategory,
        format::{ByteOrder, FooterLayout, OffsetWidth},
        tag::Tag,
        unpacker::Unpacker,
    };

    #[test]
    fn empty_file_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn overrides_layout_and_catalog() {
        let config = Config::from_toml(
            r#"
            [layout]
            byte_order = "big"
            offset_width = 64
            footer = "compact"

            [catalog]
            integrity_tag = "hash"
            rules = [{ pattern = "CR##", category = "compressed" }]
            "#,
        )
        .unwrap();

        assert_eq!(config.layout.byte_order, ByteOrder::Big);
        assert_eq!(config.layout.offset_width, OffsetWidth::U64);
        assert_eq!(config.layout.footer, FooterLayout::Compact);
        assert_eq!(config.catalog.integrity_tag, Tag(*b"hash"));
        assert_eq!(
            config.catalog.classify(Tag(*b"CR10")).category,
            SectionCategory::Compressed
        );
        assert_eq!(
            config.catalog.classify(Tag(*b"rkos")).category,
            SectionCategory::Unknown
        );
    }

    #[test]
    fn integrity_tag_override_keeps_default_rules() {
        let config = Config::from_toml("[catalog]\nintegrity_tag = \"hash\"").unwrap();
        assert_eq!(config.catalog.rules, TagCatalog::default().rules);
        assert_eq!(
            config.catalog.classify(Tag(*b"hash")).category,
            SectionCategory::Integrity
        );
        assert_eq!(
            config.catalog.classify(Tag(*b"rcpi")).category,
            SectionCategory::Unknown
        );

        // A broken 'rcpi' is an ordinary section once another tag holds the digests.
        let mut builder = Builder::new(config.layout);
        builder
            .push_section(Tag(*b"rcpi"), vec![0; 51])
            .push_section(Tag(*b"hash"), Vec::new());
        let bytes = builder.build().unwrap();
        let unpacked = Unpacker::new(config.layout, &config.catalog)
            .unpack(&bytes)
            .unwrap();
        assert_eq!(unpacked.sections()[1].category, SectionCategory::Integrity);
        assert!(unpacked.integrity_table().unwrap().is_empty());
        assert!(!unpacked.has_integrity_failures());
    }

    #[test]
    fn rejects_bad_widths() {
        assert!(Config::from_toml("[layout]\noffset_width = 48").is_err());
    }
}

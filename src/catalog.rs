//! Provides the [`TagCatalog`] lookup table describing what is known about section tags.
//!
//! The catalog is plain configuration passed to the [`Unpacker`](../unpacker/struct.Unpacker.html)
//! so that images of different format versions can be processed side by side.

use crate::{fwsg::Bitness, tag::Tag};
use serde::{Deserialize, Serialize};

/// What a section is known to contain.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionCategory {
    /// The table of section digests.
    Integrity,
    /// lzfse compressed data.
    Compressed,
    /// A binary carrying a segment footer.
    Segmented,
    /// A plain binary.
    Code,
    /// Small data blobs.
    Data,
    #[default]
    Unknown,
}

impl SectionCategory {
    /// Returns the lowercase name used in configuration files and listings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integrity => "integrity",
            Self::Compressed => "compressed",
            Self::Segmented => "segmented",
            Self::Code => "code",
            Self::Data => "data",
            Self::Unknown => "unknown",
        }
    }
}

/// Instruction set of a binary section.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Thumb,
    Arm64,
    Arcv2,
}

impl Arch {
    /// Returns the loader bitness for ARM architectures.
    pub fn bitness(self) -> Option<Bitness> {
        match self {
            Self::Thumb => Some(Bitness::Bits32),
            Self::Arm64 => Some(Bitness::Bits64),
            Self::Arcv2 => None,
        }
    }
}

/// A catalog entry matching tags by a pattern (`#` matches a digit, `?` any byte).
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct TagRule {
    /// A 4-byte pattern, see [`Tag::matches`].
    pub pattern: String,
    pub category: SectionCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<Arch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TagRule {
    fn new(pattern: &str, category: SectionCategory, arch: Option<Arch>, description: &str) -> Self {
        Self {
            pattern: pattern.to_owned(),
            category,
            arch,
            description: Some(description.to_owned()),
        }
    }
}

/// The classification of a single tag.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct TagInfo<'c> {
    pub category: SectionCategory,
    pub arch: Option<Arch>,
    pub description: Option<&'c str>,
}

/// A lookup table of known tags. The first matching rule wins.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TagCatalog {
    /// The tag of the section holding the integrity table.
    pub integrity_tag: Tag,
    /// Rules for all other tags, checked in order.
    pub rules: Vec<TagRule>,
}

impl TagCatalog {
    /// Creates a catalog that knows nothing but the integrity table tag.
    pub fn empty(integrity_tag: Tag) -> Self {
        Self {
            integrity_tag,
            rules: Vec::new(),
        }
    }

    /// Classifies a tag. The integrity tag is always classified as [`SectionCategory::Integrity`]
    /// and no other tag ever is, a rule claiming so classifies its tags as unknown.
    pub fn classify(&self, tag: Tag) -> TagInfo<'_> {
        if tag == self.integrity_tag {
            return TagInfo {
                category: SectionCategory::Integrity,
                arch: None,
                description: Some("section digests"),
            };
        }

        self.rules
            .iter()
            .find(|rule| tag.matches(&rule.pattern))
            .map(|rule| TagInfo {
                category: match rule.category {
                    SectionCategory::Integrity => SectionCategory::Unknown,
                    category => category,
                },
                arch: rule.arch,
                description: rule.description.as_deref(),
            })
            .unwrap_or_default()
    }
}

impl Default for TagCatalog {
    /// The tags known from C4000 baseband images.
    fn default() -> Self {
        use Arch::*;
        use SectionCategory::*;

        let rules = vec![
            TagRule::new("CR##", Compressed, None, "lzfse compressed, purpose unknown"),
            TagRule::new("RP##", Compressed, None, "lzfse compressed, purpose unknown"),
            TagRule::new("R###", Compressed, None, "lzfse compressed, purpose unknown"),
            TagRule::new("bver", Data, None, "version"),
            TagRule::new("ibdt", Data, None, "small data blob"),
            TagRule::new("l1c2", Data, None, "small data blob"),
            TagRule::new("ARC2", Data, None, "small data blob"),
            TagRule::new("ARC1", Unknown, None, "purpose unknown"),
            TagRule::new("CAR2", Unknown, None, "purpose unknown"),
            TagRule::new("CAR3", Unknown, None, "purpose unknown"),
            TagRule::new("GNS1", Code, Some(Arcv2), "ARCv2 binary"),
            TagRule::new("apmu", Code, Some(Thumb), "ARM thumb binary"),
            TagRule::new("pmfw", Code, Some(Thumb), "ARM thumb binary"),
            TagRule::new("illb", Code, Some(Arm64), "ARM64 binary"),
            TagRule::new("cdph", Segmented, Some(Thumb), "fwsg ARM thumb binary"),
            TagRule::new("cdpd", Segmented, Some(Arm64), "fwsg ARM64 binary"),
            TagRule::new("cdpu", Segmented, Some(Arm64), "fwsg ARM64 binary"),
            TagRule::new("rkos", Segmented, Some(Arm64), "fwsg ARM64 binary"),
            TagRule::new("l1cs", Segmented, Some(Arm64), "fwsg ARM64 binary"),
        ];

        Self {
            integrity_tag: Tag(*b"rcpi"),
            rules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_tags() {
        let catalog = TagCatalog::default();
        assert_eq!(
            catalog.classify(Tag(*b"CR07")).category,
            SectionCategory::Compressed
        );
        assert_eq!(
            catalog.classify(Tag(*b"R123")).category,
            SectionCategory::Compressed
        );
        assert_eq!(
            catalog.classify(Tag(*b"rcpi")).category,
            SectionCategory::Integrity
        );

        let info = catalog.classify(Tag(*b"cdph"));
        assert_eq!(info.category, SectionCategory::Segmented);
        assert_eq!(info.arch.and_then(Arch::bitness), Some(Bitness::Bits32));

        assert_eq!(catalog.classify(Tag(*b"zzzz")), TagInfo::default());
    }

    #[test]
    fn integrity_tag_is_configurable() {
        let catalog = TagCatalog::empty(Tag(*b"hash"));
        assert_eq!(
            catalog.classify(Tag(*b"hash")).category,
            SectionCategory::Integrity
        );
        assert_eq!(
            catalog.classify(Tag(*b"rcpi")).category,
            SectionCategory::Unknown
        );
    }

    #[test]
    fn rules_never_add_integrity_tables() {
        let mut catalog = TagCatalog {
            integrity_tag: Tag(*b"hash"),
            ..TagCatalog::default()
        };
        assert_eq!(
            catalog.classify(Tag(*b"rcpi")).category,
            SectionCategory::Unknown
        );

        catalog
            .rules
            .insert(0, TagRule::new("sums", SectionCategory::Integrity, None, "digests"));
        assert_eq!(
            catalog.classify(Tag(*b"sums")).category,
            SectionCategory::Unknown
        );
        assert_eq!(
            catalog.classify(Tag(*b"hash")).category,
            SectionCategory::Integrity
        );
    }

    #[test]
    fn loads_from_toml() {
        let catalog: TagCatalog = toml::from_str(
            r#"
            integrity_tag = "hsum"

            [[rules]]
            pattern = "X###"
            category = "segmented"
            arch = "thumb"
            "#,
        )
        .unwrap();

        assert_eq!(catalog.integrity_tag, Tag(*b"hsum"));
        let info = catalog.classify(Tag(*b"X001"));
        assert_eq!(info.category, SectionCategory::Segmented);
        assert_eq!(info.arch, Some(Arch::Thumb));
        assert_eq!(info.description, None);
    }
}

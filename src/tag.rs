//! Provides the [`Tag`] type identifying 'ftab' sections.

use serde::{
    de::{self, Unexpected, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::fmt::{self, Formatter};

/// A 4-byte section identifier.
///
/// Tags are not unique inside a file and their meaning is not validated, any 4 bytes are accepted.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    /// Returns `true` when every byte of the tag is an ASCII letter or digit.
    pub fn is_alphanumeric(&self) -> bool {
        self.0.iter().all(u8::is_ascii_alphanumeric)
    }

    /// Returns the tag as a string when it is alphanumeric.
    pub fn as_str(&self) -> Option<&str> {
        if self.is_alphanumeric() {
            std::str::from_utf8(&self.0).ok()
        } else {
            None
        }
    }

    /// Returns a name suitable for a file name: the tag itself when it is alphanumeric, otherwise
    /// its hex encoding.
    pub fn file_stem(&self) -> String {
        match self.as_str() {
            Some(s) => s.to_owned(),
            None => hex::encode(self.0),
        }
    }

    /// Matches the tag against a 4-byte pattern where `#` matches an ASCII digit and `?` matches
    /// any byte. Patterns of any other length never match.
    pub fn matches(&self, pattern: &str) -> bool {
        let pattern = pattern.as_bytes();
        pattern.len() == 4
            && self.0.iter().zip(pattern).all(|(&b, &p)| match p {
                b'#' => b.is_ascii_digit(),
                b'?' => true,
                p => b == p,
            })
    }
}

impl From<[u8; 4]> for Tag {
    fn from(value: [u8; 4]) -> Self {
        Self(value)
    }
}

impl From<&[u8; 4]> for Tag {
    fn from(value: &[u8; 4]) -> Self {
        Self(*value)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.pad(&self.0.escape_ascii().to_string())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Tag(b\"{}\")", self.0.escape_ascii())
    }
}

struct TagVisitor;

impl<'de> Visitor<'de> for TagVisitor {
    type Value = Tag;

    fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
        formatter.write_str("either a non-negative integer less than 2^32 or a 4-byte string")
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        u32::try_from(v)
            .map(|v| Tag(v.to_be_bytes()))
            .map_err(|_| E::invalid_value(Unexpected::Signed(v), &"an integer in 0..2^32"))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        u32::try_from(v)
            .map(|v| Tag(v.to_be_bytes()))
            .map_err(|_| E::invalid_value(Unexpected::Unsigned(v), &"an integer less than 2^32"))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        self.visit_bytes(v.as_bytes())
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.len() <= 4 {
            let mut tag = [0u8; 4];
            tag[..v.len()].copy_from_slice(v);
            Ok(Tag(tag))
        } else {
            Err(E::invalid_length(v.len(), &"a string of 4 bytes or less"))
        }
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TagVisitor)
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_str() {
            Some(s) => serializer.serialize_str(s),
            None => serializer.serialize_u32(u32::from_be_bytes(self.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matching() {
        let tag = Tag(*b"CR01");
        assert!(tag.matches("CR##"));
        assert!(tag.matches("C???"));
        assert!(!tag.matches("RP##"));
        assert!(!Tag(*b"RP01").matches("R###"));
        assert!(Tag(*b"R123").matches("R###"));
        assert!(!tag.matches("CR0"));
    }

    #[test]
    fn file_stem_falls_back_to_hex() {
        assert_eq!(Tag(*b"rkos").file_stem(), "rkos");
        assert_eq!(Tag([0, 1, b'a', 0xff]).file_stem(), "000161ff");
    }

    #[test]
    fn display_honours_width() {
        assert_eq!(format!("[{:6}]", Tag(*b"rkos")), "[rkos  ]");
        assert_eq!(format!("[{:>6}]", Tag(*b"bver")), "[  bver]");
        assert_eq!(format!("{}", Tag([b'a', 0, b'b', b'c'])), "a\\x00bc");
    }

    #[derive(Serialize, Deserialize)]
    struct Wrapper {
        tag: Tag,
    }

    #[test]
    fn toml_representation() {
        let text = toml::to_string(&Wrapper { tag: Tag(*b"cdpd") }).unwrap();
        assert_eq!(text.trim(), "tag = \"cdpd\"");

        let text = toml::to_string(&Wrapper { tag: Tag([0, 0, 1, 2]) }).unwrap();
        assert_eq!(text.trim(), "tag = 258");
        let back: Wrapper = toml::from_str(&text).unwrap();
        assert_eq!(back.tag, Tag([0, 0, 1, 2]));

        assert!(toml::from_str::<Wrapper>("tag = \"toolong\"").is_err());
        assert!(toml::from_str::<Wrapper>("tag = -1").is_err());
    }
}

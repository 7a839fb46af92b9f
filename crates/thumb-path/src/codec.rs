//! Canonical path encoding and thumbnail path decoding.
//!
//! A canonical path shards a name under three levels of two-character
//! directories taken from an MD5 digest of `<namespace><name>`:
//!
//! ```text
//! cat.jpg ──md5("media/image/cat.jpg")──► 88c30479… ──► 88/c3/04/cat.jpg
//! ```
//!
//! Thumbnail requests live next to their original and carry the requested
//! size in the file name: `88/c3/04/cat_100x50.jpg`, `88/c3/04/cat_100x50@2x.jpg`.

use crate::error::{Error, Result};
use md5::{Digest, Md5};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Namespace prefixed to every name before hashing.
pub const DEFAULT_NAMESPACE: &str = "media/image/";

/// Number of shard directory names per level.
pub const SHARD_COUNT: usize = 256;

/// Requested pixel density of a thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Variant {
    /// Plain `name_WxH.ext` request.
    #[default]
    Normal,
    /// High-density `name_WxH@2x.ext` request.
    Doubled,
}

impl Variant {
    fn suffix(self) -> &'static str {
        match self {
            Variant::Normal => "",
            Variant::Doubled => "@2x",
        }
    }
}

/// A decoded thumbnail request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailRequest {
    /// Name of the original the thumbnail derives from (e.g. `cat.jpg`).
    pub original_name: String,
    /// Requested width in pixels.
    pub width: u32,
    /// Requested height in pixels.
    pub height: u32,
    /// Requested density variant.
    pub variant: Variant,
}

/// A substring substitution applied to encoded paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redaction {
    pub pattern: String,
    pub replacement: String,
}

impl Redaction {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }

    /// The path segment the replacement introduces, if it is a `/seg/` form.
    fn substitute_segment(&self) -> Option<&str> {
        let segment = self
            .replacement
            .strip_prefix('/')?
            .strip_suffix('/')?;
        (!segment.is_empty() && !segment.contains('/')).then_some(segment)
    }
}

/// Encoder and decoder for canonical and thumbnail paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathCodec {
    /// Prefix hashed together with every name.
    pub namespace: String,
    /// Substitutions applied, in order, to every encoded path.
    pub redactions: Vec<Redaction>,
}

impl Default for PathCodec {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            redactions: vec![Redaction::new("/ad/", "/g0/")],
        }
    }
}

impl PathCodec {
    /// Compute the canonical, sharded storage path for `name`.
    pub fn encode(&self, name: &str) -> String {
        let digest = Md5::digest(format!("{}{}", self.namespace, name).as_bytes());
        let hex = hex::encode(digest);
        let joined = format!("{}/{}/{}/{}", &hex[0..2], &hex[2..4], &hex[4..6], name);
        self.redact(joined)
    }

    /// Decode a thumbnail request path.
    ///
    /// Returns [`Error::NoMatch`] when the path does not follow the grammar and
    /// [`Error::InvalidDimension`] when a size is zero or out of range.
    pub fn decode(&self, path: &str) -> Result<ThumbnailRequest> {
        let captures = thumbnail_pattern().captures(path).ok_or(Error::NoMatch)?;

        let group = |i: usize| captures.get(i).map(|m| m.as_str()).ok_or(Error::NoMatch);

        let stem = group(1)?;
        let width = parse_dimension(group(2)?)?;
        let height = parse_dimension(group(3)?)?;
        let variant = match captures.get(4) {
            Some(_) => Variant::Doubled,
            None => Variant::Normal,
        };
        let ext = group(5)?;

        Ok(ThumbnailRequest {
            original_name: format!("{}.{}", stem, ext),
            width,
            height,
            variant,
        })
    }

    /// Build the thumbnail request path a client would open for `name`.
    pub fn thumbnail_path(
        &self,
        name: &str,
        width: u32,
        height: u32,
        variant: Variant,
    ) -> Result<String> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidDimension(format!("{}x{}", width, height)));
        }

        let (stem, ext) = name.rsplit_once('.').ok_or(Error::NoMatch)?;
        let canonical = self.encode(name);
        let prefix = canonical.strip_suffix(name).ok_or(Error::NoMatch)?;

        let path = format!(
            "{}{}_{}x{}{}.{}",
            prefix,
            stem,
            width,
            height,
            variant.suffix(),
            ext
        );

        // Names the grammar cannot express would never round-trip.
        match self.decode(&path) {
            Ok(request) if request.original_name == name => Ok(path),
            _ => Err(Error::NoMatch),
        }
    }

    /// Segment names that redactions may place in a shard position.
    pub fn redaction_substitutes(&self) -> impl Iterator<Item = &str> {
        self.redactions.iter().filter_map(Redaction::substitute_segment)
    }

    fn redact(&self, mut path: String) -> String {
        for redaction in &self.redactions {
            if !redaction.pattern.is_empty() && path.contains(&redaction.pattern) {
                path = path.replace(&redaction.pattern, &redaction.replacement);
            }
        }
        path
    }
}

/// Whether `path` follows the thumbnail grammar.
pub fn is_thumbnail_request(path: &str) -> bool {
    thumbnail_pattern().is_match(path)
}

/// The 256 shard directory names, `00` through `ff`, in ascending order.
pub fn shard_names() -> &'static [String] {
    static NAMES: OnceLock<Vec<String>> = OnceLock::new();
    NAMES.get_or_init(|| (0..SHARD_COUNT).map(|i| format!("{:02x}", i)).collect())
}

/// Whether `segment` is one of the 256 shard names.
pub fn is_shard_name(segment: &str) -> bool {
    segment.len() == 2
        && segment
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Thumbnail grammar.
///
/// Groups: 1 stem, 2 width, 3 height, 4 optional `@2x`, 5 extension.
/// Shard segments accept any two word characters since redaction
/// substitutes can take a shard's place.
fn thumbnail_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\w{2}/\w{2}/\w{2}/([\w-]+)_(\d+)x(\d+)(@2x)?\.(\w+)$")
            .expect("thumbnail grammar is a valid regex")
    })
}

fn parse_dimension(digits: &str) -> Result<u32> {
    match digits.parse::<u32>() {
        Ok(0) | Err(_) => Err(Error::InvalidDimension(digits.to_string())),
        Ok(value) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_digest() {
        let codec = PathCodec::default();
        assert_eq!(codec.encode("cat.jpg"), "88/c3/04/cat.jpg");
        assert_eq!(codec.encode("dog.png"), "98/91/49/dog.png");
    }

    #[test]
    fn test_encode_applies_redaction() {
        // md5("media/image/img210.jpg") starts with 295fad
        let codec = PathCodec::default();
        assert_eq!(codec.encode("img210.jpg"), "29/5f/g0/img210.jpg");

        let plain = PathCodec {
            redactions: Vec::new(),
            ..PathCodec::default()
        };
        assert_eq!(plain.encode("img210.jpg"), "29/5f/ad/img210.jpg");
    }

    #[test]
    fn test_encode_respects_namespace() {
        let codec = PathCodec {
            namespace: "media/video/".to_string(),
            ..PathCodec::default()
        };
        assert_ne!(codec.encode("cat.jpg"), "88/c3/04/cat.jpg");
        assert!(codec.encode("cat.jpg").ends_with("/cat.jpg"));
    }

    #[test]
    fn test_decode_normal() {
        let request = PathCodec::default()
            .decode("88/c3/04/cat_100x50.jpg")
            .unwrap();
        assert_eq!(request.original_name, "cat.jpg");
        assert_eq!(request.width, 100);
        assert_eq!(request.height, 50);
        assert_eq!(request.variant, Variant::Normal);
    }

    #[test]
    fn test_decode_doubled() {
        let request = PathCodec::default()
            .decode("88/c3/04/my-cat_64x64@2x.png")
            .unwrap();
        assert_eq!(request.original_name, "my-cat.png");
        assert_eq!(request.variant, Variant::Doubled);
    }

    #[test]
    fn test_decode_no_match() {
        let codec = PathCodec::default();
        assert_eq!(codec.decode(""), Err(Error::NoMatch));
        assert_eq!(codec.decode("foo/bar"), Err(Error::NoMatch));
        assert_eq!(codec.decode("00/00/00/name.jpg"), Err(Error::NoMatch));
        assert_eq!(codec.decode("00/00/name_1x1.jpg"), Err(Error::NoMatch));
        assert_eq!(codec.decode("x/00/00/00/name_1x1.jpg"), Err(Error::NoMatch));
        assert_eq!(codec.decode("00/00/00/name_1x1.jpg/extra"), Err(Error::NoMatch));
    }

    #[test]
    fn test_decode_rejects_bad_dimensions() {
        let codec = PathCodec::default();
        assert!(matches!(
            codec.decode("00/00/00/name_0x10.jpg"),
            Err(Error::InvalidDimension(_))
        ));
        assert!(matches!(
            codec.decode("00/00/00/name_10x99999999999.jpg"),
            Err(Error::InvalidDimension(_))
        ));
    }

    #[test]
    fn test_is_thumbnail_request() {
        assert!(is_thumbnail_request("88/c3/04/cat_100x50.jpg"));
        assert!(is_thumbnail_request("29/5f/g0/img210_10x10@2x.jpg"));
        assert!(!is_thumbnail_request("88/c3/04/cat.jpg"));
        assert!(!is_thumbnail_request(""));
        assert!(!is_thumbnail_request("foo/bar"));
    }

    #[test]
    fn test_shard_names() {
        let names = shard_names();
        assert_eq!(names.len(), SHARD_COUNT);
        assert_eq!(names[0], "00");
        assert_eq!(names[0x0a], "0a");
        assert_eq!(names[255], "ff");
        assert!(names.iter().all(|n| is_shard_name(n)));
        assert!(std::ptr::eq(names, shard_names()));
    }

    #[test]
    fn test_is_shard_name() {
        assert!(is_shard_name("00"));
        assert!(is_shard_name("af"));
        assert!(!is_shard_name("AF"));
        assert!(!is_shard_name("g0"));
        assert!(!is_shard_name("000"));
        assert!(!is_shard_name(""));
    }

    #[test]
    fn test_thumbnail_path() {
        let codec = PathCodec::default();
        assert_eq!(
            codec.thumbnail_path("cat.jpg", 100, 50, Variant::Normal).unwrap(),
            "88/c3/04/cat_100x50.jpg"
        );
        assert_eq!(
            codec.thumbnail_path("img210.jpg", 8, 8, Variant::Doubled).unwrap(),
            "29/5f/g0/img210_8x8@2x.jpg"
        );
    }

    #[test]
    fn test_thumbnail_path_rejects_inexpressible_names() {
        let codec = PathCodec::default();
        assert_eq!(
            codec.thumbnail_path("noext", 1, 1, Variant::Normal),
            Err(Error::NoMatch)
        );
        assert_eq!(
            codec.thumbnail_path("two.dots.jpg", 1, 1, Variant::Normal),
            Err(Error::NoMatch)
        );
        assert!(matches!(
            codec.thumbnail_path("cat.jpg", 0, 1, Variant::Normal),
            Err(Error::InvalidDimension(_))
        ));
    }

    #[test]
    fn test_redaction_substitutes() {
        let codec = PathCodec::default();
        assert_eq!(codec.redaction_substitutes().collect::<Vec<_>>(), vec!["g0"]);
    }
}

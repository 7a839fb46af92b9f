use std::collections::HashSet;
use thumb_path::{is_shard_name, is_thumbnail_request, shard_names, PathCodec, Redaction, Variant};

const NAMES: &[&str] = &[
    "cat.jpg",
    "dog.png",
    "a.jpg",
    "photo-1.jpeg",
    "img210.jpg",
    "snake_case_name.gif",
    "UPPER.JPG",
    "x.webp",
];

#[test]
fn decode_recovers_every_encoded_request() {
    let codec = PathCodec::default();

    for name in NAMES {
        for (width, height) in [(1, 1), (100, 50), (50, 100), (4096, 3)] {
            for variant in [Variant::Normal, Variant::Doubled] {
                let path = codec.thumbnail_path(name, width, height, variant).unwrap();
                assert!(is_thumbnail_request(&path), "{} should match", path);

                let request = codec.decode(&path).unwrap();
                assert_eq!(request.original_name, *name);
                assert_eq!(request.width, width);
                assert_eq!(request.height, height);
                assert_eq!(request.variant, variant);
            }
        }
    }
}

#[test]
fn thumbnail_lives_beside_its_original() {
    let codec = PathCodec::default();

    for name in NAMES {
        let canonical = codec.encode(name);
        let thumbnail = codec
            .thumbnail_path(name, 10, 20, Variant::Normal)
            .unwrap();

        let (canonical_dir, _) = canonical.rsplit_once('/').unwrap();
        let (thumbnail_dir, _) = thumbnail.rsplit_once('/').unwrap();
        assert_eq!(canonical_dir, thumbnail_dir);
    }
}

#[test]
fn encode_is_deterministic() {
    let first = PathCodec::default();
    let second = PathCodec::default();

    for name in NAMES {
        assert_eq!(first.encode(name), second.encode(name));
        assert_eq!(first.encode(name), first.encode(name));
    }
}

#[test]
fn encoded_shards_are_hex_or_redaction_substitutes() {
    let codec = PathCodec::default();
    let substitutes: HashSet<&str> = codec.redaction_substitutes().collect();

    for i in 0..2000 {
        let name = format!("img{}.jpg", i);
        let encoded = codec.encode(&name);
        let segments: Vec<&str> = encoded.split('/').collect();

        assert_eq!(segments.len(), 4, "{}", encoded);
        assert_eq!(segments[3], name);
        assert!(is_shard_name(segments[0]), "{}", encoded);
        for shard in &segments[1..3] {
            assert!(
                is_shard_name(shard) || substitutes.contains(shard),
                "{}",
                encoded
            );
        }
        assert!(!encoded.contains("/ad/"), "{}", encoded);
    }
}

#[test]
fn shard_names_cover_full_byte_range() {
    let names = shard_names();
    let unique: HashSet<&String> = names.iter().collect();

    assert_eq!(names.len(), 256);
    assert_eq!(unique.len(), 256);
    for byte in 0..=255u8 {
        let expected = format!("{:02x}", byte);
        assert!(unique.contains(&expected), "missing {}", expected);
    }
    assert!(names
        .iter()
        .all(|n| n.len() == 2 && n.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())));
}

#[test]
fn non_matching_strings_are_rejected_quietly() {
    for path in [
        "",
        "foo/bar",
        "00/00/00/name.jpg",
        "00/00/00/name_x10.jpg",
        "00/00/00/name_10x.jpg",
        "/",
        "////",
        "00/00/00/_10x10.jpg",
        "00/00/00/name_10x10.",
        "00/00/00/name_10x10@3x.jpg",
    ] {
        assert!(!is_thumbnail_request(path), "{:?}", path);
        assert!(PathCodec::default().decode(path).is_err(), "{:?}", path);
    }
}

#[test]
fn codec_deserializes_with_defaults() {
    let codec: PathCodec = toml::from_str("").unwrap();
    assert_eq!(codec, PathCodec::default());

    let codec: PathCodec = toml::from_str(
        r#"
namespace = "media/avatar/"

[[redactions]]
pattern = "/ad/"
replacement = "/h1/"
"#,
    )
    .unwrap();
    assert_eq!(codec.namespace, "media/avatar/");
    assert_eq!(codec.redactions, vec![Redaction::new("/ad/", "/h1/")]);
}

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{TimeZone, Utc};
use kdbx_writer::kdbx::codec::cipher::{Aes256Cbc, ChaCha20Engine};
use kdbx_writer::kdbx::codec::kdf::{AesKdf, Argon2Kdf};
use kdbx_writer::kdbx::format::binary_pool::BinaryPool;
use kdbx_writer::kdbx::format::header::Header;
use kdbx_writer::kdbx::format::inner_header;
use kdbx_writer::kdbx::types::models::InnerStreamAlgorithm;
use kdbx_writer::kdbx::utils::{format_date, safe_xml_string};
use kdbx_writer::{
    CompositeKey, Database, KdbxError, KdbxVersion, KdfEngine, ProtectedBinary, VariantDictionary,
};
use rand::rngs::mock::StepRng;
use sha2::{Digest, Sha256};
use std::borrow::Cow;

fn database() -> Database {
    Database::new("Root", CompositeKey::from_password("pw"))
}

#[test]
fn legacy_header_field_order() {
    let mut rng = StepRng::new(1, 1);
    let header = Header::generate(&database(), KdbxVersion::V3, &Aes256Cbc, &AesKdf, &mut rng).unwrap();
    let bytes = header.serialize().unwrap().bytes;

    assert_eq!(&bytes[..4], &0x9AA2_D903u32.to_le_bytes());
    assert_eq!(&bytes[8..12], &0x0003_0001u32.to_le_bytes());

    let mut ids = Vec::new();
    let mut pos = 12;
    loop {
        let id = bytes[pos];
        let len = u16::from_le_bytes([bytes[pos + 1], bytes[pos + 2]]) as usize;
        ids.push(id);
        pos += 3 + len;
        if id == 0 {
            break;
        }
    }
    assert_eq!(pos, bytes.len());
    assert_eq!(ids, vec![2, 3, 4, 5, 6, 7, 8, 9, 10, 0]);
}

#[test]
fn modern_header_carries_kdf_dictionary() {
    let mut rng = StepRng::new(1, 1);
    let mut db = database();
    db.kdf_parameters = Some(Argon2Kdf::d().default_parameters());
    let header =
        Header::generate(&db, KdbxVersion::V4, &ChaCha20Engine, &Argon2Kdf::d(), &mut rng).unwrap();
    assert_eq!(header.encryption_iv.len(), 12);
    assert_eq!(header.inner_stream_key.len(), 64);
    assert!(header.stream_start_bytes.is_none());

    let serialized = header.serialize().unwrap();
    assert_eq!(serialized.bytes[12], 2);
    assert!(serialized.bytes.ends_with(b"\x00\x04\x00\x00\x00\r\n\r\n"));
    let expected: [u8; 32] = Sha256::digest(&serialized.bytes).into();
    assert_eq!(serialized.hash, expected);
}

#[test]
fn mismatched_kdf_engine_is_rejected() {
    let mut rng = StepRng::new(1, 1);
    let mut db = database();
    db.kdf_parameters = Some(Argon2Kdf::id().default_parameters());
    let result = Header::generate(&db, KdbxVersion::V4, &Aes256Cbc, &AesKdf, &mut rng);
    assert!(matches!(result, Err(KdbxError::KdfFailure(_))));
}

#[test]
fn inner_header_writes_stream_parameters_binaries_and_end() {
    let mut pool = BinaryPool::default();
    pool.add(&ProtectedBinary::new(vec![0xAB, 0xCD], true));

    let mut out = Vec::new();
    inner_header::write(&mut out, InnerStreamAlgorithm::ChaCha20, &[9u8; 64], &pool).unwrap();

    let expected: Vec<u8> = [
        &[1, 4, 0, 0, 0, 3, 0, 0, 0][..],
        &[2, 64, 0, 0, 0],
        &[9u8; 64],
        &[3, 3, 0, 0, 0, 0x01, 0xAB, 0xCD],
        &[0, 0, 0, 0, 0],
    ]
    .concat();
    assert_eq!(out, expected);
}

#[test]
fn equal_content_shares_a_key_and_merges_protection() {
    let mut pool = BinaryPool::default();
    let a = pool.add(&ProtectedBinary::new(b"same".to_vec(), false));
    let b = pool.add(&ProtectedBinary::new(b"other".to_vec(), false));
    let c = pool.add(&ProtectedBinary::new(b"same".to_vec(), true));
    assert_eq!((a, b, c), (0, 1, 0));
    assert_eq!(pool.len(), 2);
    assert!(pool.get(0).unwrap().is_protected());
    assert_eq!(pool.find_key(b"other"), Some(1));
    assert_eq!(pool.find_key(b"missing"), None);
}

#[test]
fn variant_dictionary_serializes_typed_items_in_insertion_order() {
    let mut dict = VariantDictionary::new();
    dict.set_u32("P", 2);
    dict.set_bytes("S", vec![0xAA, 0xBB]);

    let bytes = dict.serialize().unwrap();
    let expected: Vec<u8> = [
        &[0x00, 0x01][..],
        &[0x04, 1, 0, 0, 0, b'P', 4, 0, 0, 0, 2, 0, 0, 0],
        &[0x42, 1, 0, 0, 0, b'S', 2, 0, 0, 0, 0xAA, 0xBB],
        &[0x00],
    ]
    .concat();
    assert_eq!(bytes, expected);
    let keys: Vec<&str> = dict.iter().map(|(key, _)| key).collect();
    assert_eq!(keys, vec!["P", "S"]);
}

#[test]
fn variant_dictionary_set_replaces_existing_key() {
    let mut dict = VariantDictionary::new();
    dict.set_u64("R", 1);
    dict.set_u64("R", 2);
    assert_eq!(dict.len(), 1);
    assert_eq!(dict.get_u64("R"), Some(2));
}

#[test]
fn strips_control_characters_only() {
    assert_eq!(safe_xml_string("a\u{1}b\tc\n\r\u{FFFD}\u{1F600}"), "ab\tc\n\r\u{FFFD}\u{1F600}");
    assert!(matches!(safe_xml_string("clean"), Cow::Borrowed(_)));
    assert_eq!(safe_xml_string("\u{FFFE}\u{FFFF}\u{0}"), "");
}

#[test]
fn dates_per_dialect() {
    let date = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
    assert_eq!(format_date(&date, KdbxVersion::V3), "2020-01-02T03:04:05Z");

    let raw = STANDARD.decode(format_date(&date, KdbxVersion::V4)).unwrap();
    let seconds = i64::from_le_bytes(raw.try_into().unwrap());
    assert_eq!(seconds, date.timestamp() + 62_135_596_800);
}

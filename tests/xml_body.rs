mod common;

use chrono::{TimeZone, Utc};
use kdbx_writer::kdbx::codec::crypto::InnerStream;
use kdbx_writer::kdbx::format::binary_pool::BinaryPool;
use kdbx_writer::kdbx::format::xml::TreeSerializer;
use kdbx_writer::kdbx::types::models::InnerStreamAlgorithm;
use kdbx_writer::kdbx::utils::safe_xml_string;
use kdbx_writer::{
    AutoType, CompositeKey, CompressionAlgorithm, CustomIcon, Database, DeletedObject, Entry,
    Group, KdbxVersion, KdbxWriter, KdfParameters, ProtectedBinary, ProtectedString, Times,
};
use proptest::prelude::*;
use uuid::Uuid;

use common::*;

const PASSWORD: &str = "pw";

fn new_database(version: KdbxVersion) -> Database {
    let mut db = Database::new("Root", CompositeKey::from_password(PASSWORD));
    db.version = version;
    db.kdf_parameters = Some(KdfParameters::aes(10));
    db.compression = CompressionAlgorithm::None;
    db
}

fn render(db: &Database) -> Decoded {
    let mut out = Vec::new();
    KdbxWriter::new(db).write(&mut out).unwrap();
    decode(&out, &CompositeKey::from_password(PASSWORD))
}

/// Serializes only the XML body, with a fixed inner stream key.
fn render_body(db: &Database) -> String {
    let pool = BinaryPool::build(&db.tree);
    let mut stream = InnerStream::new(InnerStreamAlgorithm::ChaCha20, &[0u8; 64]).unwrap();
    let out = TreeSerializer::new(Vec::new(), db, &pool, KdbxVersion::V4, "test")
        .serialize(&mut stream)
        .unwrap();
    String::from_utf8(out).unwrap()
}

fn position(xml: &str, needle: &str) -> usize {
    xml.find(needle).unwrap_or_else(|| panic!("missing {}", needle))
}

#[test]
fn pool_deduplicates_across_live_and_history_entries() {
    let mut db = new_database(KdbxVersion::V4);
    let root = db.tree.root();

    let mut first = Entry::new();
    first.set_binary("a.txt", ProtectedBinary::new(b"shared".to_vec(), false));
    let mut old = first.snapshot();
    old.set_binary("a.txt", ProtectedBinary::new(b"older".to_vec(), false));
    first.push_history(old);

    let mut second = Entry::new();
    second.set_binary("b.txt", ProtectedBinary::new(b"older".to_vec(), true));
    second.set_binary("c.txt", ProtectedBinary::new(b"shared".to_vec(), false));

    db.tree.add_entry(root, first).unwrap();
    db.tree.add_entry(root, second).unwrap();

    let decoded = render(&db);
    // Document order: live "shared", then history "older". Protection is
    // merged from the second entry's protected copy.
    assert_eq!(
        decoded.binaries,
        vec![(0u8, b"shared".to_vec()), (1u8, b"older".to_vec())]
    );
    assert_eq!(decoded.xml.matches("<Value Ref=\"0\"/>").count(), 2);
    assert_eq!(decoded.xml.matches("<Value Ref=\"1\"/>").count(), 2);
}

#[test]
fn history_is_never_nested() {
    let mut db = new_database(KdbxVersion::V4);
    let root = db.tree.root();

    let mut inner = Entry::new();
    inner.push_history(Entry::new());
    let mut entry = Entry::new();
    entry.push_history(inner);
    entry.push_history(Entry::new());
    db.tree.add_entry(root, entry).unwrap();

    let xml = render(&db).xml;
    assert_eq!(xml.matches("<Entry>").count(), 3);
    assert_eq!(xml.matches("<History>").count(), 1);
    let history = &xml[position(&xml, "<History>")..position(&xml, "</History>")];
    assert!(!history["<History>".len()..].contains("History"));
}

#[test]
fn text_is_filtered_to_legal_xml_characters() {
    let mut db = new_database(KdbxVersion::V4);
    let root = db.tree.root();
    let mut entry = Entry::new();
    entry.set_string("Notes", ProtectedString::plain("a\u{1}b\tc\nd\re\u{FFFD}"));
    let units = [0x0078, 0xD800, 0x0079];
    entry.set_string("Lone", ProtectedString::from_utf16(&units, false));
    db.tree.add_entry(root, entry).unwrap();

    let xml = render(&db).xml;
    assert!(xml.contains("<Key>Notes</Key><Value>ab\tc\nd\re\u{FFFD}</Value>"));
    assert!(xml.contains("<Key>Lone</Key><Value>xy</Value>"));
    assert!(!xml.contains('\u{1}'));
}

#[test]
fn protected_values_follow_document_order() {
    let mut db = new_database(KdbxVersion::V3);
    db.compression = CompressionAlgorithm::Gzip;
    db.memory_protection.protect_username = true;
    let root = db.tree.root();
    let child = db.tree.add_group(root, Group::new("Child")).unwrap();

    let mut deep = Entry::new();
    deep.set_string("Password", ProtectedString::plain("third"));
    db.tree.add_entry(child, deep).unwrap();

    let mut top = Entry::new();
    top.set_string("UserName", ProtectedString::plain("second"));
    top.set_string("Custom", ProtectedString::protected(""));
    top.set_binary("k", ProtectedBinary::new(b"first".to_vec(), true));
    db.tree.add_entry(root, top).unwrap();

    let decoded = render(&db);
    // Meta/Binaries come before the tree; the empty protected value
    // consumes no keystream.
    assert!(decoded.xml.contains("<Binary ID=\"0\" Protected=\"True\">"));
    assert!(decoded.xml.contains("<Key>Custom</Key><Value Protected=\"True\"/>"));
    assert_eq!(
        decoded.protected_values(),
        vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]
    );
}

#[test]
fn obfuscator_is_deterministic_and_order_sensitive() {
    let key = [3u8; 32];
    let run = |values: &[&str]| {
        let mut stream = InnerStream::new(InnerStreamAlgorithm::Salsa20, &key).unwrap();
        values.iter().map(|v| stream.process(v.as_bytes())).collect::<Vec<_>>()
    };
    assert_eq!(run(&["alpha", "beta"]), run(&["alpha", "beta"]));

    let forward = run(&["alpha", "beta"]);
    let reverse = run(&["beta", "alpha"]);
    assert_ne!(forward[1], reverse[0]);

    let mut stream = InnerStream::new(InnerStreamAlgorithm::Salsa20, &key).unwrap();
    assert!(stream.process(b"").is_empty());
    assert_eq!(stream.consumed(), 0);
    assert_eq!(stream.process(b"alpha"), forward[0]);
}

#[test]
fn meta_elements_are_written_in_order() {
    let mut db = new_database(KdbxVersion::V4);
    db.meta.description = "Family vault".to_string();
    db.custom_data.insert("sync".to_string(), "on".to_string());
    db.custom_icons.push(CustomIcon { uuid: Uuid::from_u128(5), data: vec![1, 2, 3] });

    let xml = render(&db).xml;
    let order = [
        "<Meta><Generator>kdbx-writer</Generator>",
        "<DatabaseName>Root</DatabaseName>",
        "<DatabaseDescription>Family vault</DatabaseDescription>",
        "<MaintenanceHistoryDays>365</MaintenanceHistoryDays>",
        "<MemoryProtection><ProtectTitle>False</ProtectTitle>",
        "<ProtectPassword>True</ProtectPassword>",
        "<CustomIcons><Icon>",
        "<Data>AQID</Data>",
        "<RecycleBinEnabled>True</RecycleBinEnabled>",
        "<HistoryMaxItems>10</HistoryMaxItems>",
        "<CustomData><Item><Key>sync</Key><Value>on</Value></Item></CustomData></Meta>",
        "<Root><Group>",
    ];
    let positions: Vec<usize> = order.iter().map(|n| position(&xml, n)).collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{:?}", positions);
}

#[test]
fn groups_entries_and_tombstones() {
    let mut db = new_database(KdbxVersion::V3);
    let at = Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap();
    let root = db.tree.root();

    let mut group = Group::new("Work");
    group.times = Times::at(at);
    group.enable_searching = Some(false);
    let work = db.tree.add_group(root, group).unwrap();

    let mut entry = Entry::new();
    entry.times = Times::at(at);
    entry.tags = vec!["a".to_string(), "b".to_string()];
    entry.auto_type = AutoType {
        enabled: true,
        obfuscation: 1,
        default_sequence: "{USERNAME}{TAB}{PASSWORD}{ENTER}".to_string(),
        associations: vec![("Login*".to_string(), "{PASSWORD}".to_string())],
    };
    db.tree.add_entry(work, entry).unwrap();

    db.deleted_objects.push(DeletedObject { uuid: Uuid::from_u128(9), deletion_time: at });

    let xml = render(&db).xml;
    assert!(xml.contains(
        "<IsExpanded>True</IsExpanded><DefaultAutoTypeSequence/>\
         <EnableAutoType>null</EnableAutoType><EnableSearching>False</EnableSearching>"
    ));
    assert!(xml.contains(
        "<Times><LastModificationTime>2021-06-01T12:00:00Z</LastModificationTime>\
         <CreationTime>2021-06-01T12:00:00Z</CreationTime>"
    ));
    assert!(xml.contains("<Tags>a;b</Tags>"));
    assert!(xml.contains(
        "<AutoType><Enabled>True</Enabled><DataTransferObfuscation>1</DataTransferObfuscation>\
         <DefaultSequence>{USERNAME}{TAB}{PASSWORD}{ENTER}</DefaultSequence>\
         <Association><Window>Login*</Window><KeystrokeSequence>{PASSWORD}</KeystrokeSequence></Association></AutoType>"
    ));
    assert!(xml.contains(
        "</Group></Group><DeletedObjects><DeletedObject><UUID>AAAAAAAAAAAAAAAAAAAACQ==</UUID>\
         <DeletionTime>2021-06-01T12:00:00Z</DeletionTime></DeletedObject></DeletedObjects></Root>"
    ));
    assert!(xml.contains("<Binaries></Binaries>"));
}

#[test]
fn groups_nest_and_close_in_order() {
    let mut db = new_database(KdbxVersion::V4);
    let root = db.tree.root();
    let a = db.tree.add_group(root, Group::new("A")).unwrap();
    db.tree.add_group(a, Group::new("B")).unwrap();
    db.tree.add_group(root, Group::new("C")).unwrap();

    let xml = render_body(&db);
    let names: Vec<&str> = xml.match_indices("<Name>").map(|(i, _)| &xml[i + 6..i + 7]).collect();
    assert_eq!(names, vec!["R", "A", "B", "C"]);
    assert_eq!(xml.matches("<Group>").count(), 4);
    assert_eq!(xml.matches("</Group>").count(), 4);
    assert!(xml.contains("</Group></Group><Group><UUID>"));
    assert!(xml.contains("</Group><DeletedObjects></DeletedObjects></Root>"));
}

#[test]
fn policy_overrides_stored_flag_for_standard_fields() {
    let mut db = new_database(KdbxVersion::V4);
    let root = db.tree.root();
    let mut entry = Entry::new();
    entry.set_string("Password", ProtectedString::plain("secret"));
    entry.set_string("Custom", ProtectedString::protected(""));
    db.tree.add_entry(root, entry).unwrap();

    let xml = render_body(&db);
    assert!(!xml.contains("secret"));
    assert!(xml.contains("<Key>Custom</Key><Value Protected=\"True\"/>"));
}

proptest! {
    #[test]
    fn filtered_text_is_always_legal(text in any::<String>()) {
        let safe = safe_xml_string(&text);
        for c in safe.chars() {
            let legal = matches!(c,
                '\t' | '\n' | '\r'
                | '\u{20}'..='\u{D7FF}'
                | '\u{E000}'..='\u{FFFD}'
                | '\u{10000}'..='\u{10FFFF}');
            prop_assert!(legal, "illegal character {:?}", c);
        }
        let kept: String = text.chars().filter(|c| safe.contains(*c)).collect();
        prop_assert_eq!(kept, safe.into_owned());
    }
}

//! XML body serialization of the credential tree.
//!
//! The document is written in a single forward pass. Protected values are
//! obfuscated with the shared [`InnerStream`] as they are reached, so the
//! element order below is also the keystream order.
//!
//! # Document
//! ```text
//! <KeePassFile>
//!   <Meta>..</Meta>
//!   <Root>
//!     <Group>..</Group>
//!     <DeletedObjects>..</DeletedObjects>
//!   </Root>
//! </KeePassFile>
//! ```

use std::fmt::Display;
use std::io::Write;

use chrono::{DateTime, Utc};
use log::{debug, trace};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use uuid::Uuid;

use crate::kdbx::codec::compression::compress_bytes;
use crate::kdbx::codec::crypto::InnerStream;
use crate::kdbx::format::binary_pool::BinaryPool;
use crate::kdbx::types::database::Database;
use crate::kdbx::types::error::{KdbxError, Result};
use crate::kdbx::types::models::{CompressionAlgorithm, KdbxVersion, ProtectedBinary, Times};
use crate::kdbx::types::tree::{Entry, Group, GroupId, Visit};
use crate::kdbx::utils::{base64, format_date, safe_xml_string};

const TRUE: &str = "True";
const FALSE: &str = "False";
const NULL: &str = "null";

fn missing(visit: Visit) -> KdbxError {
    KdbxError::StructuralInconsistency(format!("{:?} does not belong to this tree", visit))
}

/// Writes one database as a KeePass XML document.
pub struct TreeSerializer<'a, W: Write> {
    writer: Writer<W>,
    db: &'a Database,
    pool: &'a BinaryPool,
    version: KdbxVersion,
    generator: &'a str,
    header_hash: Option<[u8; 32]>,
}

impl<'a, W: Write> TreeSerializer<'a, W> {
    pub fn new(
        inner: W,
        db: &'a Database,
        pool: &'a BinaryPool,
        version: KdbxVersion,
        generator: &'a str,
    ) -> Self {
        Self {
            writer: Writer::new(inner),
            db,
            pool,
            version,
            generator,
            header_hash: None,
        }
    }

    /// Hash of the outer header, echoed in `Meta/HeaderHash` (legacy only).
    pub fn with_header_hash(mut self, hash: [u8; 32]) -> Self {
        self.header_hash = Some(hash);
        self
    }

    /// Writes the whole document and returns the underlying writer.
    pub fn serialize(mut self, stream: &mut InnerStream) -> Result<W> {
        debug!(
            "Serializing XML: {} groups, {} entries",
            self.db.tree.num_groups(),
            self.db.tree.num_entries()
        );
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
        self.start("KeePassFile")?;
        self.write_meta(stream)?;
        self.start("Root")?;
        self.write_groups(stream)?;
        self.write_deleted_objects()?;
        self.end("Root")?;
        self.end("KeePassFile")?;
        debug!("XML done, inner stream consumed {} bytes", stream.consumed());
        Ok(self.writer.into_inner())
    }

    // Element primitives

    fn start(&mut self, name: &str) -> Result<()> {
        self.writer.write_event(Event::Start(BytesStart::new(name)))?;
        Ok(())
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    /// `<name attrs>text</name>`, or `<name attrs/>` for empty text.
    /// `text` must already be XML-safe.
    fn write_element(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<()> {
        let start = BytesStart::new(name).with_attributes(attrs.iter().copied());
        if text.is_empty() {
            self.writer.write_event(Event::Empty(start))?;
        } else {
            self.writer.write_event(Event::Start(start))?;
            self.writer.write_event(Event::Text(BytesText::new(text)))?;
            self.end(name)?;
        }
        Ok(())
    }

    fn write_text(&mut self, name: &str, text: &str) -> Result<()> {
        self.write_element(name, &[], &safe_xml_string(text))
    }

    fn write_bool(&mut self, name: &str, value: bool) -> Result<()> {
        self.write_element(name, &[], if value { TRUE } else { FALSE })
    }

    fn write_tristate(&mut self, name: &str, value: Option<bool>) -> Result<()> {
        match value {
            Some(v) => self.write_bool(name, v),
            None => self.write_element(name, &[], NULL),
        }
    }

    fn write_uuid(&mut self, name: &str, uuid: &Uuid) -> Result<()> {
        self.write_element(name, &[], &base64(uuid.as_bytes()))
    }

    fn write_date(&mut self, name: &str, date: &DateTime<Utc>) -> Result<()> {
        self.write_element(name, &[], &format_date(date, self.version))
    }

    fn write_number(&mut self, name: &str, value: impl Display) -> Result<()> {
        self.write_element(name, &[], &value.to_string())
    }

    // Meta

    fn write_meta(&mut self, stream: &mut InnerStream) -> Result<()> {
        let db = self.db;
        let meta = &db.meta;
        self.start("Meta")?;
        self.write_text("Generator", self.generator)?;
        if !self.version.is_modern() {
            if let Some(hash) = self.header_hash {
                self.write_element("HeaderHash", &[], &base64(&hash))?;
            }
        }
        self.write_text("DatabaseName", &meta.name)?;
        self.write_date("DatabaseNameChanged", &meta.name_changed)?;
        self.write_text("DatabaseDescription", &meta.description)?;
        self.write_date("DatabaseDescriptionChanged", &meta.description_changed)?;
        self.write_text("DefaultUserName", &meta.default_username)?;
        self.write_date("DefaultUserNameChanged", &meta.default_username_changed)?;
        self.write_number("MaintenanceHistoryDays", meta.maintenance_history_days)?;
        self.write_text("Color", &meta.color)?;
        self.write_date("MasterKeyChanged", &meta.master_key_changed)?;
        self.write_number("MasterKeyChangeRec", meta.master_key_change_rec)?;
        self.write_number("MasterKeyChangeForce", meta.master_key_change_force)?;

        let mp = db.memory_protection;
        self.start("MemoryProtection")?;
        self.write_bool("ProtectTitle", mp.protect_title)?;
        self.write_bool("ProtectUserName", mp.protect_username)?;
        self.write_bool("ProtectPassword", mp.protect_password)?;
        self.write_bool("ProtectURL", mp.protect_url)?;
        self.write_bool("ProtectNotes", mp.protect_notes)?;
        self.end("MemoryProtection")?;

        if !db.custom_icons.is_empty() {
            self.start("CustomIcons")?;
            for icon in &db.custom_icons {
                self.start("Icon")?;
                self.write_uuid("UUID", &icon.uuid)?;
                self.write_element("Data", &[], &base64(&icon.data))?;
                self.end("Icon")?;
            }
            self.end("CustomIcons")?;
        }

        self.write_bool("RecycleBinEnabled", meta.recycle_bin_enabled)?;
        self.write_uuid("RecycleBinUUID", &meta.recycle_bin_uuid)?;
        self.write_date("RecycleBinChanged", &meta.recycle_bin_changed)?;
        self.write_uuid("EntryTemplatesGroup", &meta.entry_templates_group)?;
        self.write_date("EntryTemplatesGroupChanged", &meta.entry_templates_group_changed)?;
        self.write_number("HistoryMaxItems", meta.history_max_items)?;
        self.write_number("HistoryMaxSize", meta.history_max_size)?;
        self.write_uuid("LastSelectedGroup", &meta.last_selected_group)?;
        self.write_uuid("LastTopVisibleGroup", &meta.last_top_visible_group)?;

        if !self.version.is_modern() {
            self.write_meta_binaries(stream)?;
        }

        self.start("CustomData")?;
        for (key, value) in &db.custom_data {
            self.start("Item")?;
            self.write_text("Key", key)?;
            self.write_text("Value", value)?;
            self.end("Item")?;
        }
        self.end("CustomData")?;

        self.end("Meta")
    }

    fn write_meta_binaries(&mut self, stream: &mut InnerStream) -> Result<()> {
        let pool = self.pool;
        self.start("Binaries")?;
        for (id, binary) in pool.iter() {
            let id = id.to_string();
            self.write_binary_value("Binary", &[("ID", id.as_str())], binary, stream)?;
        }
        self.end("Binaries")
    }

    /// Writes blob content in-line.
    ///
    /// Protected blobs are obfuscated. Otherwise legacy output gzips the
    /// blob when the database is compressed. Empty blobs have no text.
    fn write_binary_value(
        &mut self,
        name: &str,
        attrs: &[(&str, &str)],
        binary: &ProtectedBinary,
        stream: &mut InnerStream,
    ) -> Result<()> {
        let mut attrs = attrs.to_vec();
        if binary.is_empty() {
            return self.write_element(name, &attrs, "");
        }
        let text = if binary.is_protected() {
            attrs.push(("Protected", TRUE));
            base64(&stream.process(binary.data()))
        } else if !self.version.is_modern() && self.db.compression == CompressionAlgorithm::Gzip {
            attrs.push(("Compressed", TRUE));
            base64(&compress_bytes(binary.data())?)
        } else {
            base64(binary.data())
        };
        self.write_element(name, &attrs, &text)
    }

    // Root

    fn write_groups(&mut self, stream: &mut InnerStream) -> Result<()> {
        let db = self.db;
        let tree = &db.tree;
        let root = tree.root();
        let mut stack: Vec<GroupId> = vec![root];
        self.open_group(tree.group(root).ok_or_else(|| missing(Visit::Group(root)))?)?;

        for visit in tree.walk() {
            let parent = match visit {
                Visit::Group(id) => tree.group(id).map(|g| g.parent()),
                Visit::Entry(id) => tree.entry(id).map(|e| e.parent()),
            };
            let parent = parent.ok_or_else(|| missing(visit))?.ok_or_else(|| {
                KdbxError::StructuralInconsistency("Node below the root has no parent".to_string())
            })?;
            self.unwind_to(&mut stack, parent)?;
            match visit {
                Visit::Group(id) => {
                    self.open_group(tree.group(id).ok_or_else(|| missing(visit))?)?;
                    stack.push(id);
                }
                Visit::Entry(id) => {
                    self.write_entry(tree.entry(id).ok_or_else(|| missing(visit))?, true, stream)?
                }
            }
        }

        while stack.pop().is_some() {
            self.end("Group")?;
        }
        Ok(())
    }

    /// Closes open groups until `parent` is on top of the stack.
    fn unwind_to(&mut self, stack: &mut Vec<GroupId>, parent: GroupId) -> Result<()> {
        loop {
            match stack.last() {
                Some(&top) if top == parent => return Ok(()),
                Some(_) => {
                    stack.pop();
                    self.end("Group")?;
                }
                None => {
                    return Err(KdbxError::StructuralInconsistency(format!(
                        "Parent group {:?} is not an open ancestor",
                        parent
                    )))
                }
            }
        }
    }

    fn open_group(&mut self, group: &Group) -> Result<()> {
        trace!("Group '{}'", group.name);
        self.start("Group")?;
        self.write_uuid("UUID", &group.uuid)?;
        self.write_text("Name", &group.name)?;
        self.write_text("Notes", &group.notes)?;
        self.write_number("IconID", group.icon_id)?;
        if let Some(icon) = &group.custom_icon {
            self.write_uuid("CustomIconUUID", icon)?;
        }
        self.write_times(&group.times)?;
        self.write_bool("IsExpanded", group.is_expanded)?;
        self.write_text("DefaultAutoTypeSequence", &group.default_auto_type_sequence)?;
        self.write_tristate("EnableAutoType", group.enable_auto_type)?;
        self.write_tristate("EnableSearching", group.enable_searching)?;
        self.write_uuid("LastTopVisibleEntry", &group.last_top_visible_entry)
    }

    fn write_times(&mut self, times: &Times) -> Result<()> {
        self.start("Times")?;
        self.write_date("LastModificationTime", &times.last_modification)?;
        self.write_date("CreationTime", &times.creation)?;
        self.write_date("LastAccessTime", &times.last_access)?;
        self.write_date("ExpiryTime", &times.expiry)?;
        self.write_bool("Expires", times.expires)?;
        self.write_number("UsageCount", times.usage_count)?;
        self.write_date("LocationChanged", &times.location_changed)?;
        self.end("Times")
    }

    /// Writes an entry. History snapshots go through here with
    /// `with_history` off, so they never carry a `History` element.
    fn write_entry(&mut self, entry: &Entry, with_history: bool, stream: &mut InnerStream) -> Result<()> {
        trace!("Entry {}", entry.uuid);
        self.start("Entry")?;
        self.write_uuid("UUID", &entry.uuid)?;
        self.write_number("IconID", entry.icon_id)?;
        if let Some(icon) = &entry.custom_icon {
            self.write_uuid("CustomIconUUID", icon)?;
        }
        self.write_text("ForegroundColor", &entry.foreground_color)?;
        self.write_text("BackgroundColor", &entry.background_color)?;
        self.write_text("OverrideURL", &entry.override_url)?;
        self.write_text("Tags", &entry.tags.join(";"))?;
        self.write_times(&entry.times)?;

        let policy = self.db.memory_protection;
        for (key, value) in &entry.strings {
            let protect = policy.policy_for(key).unwrap_or_else(|| value.is_protected());
            self.start("String")?;
            self.write_text("Key", key)?;
            if protect {
                let hidden = stream.process(value.as_str().as_bytes());
                let text = if hidden.is_empty() { String::new() } else { base64(&hidden) };
                self.write_element("Value", &[("Protected", TRUE)], &text)?;
            } else {
                self.write_text("Value", value.as_str())?;
            }
            self.end("String")?;
        }

        for (name, binary) in &entry.binaries {
            self.start("Binary")?;
            self.write_text("Key", name)?;
            match self.pool.find_key(binary.data()) {
                Some(key) => {
                    let key = key.to_string();
                    self.write_element("Value", &[("Ref", key.as_str())], "")?;
                }
                None => self.write_binary_value("Value", &[], binary, stream)?,
            }
            self.end("Binary")?;
        }

        let auto_type = &entry.auto_type;
        self.start("AutoType")?;
        self.write_bool("Enabled", auto_type.enabled)?;
        self.write_number("DataTransferObfuscation", auto_type.obfuscation)?;
        if !auto_type.default_sequence.is_empty() {
            self.write_text("DefaultSequence", &auto_type.default_sequence)?;
        }
        for (window, sequence) in &auto_type.associations {
            self.start("Association")?;
            self.write_text("Window", window)?;
            self.write_text("KeystrokeSequence", sequence)?;
            self.end("Association")?;
        }
        self.end("AutoType")?;

        if with_history {
            self.start("History")?;
            for snapshot in entry.history() {
                self.write_entry(snapshot, false, stream)?;
            }
            self.end("History")?;
        }

        self.end("Entry")
    }

    fn write_deleted_objects(&mut self) -> Result<()> {
        let db = self.db;
        self.start("DeletedObjects")?;
        for deleted in &db.deleted_objects {
            self.start("DeletedObject")?;
            self.write_uuid("UUID", &deleted.uuid)?;
            self.write_date("DeletionTime", &deleted.deletion_time)?;
            self.end("DeletedObject")?;
        }
        self.end("DeletedObjects")
    }
}

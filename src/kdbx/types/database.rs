//! The in-memory database handed to the writer.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::kdbx::codec::cipher::AES256_UUID;
use crate::kdbx::codec::kdf::{KdfParameters, AES_KDF_UUID};
use crate::kdbx::format::variant::VariantDictionary;

use super::models::{
    CompressionAlgorithm, CustomIcon, DeletedObject, KdbxVersion, MemoryProtection,
};
use super::tree::{Group, Tree};

/// The master credentials, already reduced to the 32-byte composite hash.
///
/// Composite = SHA-256(SHA-256(password) ‖ key-file hash). Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CompositeKey([u8; 32]);

impl CompositeKey {
    /// Combines an optional password and optional key-file contents.
    ///
    /// Key files that are exactly 32 bytes are used verbatim, 64 hex
    /// characters are decoded, anything else is hashed with SHA-256.
    pub fn new(password: Option<&str>, key_file: Option<&[u8]>) -> Self {
        let mut hasher = Sha256::new();
        if let Some(password) = password {
            hasher.update(Sha256::digest(password.as_bytes()));
        }
        if let Some(data) = key_file {
            hasher.update(key_file_hash(data));
        }
        Self(hasher.finalize().into())
    }

    pub fn from_password(password: &str) -> Self {
        Self::new(Some(password), None)
    }

    /// Wraps an already-composed key.
    pub fn from_raw(key: [u8; 32]) -> Self {
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompositeKey(..)")
    }
}

fn key_file_hash(data: &[u8]) -> [u8; 32] {
    if let Ok(raw) = <[u8; 32]>::try_from(data) {
        return raw;
    }
    if data.len() == 64 {
        if let Ok(decoded) = hex::decode(data) {
            if let Ok(raw) = <[u8; 32]>::try_from(decoded.as_slice()) {
                return raw;
            }
        }
    }
    Sha256::digest(data).into()
}

/// Database-level metadata written to the XML `Meta` block.
#[derive(Debug, Clone)]
pub struct Meta {
    pub name: String,
    pub name_changed: DateTime<Utc>,
    pub description: String,
    pub description_changed: DateTime<Utc>,
    pub default_username: String,
    pub default_username_changed: DateTime<Utc>,
    pub maintenance_history_days: u32,
    pub color: String,
    pub master_key_changed: DateTime<Utc>,
    pub master_key_change_rec: i64,
    pub master_key_change_force: i64,
    pub recycle_bin_enabled: bool,
    pub recycle_bin_uuid: Uuid,
    pub recycle_bin_changed: DateTime<Utc>,
    pub entry_templates_group: Uuid,
    pub entry_templates_group_changed: DateTime<Utc>,
    pub history_max_items: i32,
    pub history_max_size: i64,
    pub last_selected_group: Uuid,
    pub last_top_visible_group: Uuid,
}

impl Default for Meta {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            name: String::new(),
            name_changed: now,
            description: String::new(),
            description_changed: now,
            default_username: String::new(),
            default_username_changed: now,
            maintenance_history_days: 365,
            color: String::new(),
            master_key_changed: now,
            master_key_change_rec: -1,
            master_key_change_force: -1,
            recycle_bin_enabled: true,
            recycle_bin_uuid: Uuid::nil(),
            recycle_bin_changed: now,
            entry_templates_group: Uuid::nil(),
            entry_templates_group_changed: now,
            history_max_items: 10,
            history_max_size: 6 * 1024 * 1024,
            last_selected_group: Uuid::nil(),
            last_top_visible_group: Uuid::nil(),
        }
    }
}

/// A complete credential database ready to be encoded.
#[derive(Debug, Clone)]
pub struct Database {
    /// Requested version. The writer may raise it, see [`Database::minimum_version`].
    pub version: KdbxVersion,
    pub cipher_id: Uuid,
    /// `None` selects AES-KDF defaults at write time.
    pub kdf_parameters: Option<KdfParameters>,
    pub compression: CompressionAlgorithm,
    pub composite_key: CompositeKey,
    pub meta: Meta,
    pub memory_protection: MemoryProtection,
    pub custom_icons: Vec<CustomIcon>,
    pub custom_data: BTreeMap<String, String>,
    /// Plaintext key/value data carried in the modern header.
    pub public_custom_data: VariantDictionary,
    pub deleted_objects: Vec<DeletedObject>,
    pub tree: Tree,
}

impl Database {
    /// An empty database with a single root group, AES-256 and gzip.
    pub fn new(root_name: impl Into<String>, composite_key: CompositeKey) -> Self {
        let root_name = root_name.into();
        let meta = Meta {
            name: root_name.clone(),
            ..Meta::default()
        };
        Self {
            version: KdbxVersion::default(),
            cipher_id: AES256_UUID,
            kdf_parameters: None,
            compression: CompressionAlgorithm::default(),
            composite_key,
            meta,
            memory_protection: MemoryProtection::default(),
            custom_icons: Vec::new(),
            custom_data: BTreeMap::new(),
            public_custom_data: VariantDictionary::new(),
            deleted_objects: Vec::new(),
            tree: Tree::new(Group::new(root_name)),
        }
    }

    /// The lowest version able to carry this database's content.
    ///
    /// The legacy header can only describe AES-KDF and has no slot for
    /// public custom data; anything else needs the modern dialect.
    pub fn minimum_version(&self) -> KdbxVersion {
        let kdf_is_aes = match &self.kdf_parameters {
            None => true,
            Some(params) => params.uuid().ok() == Some(AES_KDF_UUID),
        };
        if !kdf_is_aes || !self.public_custom_data.is_empty() {
            KdbxVersion::V4
        } else {
            KdbxVersion::V3
        }
    }

    /// The version actually written: the requested one, raised if needed.
    pub fn effective_version(&self) -> KdbxVersion {
        self.version.max(self.minimum_version())
    }
}

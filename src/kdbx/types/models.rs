//! Core value types shared by the model and the codec layers.
//!
//! This module defines:
//! - File version and dialect selection
//! - Protected values (strings and binaries)
//! - Timed metadata, autotype configuration and tombstones
//! - Algorithm identifiers used in headers

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::{KdbxError, Result};

/// First signature word of every KDBX 2.x+ file.
pub const FILE_SIGNATURE_1: u32 = 0x9AA2_D903;
/// Second signature word identifying the KDBX 2.x+ family.
pub const FILE_SIGNATURE_2: u32 = 0xB54B_FB67;

const FILE_VERSION_CRITICAL_MASK: u32 = 0xFFFF_0000;
const FILE_VERSION_32_3: u32 = 0x0003_0001;
const FILE_VERSION_32_4: u32 = 0x0004_0000;

/// Container format version. The two variants are the two dialects.
///
/// - `V3`: the legacy dialect (KDBX 3.1). Hashed blocks, Salsa20 inner
///   stream, ISO-8601 dates, binaries inside the XML `Meta` block.
/// - `V4`: the modern dialect (KDBX 4.0). HMAC blocks, ChaCha20 inner
///   stream, base64 second-count dates, binaries in the inner header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum KdbxVersion {
    V3,
    #[default]
    V4,
}

impl KdbxVersion {
    /// The 32-bit version word written after the signature.
    pub const fn raw(self) -> u32 {
        match self {
            KdbxVersion::V3 => FILE_VERSION_32_3,
            KdbxVersion::V4 => FILE_VERSION_32_4,
        }
    }

    /// Whether this version uses the modern (4.x) layout.
    pub const fn is_modern(self) -> bool {
        matches!(self, KdbxVersion::V4)
    }
}

impl TryFrom<u32> for KdbxVersion {
    type Error = KdbxError;
    fn try_from(v: u32) -> Result<Self> {
        let major = v & FILE_VERSION_CRITICAL_MASK;
        if major < (FILE_VERSION_32_3 & FILE_VERSION_CRITICAL_MASK) {
            Err(KdbxError::UnsupportedVersion(v))
        } else if major < FILE_VERSION_32_4 {
            Ok(Self::V3)
        } else if major == FILE_VERSION_32_4 {
            Ok(Self::V4)
        } else {
            Err(KdbxError::UnsupportedVersion(v))
        }
    }
}

/// Compression applied to the plaintext body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionAlgorithm {
    None,
    #[default]
    Gzip,
}

impl CompressionAlgorithm {
    /// Value of the `CompressionFlags` header field.
    pub const fn flag(self) -> u32 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Gzip => 1,
        }
    }
}

/// Keystream used to obfuscate protected values inside the XML body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerStreamAlgorithm {
    Salsa20,
    ChaCha20,
}

impl InnerStreamAlgorithm {
    /// Identifier written to the header (legacy) or inner header (modern).
    pub const fn id(self) -> u32 {
        match self {
            InnerStreamAlgorithm::Salsa20 => 2,
            InnerStreamAlgorithm::ChaCha20 => 3,
        }
    }

    /// Length of the random key drawn for each write.
    pub const fn key_length(self) -> usize {
        match self {
            InnerStreamAlgorithm::Salsa20 => 32,
            InnerStreamAlgorithm::ChaCha20 => 64,
        }
    }

    /// The algorithm each dialect mandates.
    pub const fn for_version(version: KdbxVersion) -> Self {
        match version {
            KdbxVersion::V3 => InnerStreamAlgorithm::Salsa20,
            KdbxVersion::V4 => InnerStreamAlgorithm::ChaCha20,
        }
    }
}

impl TryFrom<u32> for InnerStreamAlgorithm {
    type Error = KdbxError;
    fn try_from(value: u32) -> Result<Self> {
        match value {
            2 => Ok(Self::Salsa20),
            3 => Ok(Self::ChaCha20),
            _ => Err(KdbxError::UnsupportedInnerStream(value)),
        }
    }
}

/// A string value plus its protect-in-memory flag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProtectedString {
    value: String,
    protected: bool,
}

impl ProtectedString {
    pub fn new(value: impl Into<String>, protected: bool) -> Self {
        Self { value: value.into(), protected }
    }

    /// A value that is obfuscated in the output.
    pub fn protected(value: impl Into<String>) -> Self {
        Self::new(value, true)
    }

    /// A value written as plain text.
    pub fn plain(value: impl Into<String>) -> Self {
        Self::new(value, false)
    }

    /// Builds a value from UTF-16 code units, dropping unpaired surrogates.
    ///
    /// Host platforms that store text as UTF-16 can hold lone surrogates,
    /// which are not legal XML characters and not representable in `str`.
    pub fn from_utf16(units: &[u16], protected: bool) -> Self {
        let value = char::decode_utf16(units.iter().copied())
            .filter_map(|c| c.ok())
            .collect::<String>();
        Self { value, protected }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// An attachment blob plus its protect flag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProtectedBinary {
    data: Vec<u8>,
    protected: bool,
}

impl ProtectedBinary {
    pub fn new(data: impl Into<Vec<u8>>, protected: bool) -> Self {
        Self { data: data.into(), protected }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    pub(crate) fn set_protected(&mut self, protected: bool) {
        self.protected = protected;
    }
}

/// Creation, modification, access and expiry bookkeeping for a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Times {
    pub creation: DateTime<Utc>,
    pub last_modification: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub expires: bool,
    pub usage_count: u64,
    pub location_changed: DateTime<Utc>,
}

impl Times {
    /// All timestamps set to `at`, not expiring, never used.
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            creation: at,
            last_modification: at,
            last_access: at,
            expiry: at,
            expires: false,
            usage_count: 0,
            location_changed: at,
        }
    }
}

impl Default for Times {
    fn default() -> Self {
        Self::at(Utc::now())
    }
}

/// Autotype configuration of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoType {
    pub enabled: bool,
    pub obfuscation: u32,
    pub default_sequence: String,
    /// Window title pattern → keystroke sequence, in declaration order.
    pub associations: Vec<(String, String)>,
}

impl Default for AutoType {
    fn default() -> Self {
        Self {
            enabled: true,
            obfuscation: 0,
            default_sequence: String::new(),
            associations: Vec::new(),
        }
    }
}

/// Database-wide protect-by-default flags for the five standard fields.
///
/// For entry fields with these names, the policy overrides the value's own
/// flag at serialization time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryProtection {
    pub protect_title: bool,
    pub protect_username: bool,
    pub protect_password: bool,
    pub protect_url: bool,
    pub protect_notes: bool,
}

impl Default for MemoryProtection {
    fn default() -> Self {
        Self {
            protect_title: false,
            protect_username: false,
            protect_password: true,
            protect_url: false,
            protect_notes: false,
        }
    }
}

pub const FIELD_TITLE: &str = "Title";
pub const FIELD_USERNAME: &str = "UserName";
pub const FIELD_PASSWORD: &str = "Password";
pub const FIELD_URL: &str = "URL";
pub const FIELD_NOTES: &str = "Notes";

impl MemoryProtection {
    /// Policy override for a standard field name, `None` for any other field.
    pub fn policy_for(&self, field: &str) -> Option<bool> {
        match field {
            FIELD_TITLE => Some(self.protect_title),
            FIELD_USERNAME => Some(self.protect_username),
            FIELD_PASSWORD => Some(self.protect_password),
            FIELD_URL => Some(self.protect_url),
            FIELD_NOTES => Some(self.protect_notes),
            _ => None,
        }
    }
}

/// Tombstone recording a prior deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedObject {
    pub uuid: Uuid,
    pub deletion_time: DateTime<Utc>,
}

/// A user-supplied icon referenced by groups and entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomIcon {
    pub uuid: Uuid,
    pub data: Vec<u8>,
}

//! Variant dictionary: the typed key/value map used for KDF parameters and
//! public custom data in the modern header.
//!
//! # Layout
//! ```text
//! [2 bytes] version (u16 LE, 0x0100)
//! repeated:
//!   [1 byte]  value type
//!   [4 bytes] name length (i32 LE)   [N bytes] name (UTF-8)
//!   [4 bytes] value length (i32 LE)  [M bytes] value
//! [1 byte]  terminator (0x00)
//! ```

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::kdbx::types::error::{KdbxError, Result};

const VARIANT_DICTIONARY_VERSION: u16 = 0x0100;

const TYPE_END: u8 = 0x00;
const TYPE_UINT32: u8 = 0x04;
const TYPE_UINT64: u8 = 0x05;
const TYPE_BOOL: u8 = 0x08;
const TYPE_INT32: u8 = 0x0C;
const TYPE_INT64: u8 = 0x0D;
const TYPE_STRING: u8 = 0x18;
const TYPE_BYTE_ARRAY: u8 = 0x42;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantValue {
    UInt32(u32),
    UInt64(u64),
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
    ByteArray(Vec<u8>),
}

impl VariantValue {
    fn type_id(&self) -> u8 {
        match self {
            VariantValue::UInt32(_) => TYPE_UINT32,
            VariantValue::UInt64(_) => TYPE_UINT64,
            VariantValue::Bool(_) => TYPE_BOOL,
            VariantValue::Int32(_) => TYPE_INT32,
            VariantValue::Int64(_) => TYPE_INT64,
            VariantValue::String(_) => TYPE_STRING,
            VariantValue::ByteArray(_) => TYPE_BYTE_ARRAY,
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            VariantValue::UInt32(v) => v.to_le_bytes().to_vec(),
            VariantValue::UInt64(v) => v.to_le_bytes().to_vec(),
            VariantValue::Bool(v) => vec![u8::from(*v)],
            VariantValue::Int32(v) => v.to_le_bytes().to_vec(),
            VariantValue::Int64(v) => v.to_le_bytes().to_vec(),
            VariantValue::String(v) => v.as_bytes().to_vec(),
            VariantValue::ByteArray(v) => v.clone(),
        }
    }
}

/// Insertion-ordered typed map. Setting an existing key replaces it in place.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VariantDictionary {
    items: Vec<(String, VariantValue)>,
}

impl VariantDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn get(&self, key: &str) -> Option<&VariantValue> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn set(&mut self, key: impl Into<String>, value: VariantValue) {
        let key = key.into();
        match self.items.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.items.push((key, value)),
        }
    }

    pub fn set_u32(&mut self, key: impl Into<String>, value: u32) {
        self.set(key, VariantValue::UInt32(value));
    }

    pub fn set_u64(&mut self, key: impl Into<String>, value: u64) {
        self.set(key, VariantValue::UInt64(value));
    }

    pub fn set_bytes(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.set(key, VariantValue::ByteArray(value.into()));
    }

    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set(key, VariantValue::String(value.into()));
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        match self.get(key) {
            Some(VariantValue::UInt32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key) {
            Some(VariantValue::UInt64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.get(key) {
            Some(VariantValue::ByteArray(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VariantValue)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Serializes the dictionary in its wire layout.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.write_u16::<LittleEndian>(VARIANT_DICTIONARY_VERSION)?;
        for (name, value) in self.iter() {
            let encoded = value.encode();
            out.write_u8(value.type_id())?;
            out.write_i32::<LittleEndian>(length_i32(name.len(), "variant name")?)?;
            out.write_all(name.as_bytes())?;
            out.write_i32::<LittleEndian>(length_i32(encoded.len(), "variant value")?)?;
            out.write_all(&encoded)?;
        }
        out.write_u8(TYPE_END)?;
        Ok(out)
    }
}

pub(crate) fn length_i32(len: usize, context: &str) -> Result<i32> {
    i32::try_from(len)
        .map_err(|_| KdbxError::InvalidFormat(format!("{} too long: {} bytes", context, len)))
}

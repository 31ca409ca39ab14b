//! # kdbx-writer
//!
//! An encoder for KeePass KDBX password databases.
//! Writes both the legacy (3.1) and modern (4.x) dialects, with AES-256 or
//! ChaCha20 encryption and AES-KDF or Argon2 key derivation.
pub mod kdbx;

// Re-export the main types for convenience
pub use kdbx::{
    KdbxError,
    KdbxWriter,
    Result,
    WriterConfig,
    codec::{
        cipher::{CipherEngine, CipherRegistry, AES256_UUID, CHACHA20_UUID},
        kdf::{KdfEngine, KdfParameters, KdfRegistry, AES_KDF_UUID, ARGON2D_UUID, ARGON2ID_UUID},
    },
    format::variant::{VariantDictionary, VariantValue},
    types::{
        database::{CompositeKey, Database, Meta},
        models::{
            AutoType,
            CompressionAlgorithm,
            CustomIcon,
            DeletedObject,
            KdbxVersion,
            MemoryProtection,
            ProtectedBinary,
            ProtectedString,
            Times,
        },
        tree::{Entry, EntryId, Group, GroupId, Tree},
    },
};

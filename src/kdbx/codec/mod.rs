//! Codec layer for encryption, key derivation and compression.
//!
//! # Submodules
//!
//! - [`cipher`][]: Data ciphers (AES-256-CBC, ChaCha20) and the encrypting writer
//! - [`kdf`][]: Key derivation (AES-KDF, Argon2d, Argon2id)
//! - [`crypto`][]: Keystreams, inner stream obfuscation, key schedule
//! - [`compression`][]: Gzip stage

pub mod cipher;
pub mod compression;
pub mod crypto;
pub mod kdf;

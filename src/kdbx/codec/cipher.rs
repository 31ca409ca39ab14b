//! Data cipher capabilities and the encrypting stream adapter.
//!
//! A cipher is reached only through [`CipherEngine`], looked up by the
//! UUID stored in the database. The built-in registry knows:
//! - AES-256 in CBC mode with PKCS#7 padding (16-byte IV)
//! - ChaCha20 (12-byte IV)

use std::collections::HashMap;
use std::io::{self, Write};

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes256;
use log::{debug, trace};
use uuid::Uuid;

use crate::kdbx::types::error::{KdbxError, Result};

use super::crypto::ChaCha20;

/// AES-256 (CBC, PKCS#7).
pub const AES256_UUID: Uuid = Uuid::from_u128(0x31C1_F2E6_BF71_4350_BE58_0521_6AFC_5AFF);
/// ChaCha20 (RFC 7539).
pub const CHACHA20_UUID: Uuid = Uuid::from_u128(0xD603_8A2B_8B6F_4CB5_A524_339A_31DB_B59A);

const AES_BLOCK_SIZE: usize = 16;

/// A running encryption transform.
pub trait Encryptor {
    /// Encrypts `input`, appending whatever ciphertext is ready to `output`.
    fn update(&mut self, input: &[u8], output: &mut Vec<u8>);

    /// Flushes buffered state (padding for block ciphers) into `output`.
    fn finalize(&mut self, output: &mut Vec<u8>);
}

/// A symmetric cipher algorithm the writer can encrypt the body with.
pub trait CipherEngine {
    fn uuid(&self) -> Uuid;

    fn name(&self) -> &'static str;

    /// Length of the random IV drawn for each write.
    fn iv_length(&self) -> usize;

    /// Builds an encryptor for `key` and `iv`.
    fn encryptor(&self, key: &[u8; 32], iv: &[u8]) -> Result<Box<dyn Encryptor>>;
}

/// AES-256-CBC engine.
pub struct Aes256Cbc;

impl CipherEngine for Aes256Cbc {
    fn uuid(&self) -> Uuid {
        AES256_UUID
    }

    fn name(&self) -> &'static str {
        "AES-256"
    }

    fn iv_length(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn encryptor(&self, key: &[u8; 32], iv: &[u8]) -> Result<Box<dyn Encryptor>> {
        let prev: [u8; AES_BLOCK_SIZE] = iv.try_into().map_err(|_| {
            KdbxError::InvalidFormat(format!("AES-CBC needs a 16-byte IV, got {} bytes", iv.len()))
        })?;
        Ok(Box::new(AesCbcEncryptor {
            cipher: Aes256::new(GenericArray::from_slice(key)),
            prev,
            pending: Vec::with_capacity(AES_BLOCK_SIZE),
        }))
    }
}

struct AesCbcEncryptor {
    cipher: Aes256,
    prev: [u8; AES_BLOCK_SIZE],
    pending: Vec<u8>,
}

impl AesCbcEncryptor {
    fn encrypt_block(&mut self, plain: &[u8], output: &mut Vec<u8>) {
        let mut block = GenericArray::clone_from_slice(plain);
        for (b, p) in block.iter_mut().zip(self.prev.iter()) {
            *b ^= p;
        }
        self.cipher.encrypt_block(&mut block);
        self.prev.copy_from_slice(&block);
        output.extend_from_slice(&block);
    }
}

impl Encryptor for AesCbcEncryptor {
    fn update(&mut self, mut input: &[u8], output: &mut Vec<u8>) {
        if !self.pending.is_empty() {
            let take = (AES_BLOCK_SIZE - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.pending.len() < AES_BLOCK_SIZE {
                return;
            }
            let block = std::mem::take(&mut self.pending);
            self.encrypt_block(&block, output);
        }
        let mut chunks = input.chunks_exact(AES_BLOCK_SIZE);
        for chunk in chunks.by_ref() {
            self.encrypt_block(chunk, output);
        }
        self.pending.extend_from_slice(chunks.remainder());
    }

    fn finalize(&mut self, output: &mut Vec<u8>) {
        // PKCS#7 always adds padding, a full block when already aligned.
        let pad = AES_BLOCK_SIZE - self.pending.len();
        let mut last = std::mem::take(&mut self.pending);
        last.resize(AES_BLOCK_SIZE, pad as u8);
        self.encrypt_block(&last, output);
    }
}

/// ChaCha20 engine. Uses the final key directly and the IV as nonce.
pub struct ChaCha20Engine;

impl CipherEngine for ChaCha20Engine {
    fn uuid(&self) -> Uuid {
        CHACHA20_UUID
    }

    fn name(&self) -> &'static str {
        "ChaCha20"
    }

    fn iv_length(&self) -> usize {
        12
    }

    fn encryptor(&self, key: &[u8; 32], iv: &[u8]) -> Result<Box<dyn Encryptor>> {
        let nonce: [u8; 12] = iv.try_into().map_err(|_| {
            KdbxError::InvalidFormat(format!("ChaCha20 needs a 12-byte IV, got {} bytes", iv.len()))
        })?;
        Ok(Box::new(ChaCha20Encryptor(ChaCha20::new(key, &nonce))))
    }
}

struct ChaCha20Encryptor(ChaCha20);

impl Encryptor for ChaCha20Encryptor {
    fn update(&mut self, input: &[u8], output: &mut Vec<u8>) {
        let start = output.len();
        output.extend_from_slice(input);
        self.0.apply_keystream(&mut output[start..]);
    }

    fn finalize(&mut self, _output: &mut Vec<u8>) {}
}

/// Cipher engines keyed by UUID.
pub struct CipherRegistry {
    engines: HashMap<Uuid, Box<dyn CipherEngine>>,
}

impl CipherRegistry {
    /// A registry with no engines at all.
    pub fn empty() -> Self {
        Self { engines: HashMap::new() }
    }

    /// Adds or replaces the engine for its UUID.
    pub fn register(&mut self, engine: Box<dyn CipherEngine>) {
        debug!("Registering cipher engine {} ({})", engine.name(), engine.uuid());
        self.engines.insert(engine.uuid(), engine);
    }

    /// Looks up the engine for `uuid`.
    pub fn get(&self, uuid: &Uuid) -> Result<&dyn CipherEngine> {
        self.engines
            .get(uuid)
            .map(|e| e.as_ref())
            .ok_or(KdbxError::UnsupportedCipher(*uuid))
    }
}

impl Default for CipherRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(Aes256Cbc));
        registry.register(Box::new(ChaCha20Engine));
        registry
    }
}

/// Encrypts everything written through it before passing it on.
///
/// Must be closed with [`CipherWriter::finish`] so block ciphers can emit
/// their padding.
pub struct CipherWriter<W: Write> {
    inner: W,
    encryptor: Box<dyn Encryptor>,
    scratch: Vec<u8>,
}

impl<W: Write> CipherWriter<W> {
    pub fn new(inner: W, encryptor: Box<dyn Encryptor>) -> Self {
        Self { inner, encryptor, scratch: Vec::new() }
    }

    /// Writes the final ciphertext and returns the wrapped writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.scratch.clear();
        self.encryptor.finalize(&mut self.scratch);
        trace!("Cipher stream finalized with {} trailing bytes", self.scratch.len());
        self.inner.write_all(&self.scratch)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for CipherWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scratch.clear();
        self.encryptor.update(buf, &mut self.scratch);
        self.inner.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

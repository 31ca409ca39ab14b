//! Keystream ciphers and key schedule for KDBX output.
//!
//! This module implements:
//! - Salsa20/20 and ChaCha20 keystream generators
//! - The inner random stream used to obfuscate protected XML values
//! - Master key expansion (final cipher key, HMAC base key, per-block keys)

use byteorder::{ByteOrder, LittleEndian};
use hmac::{Hmac, Mac};
use log::{debug, trace};
use sha2::{Digest, Sha256, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::kdbx::types::error::{KdbxError, Result};
use crate::kdbx::types::models::InnerStreamAlgorithm;

type HmacSha256 = Hmac<Sha256>;

/// Fixed nonce of the legacy Salsa20 inner stream.
const SALSA20_INNER_NONCE: [u8; 8] = [0xE8, 0x30, 0x09, 0x4B, 0x97, 0x20, 0x5D, 0x2A];

/// "expand 32-byte k" as 32-bit little-endian words.
const SIGMA: [u32; 4] = [0x6170_7865, 0x3320_646e, 0x7962_2d32, 0x6b20_6574];

/// Salsa20/20 keystream with a 256-bit key and 64-bit nonce.
///
/// # State Matrix
/// ```text
/// [c0, k0, k1, k2]
/// [k3, c1, n0, n1]
/// [t0, t1, c2, k4]
/// [k5, k6, k7, c3]
/// ```
/// `t0..t1` is the 64-bit block counter, starting at zero.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Salsa20 {
    state: [u32; 16],
    block: [u8; 64],
    offset: usize,
}

impl Salsa20 {
    pub fn new(key: &[u8; 32], nonce: &[u8; 8]) -> Self {
        let mut state = [0u32; 16];
        state[0] = SIGMA[0];
        state[5] = SIGMA[1];
        state[10] = SIGMA[2];
        state[15] = SIGMA[3];
        for i in 0..4 {
            state[1 + i] = LittleEndian::read_u32(&key[i * 4..]);
            state[11 + i] = LittleEndian::read_u32(&key[16 + i * 4..]);
        }
        state[6] = LittleEndian::read_u32(&nonce[0..4]);
        state[7] = LittleEndian::read_u32(&nonce[4..8]);
        Self { state, block: [0u8; 64], offset: 64 }
    }

    fn refill(&mut self) {
        let mut x = self.state;
        for _ in 0..10 {
            // Column rounds
            salsa_quarter_round(&mut x, 0, 4, 8, 12);
            salsa_quarter_round(&mut x, 5, 9, 13, 1);
            salsa_quarter_round(&mut x, 10, 14, 2, 6);
            salsa_quarter_round(&mut x, 15, 3, 7, 11);
            // Row rounds
            salsa_quarter_round(&mut x, 0, 1, 2, 3);
            salsa_quarter_round(&mut x, 5, 6, 7, 4);
            salsa_quarter_round(&mut x, 10, 11, 8, 9);
            salsa_quarter_round(&mut x, 15, 12, 13, 14);
        }
        for (i, word) in x.iter().enumerate() {
            LittleEndian::write_u32(&mut self.block[i * 4..], word.wrapping_add(self.state[i]));
        }
        let counter = (u64::from(self.state[9]) << 32 | u64::from(self.state[8])).wrapping_add(1);
        self.state[8] = counter as u32;
        self.state[9] = (counter >> 32) as u32;
        self.offset = 0;
    }

    /// XORs the next `data.len()` keystream bytes into `data`.
    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            if self.offset == 64 {
                self.refill();
            }
            *byte ^= self.block[self.offset];
            self.offset += 1;
        }
    }
}

#[inline(always)]
fn salsa_quarter_round(x: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    x[b] ^= x[a].wrapping_add(x[d]).rotate_left(7);
    x[c] ^= x[b].wrapping_add(x[a]).rotate_left(9);
    x[d] ^= x[c].wrapping_add(x[b]).rotate_left(13);
    x[a] ^= x[d].wrapping_add(x[c]).rotate_left(18);
}

/// ChaCha20 keystream in the RFC 7539 layout (96-bit nonce, 32-bit counter).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ChaCha20 {
    state: [u32; 16],
    block: [u8; 64],
    offset: usize,
}

impl ChaCha20 {
    pub fn new(key: &[u8; 32], nonce: &[u8; 12]) -> Self {
        Self::with_counter(key, nonce, 0)
    }

    pub fn with_counter(key: &[u8; 32], nonce: &[u8; 12], counter: u32) -> Self {
        let mut state = [0u32; 16];
        state[..4].copy_from_slice(&SIGMA);
        for i in 0..8 {
            state[4 + i] = LittleEndian::read_u32(&key[i * 4..]);
        }
        state[12] = counter;
        for i in 0..3 {
            state[13 + i] = LittleEndian::read_u32(&nonce[i * 4..]);
        }
        Self { state, block: [0u8; 64], offset: 64 }
    }

    fn refill(&mut self) {
        let mut x = self.state;
        for _ in 0..10 {
            chacha_quarter_round(&mut x, 0, 4, 8, 12);
            chacha_quarter_round(&mut x, 1, 5, 9, 13);
            chacha_quarter_round(&mut x, 2, 6, 10, 14);
            chacha_quarter_round(&mut x, 3, 7, 11, 15);
            chacha_quarter_round(&mut x, 0, 5, 10, 15);
            chacha_quarter_round(&mut x, 1, 6, 11, 12);
            chacha_quarter_round(&mut x, 2, 7, 8, 13);
            chacha_quarter_round(&mut x, 3, 4, 9, 14);
        }
        for (i, word) in x.iter().enumerate() {
            LittleEndian::write_u32(&mut self.block[i * 4..], word.wrapping_add(self.state[i]));
        }
        self.state[12] = self.state[12].wrapping_add(1);
        self.offset = 0;
    }

    /// XORs the next `data.len()` keystream bytes into `data`.
    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            if self.offset == 64 {
                self.refill();
            }
            *byte ^= self.block[self.offset];
            self.offset += 1;
        }
    }
}

#[inline(always)]
fn chacha_quarter_round(x: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    x[a] = x[a].wrapping_add(x[b]);
    x[d] = (x[d] ^ x[a]).rotate_left(16);
    x[c] = x[c].wrapping_add(x[d]);
    x[b] = (x[b] ^ x[c]).rotate_left(12);
    x[a] = x[a].wrapping_add(x[b]);
    x[d] = (x[d] ^ x[a]).rotate_left(8);
    x[c] = x[c].wrapping_add(x[d]);
    x[b] = (x[b] ^ x[c]).rotate_left(7);
}

enum Keystream {
    Salsa20(Salsa20),
    ChaCha20(ChaCha20),
}

/// The shared obfuscation stream for protected values.
///
/// One instance lives for exactly one write call. Every protected value
/// consumes keystream in document order, so the order in which values are
/// passed to [`InnerStream::process`] is part of the file format.
pub struct InnerStream {
    keystream: Keystream,
    consumed: u64,
}

impl InnerStream {
    /// Keys the stream from the random inner key stored in the header.
    ///
    /// - Salsa20: key = SHA-256(inner key), fixed nonce.
    /// - ChaCha20: SHA-512(inner key) split into a 32-byte key and 12-byte nonce.
    pub fn new(algorithm: InnerStreamAlgorithm, inner_key: &[u8]) -> Result<Self> {
        debug!("Initializing {:?} inner stream ({} byte key)", algorithm, inner_key.len());
        let keystream = match algorithm {
            InnerStreamAlgorithm::Salsa20 => {
                let mut key: [u8; 32] = Sha256::digest(inner_key).into();
                let stream = Salsa20::new(&key, &SALSA20_INNER_NONCE);
                key.zeroize();
                Keystream::Salsa20(stream)
            }
            InnerStreamAlgorithm::ChaCha20 => {
                let mut hash = Sha512::digest(inner_key);
                let key: [u8; 32] = hash[..32]
                    .try_into()
                    .map_err(|_| KdbxError::InvalidFormat("Inner stream key split failed".to_string()))?;
                let nonce: [u8; 12] = hash[32..44]
                    .try_into()
                    .map_err(|_| KdbxError::InvalidFormat("Inner stream nonce split failed".to_string()))?;
                let stream = ChaCha20::new(&key, &nonce);
                hash.as_mut_slice().zeroize();
                Keystream::ChaCha20(stream)
            }
        };
        Ok(Self { keystream, consumed: 0 })
    }

    /// Total keystream bytes consumed so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// XORs `data` in place with the next keystream bytes.
    pub fn apply(&mut self, data: &mut [u8]) {
        trace!("Inner stream: obfuscating {} bytes at offset {}", data.len(), self.consumed);
        match &mut self.keystream {
            Keystream::Salsa20(s) => s.apply_keystream(data),
            Keystream::ChaCha20(c) => c.apply_keystream(data),
        }
        self.consumed += data.len() as u64;
    }

    /// Returns `data` XORed with the next keystream bytes.
    pub fn process(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.apply(&mut out);
        out
    }
}

/// Keys derived from the master seed and the transformed credentials.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKeys {
    /// Key for the data cipher: SHA-256(seed ‖ transformed).
    pub cipher_key: [u8; 32],
    /// Base for block and header HMAC keys: SHA-512(seed ‖ transformed ‖ 0x01).
    pub hmac_key: [u8; 64],
}

impl MasterKeys {
    pub fn derive(master_seed: &[u8], transformed_key: &[u8; 32]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(master_seed);
        hasher.update(transformed_key);
        let cipher_key: [u8; 32] = hasher.finalize().into();

        let mut hasher = Sha512::new();
        hasher.update(master_seed);
        hasher.update(transformed_key);
        hasher.update([0x01]);
        let mut hmac_key = [0u8; 64];
        hmac_key.copy_from_slice(&hasher.finalize());

        Self { cipher_key, hmac_key }
    }
}

/// Block index whose key authenticates the header instead of a body block.
pub const HEADER_HMAC_INDEX: u64 = u64::MAX;

/// Per-block HMAC key: SHA-512(LE64(index) ‖ hmac base key).
pub fn block_hmac_key(hmac_key: &[u8; 64], index: u64) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(index.to_le_bytes());
    hasher.update(hmac_key);
    let mut key = [0u8; 64];
    key.copy_from_slice(&hasher.finalize());
    key
}

/// HMAC-SHA-256 over the concatenation of `parts`.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| KdbxError::InvalidFormat(format!("Invalid HMAC key: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time check of an HMAC-SHA-256 tag over the concatenation of `parts`.
pub fn verify_hmac_sha256(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> Result<bool> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| KdbxError::InvalidFormat(format!("Invalid HMAC key: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.verify_slice(tag).is_ok())
}

/// HMAC over the serialized header bytes, keyed with the sentinel index.
pub fn header_hmac(hmac_key: &[u8; 64], header_bytes: &[u8]) -> Result<[u8; 32]> {
    let mut key = block_hmac_key(hmac_key, HEADER_HMAC_INDEX);
    let tag = hmac_sha256(&key, &[header_bytes]);
    key.zeroize();
    tag
}

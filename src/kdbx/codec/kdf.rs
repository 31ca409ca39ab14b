//! Key derivation: turning the composite key into the transformed key.
//!
//! Parameters travel as a variant dictionary whose `$UUID` item names the
//! algorithm. Engines are looked up by that UUID in a [`KdfRegistry`].
//!
//! # Built-in engines
//! - AES-KDF: `R` rounds of AES-256-ECB keyed with the 32-byte seed `S`,
//!   applied to each half of the key, followed by SHA-256.
//! - Argon2d / Argon2id: salt `S`, parallelism `P`, memory `M` (bytes),
//!   iterations `I`, version `V`, and the optional secret `K` and
//!   associated data `A`.

use std::collections::HashMap;

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes256;
use argon2::{Algorithm, Argon2, AssociatedData, ParamsBuilder, Version};
use log::debug;
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::kdbx::format::variant::VariantDictionary;
use crate::kdbx::types::error::{KdbxError, Result};

pub const AES_KDF_UUID: Uuid = Uuid::from_u128(0xC9D9_F39A_628A_4460_BF74_0D08_C18A_4FEA);
pub const ARGON2D_UUID: Uuid = Uuid::from_u128(0xEF63_6DDF_8C29_444B_91F7_A9A4_03E3_0A0C);
pub const ARGON2ID_UUID: Uuid = Uuid::from_u128(0x9E29_8B19_56DB_4773_B23D_FC3E_C6F0_A1E6);

pub const PARAM_UUID: &str = "$UUID";
pub const PARAM_AES_ROUNDS: &str = "R";
pub const PARAM_AES_SEED: &str = "S";
pub const PARAM_ARGON2_SALT: &str = "S";
pub const PARAM_ARGON2_PARALLELISM: &str = "P";
pub const PARAM_ARGON2_MEMORY: &str = "M";
pub const PARAM_ARGON2_ITERATIONS: &str = "I";
pub const PARAM_ARGON2_VERSION: &str = "V";
pub const PARAM_ARGON2_SECRET: &str = "K";
pub const PARAM_ARGON2_ASSOCIATED_DATA: &str = "A";

pub const DEFAULT_AES_ROUNDS: u64 = 60_000;
pub const DEFAULT_ARGON2_ITERATIONS: u64 = 2;
pub const DEFAULT_ARGON2_MEMORY: u64 = 1024 * 1024;
pub const DEFAULT_ARGON2_PARALLELISM: u32 = 2;

const ARGON2_VERSION_13: u32 = 0x13;
const SEED_LENGTH: usize = 32;

/// KDF parameters: a variant dictionary carrying at least `$UUID`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParameters(VariantDictionary);

impl KdfParameters {
    /// Empty parameters for the algorithm `uuid`.
    pub fn new(uuid: Uuid) -> Self {
        let mut dict = VariantDictionary::new();
        dict.set_bytes(PARAM_UUID, uuid.as_bytes().to_vec());
        Self(dict)
    }

    /// AES-KDF with the given round count and an all-zero seed.
    pub fn aes(rounds: u64) -> Self {
        let mut params = Self::new(AES_KDF_UUID);
        params.0.set_u64(PARAM_AES_ROUNDS, rounds);
        params.0.set_bytes(PARAM_AES_SEED, vec![0u8; SEED_LENGTH]);
        params
    }

    /// Argon2 with an all-zero salt. `memory` is in bytes.
    pub fn argon2(variant: Uuid, iterations: u64, memory: u64, parallelism: u32) -> Self {
        let mut params = Self::new(variant);
        params.0.set_bytes(PARAM_ARGON2_SALT, vec![0u8; SEED_LENGTH]);
        params.0.set_u32(PARAM_ARGON2_PARALLELISM, parallelism);
        params.0.set_u64(PARAM_ARGON2_MEMORY, memory);
        params.0.set_u64(PARAM_ARGON2_ITERATIONS, iterations);
        params.0.set_u32(PARAM_ARGON2_VERSION, ARGON2_VERSION_13);
        params
    }

    /// Wraps an existing dictionary.
    pub fn from_dictionary(dict: VariantDictionary) -> Self {
        Self(dict)
    }

    /// The algorithm identifier.
    pub fn uuid(&self) -> Result<Uuid> {
        let raw = self
            .0
            .get_bytes(PARAM_UUID)
            .ok_or_else(|| KdbxError::KdfFailure("KDF parameters carry no $UUID".to_string()))?;
        Uuid::from_slice(raw)
            .map_err(|e| KdbxError::KdfFailure(format!("Malformed KDF UUID: {}", e)))
    }

    pub fn dictionary(&self) -> &VariantDictionary {
        &self.0
    }

    pub fn dictionary_mut(&mut self) -> &mut VariantDictionary {
        &mut self.0
    }

    fn require_u64(&self, key: &str) -> Result<u64> {
        self.0
            .get_u64(key)
            .ok_or_else(|| KdbxError::KdfFailure(format!("Missing KDF parameter '{}'", key)))
    }

    fn require_u32(&self, key: &str) -> Result<u32> {
        self.0
            .get_u32(key)
            .ok_or_else(|| KdbxError::KdfFailure(format!("Missing KDF parameter '{}'", key)))
    }

    fn require_bytes(&self, key: &str) -> Result<&[u8]> {
        self.0
            .get_bytes(key)
            .ok_or_else(|| KdbxError::KdfFailure(format!("Missing KDF parameter '{}'", key)))
    }

    /// AES-KDF seed, as stored in the legacy `TransformSeed` header field.
    pub fn aes_seed(&self) -> Result<&[u8]> {
        self.require_bytes(PARAM_AES_SEED)
    }

    /// AES-KDF round count, as stored in the legacy `TransformRounds` field.
    pub fn aes_rounds(&self) -> Result<u64> {
        self.require_u64(PARAM_AES_ROUNDS)
    }
}

/// A key-derivation algorithm.
pub trait KdfEngine {
    fn uuid(&self) -> Uuid;

    fn name(&self) -> &'static str;

    /// Parameters a fresh database would use.
    fn default_parameters(&self) -> KdfParameters;

    /// Replaces the seed or salt with fresh random bytes.
    fn randomize(&self, params: &mut KdfParameters, rng: &mut dyn RngCore);

    /// Derives the 32-byte transformed key from the composite key.
    fn transform(&self, composite_key: &[u8; 32], params: &KdfParameters) -> Result<[u8; 32]>;
}

fn fresh_seed(rng: &mut dyn RngCore) -> Vec<u8> {
    let mut seed = vec![0u8; SEED_LENGTH];
    rng.fill_bytes(&mut seed);
    seed
}

pub struct AesKdf;

impl KdfEngine for AesKdf {
    fn uuid(&self) -> Uuid {
        AES_KDF_UUID
    }

    fn name(&self) -> &'static str {
        "AES-KDF"
    }

    fn default_parameters(&self) -> KdfParameters {
        KdfParameters::aes(DEFAULT_AES_ROUNDS)
    }

    fn randomize(&self, params: &mut KdfParameters, rng: &mut dyn RngCore) {
        params.0.set_bytes(PARAM_AES_SEED, fresh_seed(rng));
    }

    fn transform(&self, composite_key: &[u8; 32], params: &KdfParameters) -> Result<[u8; 32]> {
        let seed = params.aes_seed()?;
        let rounds = params.aes_rounds()?;
        if seed.len() != SEED_LENGTH {
            return Err(KdbxError::KdfFailure(format!(
                "AES-KDF seed must be {} bytes, got {}",
                SEED_LENGTH,
                seed.len()
            )));
        }
        debug!("AES-KDF: {} rounds", rounds);

        let cipher = Aes256::new(GenericArray::from_slice(seed));
        let mut left = GenericArray::clone_from_slice(&composite_key[..16]);
        let mut right = GenericArray::clone_from_slice(&composite_key[16..]);
        for _ in 0..rounds {
            cipher.encrypt_block(&mut left);
            cipher.encrypt_block(&mut right);
        }

        let mut hasher = Sha256::new();
        hasher.update(left);
        hasher.update(right);
        left.as_mut_slice().zeroize();
        right.as_mut_slice().zeroize();
        Ok(hasher.finalize().into())
    }
}

/// Argon2 in either the `d` or the `id` variant.
pub struct Argon2Kdf {
    algorithm: Algorithm,
}

impl Argon2Kdf {
    pub fn d() -> Self {
        Self { algorithm: Algorithm::Argon2d }
    }

    pub fn id() -> Self {
        Self { algorithm: Algorithm::Argon2id }
    }
}

impl KdfEngine for Argon2Kdf {
    fn uuid(&self) -> Uuid {
        match self.algorithm {
            Algorithm::Argon2id => ARGON2ID_UUID,
            _ => ARGON2D_UUID,
        }
    }

    fn name(&self) -> &'static str {
        match self.algorithm {
            Algorithm::Argon2id => "Argon2id",
            _ => "Argon2d",
        }
    }

    fn default_parameters(&self) -> KdfParameters {
        KdfParameters::argon2(
            self.uuid(),
            DEFAULT_ARGON2_ITERATIONS,
            DEFAULT_ARGON2_MEMORY,
            DEFAULT_ARGON2_PARALLELISM,
        )
    }

    fn randomize(&self, params: &mut KdfParameters, rng: &mut dyn RngCore) {
        params.0.set_bytes(PARAM_ARGON2_SALT, fresh_seed(rng));
    }

    fn transform(&self, composite_key: &[u8; 32], params: &KdfParameters) -> Result<[u8; 32]> {
        let salt = params.require_bytes(PARAM_ARGON2_SALT)?;
        let parallelism = params.require_u32(PARAM_ARGON2_PARALLELISM)?;
        let memory = params.require_u64(PARAM_ARGON2_MEMORY)?;
        let iterations = params.require_u64(PARAM_ARGON2_ITERATIONS)?;
        let version = match params.require_u32(PARAM_ARGON2_VERSION)? {
            0x10 => Version::V0x10,
            0x13 => Version::V0x13,
            other => {
                return Err(KdbxError::KdfFailure(format!("Unsupported Argon2 version 0x{:x}", other)))
            }
        };

        let memory_kib = u32::try_from(memory / 1024)
            .map_err(|_| KdbxError::KdfFailure(format!("Argon2 memory too large: {} bytes", memory)))?;
        let iterations = u32::try_from(iterations)
            .map_err(|_| KdbxError::KdfFailure(format!("Argon2 iterations too large: {}", iterations)))?;
        debug!(
            "{}: {} KiB, {} iterations, {} lanes",
            self.name(),
            memory_kib,
            iterations,
            parallelism
        );

        let mut builder = ParamsBuilder::new();
        builder.m_cost(memory_kib).t_cost(iterations).p_cost(parallelism).output_len(32);
        if let Some(data) = params.0.get_bytes(PARAM_ARGON2_ASSOCIATED_DATA) {
            let data = AssociatedData::new(data)
                .map_err(|e| KdbxError::KdfFailure(format!("Invalid Argon2 associated data: {}", e)))?;
            builder.data(data);
        }
        let argon_params = builder
            .build()
            .map_err(|e| KdbxError::KdfFailure(format!("Invalid Argon2 parameters: {}", e)))?;

        let argon = match params.0.get_bytes(PARAM_ARGON2_SECRET) {
            Some(secret) => Argon2::new_with_secret(secret, self.algorithm, version, argon_params)
                .map_err(|e| KdbxError::KdfFailure(format!("Invalid Argon2 secret: {}", e)))?,
            None => Argon2::new(self.algorithm, version, argon_params),
        };
        let mut out = [0u8; 32];
        argon
            .hash_password_into(composite_key, salt, &mut out)
            .map_err(|e| KdbxError::KdfFailure(format!("Argon2 failed: {}", e)))?;
        Ok(out)
    }
}

/// KDF engines keyed by UUID.
pub struct KdfRegistry {
    engines: HashMap<Uuid, Box<dyn KdfEngine>>,
}

impl KdfRegistry {
    pub fn empty() -> Self {
        Self { engines: HashMap::new() }
    }

    pub fn register(&mut self, engine: Box<dyn KdfEngine>) {
        debug!("Registering KDF engine {} ({})", engine.name(), engine.uuid());
        self.engines.insert(engine.uuid(), engine);
    }

    /// Looks up the engine for `uuid`. An unknown KDF is fatal.
    pub fn get(&self, uuid: &Uuid) -> Result<&dyn KdfEngine> {
        self.engines
            .get(uuid)
            .map(|e| e.as_ref())
            .ok_or_else(|| KdbxError::KdfFailure(format!("Unknown KDF {}", uuid)))
    }
}

impl Default for KdfRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(AesKdf));
        registry.register(Box::new(Argon2Kdf::d()));
        registry.register(Box::new(Argon2Kdf::id()));
        registry
    }
}

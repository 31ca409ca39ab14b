//! Outer header construction and serialization.
//!
//! A fresh [`Header`] is generated for every write: new master seed, IV,
//! inner stream key and KDF seed. Nothing random is reused across saves.

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, trace};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::kdbx::codec::cipher::CipherEngine;
use crate::kdbx::codec::kdf::{KdfEngine, KdfParameters, AES_KDF_UUID};
use crate::kdbx::format::variant::VariantDictionary;
use crate::kdbx::types::database::Database;
use crate::kdbx::types::error::{KdbxError, Result};
use crate::kdbx::types::models::{
    CompressionAlgorithm, InnerStreamAlgorithm, KdbxVersion, FILE_SIGNATURE_1, FILE_SIGNATURE_2,
};

const FIELD_END_OF_HEADER: u8 = 0;
const FIELD_CIPHER_ID: u8 = 2;
const FIELD_COMPRESSION_FLAGS: u8 = 3;
const FIELD_MASTER_SEED: u8 = 4;
const FIELD_TRANSFORM_SEED: u8 = 5;
const FIELD_TRANSFORM_ROUNDS: u8 = 6;
const FIELD_ENCRYPTION_IV: u8 = 7;
const FIELD_INNER_STREAM_KEY: u8 = 8;
const FIELD_STREAM_START_BYTES: u8 = 9;
const FIELD_INNER_STREAM_ID: u8 = 10;
const FIELD_KDF_PARAMETERS: u8 = 11;
const FIELD_PUBLIC_CUSTOM_DATA: u8 = 12;

const END_OF_HEADER: &[u8] = b"\r\n\r\n";
const MASTER_SEED_LENGTH: usize = 32;
const STREAM_START_LENGTH: usize = 32;

/// Per-write header record.
pub struct Header {
    pub version: KdbxVersion,
    pub cipher_id: Uuid,
    pub compression: CompressionAlgorithm,
    pub master_seed: Zeroizing<Vec<u8>>,
    pub encryption_iv: Vec<u8>,
    pub kdf_parameters: KdfParameters,
    pub inner_stream: InnerStreamAlgorithm,
    pub inner_stream_key: Zeroizing<Vec<u8>>,
    /// Legacy only: plaintext prefix of the encrypted body.
    pub stream_start_bytes: Option<Vec<u8>>,
    pub public_custom_data: VariantDictionary,
}

/// Serialized header bytes plus their SHA-256.
pub struct SerializedHeader {
    pub bytes: Vec<u8>,
    pub hash: [u8; 32],
}

fn random_bytes(rng: &mut dyn RngCore, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    rng.fill_bytes(&mut out);
    out
}

impl Header {
    /// Draws all per-write randomness for `db` written as `version`.
    ///
    /// KDF parameters come from the database, or the engine's defaults when
    /// it has none; their seed or salt is always replaced.
    pub fn generate(
        db: &Database,
        version: KdbxVersion,
        cipher: &dyn CipherEngine,
        kdf: &dyn KdfEngine,
        rng: &mut dyn RngCore,
    ) -> Result<Self> {
        let mut kdf_parameters = db
            .kdf_parameters
            .clone()
            .unwrap_or_else(|| kdf.default_parameters());
        let kdf_uuid = kdf_parameters.uuid()?;
        if kdf_uuid != kdf.uuid() {
            return Err(KdbxError::KdfFailure(format!(
                "KDF parameters name {} but engine is {}",
                kdf_uuid,
                kdf.uuid()
            )));
        }
        kdf.randomize(&mut kdf_parameters, rng);

        let inner_stream = InnerStreamAlgorithm::for_version(version);
        let master_seed = Zeroizing::new(random_bytes(rng, MASTER_SEED_LENGTH));
        let encryption_iv = random_bytes(rng, cipher.iv_length());
        let inner_stream_key = Zeroizing::new(random_bytes(rng, inner_stream.key_length()));
        let stream_start_bytes = if version.is_modern() {
            None
        } else {
            Some(random_bytes(rng, STREAM_START_LENGTH))
        };

        debug!(
            "Generated header: version={:#010x}, cipher={} ({}), kdf={}, inner stream={:?}",
            version.raw(),
            cipher.name(),
            cipher.uuid(),
            kdf.name(),
            inner_stream
        );

        Ok(Self {
            version,
            cipher_id: cipher.uuid(),
            compression: db.compression,
            master_seed,
            encryption_iv,
            kdf_parameters,
            inner_stream,
            inner_stream_key,
            stream_start_bytes,
            public_custom_data: db.public_custom_data.clone(),
        })
    }

    /// Serializes the header.
    ///
    /// # Layout
    /// ```text
    /// [4 bytes] signature 1 (0x9AA2D903)
    /// [4 bytes] signature 2 (0xB54BFB67)
    /// [4 bytes] version
    /// repeated:
    ///   [1 byte]    field id
    ///   [2|4 bytes] length (u16 legacy, u32 modern)
    ///   [N bytes]   value
    /// ```
    pub fn serialize(&self) -> Result<SerializedHeader> {
        let mut out = Vec::with_capacity(256);
        out.write_u32::<LittleEndian>(FILE_SIGNATURE_1)?;
        out.write_u32::<LittleEndian>(FILE_SIGNATURE_2)?;
        out.write_u32::<LittleEndian>(self.version.raw())?;

        self.write_field(&mut out, FIELD_CIPHER_ID, self.cipher_id.as_bytes())?;
        self.write_field(&mut out, FIELD_COMPRESSION_FLAGS, &self.compression.flag().to_le_bytes())?;
        self.write_field(&mut out, FIELD_MASTER_SEED, &self.master_seed)?;

        if self.version.is_modern() {
            let kdf = self.kdf_parameters.dictionary().serialize()?;
            self.write_field(&mut out, FIELD_KDF_PARAMETERS, &kdf)?;
        } else {
            if self.kdf_parameters.uuid()? != AES_KDF_UUID {
                return Err(KdbxError::KdfFailure(
                    "The legacy header can only describe AES-KDF".to_string(),
                ));
            }
            self.write_field(&mut out, FIELD_TRANSFORM_SEED, self.kdf_parameters.aes_seed()?)?;
            self.write_field(
                &mut out,
                FIELD_TRANSFORM_ROUNDS,
                &self.kdf_parameters.aes_rounds()?.to_le_bytes(),
            )?;
        }

        self.write_field(&mut out, FIELD_ENCRYPTION_IV, &self.encryption_iv)?;

        if self.version.is_modern() {
            if !self.public_custom_data.is_empty() {
                let data = self.public_custom_data.serialize()?;
                self.write_field(&mut out, FIELD_PUBLIC_CUSTOM_DATA, &data)?;
            }
        } else {
            let start = self.stream_start_bytes.as_deref().ok_or_else(|| {
                KdbxError::InvalidFormat("Legacy header without stream start bytes".to_string())
            })?;
            self.write_field(&mut out, FIELD_INNER_STREAM_KEY, &self.inner_stream_key)?;
            self.write_field(&mut out, FIELD_STREAM_START_BYTES, start)?;
            self.write_field(&mut out, FIELD_INNER_STREAM_ID, &self.inner_stream.id().to_le_bytes())?;
        }

        self.write_field(&mut out, FIELD_END_OF_HEADER, END_OF_HEADER)?;

        let hash: [u8; 32] = Sha256::digest(&out).into();
        debug!("Header serialized: {} bytes, sha256={}", out.len(), hex::encode(hash));
        Ok(SerializedHeader { bytes: out, hash })
    }

    fn write_field(&self, out: &mut Vec<u8>, id: u8, value: &[u8]) -> Result<()> {
        trace!("Header field {}: {} bytes", id, value.len());
        out.write_u8(id)?;
        if self.version.is_modern() {
            let len = u32::try_from(value.len()).map_err(|_| {
                KdbxError::InvalidFormat(format!("Header field {} too long: {} bytes", id, value.len()))
            })?;
            out.write_u32::<LittleEndian>(len)?;
        } else {
            let len = u16::try_from(value.len()).map_err(|_| {
                KdbxError::InvalidFormat(format!("Header field {} too long: {} bytes", id, value.len()))
            })?;
            out.write_u16::<LittleEndian>(len)?;
        }
        out.write_all(value)?;
        Ok(())
    }
}

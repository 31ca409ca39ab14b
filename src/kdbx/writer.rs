//! The write pipeline: one call turns a [`Database`] into KDBX bytes.
//!
//! # Stream layout
//! ```text
//! legacy: header ‖ cipher( start bytes ‖ hashed-blocks( gzip?( xml ) ) )
//! modern: header ‖ sha256(header) ‖ hmac(header)
//!         ‖ hmac-blocks( cipher( gzip?( inner header ‖ xml ) ) )
//! ```
//! Each stage is a `Write` adapter whose `finish` flushes its own trailer
//! and hands back the stage beneath it, so stages are closed inner-first.

use std::io::Write;

use log::{debug, info};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::kdbx::codec::cipher::{CipherRegistry, CipherWriter};
use crate::kdbx::codec::compression::BodyStream;
use crate::kdbx::codec::crypto::{header_hmac, InnerStream, MasterKeys};
use crate::kdbx::codec::kdf::{KdfRegistry, AES_KDF_UUID};
use crate::kdbx::format::binary_pool::BinaryPool;
use crate::kdbx::format::blocks::{HashedBlockWriter, HmacBlockWriter, DEFAULT_BLOCK_SIZE};
use crate::kdbx::format::header::Header;
use crate::kdbx::format::inner_header;
use crate::kdbx::format::xml::TreeSerializer;
use crate::kdbx::types::database::Database;
use crate::kdbx::types::error::{KdbxError, Result};

/// Tunables for a [`KdbxWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    /// Written to `Meta/Generator`.
    pub generator: String,
    /// Payload bytes per integrity block.
    pub block_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            generator: "kdbx-writer".to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Encodes a database into the KDBX container format.
///
/// ```no_run
/// use kdbx_writer::{CompositeKey, Database, KdbxWriter};
///
/// let db = Database::new("Passwords", CompositeKey::from_password("correct horse"));
/// let file = std::fs::File::create("out.kdbx")?;
/// KdbxWriter::new(&db).write(file)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct KdbxWriter<'a> {
    db: &'a Database,
    config: WriterConfig,
    rng: Box<dyn RngCore>,
    ciphers: CipherRegistry,
    kdfs: KdfRegistry,
}

impl<'a> KdbxWriter<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            config: WriterConfig::default(),
            rng: Box::new(OsRng),
            ciphers: CipherRegistry::default(),
            kdfs: KdfRegistry::default(),
        }
    }

    pub fn with_config(mut self, config: WriterConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the randomness source for seeds, IVs and keys.
    pub fn with_rng(mut self, rng: Box<dyn RngCore>) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_ciphers(mut self, ciphers: CipherRegistry) -> Self {
        self.ciphers = ciphers;
        self
    }

    pub fn with_kdfs(mut self, kdfs: KdfRegistry) -> Self {
        self.kdfs = kdfs;
        self
    }

    /// Writes the complete container to `sink`.
    ///
    /// Header, binary pool and inner stream are created fresh for this call.
    /// On error the sink holds a partial, unusable stream.
    ///
    /// # Errors
    /// - `UnsupportedCipher` if the cipher UUID has no registered engine
    /// - `KdfFailure` if the KDF is unknown or its parameters are invalid
    /// - `StructuralInconsistency` if the tree's parent links are broken
    /// - `Io` if the sink fails
    pub fn write<W: Write>(&mut self, mut sink: W) -> Result<()> {
        let db = self.db;
        let version = db.effective_version();
        if version != db.version {
            info!(
                "Raising format version from {:#010x} to {:#010x} to fit the database content",
                db.version.raw(),
                version.raw()
            );
        }
        info!(
            "Writing KDBX {:#010x}: {} groups, {} entries",
            version.raw(),
            db.tree.num_groups(),
            db.tree.num_entries()
        );

        let cipher = self.ciphers.get(&db.cipher_id)?;
        let kdf_uuid = match &db.kdf_parameters {
            Some(params) => params.uuid()?,
            None => AES_KDF_UUID,
        };
        let kdf = self.kdfs.get(&kdf_uuid)?;

        let header = Header::generate(db, version, cipher, kdf, self.rng.as_mut())?;
        let serialized = header.serialize()?;

        let transformed = Zeroizing::new(kdf.transform(db.composite_key.as_bytes(), &header.kdf_parameters)?);
        let keys = MasterKeys::derive(&header.master_seed, &transformed);
        debug!("Master keys derived");

        let pool = BinaryPool::build(&db.tree);
        let mut stream = InnerStream::new(header.inner_stream, &header.inner_stream_key)?;
        let encryptor = cipher.encryptor(&keys.cipher_key, &header.encryption_iv)?;
        let generator = self.config.generator.as_str();
        let block_size = self.config.block_size;

        sink.write_all(&serialized.bytes)?;

        if version.is_modern() {
            sink.write_all(&serialized.hash)?;
            sink.write_all(&header_hmac(&keys.hmac_key, &serialized.bytes)?)?;

            let framed = HmacBlockWriter::with_block_size(&mut sink, &keys.hmac_key, block_size);
            let encrypted = CipherWriter::new(framed, encryptor);
            let encrypted = write_payload(encrypted, db, &header, &pool, None, generator, &mut stream)?;
            let framed = encrypted.finish()?;
            framed.finish()?;
        } else {
            let start_bytes = header.stream_start_bytes.as_deref().ok_or_else(|| {
                KdbxError::InvalidFormat("Legacy header without stream start bytes".to_string())
            })?;
            let mut encrypted = CipherWriter::new(&mut sink, encryptor);
            encrypted.write_all(start_bytes)?;

            let framed = HashedBlockWriter::with_block_size(encrypted, block_size);
            let framed = write_payload(
                framed,
                db,
                &header,
                &pool,
                Some(serialized.hash),
                generator,
                &mut stream,
            )?;
            let encrypted = framed.finish()?;
            encrypted.finish()?;
        }

        sink.flush()?;
        info!("KDBX write complete");
        Ok(())
    }
}

/// Writes the plaintext body (inner header and XML) through the
/// compression stage into `plain`, and returns `plain` once the
/// compressor is finished.
fn write_payload<S: Write>(
    plain: S,
    db: &Database,
    header: &Header,
    pool: &BinaryPool,
    header_hash: Option<[u8; 32]>,
    generator: &str,
    stream: &mut InnerStream,
) -> Result<S> {
    let mut body = BodyStream::new(plain, header.compression);
    if header.version.is_modern() {
        inner_header::write(&mut body, header.inner_stream, &header.inner_stream_key, pool)?;
    }

    let mut serializer = TreeSerializer::new(&mut body, db, pool, header.version, generator);
    if let Some(hash) = header_hash {
        serializer = serializer.with_header_hash(hash);
    }
    serializer.serialize(stream)?;

    Ok(body.finish()?)
}

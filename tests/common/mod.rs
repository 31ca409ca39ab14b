//! Test-only decoder for the bytes the writer produces.
//!
//! Parses the outer header, re-derives the keys, checks the header hash and
//! HMAC, verifies the block envelope with the crate's readers, decrypts,
//! gunzips and (modern) splits off the inner header.

#![allow(dead_code)]

use std::io::Read;

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, KeyInit};
use aes::Aes256;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use kdbx_writer::kdbx::codec::crypto::{header_hmac, ChaCha20, InnerStream, MasterKeys};
use kdbx_writer::kdbx::format::blocks::{HashedBlockReader, HmacBlockReader};
use kdbx_writer::kdbx::types::models::InnerStreamAlgorithm;
use kdbx_writer::{
    CompositeKey, KdfParameters, KdfRegistry, VariantDictionary, VariantValue, AES256_UUID,
    CHACHA20_UUID,
};

pub const FIELD_CIPHER_ID: u8 = 2;
pub const FIELD_COMPRESSION: u8 = 3;
pub const FIELD_MASTER_SEED: u8 = 4;
pub const FIELD_TRANSFORM_SEED: u8 = 5;
pub const FIELD_TRANSFORM_ROUNDS: u8 = 6;
pub const FIELD_IV: u8 = 7;
pub const FIELD_INNER_KEY: u8 = 8;
pub const FIELD_STREAM_START: u8 = 9;
pub const FIELD_INNER_ID: u8 = 10;
pub const FIELD_KDF: u8 = 11;
pub const FIELD_PUBLIC_CUSTOM_DATA: u8 = 12;

pub struct Decoded {
    pub version: u32,
    pub header_fields: Vec<(u8, Vec<u8>)>,
    pub header_len: usize,
    pub inner_stream: InnerStreamAlgorithm,
    pub inner_key: Vec<u8>,
    /// Modern inner-header binaries: (flags, data).
    pub binaries: Vec<(u8, Vec<u8>)>,
    pub xml: String,
}

impl Decoded {
    pub fn field(&self, id: u8) -> Option<&[u8]> {
        self.header_fields.iter().find(|(i, _)| *i == id).map(|(_, v)| v.as_slice())
    }

    pub fn is_modern(&self) -> bool {
        self.version >= 0x0004_0000
    }

    /// Reveals every protected text value, in document order.
    pub fn protected_values(&self) -> Vec<Vec<u8>> {
        let mut stream = InnerStream::new(self.inner_stream, &self.inner_key).unwrap();
        protected_texts(&self.xml)
            .into_iter()
            .map(|text| stream.process(&STANDARD.decode(text).unwrap()))
            .collect()
    }
}

/// Base64 payloads of all non-empty `Protected="True"` elements, in order.
pub fn protected_texts(xml: &str) -> Vec<String> {
    const MARK: &str = "Protected=\"True\">";
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(pos) = rest.find(MARK) {
        rest = &rest[pos + MARK.len()..];
        let end = rest.find('<').unwrap();
        out.push(rest[..end].to_string());
        rest = &rest[end..];
    }
    out
}

pub fn parse_header_fields(bytes: &[u8]) -> (u32, Vec<(u8, Vec<u8>)>, usize) {
    assert_eq!(&bytes[0..4], &0x9AA2_D903u32.to_le_bytes());
    assert_eq!(&bytes[4..8], &0xB54B_FB67u32.to_le_bytes());
    let version = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    let modern = version >= 0x0004_0000;

    let mut fields = Vec::new();
    let mut pos = 12;
    loop {
        let id = bytes[pos];
        pos += 1;
        let len = if modern {
            let len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            len
        } else {
            let len = u16::from_le_bytes(bytes[pos..pos + 2].try_into().unwrap()) as usize;
            pos += 2;
            len
        };
        let value = bytes[pos..pos + len].to_vec();
        pos += len;
        fields.push((id, value));
        if id == 0 {
            break;
        }
    }
    (version, fields, pos)
}

pub fn parse_variant_dictionary(bytes: &[u8]) -> VariantDictionary {
    assert_eq!(&bytes[0..2], &[0x00, 0x01]);
    let mut dict = VariantDictionary::new();
    let mut pos = 2;
    loop {
        let kind = bytes[pos];
        pos += 1;
        if kind == 0 {
            break;
        }
        let name_len = i32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        let name = String::from_utf8(bytes[pos..pos + name_len].to_vec()).unwrap();
        pos += name_len;
        let value_len = i32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        let raw = &bytes[pos..pos + value_len];
        pos += value_len;
        let value = match kind {
            0x04 => VariantValue::UInt32(u32::from_le_bytes(raw.try_into().unwrap())),
            0x05 => VariantValue::UInt64(u64::from_le_bytes(raw.try_into().unwrap())),
            0x08 => VariantValue::Bool(raw[0] != 0),
            0x0C => VariantValue::Int32(i32::from_le_bytes(raw.try_into().unwrap())),
            0x0D => VariantValue::Int64(i64::from_le_bytes(raw.try_into().unwrap())),
            0x18 => VariantValue::String(String::from_utf8(raw.to_vec()).unwrap()),
            0x42 => VariantValue::ByteArray(raw.to_vec()),
            other => panic!("unknown variant type {:#x}", other),
        };
        dict.set(name, value);
    }
    dict
}

fn aes_cbc_decrypt(key: &[u8; 32], iv: &[u8], data: &[u8]) -> Vec<u8> {
    assert_eq!(data.len() % 16, 0, "ciphertext is not block aligned");
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let mut prev = iv.to_vec();
    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks(16) {
        let mut block = GenericArray::clone_from_slice(chunk);
        cipher.decrypt_block(&mut block);
        for (b, p) in block.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        out.extend_from_slice(&block);
        prev = chunk.to_vec();
    }
    let pad = *out.last().unwrap() as usize;
    assert!((1..=16).contains(&pad), "bad PKCS#7 padding");
    out.truncate(out.len() - pad);
    out
}

fn decrypt(cipher_id: Uuid, key: &[u8; 32], iv: &[u8], data: &[u8]) -> Vec<u8> {
    if cipher_id == AES256_UUID {
        aes_cbc_decrypt(key, iv, data)
    } else if cipher_id == CHACHA20_UUID {
        let mut out = data.to_vec();
        ChaCha20::new(key, iv.try_into().unwrap()).apply_keystream(&mut out);
        out
    } else {
        panic!("unexpected cipher {}", cipher_id)
    }
}

/// Derives the master keys for a parsed header.
pub fn master_keys(fields: &[(u8, Vec<u8>)], modern: bool, key: &CompositeKey) -> MasterKeys {
    let field = |id: u8| fields.iter().find(|(i, _)| *i == id).map(|(_, v)| v.clone()).unwrap();
    let params = if modern {
        KdfParameters::from_dictionary(parse_variant_dictionary(&field(FIELD_KDF)))
    } else {
        let rounds = u64::from_le_bytes(field(FIELD_TRANSFORM_ROUNDS).try_into().unwrap());
        let mut params = KdfParameters::aes(rounds);
        params.dictionary_mut().set_bytes("S", field(FIELD_TRANSFORM_SEED));
        params
    };
    let registry = KdfRegistry::default();
    let engine = registry.get(&params.uuid().unwrap()).unwrap();
    let transformed = engine.transform(key.as_bytes(), &params).unwrap();
    MasterKeys::derive(&field(FIELD_MASTER_SEED), &transformed)
}

/// Fully decodes a container. Panics on any integrity failure.
pub fn decode(bytes: &[u8], key: &CompositeKey) -> Decoded {
    let (version, fields, header_len) = parse_header_fields(bytes);
    let modern = version >= 0x0004_0000;
    let keys = master_keys(&fields, modern, key);
    let field = |id: u8| fields.iter().find(|(i, _)| *i == id).map(|(_, v)| v.clone());

    let cipher_id = Uuid::from_slice(&field(FIELD_CIPHER_ID).unwrap()).unwrap();
    let iv = field(FIELD_IV).unwrap();
    let compressed = u32::from_le_bytes(field(FIELD_COMPRESSION).unwrap().try_into().unwrap()) == 1;
    let header = &bytes[..header_len];

    let plain = if modern {
        let hash: [u8; 32] = Sha256::digest(header).into();
        assert_eq!(&bytes[header_len..header_len + 32], &hash, "header hash mismatch");
        let hmac = header_hmac(&keys.hmac_key, header).unwrap();
        assert_eq!(&bytes[header_len + 32..header_len + 64], &hmac, "header HMAC mismatch");

        let mut ciphertext = Vec::new();
        HmacBlockReader::new(&bytes[header_len + 64..], &keys.hmac_key)
            .read_to_end(&mut ciphertext)
            .unwrap();
        decrypt(cipher_id, &keys.cipher_key, &iv, &ciphertext)
    } else {
        let decrypted = decrypt(cipher_id, &keys.cipher_key, &iv, &bytes[header_len..]);
        let start = field(FIELD_STREAM_START).unwrap();
        assert_eq!(&decrypted[..start.len()], start.as_slice(), "stream start bytes mismatch");
        let mut payload = Vec::new();
        HashedBlockReader::new(&decrypted[start.len()..]).read_to_end(&mut payload).unwrap();
        payload
    };

    let body = if compressed {
        let mut out = Vec::new();
        GzDecoder::new(plain.as_slice()).read_to_end(&mut out).unwrap();
        out
    } else {
        plain
    };

    let (inner_stream, inner_key, binaries, xml_bytes) = if modern {
        let mut pos = 0;
        let mut stream_id = 0;
        let mut inner_key = Vec::new();
        let mut binaries = Vec::new();
        loop {
            let id = body[pos];
            let len = i32::from_le_bytes(body[pos + 1..pos + 5].try_into().unwrap()) as usize;
            let data = &body[pos + 5..pos + 5 + len];
            pos += 5 + len;
            match id {
                0 => break,
                1 => stream_id = u32::from_le_bytes(data.try_into().unwrap()),
                2 => inner_key = data.to_vec(),
                3 => binaries.push((data[0], data[1..].to_vec())),
                other => panic!("unexpected inner header field {}", other),
            }
        }
        let stream = InnerStreamAlgorithm::try_from(stream_id).unwrap();
        (stream, inner_key, binaries, body[pos..].to_vec())
    } else {
        let stream_id = u32::from_le_bytes(field(FIELD_INNER_ID).unwrap().try_into().unwrap());
        let stream = InnerStreamAlgorithm::try_from(stream_id).unwrap();
        (stream, field(FIELD_INNER_KEY).unwrap(), Vec::new(), body)
    };

    Decoded {
        version,
        header_fields: fields,
        header_len,
        inner_stream,
        inner_key,
        binaries,
        xml: String::from_utf8(xml_bytes).unwrap(),
    }
}

//! Inner header of the modern dialect, written at the start of the
//! decrypted payload ahead of the XML.
//!
//! # Layout
//! ```text
//! repeated:
//!   [1 byte]  field id
//!   [4 bytes] length (i32 LE)
//!   [N bytes] data
//! ```
//! Fields: stream id (1), stream key (2), one binary (3) per pooled
//! attachment (flags byte, bit 0 = protected, then raw bytes), end (0).

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use log::debug;

use crate::kdbx::format::binary_pool::BinaryPool;
use crate::kdbx::format::variant::length_i32;
use crate::kdbx::types::error::Result;
use crate::kdbx::types::models::InnerStreamAlgorithm;

const FIELD_END: u8 = 0;
const FIELD_STREAM_ID: u8 = 1;
const FIELD_STREAM_KEY: u8 = 2;
const FIELD_BINARY: u8 = 3;

const BINARY_FLAG_PROTECTED: u8 = 0x01;

pub fn write<W: Write>(
    out: &mut W,
    stream: InnerStreamAlgorithm,
    stream_key: &[u8],
    pool: &BinaryPool,
) -> Result<()> {
    debug!("Writing inner header: {:?}, {} binaries", stream, pool.len());
    write_field(out, FIELD_STREAM_ID, &[&stream.id().to_le_bytes()[..]])?;
    write_field(out, FIELD_STREAM_KEY, &[stream_key])?;
    for (_, binary) in pool.iter() {
        let flags = if binary.is_protected() { BINARY_FLAG_PROTECTED } else { 0 };
        write_field(out, FIELD_BINARY, &[&[flags][..], binary.data()])?;
    }
    write_field(out, FIELD_END, &[])?;
    Ok(())
}

fn write_field<W: Write>(out: &mut W, id: u8, parts: &[&[u8]]) -> Result<()> {
    let len: usize = parts.iter().map(|p| p.len()).sum();
    out.write_u8(id)?;
    out.write_i32::<LittleEndian>(length_i32(len, "inner header field")?)?;
    for part in parts {
        out.write_all(part)?;
    }
    Ok(())
}

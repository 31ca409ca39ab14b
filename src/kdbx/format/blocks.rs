//! Block framing: the integrity envelope around the body stream.
//!
//! # Hashed blocks (legacy)
//! ```text
//! [4 bytes]  block index (u32 LE, from 0)
//! [32 bytes] SHA-256 of the payload
//! [4 bytes]  payload length (i32 LE)
//! [N bytes]  payload
//! ```
//! The stream ends with a block whose hash is all zeros and length is 0.
//!
//! # HMAC blocks (modern)
//! ```text
//! [32 bytes] HMAC-SHA-256(block_key(i), LE64(i) ‖ LE32(len) ‖ payload)
//! [4 bytes]  payload length (i32 LE)
//! [N bytes]  payload
//! ```
//! The index `i` is implicit, counting from 0. The stream ends with a
//! zero-length block that still carries a valid HMAC.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::trace;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::kdbx::codec::crypto::{block_hmac_key, hmac_sha256, verify_hmac_sha256};

/// Default payload size of one block.
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn to_io(e: crate::kdbx::types::error::KdbxError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

fn block_len(len: usize) -> io::Result<i32> {
    i32::try_from(len).map_err(|_| invalid_data(format!("Block of {} bytes is too large", len)))
}

/// Legacy framer. Must be closed with [`HashedBlockWriter::finish`].
pub struct HashedBlockWriter<W: Write> {
    inner: W,
    buffer: Vec<u8>,
    block_size: usize,
    index: u32,
}

impl<W: Write> HashedBlockWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_block_size(inner, DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(inner: W, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self { inner, buffer: Vec::with_capacity(block_size.min(DEFAULT_BLOCK_SIZE)), block_size, index: 0 }
    }

    /// Frames the whole buffer as one block. An empty buffer gives the terminator.
    fn emit(&mut self) -> io::Result<()> {
        let payload = self.buffer.as_slice();
        let len = payload.len();
        let hash: [u8; 32] = if len == 0 { [0u8; 32] } else { Sha256::digest(payload).into() };
        trace!("Hashed block {}: {} bytes", self.index, len);
        self.inner.write_u32::<LittleEndian>(self.index)?;
        self.inner.write_all(&hash)?;
        self.inner.write_i32::<LittleEndian>(block_len(len)?)?;
        self.inner.write_all(payload)?;
        self.buffer.clear();
        self.index = self.index.wrapping_add(1);
        Ok(())
    }

    /// Emits the buffered tail and the terminator, then returns the writer.
    pub fn finish(mut self) -> io::Result<W> {
        if !self.buffer.is_empty() {
            self.emit()?;
        }
        self.emit()?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for HashedBlockWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        while !rest.is_empty() {
            let take = rest.len().min(self.block_size - self.buffer.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.buffer.len() == self.block_size {
                self.emit()?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Modern framer. Must be closed with [`HmacBlockWriter::finish`].
pub struct HmacBlockWriter<W: Write> {
    inner: W,
    hmac_key: Zeroizing<[u8; 64]>,
    buffer: Vec<u8>,
    block_size: usize,
    index: u64,
}

impl<W: Write> HmacBlockWriter<W> {
    pub fn new(inner: W, hmac_key: &[u8; 64]) -> Self {
        Self::with_block_size(inner, hmac_key, DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(inner: W, hmac_key: &[u8; 64], block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            inner,
            hmac_key: Zeroizing::new(*hmac_key),
            buffer: Vec::with_capacity(block_size.min(DEFAULT_BLOCK_SIZE)),
            block_size,
            index: 0,
        }
    }

    /// Frames the whole buffer as one block. An empty buffer gives the terminator.
    fn emit(&mut self) -> io::Result<()> {
        let payload = self.buffer.as_slice();
        let len = payload.len();
        let size = block_len(len)?;
        let key = Zeroizing::new(block_hmac_key(&self.hmac_key, self.index));
        let tag = hmac_sha256(
            key.as_slice(),
            &[&self.index.to_le_bytes()[..], &size.to_le_bytes()[..], payload],
        )
        .map_err(to_io)?;
        trace!("HMAC block {}: {} bytes", self.index, len);
        self.inner.write_all(&tag)?;
        self.inner.write_i32::<LittleEndian>(size)?;
        self.inner.write_all(payload)?;
        self.buffer.clear();
        self.index += 1;
        Ok(())
    }

    /// Emits the buffered tail and the terminator, then returns the writer.
    pub fn finish(mut self) -> io::Result<W> {
        if !self.buffer.is_empty() {
            self.emit()?;
        }
        self.emit()?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for HmacBlockWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        while !rest.is_empty() {
            let take = rest.len().min(self.block_size - self.buffer.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.buffer.len() == self.block_size {
                self.emit()?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Verifying reader for hashed blocks. Fails with `InvalidData` on any
/// hash, index or length mismatch.
pub struct HashedBlockReader<R: Read> {
    inner: R,
    block: Vec<u8>,
    pos: usize,
    index: u32,
    done: bool,
}

impl<R: Read> HashedBlockReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, block: Vec::new(), pos: 0, index: 0, done: false }
    }

    fn next_block(&mut self) -> io::Result<()> {
        let index = self.inner.read_u32::<LittleEndian>()?;
        if index != self.index {
            return Err(invalid_data(format!("Hashed block index {} where {} was expected", index, self.index)));
        }
        let mut hash = [0u8; 32];
        self.inner.read_exact(&mut hash)?;
        let len = self.inner.read_i32::<LittleEndian>()?;
        let len = usize::try_from(len).map_err(|_| invalid_data(format!("Negative block length {}", len)))?;

        if len == 0 {
            if hash.iter().any(|&b| b != 0) {
                return Err(invalid_data("Terminating block carries a non-zero hash".to_string()));
            }
            trace!("Hashed block stream terminated after {} blocks", self.index);
            self.done = true;
            self.block.clear();
            self.pos = 0;
            return Ok(());
        }

        self.block.resize(len, 0);
        self.inner.read_exact(&mut self.block)?;
        let actual: [u8; 32] = Sha256::digest(&self.block).into();
        if actual != hash {
            return Err(invalid_data(format!("Hash mismatch in block {}", self.index)));
        }
        trace!("Verified hashed block {}: {} bytes", self.index, len);
        self.index = self.index.wrapping_add(1);
        self.pos = 0;
        Ok(())
    }
}

impl<R: Read> Read for HashedBlockReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.block.len() {
            if self.done {
                return Ok(0);
            }
            self.next_block()?;
        }
        let n = buf.len().min(self.block.len() - self.pos);
        buf[..n].copy_from_slice(&self.block[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Verifying reader for HMAC blocks. Fails with `InvalidData` on any
/// tag mismatch, which also catches reordered or truncated streams.
pub struct HmacBlockReader<R: Read> {
    inner: R,
    hmac_key: Zeroizing<[u8; 64]>,
    block: Vec<u8>,
    pos: usize,
    index: u64,
    done: bool,
}

impl<R: Read> HmacBlockReader<R> {
    pub fn new(inner: R, hmac_key: &[u8; 64]) -> Self {
        Self {
            inner,
            hmac_key: Zeroizing::new(*hmac_key),
            block: Vec::new(),
            pos: 0,
            index: 0,
            done: false,
        }
    }

    fn next_block(&mut self) -> io::Result<()> {
        let mut tag = [0u8; 32];
        self.inner.read_exact(&mut tag)?;
        let size = self.inner.read_i32::<LittleEndian>()?;
        let len = usize::try_from(size).map_err(|_| invalid_data(format!("Negative block length {}", size)))?;
        self.block.resize(len, 0);
        self.inner.read_exact(&mut self.block)?;

        let key = Zeroizing::new(block_hmac_key(&self.hmac_key, self.index));
        let valid = verify_hmac_sha256(
            key.as_slice(),
            &[&self.index.to_le_bytes()[..], &size.to_le_bytes()[..], &self.block[..]],
            &tag,
        )
        .map_err(to_io)?;
        if !valid {
            return Err(invalid_data(format!("HMAC mismatch in block {}", self.index)));
        }
        trace!("Verified HMAC block {}: {} bytes", self.index, len);
        self.index += 1;
        self.pos = 0;
        if len == 0 {
            self.done = true;
        }
        Ok(())
    }
}

impl<R: Read> Read for HmacBlockReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.block.len() {
            if self.done {
                return Ok(0);
            }
            self.next_block()?;
        }
        let n = buf.len().min(self.block.len() - self.pos);
        buf[..n].copy_from_slice(&self.block[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

//! Compression stage for the plaintext body.
//!
//! - None (flag 0): pass-through
//! - Gzip (flag 1): flate2 gzip encoder at the default level

use std::io::{self, Write};

use flate2::write::GzEncoder;
use flate2::Compression;
use log::trace;

use crate::kdbx::types::models::CompressionAlgorithm;

/// Innermost writer of the body pipeline. XML and the inner header are
/// written here.
pub enum BodyStream<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
}

impl<W: Write> BodyStream<W> {
    pub fn new(inner: W, algorithm: CompressionAlgorithm) -> Self {
        match algorithm {
            CompressionAlgorithm::None => BodyStream::Plain(inner),
            CompressionAlgorithm::Gzip => BodyStream::Gzip(GzEncoder::new(inner, Compression::default())),
        }
    }

    /// Flushes the gzip trailer (if any) and returns the wrapped writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            BodyStream::Plain(mut inner) => {
                inner.flush()?;
                Ok(inner)
            }
            BodyStream::Gzip(encoder) => {
                let inner = encoder.finish()?;
                trace!("Gzip stage finished");
                Ok(inner)
            }
        }
    }
}

impl<W: Write> Write for BodyStream<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            BodyStream::Plain(inner) => inner.write(buf),
            BodyStream::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BodyStream::Plain(inner) => inner.flush(),
            BodyStream::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Gzips a single blob, used for legacy per-attachment compression.
pub fn compress_bytes(data: &[u8]) -> io::Result<Vec<u8>> {
    trace!("Gzip-compressing blob of {} bytes", data.len());
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

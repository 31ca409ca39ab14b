//! Custom error types for the kdbx-writer crate.

use thiserror::Error;
use uuid::Uuid;

/// The single error type surfaced by every output operation.
///
/// Each variant wraps the original cause; nothing is retried internally.
/// After a failed write the state of the destination sink is undefined and
/// the caller must discard it.
#[derive(Debug, Error)]
pub enum KdbxError {
    /// An error originating from the destination sink or a nested stream.
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    /// The configured data cipher has no registered engine.
    #[error("Unsupported cipher: {0}")]
    UnsupportedCipher(Uuid),

    /// The requested KDBX file version cannot be written.
    #[error("Unsupported KDBX version: {0:#010x}. Only 3.1 and 4.x are supported.")]
    UnsupportedVersion(u32),

    /// The inner random stream id is not one this crate can produce.
    #[error("Unsupported inner random stream id: {0}")]
    UnsupportedInnerStream(u32),

    /// The KDF parameters name an unknown engine or are malformed.
    #[error("Key derivation failed: {0}")]
    KdfFailure(String),

    /// The group tree has a node whose parent never appears on the traversal stack.
    #[error("Structural inconsistency in group tree: {0}")]
    StructuralInconsistency(String),

    /// The XML serializer rejected an event or produced invalid state.
    #[error("Encoding failure: {0}")]
    EncodingFailure(String),

    /// A value does not fit the binary layout of the container.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl From<quick_xml::Error> for KdbxError {
    fn from(e: quick_xml::Error) -> Self {
        KdbxError::EncodingFailure(e.to_string())
    }
}

/// A convenience `Result` type alias using the crate's `KdbxError` type.
pub type Result<T> = std::result::Result<T, KdbxError>;

//! Core KDBX writer module

pub mod codec;
pub mod format;
pub mod types;
pub mod utils;
mod writer;

pub use types::error::{KdbxError, Result};
pub use writer::{KdbxWriter, WriterConfig};

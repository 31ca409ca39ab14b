//! File format layer: everything that decides byte layout.
//!
//! # Submodules
//!
//! - [`header`][]: Outer header generation and serialization
//! - [`blocks`][]: Hashed and HMAC block framing, with verifying readers
//! - [`inner_header`][]: Modern inner header
//! - [`binary_pool`][]: Attachment deduplication
//! - [`variant`][]: Variant dictionary encoding
//! - [`xml`][]: XML body serialization

pub mod binary_pool;
pub mod blocks;
pub mod header;
pub mod inner_header;
pub mod variant;
pub mod xml;

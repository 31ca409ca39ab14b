//! Foundational data structures and error types.

pub mod database;
pub mod error;
pub mod models;
pub mod tree;

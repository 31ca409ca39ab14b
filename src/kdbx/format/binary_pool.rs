//! Content-addressed attachment pool.
//!
//! Every distinct attachment content in the tree gets one small integer
//! reference, assigned in document order. Live attachments of an entry are
//! scanned before those of its history snapshots.

use std::collections::HashMap;

use log::debug;
use sha2::{Digest, Sha256};

use crate::kdbx::types::models::ProtectedBinary;
use crate::kdbx::types::tree::{Tree, Visit};

#[derive(Debug, Default)]
pub struct BinaryPool {
    blobs: Vec<ProtectedBinary>,
    by_digest: HashMap<[u8; 32], Vec<usize>>,
}

impl BinaryPool {
    /// Collects every attachment reachable from the root group.
    pub fn build(tree: &Tree) -> Self {
        let mut pool = Self::default();
        for visit in tree.walk() {
            let entry = match visit {
                Visit::Entry(id) => tree.entry(id),
                Visit::Group(_) => None,
            };
            if let Some(entry) = entry {
                for binary in entry.binaries.values() {
                    pool.add(binary);
                }
                for snapshot in entry.history() {
                    for binary in snapshot.binaries.values() {
                        pool.add(binary);
                    }
                }
            }
        }
        debug!("Binary pool: {} distinct attachments", pool.blobs.len());
        pool
    }

    /// Adds `binary` unless equal content is already pooled. A pooled blob
    /// becomes protected if any occurrence is protected.
    pub fn add(&mut self, binary: &ProtectedBinary) -> usize {
        let digest: [u8; 32] = Sha256::digest(binary.data()).into();
        if let Some(key) = self.lookup(&digest, binary.data()) {
            if binary.is_protected() {
                self.blobs[key].set_protected(true);
            }
            return key;
        }
        let key = self.blobs.len();
        self.blobs.push(binary.clone());
        self.by_digest.entry(digest).or_default().push(key);
        key
    }

    fn lookup(&self, digest: &[u8; 32], data: &[u8]) -> Option<usize> {
        self.by_digest
            .get(digest)?
            .iter()
            .copied()
            .find(|&key| self.blobs[key].data() == data)
    }

    /// Reference for content equal to `data`, if pooled.
    pub fn find_key(&self, data: &[u8]) -> Option<usize> {
        let digest: [u8; 32] = Sha256::digest(data).into();
        self.lookup(&digest, data)
    }

    pub fn get(&self, key: usize) -> Option<&ProtectedBinary> {
        self.blobs.get(key)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Pooled blobs in reference order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &ProtectedBinary)> {
        self.blobs.iter().enumerate()
    }
}

//! # Content-Addressed Blob Storage
//!
//! Holds manifests, configs and layers keyed by their digest. Used by
//! [`MemoryRegistry`] to serve published bundles without a network.
//!
//! ## Digest Verification
//!
//! [`BlobStore::put_blob`] hashes the content and rejects it if the hash
//! does not match the digest it is being stored under, so a blob can never
//! be retrieved under a digest it does not have.
//!
//! ```rust,ignore
//! let store = BlobStore::new();
//! let data = b"hello world";
//! store.put_blob(&sha256_digest(data), data)?;
//! ```
//!
//! [`MemoryRegistry`]: crate::registry::MemoryRegistry

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Returns the OCI digest (`sha256:<hex>`) of `data`.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Splits and validates an OCI digest, returning `(algorithm, hex)`.
///
/// Only `sha256` is accepted; the hex part must be 64 lowercase hex chars.
pub fn parse_digest(digest: &str) -> Result<(&str, &str)> {
    let (algo, hash) = digest
        .split_once(':')
        .ok_or_else(|| Error::InvalidDigest(digest.to_string()))?;

    if algo != "sha256" {
        return Err(Error::InvalidDigest(format!(
            "unsupported digest algorithm '{}': only sha256 is supported",
            algo
        )));
    }

    if hash.len() != 64
        || !hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        return Err(Error::InvalidDigest(digest.to_string()));
    }

    Ok((algo, hash))
}

/// In-memory content-addressed blob store.
///
/// ## Thread Safety
///
/// `BlobStore` is cheap to clone and safe to share; clones see the same
/// blobs. Blobs are immutable once stored.
#[derive(Debug, Clone, Default)]
pub struct BlobStore {
    blobs: Arc<RwLock<HashMap<String, Arc<[u8]>>>>,
}

impl BlobStore {
    /// Creates an empty blob store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks if a blob exists.
    pub fn has_blob(&self, digest: &str) -> bool {
        self.read().contains_key(digest)
    }

    /// Gets a blob by digest.
    pub fn get_blob(&self, digest: &str) -> Result<Arc<[u8]>> {
        self.read()
            .get(digest)
            .cloned()
            .ok_or_else(|| Error::BlobNotFound {
                digest: digest.to_string(),
            })
    }

    /// Stores a blob after verifying its content matches the digest.
    pub fn put_blob(&self, digest: &str, data: &[u8]) -> Result<()> {
        parse_digest(digest)?;

        let computed = sha256_digest(data);
        if computed != digest {
            return Err(Error::DigestMismatch {
                expected: digest.to_string(),
                actual: computed,
            });
        }

        let mut blobs = self.write();
        if blobs.contains_key(digest) {
            debug!("Blob {} already exists", digest);
            return Ok(());
        }
        blobs.insert(digest.to_string(), Arc::from(data));

        debug!("Stored blob {} ({} bytes, verified)", digest, data.len());
        Ok(())
    }

    /// Stores `data` under its own digest and returns that digest.
    pub fn put(&self, data: &[u8]) -> Result<String> {
        let digest = sha256_digest(data);
        self.put_blob(&digest, data)?;
        Ok(digest)
    }

    /// Lists all blob digests, sorted.
    pub fn list_blobs(&self) -> Vec<String> {
        let mut digests: Vec<String> = self.read().keys().cloned().collect();
        digests.sort();
        digests
    }

    /// Returns the total size of all blobs.
    pub fn total_size(&self) -> u64 {
        self.read().values().map(|b| b.len() as u64).sum()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<[u8]>>> {
        // A poisoned lock only means a writer panicked between two inserts;
        // the map itself is still consistent.
        self.blobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<[u8]>>> {
        self.blobs.write().unwrap_or_else(|e| e.into_inner())
    }
}

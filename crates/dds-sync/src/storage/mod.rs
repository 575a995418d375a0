//! Durable object storage
//!
//! Archives, unpacked extracts, and data files all live in object storage
//! keyed under a configurable prefix. The [`ObjectStore`] trait keeps the
//! pipeline independent of the backend: production uses S3, tests and local
//! development use a filesystem root.

use crate::error::StorageError;
use async_trait::async_trait;

pub mod local;
pub mod s3;

pub use local::LocalStore;
pub use s3::S3Store;

/// Read/write access to durable object storage by key.
///
/// Writes overwrite idempotently: re-putting the same key with the same bytes
/// leaves storage in the same state, never duplicates.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// List keys under a prefix, in lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Join key segments with single slashes, tolerating trailing separators.
pub fn join_key(prefix: &str, suffix: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let suffix = suffix.trim_start_matches('/');
    if prefix.is_empty() {
        suffix.to_string()
    } else {
        format!("{}/{}", prefix, suffix)
    }
}

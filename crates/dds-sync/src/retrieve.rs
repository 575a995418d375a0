//! Archive retrieval and multi-part reassembly
//!
//! Each extract archive may be split into parts on the vendor side. Parts
//! download with bounded concurrency, every part is checked against its
//! declared size, and reassembly concatenates strictly by ascending part
//! index. The resulting bytes are deterministic for a given descriptor no
//! matter in which order downloads finished.

use crate::api::{ExtractApiClient, ExtractFileDescriptor};
use crate::error::RetrievalError;
use crate::storage::{self, ObjectStore};
use dds_common::checksum::sha256_hex;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

/// A reassembled archive committed to durable storage
#[derive(Debug, Clone)]
pub struct RetrievedArchive {
    /// Descriptor name, e.g. `168629-20240419-0000-F`
    pub name: String,
    /// Object storage key of the reassembled archive
    pub storage_key: String,
    pub checksum: String,
    pub size: u64,
}

impl RetrievedArchive {
    /// Prefix under which this archive unpacks, derived by stripping the
    /// archive suffix from the storage key.
    pub fn unpack_prefix(&self) -> String {
        self.storage_key
            .strip_suffix(".tar.gz")
            .unwrap_or(&self.storage_key)
            .to_string()
    }
}

/// Downloads descriptors and commits reassembled archives to object storage
pub struct Retriever {
    store: Arc<dyn ObjectStore>,
    base_prefix: String,
    part_concurrency: usize,
}

impl Retriever {
    pub fn new(store: Arc<dyn ObjectStore>, base_prefix: &str, part_concurrency: usize) -> Self {
        Self {
            store,
            base_prefix: base_prefix.to_string(),
            part_concurrency: part_concurrency.max(1),
        }
    }

    /// Storage key for a descriptor's reassembled archive. Deterministic, so
    /// re-running retrieval overwrites idempotently.
    pub fn archive_key(&self, descriptor: &ExtractFileDescriptor) -> String {
        storage::join_key(&self.base_prefix, &descriptor.filename)
    }

    /// Retrieve one descriptor: download all parts, verify sizes, reassemble
    /// in part-index order, and write the archive to durable storage.
    ///
    /// Exhausted retries on any one part fail this descriptor only; the
    /// caller decides whether to continue with other descriptors.
    pub async fn retrieve(
        &self,
        api: &ExtractApiClient,
        descriptor: &ExtractFileDescriptor,
    ) -> Result<RetrievedArchive, RetrievalError> {
        info!(
            name = %descriptor.name,
            fileparts = descriptor.fileparts,
            size = descriptor.size,
            "Retrieving extract archive"
        );

        let mut parts: Vec<(u32, Vec<u8>)> = stream::iter(descriptor.filepart_details.iter())
            .map(|part| async move {
                let bytes = api.download_part(&part.url).await?;
                if part.size > 0 && bytes.len() as u64 != part.size {
                    return Err(RetrievalError::PartSizeMismatch {
                        name: descriptor.name.clone(),
                        part: part.filepart,
                        expected: part.size,
                        actual: bytes.len() as u64,
                    });
                }
                debug!(
                    name = %descriptor.name,
                    part = part.filepart,
                    bytes = bytes.len(),
                    "Part downloaded and verified"
                );
                Ok::<_, RetrievalError>((part.filepart, bytes))
            })
            .buffer_unordered(self.part_concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        // Reassembly barrier: strict part-index order, independent of
        // download completion order.
        parts.sort_by_key(|(index, _)| *index);
        parts.dedup_by_key(|(index, _)| *index);

        let expected = descriptor.fileparts.max(1);
        if parts.len() as u32 != expected {
            return Err(RetrievalError::MissingParts {
                name: descriptor.name.clone(),
                expected,
                actual: parts.len() as u32,
            });
        }

        let mut archive = Vec::with_capacity(descriptor.size as usize);
        for (_, bytes) in parts {
            archive.extend_from_slice(&bytes);
        }

        let checksum = sha256_hex(&archive);
        let size = archive.len() as u64;
        let storage_key = self.archive_key(descriptor);

        self.store.put(&storage_key, archive).await?;

        info!(
            name = %descriptor.name,
            key = %storage_key,
            size,
            checksum = %checksum,
            "Archive reassembled and stored"
        );

        Ok(RetrievedArchive {
            name: descriptor.name.clone(),
            storage_key,
            checksum,
            size,
        })
    }
}

//! Archive decompression
//!
//! Unpacks a gzip-compressed tar archive from object storage into a target
//! prefix, one object per archive member. Unpacking the same archive into the
//! same prefix twice overwrites idempotently.

use crate::error::ManifestError;
use crate::storage::{self, ObjectStore};
use dds_common::checksum::verify_checksum;
use flate2::read::GzDecoder;
use std::io::Read;
use std::sync::Arc;
use tar::Archive;
use tracing::{debug, info};

/// Contents of one unpacked archive
#[derive(Debug, Clone)]
pub struct UnpackedExtract {
    /// Prefix under which all members were written
    pub target_prefix: String,
    /// Member keys relative to `target_prefix`, in archive order
    pub members: Vec<String>,
}

/// Unpacks archives from object storage back into object storage
pub struct Unpacker {
    store: Arc<dyn ObjectStore>,
}

impl Unpacker {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Unpack the archive at `archive_key` under `target_prefix`.
    ///
    /// When `expected_checksum` is given, the stored bytes are verified
    /// against it before decompression; a mismatch fails the step.
    pub async fn unpack(
        &self,
        archive_key: &str,
        target_prefix: &str,
        expected_checksum: Option<&str>,
    ) -> Result<UnpackedExtract, ManifestError> {
        info!(
            archive = %archive_key,
            target = %target_prefix,
            "Unpacking extract archive"
        );

        let compressed = self.store.get(archive_key).await?;

        if let Some(expected) = expected_checksum {
            verify_checksum(&compressed, expected)
                .map_err(|e| ManifestError::Archive(e.to_string()))?;
        }

        // Decompression is CPU-bound over in-memory bytes; keep it off the
        // async executor.
        let entries = tokio::task::spawn_blocking(move || extract_members(&compressed))
            .await
            .map_err(|e| ManifestError::Archive(e.to_string()))??;

        let mut members = Vec::with_capacity(entries.len());
        for (path, data) in entries {
            let key = storage::join_key(target_prefix, &path);
            debug!(member = %path, bytes = data.len(), "Writing archive member");
            self.store.put(&key, data).await?;
            members.push(path);
        }

        info!(
            target = %target_prefix,
            members = members.len(),
            "Archive unpacked"
        );

        Ok(UnpackedExtract {
            target_prefix: target_prefix.to_string(),
            members,
        })
    }
}

/// Read every regular file out of a gzipped tar, in archive order.
fn extract_members(compressed: &[u8]) -> Result<Vec<(String, Vec<u8>)>, ManifestError> {
    let mut archive = Archive::new(GzDecoder::new(compressed));
    let mut members = Vec::new();

    let entries = archive
        .entries()
        .map_err(|e| ManifestError::Archive(format!("unreadable archive: {e}")))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| ManifestError::Archive(e.to_string()))?;

        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry
            .path()
            .map_err(|e| ManifestError::Archive(e.to_string()))?
            .to_string_lossy()
            .into_owned();

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| ManifestError::Archive(format!("failed to read '{path}': {e}")))?;

        members.push((path, data));
    }

    Ok(members)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn build_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_extract_members_preserves_order() {
        let archive = build_archive(&[
            ("manifest.csv", b"extract,type,records,file"),
            ("Object/account.csv", b"id,name__v"),
        ]);

        let members = extract_members(&archive).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].0, "manifest.csv");
        assert_eq!(members[1].0, "Object/account.csv");
        assert_eq!(members[1].1, b"id,name__v");
    }

    #[test]
    fn test_garbage_bytes_are_an_archive_error() {
        let result = extract_members(b"definitely not a tarball");
        assert!(matches!(result, Err(ManifestError::Archive(_))));
    }

    #[tokio::test]
    async fn test_unpack_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(crate::storage::LocalStore::new(dir.path()));
        let archive = build_archive(&[("manifest.csv", b"extract,type,records,file")]);

        store
            .put("direct-data/a.tar.gz", archive)
            .await
            .unwrap();

        let unpacker = Unpacker::new(store.clone());
        unpacker
            .unpack("direct-data/a.tar.gz", "direct-data/a", None)
            .await
            .unwrap();
        let second = unpacker
            .unpack("direct-data/a.tar.gz", "direct-data/a", None)
            .await
            .unwrap();

        assert_eq!(second.members, vec!["manifest.csv".to_string()]);
        let keys = store.list("direct-data/a/").await.unwrap();
        assert_eq!(keys, vec!["direct-data/a/manifest.csv".to_string()]);
    }

    #[tokio::test]
    async fn test_unpack_verifies_archive_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(crate::storage::LocalStore::new(dir.path()));
        let archive = build_archive(&[("manifest.csv", b"extract,type,records,file")]);
        let checksum = dds_common::checksum::sha256_hex(&archive);

        store
            .put("direct-data/a.tar.gz", archive)
            .await
            .unwrap();

        let unpacker = Unpacker::new(store.clone());

        // Stored bytes that no longer match the recorded checksum must not
        // be unpacked.
        let result = unpacker
            .unpack("direct-data/a.tar.gz", "direct-data/a", Some("deadbeef"))
            .await;
        assert!(matches!(result, Err(ManifestError::Archive(_))));
        assert!(store.list("direct-data/a/").await.unwrap().is_empty());

        let unpacked = unpacker
            .unpack("direct-data/a.tar.gz", "direct-data/a", Some(&checksum))
            .await
            .unwrap();
        assert_eq!(unpacked.members, vec!["manifest.csv".to_string()]);
    }
}

//! Filesystem blob storage.
//!
//! Content-addressed: the handle is the hex SHA-256 of the bytes, and the
//! file lives at `<root>/<first two hex chars>/<handle>`. Writing the same
//! bytes twice is a no-op.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use tender_index_core::resolver::content_sha256;
use tender_index_core::store::BlobStorage;

#[derive(Debug, Clone)]
pub struct FsBlobStorage {
    root: PathBuf,
}

impl FsBlobStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, handle: &str) -> Result<PathBuf> {
        if handle.len() < 3 || !handle.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("invalid blob handle: {}", handle);
        }
        Ok(self.root.join(&handle[..2]).join(handle))
    }
}

#[async_trait]
impl BlobStorage for FsBlobStorage {
    async fn put(&self, bytes: &[u8]) -> Result<String> {
        let handle = content_sha256(bytes);
        let path = self.path_for(&handle)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(handle);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        // Write-then-rename so readers never see a partial file.
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(handle)
    }

    async fn get(&self, handle: &str) -> Result<Vec<u8>> {
        let path = self.path_for(handle)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Blob not found: {}", handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_get_dedup() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStorage::new(tmp.path());
        let a = store.put(b"tender bytes").await.unwrap();
        let b = store.put(b"tender bytes").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.get(&a).await.unwrap(), b"tender bytes");
    }

    #[tokio::test]
    async fn rejects_path_like_handles() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStorage::new(tmp.path());
        assert!(store.get("../etc/passwd").await.is_err());
        assert!(store.get("ab").await.is_err());
    }
}

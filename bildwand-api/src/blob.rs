//! Filesystem-backed storage for uploaded image bytes.
//!
//! Uploads are first staged under a unique temporary name, then renamed onto
//! their final name once it is known. Staging happens in the same directory
//! as the final files, so the rename stays on one filesystem and readers
//! never observe a partially written blob.

use rand::Rng;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Could not stage uploaded bytes: {0}")]
    Stage(#[source] io::Error),
    #[error("Could not move blob into place: {0}")]
    Promote(#[source] io::Error),
    #[error("Could not read blob: {0}")]
    Read(#[source] io::Error),
    #[error("Could not delete blob: {0}")]
    Delete(#[source] io::Error),
}

#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Opens the store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Writes `bytes` under a fresh temporary name and returns its path.
    pub async fn stage(&self, bytes: &[u8], extension: &str) -> Result<PathBuf, BlobError> {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        let suffix: u32 = rand::rng().random_range(0..1_000_000_000);

        let path = self.path_for(&format!("{millis}-{suffix:09}.{extension}"));
        fs::write(&path, bytes).await.map_err(BlobError::Stage)?;
        Ok(path)
    }

    /// Atomically renames a staged file onto `final_name`.
    pub async fn promote(&self, staged: &Path, final_name: &str) -> Result<PathBuf, BlobError> {
        let destination = self.path_for(final_name);
        fs::rename(staged, &destination)
            .await
            .map_err(BlobError::Promote)?;
        Ok(destination)
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>, BlobError> {
        fs::read(self.path_for(name)).await.map_err(BlobError::Read)
    }

    /// Deleting a name that does not exist is not an error, so compensation
    /// can run twice for the same name.
    pub async fn delete(&self, name: &str) -> Result<(), BlobError> {
        self.delete_path(&self.path_for(name)).await
    }

    pub async fn delete_path(&self, path: &Path) -> Result<(), BlobError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BlobError::Delete(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, FsBlobStore) {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn stage_promote_read_round_trip() {
        let (_dir, store) = store().await;

        let staged = store.stage(b"image-bytes", "png").await.unwrap();
        assert!(staged.exists());

        let destination = store.promote(&staged, "42.png").await.unwrap();
        assert!(!staged.exists());
        assert!(destination.exists());

        assert_eq!(store.read("42.png").await.unwrap(), b"image-bytes");
    }

    #[tokio::test]
    async fn staged_names_are_unique() {
        let (_dir, store) = store().await;

        let first = store.stage(b"a", "png").await.unwrap();
        let second = store.stage(b"b", "png").await.unwrap();

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn delete_missing_blob_is_a_no_op() {
        let (_dir, store) = store().await;

        store.delete("missing.png").await.unwrap();

        let staged = store.stage(b"bytes", "gif").await.unwrap();
        store.promote(&staged, "7.gif").await.unwrap();
        store.delete("7.gif").await.unwrap();
        // Second pass over the same name must also succeed.
        store.delete("7.gif").await.unwrap();
        assert!(store.read("7.gif").await.is_err());
    }

    #[tokio::test]
    async fn open_creates_missing_root() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("uploads");

        let store = FsBlobStore::open(&nested).await.unwrap();
        assert!(nested.is_dir());
        assert_eq!(store.root(), nested);
    }
}

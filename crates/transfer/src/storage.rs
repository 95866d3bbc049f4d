use std::path::{Path, PathBuf};

use crate::{Allocation, TransferError, validate_upload_path};

/// Prepares destination files under a single upload root.
#[derive(Debug, Clone)]
pub struct StorageAllocator {
    root: PathBuf,
}

impl StorageAllocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the upload root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a file identifier to its destination path.
    pub fn destination(&self, identifier: &str) -> Result<PathBuf, TransferError> {
        validate_upload_path(&self.root, identifier)
    }

    /// Performs the storage work requested by the registry.
    pub async fn prepare(&self, path: &Path, allocation: Allocation) -> Result<(), TransferError> {
        match allocation {
            Allocation::Create { total } => self.allocate(path, total).await,
            Allocation::Extend { total } => self.extend_to(path, total).await,
        }
    }

    /// Creates the destination file, discarding any previous content.
    ///
    /// A known total sizes the file up front (sparse where the filesystem
    /// allows it, unwritten regions read back as zeros). An unknown total
    /// leaves it empty; later writes extend it.
    pub async fn allocate(&self, path: &Path, total: Option<u64>) -> Result<(), TransferError> {
        let init_err = |source| TransferError::StorageInit {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(init_err)?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await
            .map_err(init_err)?;

        match total {
            Some(total) => {
                file.set_len(total).await.map_err(init_err)?;
                tracing::info!(path = %path.display(), total, "preallocated destination file");
            }
            None => {
                tracing::info!(path = %path.display(), "created empty destination file");
            }
        }
        Ok(())
    }

    /// Grows a file created with an unknown total to its now-known size.
    ///
    /// Never shrinks: bytes already written past `total` are kept.
    pub async fn extend_to(&self, path: &Path, total: u64) -> Result<(), TransferError> {
        let init_err = |source| TransferError::StorageInit {
            path: path.to_path_buf(),
            source,
        };

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(init_err)?;
        let current = file.metadata().await.map_err(init_err)?.len();
        if current < total {
            file.set_len(total).await.map_err(init_err)?;
            tracing::debug!(path = %path.display(), from = current, to = total, "extended destination file");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn preallocates_known_total_with_zeros() {
        let dir = TempDir::new().unwrap();
        let storage = StorageAllocator::new(dir.path());
        let path = storage.destination("a.txt").unwrap();

        storage.allocate(&path, Some(10)).await.unwrap();

        let content = std::fs::read(&path).unwrap();
        assert_eq!(content, vec![0u8; 10]);
    }

    #[tokio::test]
    async fn unknown_total_creates_empty_file() {
        let dir = TempDir::new().unwrap();
        let storage = StorageAllocator::new(dir.path());
        let path = storage.destination("b.bin").unwrap();

        storage.allocate(&path, None).await.unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn allocation_discards_previous_content() {
        let dir = TempDir::new().unwrap();
        let storage = StorageAllocator::new(dir.path());
        let path = storage.destination("a.txt").unwrap();
        std::fs::write(&path, b"stale bytes!").unwrap();

        storage.allocate(&path, Some(4)).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![0u8; 4]);
    }

    #[tokio::test]
    async fn creates_intermediate_directories() {
        let dir = TempDir::new().unwrap();
        let storage = StorageAllocator::new(dir.path());
        let path = storage.destination("sub/dir/c.bin").unwrap();

        storage
            .prepare(&path, Allocation::Create { total: Some(3) })
            .await
            .unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn extend_grows_but_never_shrinks() {
        let dir = TempDir::new().unwrap();
        let storage = StorageAllocator::new(dir.path());
        let path = storage.destination("b.bin").unwrap();
        std::fs::write(&path, b"abc").unwrap();

        storage
            .prepare(&path, Allocation::Extend { total: 6 })
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc\0\0\0");

        storage.extend_to(&path, 2).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 6);
    }

    #[tokio::test]
    async fn unusable_root_is_storage_init_error() {
        let dir = TempDir::new().unwrap();
        // A regular file where a directory is expected.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let storage = StorageAllocator::new(&blocker);
        let path = storage.destination("sub/a.txt").unwrap();

        let err = storage.allocate(&path, Some(10)).await.unwrap_err();
        assert!(matches!(err, TransferError::StorageInit { .. }));
    }

    #[test]
    fn destination_rejects_traversal() {
        let storage = StorageAllocator::new("/srv/uploads");
        assert!(matches!(
            storage.destination("../escape"),
            Err(TransferError::InvalidPath(_))
        ));
    }
}

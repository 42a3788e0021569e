//! services/api/src/adapters/photo_store.rs
//!
//! A blob store for child profile photos backed by the local filesystem.
//! It implements the `PhotoStorageService` port from the `core` crate.

use async_trait::async_trait;
use companion_core::ports::{PhotoStorageService, PortError, PortResult};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

#[derive(Clone, Debug)]
pub struct LocalPhotoStore {
    root: PathBuf,
}

impl LocalPhotoStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Resolves a storage key under the root, refusing keys that escape it.
    fn resolve(&self, key: &str) -> PortResult<PathBuf> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(PortError::Unexpected(format!("Invalid photo key '{}'", key)));
        }
        Ok(self.root.join(relative))
    }

    async fn read_capped(path: &Path, max_bytes: usize) -> PortResult<Vec<u8>> {
        let metadata = fs::metadata(path).await.map_err(|e| io_error(path, e))?;
        if metadata.len() > max_bytes as u64 {
            return Err(PortError::Unexpected(format!(
                "Photo {} is {} bytes, over the {} byte limit",
                path.display(),
                metadata.len(),
                max_bytes
            )));
        }
        fs::read(path).await.map_err(|e| io_error(path, e))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> PortError {
    if e.kind() == ErrorKind::NotFound {
        PortError::NotFound(format!("Photo {} not found", path.display()))
    } else {
        PortError::Unexpected(format!("Photo I/O failed for {}: {}", path.display(), e))
    }
}

#[async_trait]
impl PhotoStorageService for LocalPhotoStore {
    async fn upload_photo(&self, key: &str, jpeg: &[u8]) -> PortResult<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        fs::write(&path, jpeg).await.map_err(|e| io_error(&path, e))
    }

    async fn download_photo(&self, key: &str, max_bytes: usize) -> PortResult<Vec<u8>> {
        let path = self.resolve(key)?;
        Self::read_capped(&path, max_bytes).await
    }

    async fn download_url(&self, key: &str) -> PortResult<String> {
        let path = self.resolve(key)?;
        let absolute = fs::canonicalize(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        Ok(format!("file://{}", absolute.display()))
    }

    async fn fetch_url(&self, url: &str, max_bytes: usize) -> PortResult<Vec<u8>> {
        let path = url
            .strip_prefix("file://")
            .ok_or_else(|| PortError::Unexpected(format!("Unsupported photo URL '{}'", url)))?;
        Self::read_capped(Path::new(path), max_bytes).await
    }
}

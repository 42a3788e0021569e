//! crates/companion_core/src/photos.rs
//!
//! Child profile photo conventions and the download-with-fallback path.

use tracing::warn;
use uuid::Uuid;

use crate::ports::{PhotoStorageService, PortError, PortResult};

/// Upper bound for a stored profile photo.
pub const MAX_PHOTO_BYTES: usize = 10 * 1024 * 1024;

/// Storage key for a child's profile photo.
pub fn child_photo_path(user_id: Uuid, child_id: Uuid) -> String {
    format!("children/{}/{}/profile.jpg", user_id, child_id)
}

/// JPEG files start with the SOI marker.
pub fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0xFF, 0xD8])
}

pub async fn store_photo(store: &dyn PhotoStorageService, path: &str, jpeg: &[u8]) -> PortResult<()> {
    if !is_jpeg(jpeg) {
        return Err(PortError::Unexpected("Photo must be a JPEG image".to_string()));
    }
    if jpeg.len() > MAX_PHOTO_BYTES {
        return Err(PortError::Unexpected(format!(
            "Photo is {} bytes, limit is {}",
            jpeg.len(),
            MAX_PHOTO_BYTES
        )));
    }
    store.upload_photo(path, jpeg).await
}

/// Downloads a photo, retrying once through its resolved URL if the direct read fails.
pub async fn load_photo(store: &dyn PhotoStorageService, path: &str) -> PortResult<Vec<u8>> {
    match store.download_photo(path, MAX_PHOTO_BYTES).await {
        Ok(bytes) => Ok(bytes),
        Err(PortError::NotFound(msg)) => Err(PortError::NotFound(msg)),
        Err(e) => {
            warn!("Direct photo download failed for {}: {}. Retrying via URL.", path, e);
            let url = store.download_url(path).await?;
            store.fetch_url(&url, MAX_PHOTO_BYTES).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyStore {
        direct_fails: bool,
        missing: bool,
        url_fetches: AtomicUsize,
    }

    impl FlakyStore {
        fn new(direct_fails: bool, missing: bool) -> Self {
            Self {
                direct_fails,
                missing,
                url_fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PhotoStorageService for FlakyStore {
        async fn upload_photo(&self, _path: &str, _jpeg: &[u8]) -> PortResult<()> {
            Ok(())
        }

        async fn download_photo(&self, path: &str, _max_bytes: usize) -> PortResult<Vec<u8>> {
            if self.missing {
                Err(PortError::NotFound(path.to_string()))
            } else if self.direct_fails {
                Err(PortError::Unexpected("connection reset".to_string()))
            } else {
                Ok(vec![0xFF, 0xD8, 1])
            }
        }

        async fn download_url(&self, path: &str) -> PortResult<String> {
            Ok(format!("file:///photos/{}", path))
        }

        async fn fetch_url(&self, _url: &str, _max_bytes: usize) -> PortResult<Vec<u8>> {
            self.url_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0xFF, 0xD8, 2])
        }
    }

    #[test]
    fn photo_path_convention() {
        let user = Uuid::nil();
        let child = Uuid::from_u128(7);
        assert_eq!(
            child_photo_path(user, child),
            format!("children/{}/{}/profile.jpg", user, child)
        );
    }

    #[tokio::test]
    async fn direct_download_skips_fallback() {
        let store = FlakyStore::new(false, false);
        assert_eq!(load_photo(&store, "p").await.unwrap(), vec![0xFF, 0xD8, 1]);
        assert_eq!(store.url_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_download_retries_once_via_url() {
        let store = FlakyStore::new(true, false);
        assert_eq!(load_photo(&store, "p").await.unwrap(), vec![0xFF, 0xD8, 2]);
        assert_eq!(store.url_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_photo_is_not_retried() {
        let store = FlakyStore::new(true, true);
        assert!(matches!(load_photo(&store, "p").await, Err(PortError::NotFound(_))));
        assert_eq!(store.url_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejects_non_jpeg_uploads() {
        let store = FlakyStore::new(false, false);
        assert!(store_photo(&store, "p", b"\x89PNG").await.is_err());
        assert!(store_photo(&store, "p", &[0xFF, 0xD8, 0xFF]).await.is_ok());
    }
}

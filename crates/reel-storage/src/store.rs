//! Object store seam.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::StorageResult;

/// Get/put access to object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a whole object.
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>>;

    /// Store `body` under `key`, replacing any existing object.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()>;

    /// Write an object to `path`, returning the number of bytes written.
    async fn download_to(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<u64> {
        let bytes = self.get_object(bucket, key).await?;
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(bytes.len() as u64)
    }

    /// Upload a local file.
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> StorageResult<()> {
        let body = tokio::fs::read(path).await?;
        self.put_object(bucket, key, body, content_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::error::StorageError;

    #[derive(Default)]
    struct MapStore {
        objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    }

    #[async_trait]
    impl ObjectStore for MapStore {
        async fn get_object(&self, _bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .map(|(body, _)| body.clone())
                .ok_or_else(|| StorageError::not_found(key))
        }

        async fn put_object(
            &self,
            _bucket: &str,
            key: &str,
            body: Vec<u8>,
            content_type: &str,
        ) -> StorageResult<()> {
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), (body, content_type.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_put_file_then_download_to() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("out.mp4");
        tokio::fs::write(&source, b"rendered").await.unwrap();

        let store = MapStore::default();
        store
            .put_file("renders", "reels/r1/out.mp4", &source, "video/mp4")
            .await
            .unwrap();
        assert_eq!(
            store.objects.lock().unwrap()["reels/r1/out.mp4"].1,
            "video/mp4"
        );

        let dest = dir.path().join("copy.mp4");
        let written = store
            .download_to("renders", "reels/r1/out.mp4", &dest)
            .await
            .unwrap();
        assert_eq!(written, 8);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"rendered");
    }

    #[tokio::test]
    async fn test_download_to_missing_object_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("gone.mp4");

        let err = MapStore::default()
            .download_to("media", "gone.mp4", &dest)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_put_file_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = MapStore::default();

        let result = store
            .put_file("renders", "k", &dir.path().join("nope"), "video/mp4")
            .await;
        assert!(result.is_err());
        assert!(store.objects.lock().unwrap().is_empty());
    }
}

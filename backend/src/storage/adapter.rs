use chrono::{DateTime, Datelike, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::local::LocalStore;
use super::{RemoteStore, StorageError};

const TOKEN_LEN: usize = 12;
const MAX_NAME_LEN: usize = 100;

/// Where an upload ended up. `url == None` means the bytes only exist on
/// local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: String,
    pub url: Option<String>,
}

impl StoredFile {
    pub fn is_local_only(&self) -> bool {
        self.url.is_none()
    }
}

pub struct StorageAdapter {
    remote: Option<Arc<dyn RemoteStore>>,
    local: LocalStore,
    timeout: Duration,
}

impl StorageAdapter {
    pub fn new(remote: Option<Arc<dyn RemoteStore>>, local: LocalStore, timeout: Duration) -> Self {
        Self {
            remote,
            local,
            timeout,
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn sanitize_file_name(name: &str) -> String {
        // Browsers may send a full client path; keep only the last segment.
        let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
        let cleaned: String = base
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let trimmed = cleaned.trim_start_matches('.');
        if trimmed.is_empty() {
            return "upload".to_string();
        }
        trimmed.chars().take(MAX_NAME_LEN).collect()
    }

    pub fn random_token() -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect()
    }

    pub fn build_path(owner_id: Uuid, original_name: &str, now: DateTime<Utc>) -> String {
        format!(
            "{}/{:04}/{:02}/{:02}/{}_{}",
            owner_id,
            now.year(),
            now.month(),
            now.day(),
            Self::random_token(),
            Self::sanitize_file_name(original_name)
        )
    }

    async fn timed<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| StorageError::Timeout(self.timeout))?
    }

    /// Tries the remote bucket once; any failure writes the same bytes to the
    /// same path on local disk instead.
    pub async fn upload(
        &self,
        data: &[u8],
        owner_id: Uuid,
        original_name: &str,
        content_type: &str,
    ) -> Result<StoredFile, StorageError> {
        let path = Self::build_path(owner_id, original_name, Utc::now());

        if let Some(remote) = &self.remote {
            match self.timed(remote.put(&path, data, content_type)).await {
                Ok(()) => {
                    log::info!("Uploaded {} ({} bytes) to remote storage", path, data.len());
                    return Ok(StoredFile {
                        url: Some(remote.public_url(&path)),
                        path,
                    });
                }
                Err(e) => {
                    log::warn!(
                        "Remote upload of {} failed, falling back to local storage: {}",
                        path,
                        e
                    );
                }
            }
        }

        self.local.put(&path, data).await.map_err(|e| {
            log::error!("Local fallback write of {} failed: {}", path, e);
            StorageError::Unavailable(format!("could not store {}: {}", path, e))
        })?;
        log::info!("Stored {} ({} bytes) on local disk", path, data.len());

        Ok(StoredFile { path, url: None })
    }

    pub async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let mut failures = Vec::new();

        if self.local.exists(path).await {
            match self.local.get(path).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => failures.push(format!("local: {}", e)),
            }
        }

        if let Some(remote) = &self.remote {
            match self.timed(remote.get(path)).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => failures.push(format!("remote: {}", e)),
            }
        }

        if failures.is_empty() {
            failures.push("not present in any backend".to_string());
        }
        log::error!("Download of {} failed ({})", path, failures.join("; "));
        Err(StorageError::Unavailable(format!(
            "{}: {}",
            path,
            failures.join("; ")
        )))
    }

    /// Best-effort removal from every backend. A missing file is not an error;
    /// returns false only if a backend reported a real failure.
    pub async fn delete(&self, path: &str) -> bool {
        let mut ok = true;

        if let Some(remote) = &self.remote {
            match self.timed(remote.delete(path)).await {
                Ok(()) | Err(StorageError::NotFound(_)) => {}
                Err(e) => {
                    log::warn!("Remote delete of {} failed: {}", path, e);
                    ok = false;
                }
            }
        }

        match self.local.delete(path).await {
            Ok(removed) => {
                if removed {
                    log::debug!("Removed local copy of {}", path);
                }
            }
            Err(e) => {
                log::warn!("Local delete of {} failed: {}", path, e);
                ok = false;
            }
        }

        ok
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory bucket that can be switched offline.
    #[derive(Default)]
    pub(crate) struct FakeRemote {
        pub objects: Mutex<HashMap<String, Vec<u8>>>,
        pub offline: bool,
    }

    impl FakeRemote {
        pub fn offline() -> Self {
            Self {
                offline: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl RemoteStore for FakeRemote {
        async fn put(&self, key: &str, data: &[u8], _ct: &str) -> Result<(), StorageError> {
            if self.offline {
                return Err(StorageError::S3("connection refused".into()));
            }
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), data.to_vec());
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
            if self.offline {
                return Err(StorageError::S3("connection refused".into()));
            }
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(key.to_string()))
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            if self.offline {
                return Err(StorageError::S3("connection refused".into()));
            }
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }

        fn public_url(&self, key: &str) -> String {
            format!("https://bucket.example.com/{}", key)
        }
    }

    struct HangingRemote;

    #[async_trait]
    impl RemoteStore for HangingRemote {
        async fn put(&self, _key: &str, _data: &[u8], _ct: &str) -> Result<(), StorageError> {
            std::future::pending().await
        }
        async fn get(&self, _key: &str) -> Result<Vec<u8>, StorageError> {
            std::future::pending().await
        }
        async fn delete(&self, _key: &str) -> Result<(), StorageError> {
            std::future::pending().await
        }
        fn public_url(&self, key: &str) -> String {
            key.to_string()
        }
    }

    pub(crate) fn adapter_with(
        remote: Option<Arc<dyn RemoteStore>>,
        temp: &TempDir,
    ) -> StorageAdapter {
        StorageAdapter::new(
            remote,
            LocalStore::new(temp.path().to_path_buf()),
            Duration::from_millis(200),
        )
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(StorageAdapter::sanitize_file_name("lesion 01.JPG"), "lesion_01.JPG");
        assert_eq!(StorageAdapter::sanitize_file_name("C:\\photos\\a.png"), "a.png");
        assert_eq!(StorageAdapter::sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(StorageAdapter::sanitize_file_name("..."), "upload");
        assert_eq!(StorageAdapter::sanitize_file_name(""), "upload");
        assert_eq!(StorageAdapter::sanitize_file_name(&"x".repeat(300)).len(), 100);
    }

    #[test]
    fn paths_are_scoped_by_owner_and_date() {
        let owner = Uuid::new_v4();
        let now = DateTime::parse_from_rfc3339("2024-03-07T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let a = StorageAdapter::build_path(owner, "photo.jpg", now);
        let b = StorageAdapter::build_path(owner, "photo.jpg", now);

        let prefix = format!("{}/2024/03/07/", owner);
        assert!(a.starts_with(&prefix));
        assert!(a.ends_with("_photo.jpg"));
        assert_eq!(a.len(), prefix.len() + TOKEN_LEN + "_photo.jpg".len());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn remote_upload_returns_public_url() {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::default());
        let adapter = adapter_with(Some(remote.clone()), &temp);

        let stored = adapter
            .upload(b"jpeg-bytes", Uuid::new_v4(), "a.jpg", "image/jpeg")
            .await
            .unwrap();

        assert_eq!(
            stored.url.as_deref(),
            Some(format!("https://bucket.example.com/{}", stored.path).as_str())
        );
        assert!(remote.objects.lock().unwrap().contains_key(&stored.path));
        assert!(!adapter.local.exists(&stored.path).await);
    }

    #[tokio::test]
    async fn offline_remote_falls_back_to_local() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter_with(Some(Arc::new(FakeRemote::offline())), &temp);

        let stored = adapter
            .upload(b"png-bytes", Uuid::new_v4(), "b.png", "image/png")
            .await
            .unwrap();

        assert!(stored.is_local_only());
        assert_eq!(adapter.download(&stored.path).await.unwrap(), b"png-bytes");
    }

    #[tokio::test]
    async fn hanging_remote_times_out_into_fallback() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter_with(Some(Arc::new(HangingRemote)), &temp);

        let stored = adapter
            .upload(b"data", Uuid::new_v4(), "c.jpg", "image/jpeg")
            .await
            .unwrap();
        assert!(stored.is_local_only());
        assert_eq!(adapter.download(&stored.path).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn download_is_repeatable() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter_with(Some(Arc::new(FakeRemote::default())), &temp);
        let stored = adapter
            .upload(b"same bytes", Uuid::new_v4(), "d.jpg", "image/jpeg")
            .await
            .unwrap();

        let first = adapter.download(&stored.path).await.unwrap();
        let second = adapter.download(&stored.path).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_everywhere_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter_with(Some(Arc::new(FakeRemote::offline())), &temp);

        assert!(matches!(
            adapter.download("nobody/2024/01/01/x_y.jpg").await,
            Err(StorageError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn delete_tolerates_missing_files() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter_with(None, &temp);

        let stored = adapter
            .upload(b"bytes", Uuid::new_v4(), "e.jpg", "image/jpeg")
            .await
            .unwrap();
        assert!(adapter.delete(&stored.path).await);
        assert!(adapter.delete(&stored.path).await);
        assert!(adapter.download(&stored.path).await.is_err());
    }
}

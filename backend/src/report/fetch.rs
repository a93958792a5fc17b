use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::storage::adapter::StorageAdapter;

/// Best-effort source image lookup. `None` means the report shows the
/// unavailable note instead of the picture.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: Option<&str>, storage_path: &str) -> Option<Vec<u8>>;
}

/// Tries the public URL first, then the storage adapter's copy.
pub struct HttpImageFetcher {
    client: reqwest::Client,
    storage: Arc<StorageAdapter>,
}

impl HttpImageFetcher {
    pub fn new(storage: Arc<StorageAdapter>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, storage })
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<u8>, reqwest::Error> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: Option<&str>, storage_path: &str) -> Option<Vec<u8>> {
        if let Some(url) = url {
            match self.fetch_url(url).await {
                Ok(bytes) => return Some(bytes),
                Err(e) => log::warn!("Fetching report image from {} failed: {}", url, e),
            }
        }
        match self.storage.download(storage_path).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::warn!("Report image {} unavailable: {}", storage_path, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::adapter::tests::adapter_with;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[tokio::test]
    async fn falls_back_to_storage_when_there_is_no_url() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(adapter_with(None, &temp));
        let stored = storage
            .upload(b"jpeg bytes", Uuid::new_v4(), "a.jpg", "image/jpeg")
            .await
            .unwrap();

        let fetcher = HttpImageFetcher::new(storage, Duration::from_secs(1)).unwrap();
        assert_eq!(
            fetcher.fetch(None, &stored.path).await.as_deref(),
            Some(&b"jpeg bytes"[..])
        );
        assert_eq!(fetcher.fetch(None, "missing/file.jpg").await, None);
    }
}

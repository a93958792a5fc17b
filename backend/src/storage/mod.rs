pub mod adapter;
pub mod local;
pub mod s3_service;

use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid storage path: {0}")]
    InvalidPath(String),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Storage call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Object store reached over the network. The adapter treats any error from
/// these calls as a reason to fall back to local disk.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    fn public_url(&self, key: &str) -> String;
}

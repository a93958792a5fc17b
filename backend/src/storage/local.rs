use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::StorageError;

/// Filesystem store used when the remote bucket is unreachable or not configured.
#[derive(Debug, Clone)]
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn key_to_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(StorageError::InvalidPath(key.to_string()));
        }
        Ok(self.base_path.join(relative))
    }

    pub async fn put(&self, key: &str, content: &[u8]) -> Result<(), StorageError> {
        let path = self.key_to_path(key)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write via temp file so a reader never sees a partial upload. The
        // suffix keeps the full name, so x.jpg and x.png never share one.
        let mut temp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        temp_name.push(".part");
        let temp_path = path.with_file_name(temp_name);
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.key_to_path(key)?;
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self.key_to_path(key) {
            Ok(path) => fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Returns whether a file was actually removed.
    pub async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.key_to_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_get_delete() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path().to_path_buf());

        store.put("a/b/c.jpg", b"bytes").await.unwrap();
        assert!(store.exists("a/b/c.jpg").await);
        assert_eq!(store.get("a/b/c.jpg").await.unwrap(), b"bytes");

        assert!(store.delete("a/b/c.jpg").await.unwrap());
        assert!(!store.delete("a/b/c.jpg").await.unwrap());
        assert!(matches!(
            store.get("a/b/c.jpg").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn same_stem_uploads_do_not_share_a_temp_file() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path().to_path_buf());
        let jpeg = vec![0xd8u8; 512 * 1024];
        let png = vec![0x89u8; 512 * 1024];

        let (a, b) = tokio::join!(store.put("u/x.jpg", &jpeg), store.put("u/x.png", &png));
        a.unwrap();
        b.unwrap();
        assert_eq!(store.get("u/x.jpg").await.unwrap(), jpeg);
        assert_eq!(store.get("u/x.png").await.unwrap(), png);

        let mut names: Vec<String> = std::fs::read_dir(temp.path().join("u"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["x.jpg", "x.png"]);
    }

    #[tokio::test]
    async fn rejects_paths_escaping_the_root() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path().to_path_buf());

        for key in ["../outside.jpg", "/etc/passwd", "a/../../b", ""] {
            assert!(matches!(
                store.put(key, b"x").await,
                Err(StorageError::InvalidPath(_))
            ));
        }
        assert!(!store.exists("../outside.jpg").await);
    }
}

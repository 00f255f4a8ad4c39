//! Disk-backed tile store.
//!
//! # File layout
//!
//! ```text
//! {root}/{namespace}/{percent-encoded address}
//! {root}/{namespace}/.staging/{percent-encoded address}
//! ```
//!
//! File names are the percent-encoded tile address, so the key set can be
//! listed back without an index. Writes go to the staging directory first
//! and are renamed into place, so readers never see a partial tile.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{
    Cache, CacheFuture, ContainsFuture, EstimateFuture, GetFuture, KeysFuture, StorageEstimate,
};
use crate::address::TileAddress;
use crate::error::{Error, Result};

const STAGING_DIR: &str = ".staging";

fn file_name(address: &TileAddress) -> String {
    urlencoding::encode(address.as_str()).into_owned()
}

/// A cache storing one file per tile.
#[derive(Debug, Clone)]
pub struct FilesystemCache {
    directory: PathBuf,
    quota_bytes: Option<u64>,
}

impl FilesystemCache {
    /// Open (creating if needed) the namespace directory under `root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheUnavailable`] if the directory cannot be
    /// created.
    pub async fn open(root: impl AsRef<Path>, namespace: &str) -> Result<Self> {
        let directory = root.as_ref().join(namespace);
        tokio::fs::create_dir_all(directory.join(STAGING_DIR))
            .await
            .map_err(|e| Error::cache("open", format!("{}: {e}", directory.display())))?;

        tracing::debug!(dir = %directory.display(), "opened tile cache");

        Ok(Self {
            directory,
            quota_bytes: None,
        })
    }

    /// Attach a storage quota. Only reported by [`Cache::estimate`]; writes
    /// are not refused when it is exceeded.
    #[must_use]
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    /// The namespace directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn entry_path(&self, address: &TileAddress) -> PathBuf {
        self.directory.join(file_name(address))
    }

    fn staging_path(&self, address: &TileAddress) -> PathBuf {
        self.directory.join(STAGING_DIR).join(file_name(address))
    }

    /// Regular files in the namespace directory, with their sizes.
    async fn entries(&self) -> Result<Vec<(String, u64)>> {
        let mut dir = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|e| Error::cache("list", e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| Error::cache("list", e))? {
            let metadata = entry.metadata().await.map_err(|e| Error::cache("list", e))?;
            if !metadata.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                entries.push((name.to_owned(), metadata.len()));
            }
        }
        Ok(entries)
    }
}

impl Cache for FilesystemCache {
    fn get(&self, address: &TileAddress) -> GetFuture<'_> {
        let path = self.entry_path(address);
        Box::pin(async move {
            match tokio::fs::read(&path).await {
                Ok(data) => Ok(Some(data)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(Error::cache("get", e)),
            }
        })
    }

    fn put(&self, address: &TileAddress, data: Vec<u8>) -> CacheFuture<'_> {
        let path = self.entry_path(address);
        let staging = self.staging_path(address);
        Box::pin(async move {
            tokio::fs::write(&staging, &data)
                .await
                .map_err(|e| Error::cache("put", e))?;
            tokio::fs::rename(&staging, &path)
                .await
                .map_err(|e| Error::cache("put", e))?;
            Ok(())
        })
    }

    fn contains(&self, address: &TileAddress) -> ContainsFuture<'_> {
        let path = self.entry_path(address);
        Box::pin(async move {
            match tokio::fs::metadata(&path).await {
                Ok(metadata) => Ok(metadata.is_file()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(Error::cache("contains", e)),
            }
        })
    }

    fn keys(&self) -> KeysFuture<'_> {
        Box::pin(async move {
            let mut keys: Vec<TileAddress> = self
                .entries()
                .await?
                .into_iter()
                .filter_map(|(name, _)| {
                    urlencoding::decode(&name)
                        .ok()
                        .map(|key| TileAddress::new(key.into_owned()))
                })
                .collect();
            keys.sort();
            Ok(keys)
        })
    }

    fn remove(&self, address: &TileAddress) -> CacheFuture<'_> {
        let path = self.entry_path(address);
        Box::pin(async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::cache("remove", e)),
            }
        })
    }

    fn clear(&self) -> CacheFuture<'_> {
        Box::pin(async move {
            match tokio::fs::remove_dir_all(&self.directory).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Error::cache("clear", e)),
            }
            tokio::fs::create_dir_all(self.directory.join(STAGING_DIR))
                .await
                .map_err(|e| Error::cache("clear", e))?;
            tracing::info!(dir = %self.directory.display(), "cleared tile cache");
            Ok(())
        })
    }

    fn estimate(&self) -> EstimateFuture<'_> {
        Box::pin(async move {
            let used_bytes = self.entries().await?.iter().map(|(_, size)| size).sum();
            Ok(StorageEstimate {
                used_bytes,
                quota_bytes: self.quota_bytes,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CACHE_NAMESPACE;
    use tempfile::TempDir;

    fn addr(s: &str) -> TileAddress {
        TileAddress::new(s)
    }

    async fn open_temp() -> (TempDir, FilesystemCache) {
        let temp_dir = TempDir::new().unwrap();
        let cache = FilesystemCache::open(temp_dir.path(), CACHE_NAMESPACE)
            .await
            .unwrap();
        (temp_dir, cache)
    }

    #[tokio::test]
    async fn test_put_get_contains() {
        let (_dir, cache) = open_temp().await;
        let key = addr("https://cyberjapandata.gsi.go.jp/xyz/std/15/29105/12903.png");

        assert!(!cache.contains(&key).await.unwrap());
        assert_eq!(cache.get(&key).await.unwrap(), None);

        cache.put(&key, vec![0x89, b'P', b'N', b'G']).await.unwrap();

        assert!(cache.contains(&key).await.unwrap());
        assert_eq!(
            cache.get(&key).await.unwrap(),
            Some(vec![0x89, b'P', b'N', b'G'])
        );
    }

    #[tokio::test]
    async fn test_keys_round_trip_addresses() {
        let (_dir, cache) = open_temp().await;
        let a = addr("https://t/15/1/2.png");
        let b = addr("https://t/15/-1/2.png");
        cache.put(&b, vec![1]).await.unwrap();
        cache.put(&a, vec![2]).await.unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(cache.keys().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let (dir, cache) = open_temp().await;
        cache.put(&addr("https://t/1/0/0.png"), vec![1, 2]).await.unwrap();
        drop(cache);

        let reopened = FilesystemCache::open(dir.path(), CACHE_NAMESPACE)
            .await
            .unwrap();
        assert!(reopened.contains(&addr("https://t/1/0/0.png")).await.unwrap());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let (dir, cache) = open_temp().await;
        cache.put(&addr("https://t/1/0/0.png"), vec![1]).await.unwrap();

        let other = FilesystemCache::open(dir.path(), "other-v1").await.unwrap();
        assert!(!other.contains(&addr("https://t/1/0/0.png")).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_destroys_everything() {
        let (_dir, cache) = open_temp().await;
        cache.put(&addr("https://t/1/0/0.png"), vec![1]).await.unwrap();
        cache.put(&addr("https://t/1/0/1.png"), vec![2]).await.unwrap();

        cache.clear().await.unwrap();

        assert!(cache.keys().await.unwrap().is_empty());
        // Still usable afterwards.
        cache.put(&addr("https://t/1/1/1.png"), vec![3]).await.unwrap();
        assert_eq!(cache.keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let (_dir, cache) = open_temp().await;
        cache.remove(&addr("https://t/9/9/9.png")).await.unwrap();
    }

    #[tokio::test]
    async fn test_estimate_sums_entry_sizes() {
        let (_dir, cache) = open_temp().await;
        let cache = cache.with_quota(4096);
        cache.put(&addr("a"), vec![0; 100]).await.unwrap();
        cache.put(&addr("b"), vec![0; 28]).await.unwrap();

        let estimate = cache.estimate().await.unwrap();
        assert_eq!(estimate.used_bytes, 128);
        assert_eq!(estimate.quota_bytes, Some(4096));
    }

    #[tokio::test]
    async fn test_open_fails_when_root_is_a_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let result = FilesystemCache::open(&file, CACHE_NAMESPACE).await;
        assert!(matches!(
            result,
            Err(Error::CacheUnavailable {
                operation: "open",
                ..
            })
        ));
    }
}

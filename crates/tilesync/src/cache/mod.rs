//! Persistent tile stores.
//!
//! The engine only asks a store whether a tile is present; the caching agent
//! is the only writer. Both sides share one store through the [`Cache`]
//! trait.
//!
//! # Implementations
//!
//! - [`MemoryCache`]: In-memory store shared between clones
//! - [`FilesystemCache`]: One file per tile under a named namespace directory

mod filesystem;

pub use filesystem::FilesystemCache;

use crate::address::TileAddress;
use crate::error::Result;
use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// Name of the store shared by the engine and the caching agent.
pub const CACHE_NAMESPACE: &str = "static-v1";

/// Future type for cache get operations.
pub type GetFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + 'a>>;

/// Future type for cache put/remove/clear operations.
pub type CacheFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Future type for cache contains operations.
pub type ContainsFuture<'a> = Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

/// Future type for listing cache keys.
pub type KeysFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<TileAddress>>> + Send + 'a>>;

/// Future type for storage estimates.
pub type EstimateFuture<'a> = Pin<Box<dyn Future<Output = Result<StorageEstimate>> + Send + 'a>>;

/// Storage usage of a cache. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageEstimate {
    /// Bytes currently stored.
    pub used_bytes: u64,
    /// Configured limit, if any.
    pub quota_bytes: Option<u64>,
}

/// A keyed store of fetched tiles.
///
/// Keys are tile addresses and values are the raw tile bytes. Storing an
/// existing key overwrites it, so duplicate work from overlapping
/// synchronizations is harmless. An entry stays until it is removed or the
/// cache is cleared; stores never evict on their own.
pub trait Cache: Send + Sync {
    /// Get a tile from the cache.
    ///
    /// Returns `Ok(Some(data))` if the tile is cached, `Ok(None)` if not,
    /// or an error if the store could not be read.
    fn get(&self, address: &TileAddress) -> GetFuture<'_>;

    /// Store a tile, overwriting any previous entry.
    fn put(&self, address: &TileAddress, data: Vec<u8>) -> CacheFuture<'_>;

    /// Check if a tile exists without retrieving it.
    fn contains(&self, address: &TileAddress) -> ContainsFuture<'_>;

    /// List every cached address.
    fn keys(&self) -> KeysFuture<'_>;

    /// Remove a tile from the cache.
    fn remove(&self, address: &TileAddress) -> CacheFuture<'_>;

    /// Destroy every entry.
    fn clear(&self) -> CacheFuture<'_>;

    /// Report how much storage the cache uses.
    fn estimate(&self) -> EstimateFuture<'_>;
}

impl<C: Cache + ?Sized> Cache for Arc<C> {
    fn get(&self, address: &TileAddress) -> GetFuture<'_> {
        (**self).get(address)
    }

    fn put(&self, address: &TileAddress, data: Vec<u8>) -> CacheFuture<'_> {
        (**self).put(address, data)
    }

    fn contains(&self, address: &TileAddress) -> ContainsFuture<'_> {
        (**self).contains(address)
    }

    fn keys(&self) -> KeysFuture<'_> {
        (**self).keys()
    }

    fn remove(&self, address: &TileAddress) -> CacheFuture<'_> {
        (**self).remove(address)
    }

    fn clear(&self) -> CacheFuture<'_> {
        (**self).clear()
    }

    fn estimate(&self) -> EstimateFuture<'_> {
        (**self).estimate()
    }
}

/// An in-memory cache.
///
/// This cache stores tiles in a `HashMap` protected by a `RwLock`. Clones
/// share the same storage, so an engine and an agent can be handed the same
/// cache.
///
/// A quota can be attached for [`Cache::estimate`] to report. Writes are
/// never refused or evicted because of it.
#[derive(Debug)]
pub struct MemoryCache {
    data: Arc<RwLock<MemoryCacheInner>>,
    quota_bytes: Option<u64>,
}

#[derive(Debug, Default)]
struct MemoryCacheInner {
    entries: HashMap<TileAddress, Vec<u8>>,
    /// Insertion order for listing.
    order: Vec<TileAddress>,
    current_size: usize,
}

impl MemoryCache {
    /// Create a new memory cache with no size limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(MemoryCacheInner::default())),
            quota_bytes: None,
        }
    }

    /// Attach a storage quota. Only reported by [`Cache::estimate`].
    #[must_use]
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    /// Get the current size of cached data in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.read().current_size
    }

    /// Get the number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the lock cannot leave the map half-updated in a
    // way that matters here, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, MemoryCacheInner> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryCacheInner> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryCache {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            quota_bytes: self.quota_bytes,
        }
    }
}

impl Cache for MemoryCache {
    fn get(&self, address: &TileAddress) -> GetFuture<'_> {
        let result = self.read().entries.get(address).cloned();
        Box::pin(async move { Ok(result) })
    }

    fn put(&self, address: &TileAddress, data: Vec<u8>) -> CacheFuture<'_> {
        let mut cache = self.write();

        if let Some(old_data) = cache.entries.remove(address) {
            cache.current_size -= old_data.len();
            cache.order.retain(|k| k != address);
        }

        let data_size = data.len();
        cache.entries.insert(address.clone(), data);
        cache.order.push(address.clone());
        cache.current_size += data_size;

        Box::pin(async { Ok(()) })
    }

    fn contains(&self, address: &TileAddress) -> ContainsFuture<'_> {
        let result = self.read().entries.contains_key(address);
        Box::pin(async move { Ok(result) })
    }

    fn keys(&self) -> KeysFuture<'_> {
        let keys = self.read().order.clone();
        Box::pin(async move { Ok(keys) })
    }

    fn remove(&self, address: &TileAddress) -> CacheFuture<'_> {
        let mut cache = self.write();
        if let Some(data) = cache.entries.remove(address) {
            cache.current_size -= data.len();
            cache.order.retain(|k| k != address);
        }
        Box::pin(async { Ok(()) })
    }

    fn clear(&self) -> CacheFuture<'_> {
        let mut cache = self.write();
        cache.entries.clear();
        cache.order.clear();
        cache.current_size = 0;
        Box::pin(async { Ok(()) })
    }

    fn estimate(&self) -> EstimateFuture<'_> {
        let estimate = StorageEstimate {
            used_bytes: self.size() as u64,
            quota_bytes: self.quota_bytes,
        };
        Box::pin(async move { Ok(estimate) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> TileAddress {
        TileAddress::new(s)
    }

    #[tokio::test]
    async fn test_memory_cache_basic() {
        let cache = MemoryCache::new();

        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);

        cache.put(&addr("https://t/1/0/0.png"), vec![1, 2, 3]).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 3);

        let result = cache.get(&addr("https://t/1/0/0.png")).await.unwrap();
        assert_eq!(result, Some(vec![1, 2, 3]));

        assert!(cache.contains(&addr("https://t/1/0/0.png")).await.unwrap());
        assert!(!cache.contains(&addr("https://t/1/0/1.png")).await.unwrap());

        cache.remove(&addr("https://t/1/0/0.png")).await.unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test]
    async fn test_memory_cache_quota_never_drops_entries() {
        // 10-byte quota, 13 bytes stored.
        let cache = MemoryCache::new().with_quota(10);

        cache.put(&addr("a"), vec![1, 2, 3, 4, 5]).await.unwrap();
        cache.put(&addr("b"), vec![6, 7, 8, 9, 10]).await.unwrap();
        cache.put(&addr("c"), vec![11, 12, 13]).await.unwrap();

        assert_eq!(cache.size(), 13);
        for key in ["a", "b", "c"] {
            assert!(cache.contains(&addr(key)).await.unwrap(), "{key} was dropped");
        }

        let estimate = cache.estimate().await.unwrap();
        assert_eq!(estimate.used_bytes, 13);
        assert_eq!(estimate.quota_bytes, Some(10));
    }

    #[tokio::test]
    async fn test_memory_cache_overwrite_is_idempotent() {
        let cache = MemoryCache::new();

        cache.put(&addr("a"), vec![1, 2, 3]).await.unwrap();
        cache.put(&addr("a"), vec![1, 2, 3]).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 3);
        assert_eq!(cache.keys().await.unwrap(), vec![addr("a")]);
    }

    #[tokio::test]
    async fn test_memory_cache_keys_in_insertion_order() {
        let cache = MemoryCache::new();
        for key in ["c", "a", "b"] {
            cache.put(&addr(key), vec![0]).await.unwrap();
        }
        assert_eq!(
            cache.keys().await.unwrap(),
            vec![addr("c"), addr("a"), addr("b")]
        );
    }

    #[tokio::test]
    async fn test_memory_cache_clear() {
        let cache = MemoryCache::new();

        cache.put(&addr("a"), vec![1, 2, 3]).await.unwrap();
        cache.put(&addr("b"), vec![4, 5, 6]).await.unwrap();
        assert_eq!(cache.len(), 2);

        cache.clear().await.unwrap();
        assert!(cache.is_empty());
        assert!(cache.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_cache_clones_share_storage() {
        let cache = MemoryCache::new();
        let agent_view = cache.clone();

        agent_view.put(&addr("a"), vec![1]).await.unwrap();
        assert!(cache.contains(&addr("a")).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_cache_estimate() {
        let cache = MemoryCache::new().with_quota(1024);
        cache.put(&addr("a"), vec![0; 100]).await.unwrap();

        let estimate = cache.estimate().await.unwrap();
        assert_eq!(estimate.used_bytes, 100);
        assert_eq!(estimate.quota_bytes, Some(1024));
    }
}

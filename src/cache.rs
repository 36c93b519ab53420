// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Key/value cache for resolved part locations.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use std::{
    num::NonZeroUsize,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Cache key under which the location of `part_id` of file `file_id` is stored.
pub fn location_key(file_id: &str, part_id: i64) -> String {
    format!("files:location:{file_id}:{part_id}")
}

/// Shared cache, safe for concurrent use by many readers.
#[async_trait]
pub trait Cache: Send + Sync {
    /// The value stored under `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Stores `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;
}

/// A cache which never holds anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCache;

#[async_trait]
impl Cache for NoCache {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<()> {
        Ok(())
    }
}

/// Entries a [`MemoryCache`] holds when no capacity is given.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

struct Entry {
    value: Bytes,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Bounded in-process cache with per-entry expiry.
///
/// Once full, the least recently used entry is evicted.  Expired entries are dropped when looked
/// up, and expired entries at the cold end are swept on every insert.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, Entry>>,
}

impl MemoryCache {
    /// An empty cache holding up to [`DEFAULT_CACHE_CAPACITY`] entries.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// An empty cache holding up to `capacity` entries (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of entries held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Storage("cache lock poisoned".to_string())
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        let now = Instant::now();
        let cached = entries
            .get(key)
            .map(|entry| entry.is_live(now).then(|| entry.value.clone()));
        match cached {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                let _ = entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock().map_err(poisoned)?;
        while entries
            .peek_lru()
            .map_or(false, |(_, entry)| !entry.is_live(now))
        {
            let _ = entries.pop_lru();
        }
        let expires_at = now + ttl;
        let _ = entries.put(key.to_string(), Entry { value, expires_at });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_keys_are_namespaced() {
        assert_eq!(location_key("abc", 42), "files:location:abc:42");
    }

    #[tokio::test]
    async fn entries_expire() -> Result<()> {
        let cache = MemoryCache::new();
        cache
            .set("live", Bytes::from_static(b"1"), Duration::from_secs(60))
            .await?;
        cache
            .set("dead", Bytes::from_static(b"2"), Duration::ZERO)
            .await?;
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.get("live").await?, Some(Bytes::from_static(b"1")));
        assert_eq!(cache.get("dead").await?, None);
        assert_eq!(cache.get("missing").await?, None);
        assert_eq!(cache.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn capacity_bounds_the_cache() -> Result<()> {
        let cache = MemoryCache::with_capacity(4);
        for part_id in 0..10 {
            cache
                .set(
                    &location_key("file", part_id),
                    Bytes::from_static(b"v"),
                    Duration::from_secs(60),
                )
                .await?;
        }
        assert_eq!(cache.len(), 4);
        assert!(cache.get(&location_key("file", 0)).await?.is_none());
        assert!(cache.get(&location_key("file", 9)).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn expired_entries_are_swept_on_insert() -> Result<()> {
        let cache = MemoryCache::new();
        for part_id in 0..1_000 {
            cache
                .set(
                    &location_key("file", part_id),
                    Bytes::from_static(b"v"),
                    Duration::ZERO,
                )
                .await?;
        }
        cache
            .set("live", Bytes::from_static(b"1"), Duration::from_secs(60))
            .await?;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("live").await?, Some(Bytes::from_static(b"1")));
        Ok(())
    }

    #[tokio::test]
    async fn no_cache_forgets_everything() -> Result<()> {
        let cache = NoCache;
        cache
            .set("key", Bytes::from_static(b"v"), Duration::from_secs(60))
            .await?;
        assert!(cache.get("key").await?.is_none());
        Ok(())
    }
}

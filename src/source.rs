// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Per-part access to ciphertext through the shared cache and pool.

use crate::{
    cache::{location_key, Cache},
    cipher::CiphertextFetch,
    config::StreamConfig,
    part::{FileMeta, Part},
    pool::{ChunkPool, Location},
    stream::BoxedByteStream,
    strategy::FetchStrategy,
    Error, Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The ciphertext of one part, fetchable as arbitrary sub-ranges.
///
/// Everything needed to fetch is fixed when the source is built, so a fetch never depends on
/// which part the owning reader has moved on to.
#[derive(Clone)]
pub struct ChunkSource {
    channel_id: i64,
    part_id: i64,
    part_size: u64,
    cache_key: String,
    cache: Arc<dyn Cache>,
    pool: Arc<dyn ChunkPool>,
    config: StreamConfig,
}

impl ChunkSource {
    /// Binds `part` of `file` to the shared cache and pool.
    pub fn new(
        file: &FileMeta,
        part: &Part,
        cache: Arc<dyn Cache>,
        pool: Arc<dyn ChunkPool>,
        config: StreamConfig,
    ) -> Self {
        Self {
            channel_id: file.channel_id,
            part_id: part.id,
            part_size: part.size,
            cache_key: location_key(&file.id, part.id),
            cache,
            pool,
            config,
        }
    }

    /// The shared pool.
    pub fn pool(&self) -> Arc<dyn ChunkPool> {
        Arc::clone(&self.pool)
    }

    /// Resolves the part's location, consulting the cache first.  Cache errors are logged and
    /// otherwise treated as misses.
    pub async fn location(&self) -> Result<Location> {
        match self.cache.get(&self.cache_key).await {
            Ok(Some(cached)) => match Location::from_bytes(&cached) {
                Ok(location) => {
                    debug!(key = %self.cache_key, "location cache hit");
                    return Ok(location);
                }
                Err(error) => warn!(key = %self.cache_key, %error, "discarding unreadable cached location"),
            },
            Ok(None) => debug!(key = %self.cache_key, "location cache miss"),
            Err(error) => warn!(key = %self.cache_key, %error, "location cache lookup failed"),
        }

        let location = self.pool.locate(self.channel_id, self.part_id).await?;
        if location.size != self.part_size {
            warn!(
                part_id = self.part_id,
                expected = self.part_size,
                reported = location.size,
                "store reports a different part size"
            );
        }

        match location.to_bytes() {
            Ok(encoded) => {
                if let Err(error) = self
                    .cache
                    .set(&self.cache_key, encoded, self.config.location_ttl)
                    .await
                {
                    warn!(key = %self.cache_key, %error, "failed to cache part location");
                }
            }
            Err(error) => warn!(key = %self.cache_key, %error, "failed to encode part location"),
        }
        Ok(location)
    }

    /// Last ciphertext byte (inclusive) to fetch for a request of `limit` bytes from `offset`,
    /// clipped to the end of the part.
    pub fn clip_end(&self, offset: u64, limit: u64) -> Result<u64> {
        if limit == 0 || offset >= self.part_size {
            return Err(Error::InvalidSpan(format!(
                "ciphertext request of {limit} bytes at {offset} is outside part {} of {} bytes",
                self.part_id, self.part_size
            )));
        }
        Ok((self.part_size - 1).min(offset.saturating_add(limit - 1)))
    }
}

#[async_trait]
impl CiphertextFetch for ChunkSource {
    async fn fetch(
        &self,
        token: &CancellationToken,
        offset: u64,
        limit: u64,
    ) -> Result<BoxedByteStream> {
        let end = self.clip_end(offset, limit)?;
        let strategy = FetchStrategy::select(&self.config);
        debug!(part_id = self.part_id, offset, end, ?strategy, "fetching ciphertext");
        strategy.open(self, token, offset, end).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::{MemoryCache, NoCache},
        part::Salt,
        stream::read_to_end,
        test_helpers::MemoryPool,
    };
    use bytes::Bytes;
    use std::time::Duration;

    fn source(cache: Arc<dyn Cache>, pool: Arc<MemoryPool>, size: u64) -> ChunkSource {
        let file = FileMeta {
            id: "file".to_string(),
            channel_id: 9,
        };
        let part = Part {
            part_no: 0,
            id: 3,
            decrypted_size: 0,
            size,
            salt: Salt::random(),
        };
        ChunkSource::new(&file, &part, cache, pool, StreamConfig::default())
    }

    struct BrokenCache;

    #[async_trait]
    impl Cache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
            Err(Error::Storage("down".to_string()))
        }

        async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<()> {
            Err(Error::Storage("down".to_string()))
        }
    }

    #[test]
    fn clip_end_stays_inside_the_part() -> Result<()> {
        let source = source(Arc::new(NoCache), Arc::new(MemoryPool::new()), 100);
        assert_eq!(source.clip_end(0, 10)?, 9);
        assert_eq!(source.clip_end(90, 50)?, 99);
        assert_eq!(source.clip_end(99, u64::MAX)?, 99);
        assert!(source.clip_end(100, 1).is_err());
        assert!(source.clip_end(0, 0).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn locations_are_memoised_in_the_cache() -> Result<()> {
        let pool = Arc::new(MemoryPool::new());
        pool.insert(9, 3, Bytes::from(vec![7u8; 100]));
        let cache = Arc::new(MemoryCache::new());
        let source = source(cache.clone(), pool.clone(), 100);

        let first = source.location().await?;
        let second = source.location().await?;
        assert_eq!(first, second);
        assert_eq!(pool.stats().locates(), 1);
        assert!(cache.get("files:location:file:3").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn cache_failures_fall_back_to_the_pool() -> Result<()> {
        let pool = Arc::new(MemoryPool::new());
        pool.insert(9, 3, Bytes::from(vec![7u8; 100]));
        let source = source(Arc::new(BrokenCache), pool.clone(), 100);

        let token = CancellationToken::new();
        let mut stream = source.fetch(&token, 10, 1000).await?;
        assert_eq!(read_to_end(&mut stream, 90).await?.len(), 90);
        stream.close().await?;
        assert_eq!(pool.stats().locates(), 1);
        Ok(())
    }
}

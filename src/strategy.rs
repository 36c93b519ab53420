// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Choice between fetching a part's ciphertext over one stream or over several stripes in
//! parallel.

use crate::{
    config::StreamConfig,
    pool::{ChunkPool, Location},
    source::ChunkSource,
    stream::{cancellable, read_to_end, BoxedByteStream, ByteStream, Cancellable},
    Error, Result,
};
use async_trait::async_trait;
use bytes::{Buf, Bytes};
use std::{collections::VecDeque, sync::Arc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How the ciphertext of one part is fetched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchStrategy {
    /// A single stream over the whole requested range.
    Single,
    /// The range split into stripes of `stripe_size` bytes, with up to `concurrency` stripes in
    /// flight at once.
    Striped {
        /// Maximum stripes fetched at the same time.
        concurrency: usize,
        /// Size of every stripe but the last.
        stripe_size: u64,
    },
}

impl FetchStrategy {
    /// Picks the strategy for `config`: a concurrency below two means a single stream.
    pub fn select(config: &StreamConfig) -> Self {
        let concurrency = config.effective_concurrency();
        if concurrency < 2 {
            Self::Single
        } else {
            Self::Striped {
                concurrency,
                stripe_size: config.stripe_size.max(1),
            }
        }
    }

    /// Opens the inclusive ciphertext range `[offset, end]` of `source`.
    pub async fn open(
        self,
        source: &ChunkSource,
        token: &CancellationToken,
        offset: u64,
        end: u64,
    ) -> Result<BoxedByteStream> {
        if offset > end {
            return Err(Error::InvalidSpan(format!(
                "ciphertext range [{offset}, {end}] is empty"
            )));
        }
        let location = cancellable(token, source.location()).await?;
        let pool = source.pool();

        match self {
            Self::Single => {
                let length = end - offset + 1;
                let stream = cancellable(token, pool.open_range(&location, offset, length)).await?;
                Ok(Box::new(Cancellable::new(stream, token.clone())))
            }
            Self::Striped {
                concurrency,
                stripe_size,
            } => {
                // The first stripe is opened here so an unreachable part fails the open.
                let token = token.child_token();
                let length = stripe_size.min(end - offset + 1);
                let first = cancellable(&token, pool.open_range(&location, offset, length)).await?;
                Ok(Box::new(StripedStream::start(
                    pool,
                    location,
                    token,
                    first,
                    offset,
                    end,
                    concurrency,
                    stripe_size,
                )))
            }
        }
    }
}

/// Ordered stream over a ciphertext range fetched as parallel stripes.
///
/// Stripes are requested in ascending offset order and handed out in the same order, whatever
/// order they complete in.  At most `concurrency` stripe fetches are in flight at a time.
pub struct StripedStream {
    pool: Arc<dyn ChunkPool>,
    location: Location,
    token: CancellationToken,
    next_offset: u64,
    end: u64,
    stripe_size: u64,
    concurrency: usize,
    in_flight: VecDeque<JoinHandle<Result<Bytes>>>,
    current: Bytes,
    failed: Option<Error>,
    closed: bool,
}

impl StripedStream {
    /// Starts fetching `[offset, end]`, reading the first stripe from the already opened `first`.
    #[allow(clippy::too_many_arguments)]
    fn start(
        pool: Arc<dyn ChunkPool>,
        location: Location,
        token: CancellationToken,
        first: BoxedByteStream,
        offset: u64,
        end: u64,
        concurrency: usize,
        stripe_size: u64,
    ) -> Self {
        let length = stripe_size.min(end - offset + 1);
        let head = tokio::spawn(fetch_stripe(
            Arc::clone(&pool),
            location.clone(),
            token.clone(),
            offset,
            length,
            Some(first),
        ));
        let mut in_flight = VecDeque::with_capacity(concurrency);
        in_flight.push_back(head);
        let mut stream = Self {
            pool,
            location,
            token,
            next_offset: offset + length,
            end,
            stripe_size,
            concurrency: concurrency.max(1),
            in_flight,
            current: Bytes::new(),
            failed: None,
            closed: false,
        };
        stream.fill_window();
        stream
    }

    fn fill_window(&mut self) {
        while self.in_flight.len() < self.concurrency && self.next_offset <= self.end {
            let length = self.stripe_size.min(self.end - self.next_offset + 1);
            let handle = tokio::spawn(fetch_stripe(
                Arc::clone(&self.pool),
                self.location.clone(),
                self.token.clone(),
                self.next_offset,
                length,
                None,
            ));
            self.in_flight.push_back(handle);
            self.next_offset += length;
        }
    }

    fn abort_all(&mut self) {
        for handle in self.in_flight.drain(..) {
            handle.abort();
        }
    }

    fn fail(&mut self, error: Error) -> Result<usize> {
        self.abort_all();
        self.failed = Some(error.clone());
        Err(error)
    }
}

async fn fetch_stripe(
    pool: Arc<dyn ChunkPool>,
    location: Location,
    token: CancellationToken,
    offset: u64,
    length: u64,
    opened: Option<BoxedByteStream>,
) -> Result<Bytes> {
    let mut stream = match opened {
        Some(stream) => stream,
        None => cancellable(&token, pool.open_range(&location, offset, length)).await?,
    };
    let read = cancellable(&token, read_to_end(&mut stream, length)).await;
    let closed = stream.close().await;
    let bytes = read?;
    closed?;
    if (bytes.len() as u64) < length {
        return Err(Error::Truncated {
            expected: length - bytes.len() as u64,
        });
    }
    Ok(bytes)
}

#[async_trait]
impl ByteStream for StripedStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::Closed);
        }
        if let Some(error) = &self.failed {
            return Err(error.clone());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if !self.current.is_empty() {
                let n = buf.len().min(self.current.len());
                buf[..n].copy_from_slice(&self.current[..n]);
                self.current.advance(n);
                return Ok(n);
            }

            self.fill_window();
            // The head stripe stays queued while awaited so an abandoned read still aborts it.
            let Some(head) = self.in_flight.front_mut() else {
                return Ok(0);
            };
            let joined = tokio::select! {
                biased;
                _ = self.token.cancelled() => None,
                joined = head => Some(joined),
            };
            let stripe = match joined {
                Some(Ok(Ok(stripe))) => {
                    let _ = self.in_flight.pop_front();
                    stripe
                }
                Some(Ok(Err(error))) => return self.fail(error),
                Some(Err(join_error)) if !join_error.is_cancelled() => {
                    return self.fail(Error::Storage(format!(
                        "stripe fetch task failed: {join_error}"
                    )));
                }
                _ => return self.fail(Error::Cancelled),
            };
            self.current = stripe;
            self.fill_window();
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.token.cancel();
            self.abort_all();
            self.current = Bytes::new();
        }
        Ok(())
    }
}

impl Drop for StripedStream {
    fn drop(&mut self) {
        self.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::NoCache,
        part::{FileMeta, Part, Salt},
        test_helpers::{random_bytes, MemoryPool},
    };
    use std::time::Duration;

    fn source(pool: Arc<MemoryPool>, size: u64, config: StreamConfig) -> ChunkSource {
        let file = FileMeta {
            id: "striped".to_string(),
            channel_id: 1,
        };
        let part = Part {
            part_no: 0,
            id: 1,
            decrypted_size: 0,
            size,
            salt: Salt::random(),
        };
        ChunkSource::new(&file, &part, Arc::new(NoCache), pool, config)
    }

    #[test]
    fn selection_follows_concurrency() {
        let config = StreamConfig::default();
        assert_eq!(FetchStrategy::select(&config), FetchStrategy::Single);
        assert_eq!(
            FetchStrategy::select(&config.clone().with_concurrency(0)),
            FetchStrategy::Single
        );
        assert_eq!(
            FetchStrategy::select(&config.clone().with_concurrency(2).with_stripe_size(10)),
            FetchStrategy::Striped {
                concurrency: 2,
                stripe_size: 10
            }
        );
    }

    #[tokio::test]
    async fn stripes_are_delivered_in_order() -> Result<()> {
        let data = random_bytes(10_000);
        let pool = Arc::new(MemoryPool::new().with_jitter(Duration::from_millis(5)));
        pool.insert(1, 1, data.clone());
        let config = StreamConfig::default()
            .with_concurrency(4)
            .with_stripe_size(333);
        let source = source(pool.clone(), data.len() as u64, config.clone());
        let token = CancellationToken::new();

        let mut stream = FetchStrategy::select(&config)
            .open(&source, &token, 17, 9_876)
            .await?;
        let out = read_to_end(&mut stream, 9_860).await?;
        stream.close().await?;

        assert_eq!(out.as_ref(), &data[17..=9_876]);
        assert!(pool.stats().opens() > 4);
        assert!(pool.stats().max_active_streams() <= 4);
        Ok(())
    }

    #[tokio::test]
    async fn single_and_striped_agree() -> Result<()> {
        let data = random_bytes(4_096);
        let pool = Arc::new(MemoryPool::new());
        pool.insert(1, 1, data.clone());
        let token = CancellationToken::new();

        let mut outputs = Vec::new();
        for concurrency in [1, 3] {
            let config = StreamConfig::default()
                .with_concurrency(concurrency)
                .with_stripe_size(500);
            let source = source(pool.clone(), data.len() as u64, config.clone());
            let mut stream = FetchStrategy::select(&config)
                .open(&source, &token, 100, 3_999)
                .await?;
            outputs.push(read_to_end(&mut stream, 3_900).await?);
            stream.close().await?;
        }
        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[0].as_ref(), &data[100..4_000]);
        Ok(())
    }

    #[tokio::test]
    async fn stripe_failures_surface_to_the_reader() -> Result<()> {
        let data = random_bytes(2_000);
        let pool = Arc::new(MemoryPool::new());
        pool.insert(1, 1, data.clone());
        pool.fail_reads_at(1, 1_000);
        let config = StreamConfig::default()
            .with_concurrency(2)
            .with_stripe_size(400);
        let source = source(pool.clone(), data.len() as u64, config.clone());
        let token = CancellationToken::new();

        let mut stream = FetchStrategy::select(&config)
            .open(&source, &token, 0, 1_999)
            .await?;
        assert!(matches!(
            read_to_end(&mut stream, 2_000).await,
            Err(Error::Storage(_))
        ));
        stream.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn striped_open_fails_when_the_part_cannot_be_opened() -> Result<()> {
        let pool = Arc::new(MemoryPool::new());
        pool.insert(1, 1, random_bytes(4_000));
        pool.fail_opens(1);
        let config = StreamConfig::default()
            .with_concurrency(4)
            .with_stripe_size(1_000);
        let source = source(pool.clone(), 4_000, config.clone());
        let token = CancellationToken::new();

        let result = FetchStrategy::select(&config)
            .open(&source, &token, 0, 3_999)
            .await;
        assert!(matches!(result, Err(Error::Storage(_))));
        assert_eq!(pool.stats().opens(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn closing_aborts_outstanding_stripes() -> Result<()> {
        let data = random_bytes(8_000);
        let pool = Arc::new(MemoryPool::new());
        pool.insert(1, 1, data);
        pool.set_hang(true);
        let config = StreamConfig::default()
            .with_concurrency(4)
            .with_stripe_size(1_000);
        let source = source(pool.clone(), 8_000, config.clone());
        let token = CancellationToken::new();

        let mut stream = FetchStrategy::select(&config)
            .open(&source, &token, 0, 7_999)
            .await?;
        let mut buf = [0u8; 10];
        let pending = tokio::time::timeout(Duration::from_millis(50), stream.read(&mut buf)).await;
        assert!(pending.is_err());

        stream.close().await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.stats().active_streams(), 0);
        assert!(matches!(stream.read(&mut buf).await, Err(Error::Closed)));
        Ok(())
    }
}

// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

#![doc(hidden)]

use crate::{
    cache::{Cache, MemoryCache},
    cipher::{Cipher, EncryptionKey},
    part::{FileMeta, Part, ReadSpan, Salt},
    pool::{ChunkPool, Location},
    reader::Services,
    stream::{BoxedByteStream, ByteStream},
    Error, Result,
};
use async_trait::async_trait;
use bytes::{Buf, Bytes};
use rand::Rng;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

pub fn random_bytes(size: usize) -> Bytes {
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill(&mut bytes[..]);
    Bytes::from(bytes)
}

/// Splits `data` into parts of `part_size` plaintext bytes, each encrypted under its own salt.
/// Part ids are assigned from `first_id` upwards.
pub fn encrypt_parts(
    key: &EncryptionKey,
    data: &[u8],
    part_size: usize,
    first_id: i64,
) -> Vec<(Part, Bytes)> {
    data.chunks(part_size.max(1))
        .enumerate()
        .map(|(part_no, plain)| {
            let salt = Salt::random();
            let ciphertext = Cipher::new(key, &salt).encrypt_part(plain);
            let part = Part {
                part_no,
                id: first_id + part_no as i64,
                decrypted_size: plain.len() as u64,
                size: ciphertext.len() as u64,
                salt,
            };
            (part, ciphertext)
        })
        .collect()
}

/// Counters kept by [`MemoryPool`].
#[derive(Default)]
pub struct PoolStats {
    locates: AtomicUsize,
    opens: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    active_parts: Mutex<HashMap<i64, usize>>,
    max_active_parts: AtomicUsize,
}

impl PoolStats {
    pub fn locates(&self) -> usize {
        self.locates.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Streams currently open.
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of streams ever open at once.
    pub fn max_active_streams(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Highest number of distinct parts ever streamed from at once.
    pub fn max_active_parts(&self) -> usize {
        self.max_active_parts.load(Ordering::SeqCst)
    }

    fn opened(&self, part_id: i64) {
        let _ = self.opens.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.max_active.fetch_max(active, Ordering::SeqCst);
        if let Ok(mut parts) = self.active_parts.lock() {
            *parts.entry(part_id).or_default() += 1;
            let _ = self.max_active_parts.fetch_max(parts.len(), Ordering::SeqCst);
        }
    }

    fn closed(&self, part_id: i64) {
        let _ = self.active.fetch_sub(1, Ordering::SeqCst);
        if let Ok(mut parts) = self.active_parts.lock() {
            if let Some(count) = parts.get_mut(&part_id) {
                *count -= 1;
                if *count == 0 {
                    let _ = parts.remove(&part_id);
                }
            }
        }
    }
}

/// In-memory part store with instrumentation and fault injection.
#[derive(Default)]
pub struct MemoryPool {
    parts: Mutex<HashMap<(i64, i64), Bytes>>,
    stats: Arc<PoolStats>,
    hang: Arc<AtomicBool>,
    failing_opens: Mutex<HashSet<i64>>,
    failing_reads: Mutex<HashMap<i64, u64>>,
    latency: Duration,
    jitter: Duration,
    max_read: Option<usize>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every read is delayed by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        Self { latency, ..self }
    }

    /// Every read is delayed by a random duration up to `jitter`.
    pub fn with_jitter(self, jitter: Duration) -> Self {
        Self { jitter, ..self }
    }

    /// A single read returns at most `max_read` bytes.
    pub fn with_max_read(self, max_read: usize) -> Self {
        Self {
            max_read: Some(max_read.max(1)),
            ..self
        }
    }

    pub fn insert(&self, channel_id: i64, part_id: i64, ciphertext: Bytes) {
        if let Ok(mut parts) = self.parts.lock() {
            let _ = parts.insert((channel_id, part_id), ciphertext);
        }
    }

    pub fn stats(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }

    /// While set, reads on any stream never complete.
    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Opening `part_id` fails from now on.
    pub fn fail_opens(&self, part_id: i64) {
        if let Ok(mut failing) = self.failing_opens.lock() {
            let _ = failing.insert(part_id);
        }
    }

    /// Reads of `part_id` fail once they reach ciphertext offset `offset`.
    pub fn fail_reads_at(&self, part_id: i64, offset: u64) {
        if let Ok(mut failing) = self.failing_reads.lock() {
            let _ = failing.insert(part_id, offset);
        }
    }

    fn part(&self, channel_id: i64, part_id: i64) -> Result<Bytes> {
        self.parts
            .lock()
            .map_err(|_| Error::Storage("pool lock poisoned".to_string()))?
            .get(&(channel_id, part_id))
            .cloned()
            .ok_or(Error::NotFound {
                channel_id,
                part_id,
            })
    }
}

#[async_trait]
impl ChunkPool for MemoryPool {
    async fn locate(&self, channel_id: i64, part_id: i64) -> Result<Location> {
        let _ = self.stats.locates.fetch_add(1, Ordering::SeqCst);
        let data = self.part(channel_id, part_id)?;
        Ok(Location {
            channel_id,
            part_id,
            size: data.len() as u64,
            handle: format!("memory:{channel_id}:{part_id}"),
        })
    }

    async fn open_range(
        &self,
        location: &Location,
        offset: u64,
        length: u64,
    ) -> Result<BoxedByteStream> {
        let failing = self
            .failing_opens
            .lock()
            .map(|failing| failing.contains(&location.part_id))
            .unwrap_or(false);
        if failing {
            return Err(Error::Storage(format!(
                "injected open failure for part {}",
                location.part_id
            )));
        }

        let data = self.part(location.channel_id, location.part_id)?;
        let len = data.len() as u64;
        let start = offset.min(len) as usize;
        let end = offset.saturating_add(length).min(len) as usize;
        let fail_at = self
            .failing_reads
            .lock()
            .ok()
            .and_then(|failing| failing.get(&location.part_id).copied());

        self.stats.opened(location.part_id);
        Ok(Box::new(MemoryStream {
            data: data.slice(start..end),
            position: start as u64,
            part_id: location.part_id,
            fail_at,
            hang: Arc::clone(&self.hang),
            latency: self.latency,
            jitter: self.jitter,
            max_read: self.max_read,
            stats: Arc::clone(&self.stats),
            open: true,
        }))
    }
}

struct MemoryStream {
    data: Bytes,
    position: u64,
    part_id: i64,
    fail_at: Option<u64>,
    hang: Arc<AtomicBool>,
    latency: Duration,
    jitter: Duration,
    max_read: Option<usize>,
    stats: Arc<PoolStats>,
    open: bool,
}

impl MemoryStream {
    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.stats.closed(self.part_id);
        }
    }
}

#[async_trait]
impl ByteStream for MemoryStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.open {
            return Err(Error::Closed);
        }
        if self.hang.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        let jitter_ms = self.jitter.as_millis() as u64;
        let delay = if jitter_ms > 0 {
            self.latency + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            self.latency
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut n = buf
            .len()
            .min(self.data.len())
            .min(self.max_read.unwrap_or(usize::MAX));
        match self.fail_at {
            Some(fail_at) if n > 0 && self.position >= fail_at => {
                return Err(Error::Storage(format!(
                    "injected read failure for part {} at {}",
                    self.part_id, self.position
                )));
            }
            Some(fail_at) if n > 0 => {
                n = n.min(usize::try_from(fail_at - self.position).unwrap_or(usize::MAX));
            }
            _ => {}
        }
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data.advance(n);
        self.position += n as u64;
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.release();
    }
}

/// A file encrypted into parts and loaded into a [`MemoryPool`].
pub struct Fixture {
    pub file: FileMeta,
    pub parts: Vec<Part>,
    pub data: Bytes,
    pub key: EncryptionKey,
    pub pool: Arc<MemoryPool>,
}

impl Fixture {
    /// `len` random bytes split into parts of `part_size` bytes.
    pub fn new(len: usize, part_size: usize) -> Self {
        Self::with_pool(len, part_size, MemoryPool::new())
    }

    pub fn with_pool(len: usize, part_size: usize, pool: MemoryPool) -> Self {
        let data = random_bytes(len);
        let key = EncryptionKey::random();
        let file = FileMeta {
            id: hex::encode(random_bytes(8)),
            channel_id: 42,
        };
        let mut parts = Vec::new();
        for (part, ciphertext) in encrypt_parts(&key, &data, part_size, 1000) {
            pool.insert(file.channel_id, part.id, ciphertext);
            parts.push(part);
        }
        Self {
            file,
            parts,
            data,
            key,
            pool: Arc::new(pool),
        }
    }

    pub fn services(&self) -> Services {
        self.services_with_cache(Arc::new(MemoryCache::new()))
    }

    pub fn services_with_cache(&self, cache: Arc<dyn Cache>) -> Services {
        let pool: Arc<dyn ChunkPool> = self.pool.clone();
        Services {
            pool,
            cache,
            key: self.key.clone(),
        }
    }

    /// Plaintext the file holds for `span`.
    pub fn expected(&self, span: &ReadSpan) -> &[u8] {
        &self.data[span.start() as usize..=span.end() as usize]
    }
}

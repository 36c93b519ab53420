// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The readable, closable byte stream passed between the fetch, decrypt and read layers.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

/// Size of the scratch buffer used when draining a stream.
const DRAIN_BUFFER_SIZE: usize = 64 * 1024;

/// A sequential source of bytes which must be closed once no longer needed.
///
/// As with `std::io::Read`, `Ok(0)` for a non-empty buffer signals end of stream.
#[async_trait]
pub trait ByteStream: Send {
    /// Reads up to `buf.len()` bytes into `buf`.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Releases the underlying resources.  Closing twice is not an error.
    async fn close(&mut self) -> Result<()>;
}

/// Owned, type-erased [`ByteStream`].
pub type BoxedByteStream = Box<dyn ByteStream>;

#[async_trait]
impl<S: ByteStream + ?Sized> ByteStream for Box<S> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

/// A stream over bytes already held in memory.
#[derive(Debug, Default)]
pub struct BytesStream {
    data: Bytes,
}

impl BytesStream {
    /// Streams `data` from the beginning.
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }
}

#[async_trait]
impl ByteStream for BytesStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.data.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data.advance(n);
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.data.clear();
        Ok(())
    }
}

/// Adapts a tokio [`AsyncRead`] (a file, a socket, a `take`n slice of either) into a
/// [`ByteStream`].
pub struct ReaderStream<R> {
    inner: Option<R>,
}

impl<R> ReaderStream<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        Self { inner: Some(inner) }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ByteStream for ReaderStream<R> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let inner = self.inner.as_mut().ok_or(Error::Closed)?;
        Ok(inner.read(buf).await?)
    }

    async fn close(&mut self) -> Result<()> {
        self.inner = None;
        Ok(())
    }
}

/// Fails a read with [`Error::Cancelled`] as soon as the token fires, even when the inner stream
/// is blocked.
pub struct Cancellable<S> {
    inner: S,
    token: CancellationToken,
}

impl<S> Cancellable<S> {
    /// Wraps `inner`, observing `token`.
    pub fn new(inner: S, token: CancellationToken) -> Self {
        Self { inner, token }
    }
}

#[async_trait]
impl<S: ByteStream> ByteStream for Cancellable<S> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            result = self.inner.read(buf) => result,
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

/// Runs `future` to completion unless `token` fires first, in which case the future is dropped
/// and [`Error::Cancelled`] returned.
pub async fn cancellable<T, F>(token: &CancellationToken, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        result = future => result,
    }
}

/// Reads until `buf` is full or the stream ends, returning the number of bytes read.
pub async fn read_full<S>(stream: &mut S, buf: &mut [u8]) -> Result<usize>
where
    S: ByteStream + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Drains `stream` into memory.  `size_hint` only sizes the initial allocation.
pub async fn read_to_end<S>(stream: &mut S, size_hint: u64) -> Result<Bytes>
where
    S: ByteStream + ?Sized,
{
    let hint = usize::try_from(size_hint).unwrap_or(usize::MAX);
    let mut out = BytesMut::with_capacity(hint.min(64 * DRAIN_BUFFER_SIZE));
    let mut scratch = vec![0u8; DRAIN_BUFFER_SIZE];
    loop {
        let n = stream.read(&mut scratch).await?;
        if n == 0 {
            return Ok(out.freeze());
        }
        out.extend_from_slice(&scratch[..n]);
    }
}

// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Sequential decrypted reads of a span of a multi-part file.

use crate::{
    cache::Cache,
    cipher::{Cipher, DecryptingStream, EncryptionKey},
    config::StreamConfig,
    part::{FileMeta, Part, ReadSpan},
    plan::{plan_for_parts, ByteRange},
    pool::ChunkPool,
    source::ChunkSource,
    stream::ByteStream,
    Error, Result,
};
use bytes::Bytes;
use futures::Stream;
use std::{fmt, mem, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The shared collaborators a reader fetches and decrypts through.
#[derive(Clone)]
pub struct Services {
    /// Connection pool to the part store.
    pub pool: Arc<dyn ChunkPool>,
    /// Cache for resolved part locations.
    pub cache: Arc<dyn Cache>,
    /// Key shared by all parts of the file.
    pub key: EncryptionKey,
}

impl fmt::Debug for Services {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("Services(..)")
    }
}

/// Opens the decrypting stream for one planned range.  Holds only data fixed at construction.
struct PartOpener {
    file: FileMeta,
    parts: Vec<Part>,
    ranges: Vec<ByteRange>,
    services: Services,
    config: StreamConfig,
    token: CancellationToken,
}

impl PartOpener {
    async fn open(&self, pos: usize) -> Result<DecryptingStream> {
        let range = self
            .ranges
            .get(pos)
            .ok_or_else(|| Error::InvalidSpan(format!("no planned range at position {pos}")))?;
        let part = self
            .parts
            .get(range.part_no)
            .ok_or_else(|| Error::InvalidParts(format!("missing part {}", range.part_no)))?;

        debug!(
            pos,
            part_no = range.part_no,
            part_id = part.id,
            start = range.start,
            end = range.end,
            "opening part"
        );

        let source = ChunkSource::new(
            &self.file,
            part,
            Arc::clone(&self.services.cache),
            Arc::clone(&self.services.pool),
            self.config.clone(),
        );
        let cipher = Cipher::new(&self.services.key, &part.salt);
        cipher
            .decrypt_seek(&self.token, &source, range.start, range.len())
            .await
    }
}

enum State {
    Streaming {
        pos: usize,
        stream: DecryptingStream,
    },
    Exhausted,
    Failed(Error),
    Closed,
}

/// Reads the inclusive span `[start, end]` of a file stored as independently encrypted parts.
///
/// Parts are opened one at a time, in order, and each is closed before the next is opened.
/// `read` follows the `std::io::Read` convention: `Ok(0)` for a non-empty buffer means the span
/// has been delivered in full.  After any error the reader is unusable and keeps returning that
/// error.
pub struct DecryptedReader {
    opener: PartOpener,
    state: State,
    limit: u64,
    delivered: u64,
}

impl fmt::Debug for DecryptedReader {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        let state = match &self.state {
            State::Streaming { pos, .. } => format!("Streaming({pos})"),
            State::Exhausted => "Exhausted".to_string(),
            State::Failed(error) => format!("Failed({error})"),
            State::Closed => "Closed".to_string(),
        };
        formatter
            .debug_struct("DecryptedReader")
            .field("file", &self.opener.file.id)
            .field("state", &state)
            .field("limit", &self.limit)
            .field("delivered", &self.delivered)
            .finish()
    }
}

impl DecryptedReader {
    /// Plans `span` over `parts` and opens the first part.
    ///
    /// Fails without returning a reader if the span or part list is invalid, or if the first
    /// part cannot be opened.
    pub async fn new(
        file: FileMeta,
        parts: Vec<Part>,
        span: ReadSpan,
        services: Services,
        config: StreamConfig,
        token: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let ranges = plan_for_parts(&span, &parts)?;
        debug!(
            file = %file.id,
            start = span.start(),
            end = span.end(),
            parts = ranges.len(),
            concurrency = config.effective_concurrency(),
            "planned ranged read"
        );

        let opener = PartOpener {
            file,
            parts,
            ranges,
            services,
            config,
            token,
        };
        let stream = opener.open(0).await?;
        Ok(Self {
            opener,
            state: State::Streaming { pos: 0, stream },
            limit: span.limit(),
            delivered: 0,
        })
    }

    /// Bytes of the span not yet delivered.
    pub fn remaining(&self) -> u64 {
        self.limit
    }

    /// Bytes delivered so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Whether the whole span has been delivered.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, State::Exhausted)
    }

    /// Reads up to `buf.len()` bytes of the span.
    ///
    /// The bytes returned by one call always come from a single part.  When a part runs out, it
    /// is closed and the next one opened within the same call.  An error opening the next part is
    /// returned from the call that reached the boundary.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        // Until this call settles, the reader counts as failed by cancellation, which is what a
        // caller that drops the future part way through observes.
        let (mut pos, mut stream) =
            match mem::replace(&mut self.state, State::Failed(Error::Cancelled)) {
                State::Streaming { pos, stream } => (pos, stream),
                State::Exhausted => {
                    self.state = State::Exhausted;
                    return Ok(0);
                }
                State::Failed(error) => {
                    self.state = State::Failed(error.clone());
                    return Err(error);
                }
                State::Closed => {
                    self.state = State::Closed;
                    return Err(Error::Closed);
                }
            };

        if self.limit == 0 {
            self.finish(stream).await;
            return Ok(0);
        }
        let cap = buf
            .len()
            .min(usize::try_from(self.limit).unwrap_or(usize::MAX));

        loop {
            match stream.read(&mut buf[..cap]).await {
                Ok(0) => {
                    if let Err(error) = stream.close().await {
                        return self.fail(error);
                    }
                    pos += 1;
                    if pos >= self.opener.ranges.len() {
                        warn!(
                            remaining = self.limit,
                            "parts exhausted before the span was delivered"
                        );
                        self.state = State::Exhausted;
                        return Ok(0);
                    }
                    debug!(pos, "advancing to next part");
                    stream = match self.opener.open(pos).await {
                        Ok(next) => next,
                        Err(error) => return self.fail(error),
                    };
                }
                Ok(n) => {
                    self.limit -= n as u64;
                    self.delivered += n as u64;
                    if self.limit == 0 {
                        self.finish(stream).await;
                    } else {
                        self.state = State::Streaming { pos, stream };
                    }
                    return Ok(n);
                }
                Err(error) => {
                    if let Err(close_error) = stream.close().await {
                        debug!(%close_error, "closing failed part stream");
                    }
                    return self.fail(error);
                }
            }
        }
    }

    /// Closes the open part stream, if any.  Closing an already closed reader is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        match mem::replace(&mut self.state, State::Closed) {
            State::Streaming { mut stream, .. } => stream.close().await,
            _ => Ok(()),
        }
    }

    /// Turns the reader into a stream of chunks of at most `chunk_size` bytes, for handing to a
    /// response body.  The reader is closed once the stream ends or yields an error.
    pub fn into_stream(self, chunk_size: usize) -> impl Stream<Item = Result<Bytes>> + Send {
        let chunk_size = chunk_size.max(1);
        futures::stream::unfold(Some(self), move |reader| async move {
            let mut reader = reader?;
            let mut buf = vec![0u8; chunk_size];
            match reader.read(&mut buf).await {
                Ok(0) => {
                    if let Err(error) = reader.close().await {
                        debug!(%error, "closing exhausted reader");
                    }
                    None
                }
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(Bytes::from(buf)), Some(reader)))
                }
                Err(error) => {
                    if let Err(close_error) = reader.close().await {
                        debug!(%close_error, "closing failed reader");
                    }
                    Some((Err(error), None))
                }
            }
        })
    }

    async fn finish(&mut self, mut stream: DecryptingStream) {
        if let Err(error) = stream.close().await {
            warn!(%error, "closing final part stream");
        }
        self.state = State::Exhausted;
    }

    fn fail(&mut self, error: Error) -> Result<usize> {
        debug!(%error, delivered = self.delivered, "ranged read failed");
        self.state = State::Failed(error.clone());
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::Fixture;

    async fn reader(fixture: &Fixture, span: ReadSpan) -> Result<DecryptedReader> {
        DecryptedReader::new(
            fixture.file.clone(),
            fixture.parts.clone(),
            span,
            fixture.services(),
            StreamConfig::default(),
            CancellationToken::new(),
        )
        .await
    }

    #[tokio::test]
    async fn single_byte_span() -> Result<()> {
        let fixture = Fixture::new(300, 100);
        let span = ReadSpan::new(150, 150)?;
        let mut reader = reader(&fixture, span).await?;

        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).await?, 1);
        assert_eq!(buf[0], fixture.expected(&span)[0]);
        assert_eq!(reader.read(&mut buf).await?, 0);
        assert!(reader.is_exhausted());
        reader.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn empty_buffers_do_not_advance() -> Result<()> {
        let fixture = Fixture::new(300, 100);
        let mut reader = reader(&fixture, ReadSpan::new(0, 299)?).await?;
        assert_eq!(reader.read(&mut []).await?, 0);
        assert_eq!(reader.remaining(), 300);
        assert_eq!(reader.delivered(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn reads_never_mix_parts() -> Result<()> {
        let fixture = Fixture::new(1_000, 100);
        let span = ReadSpan::new(50, 949)?;
        let mut reader = reader(&fixture, span).await?;

        let mut buf = [0u8; 256];
        let mut absolute = span.start();
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let last = absolute + n as u64 - 1;
            assert_eq!(absolute / 100, last / 100, "read {absolute}..={last} crosses a part");
            absolute += n as u64;
        }
        assert_eq!(absolute, span.end() + 1);
        Ok(())
    }

    #[tokio::test]
    async fn spans_outside_the_file_fail_construction() -> Result<()> {
        let fixture = Fixture::new(300, 100);
        assert!(matches!(
            reader(&fixture, ReadSpan::new(200, 300)?).await,
            Err(Error::InvalidSpan(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_config_fails_construction() -> Result<()> {
        let fixture = Fixture::new(300, 100);
        let result = DecryptedReader::new(
            fixture.file.clone(),
            fixture.parts.clone(),
            ReadSpan::new(0, 10)?,
            fixture.services(),
            StreamConfig::default().with_stripe_size(0),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(Error::Config(_))));
        Ok(())
    }
}

// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Remote part storage: resolving where a part lives and opening ranged streams over it.

use crate::{
    stream::{BoxedByteStream, ReaderStream},
    Error, Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{
    io::{self, SeekFrom},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt},
};

/// Where a part's ciphertext can be opened from.  Resolving it may cost a remote lookup, so it
/// is memoised in the location cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Channel holding the part.
    pub channel_id: i64,
    /// Remote part identifier.
    pub part_id: i64,
    /// Ciphertext size as reported by the store.
    pub size: u64,
    /// Store-specific handle (a path, a message reference, a URL).
    pub handle: String,
}

impl Location {
    /// Serialises for the cache.
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    /// Parses a cached location.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Connection pool to the part store, shared by every reader.
#[async_trait]
pub trait ChunkPool: Send + Sync {
    /// Resolves the location of a part.
    async fn locate(&self, channel_id: i64, part_id: i64) -> Result<Location>;

    /// Opens a stream over `length` bytes of ciphertext starting at `offset`.
    async fn open_range(
        &self,
        location: &Location,
        offset: u64,
        length: u64,
    ) -> Result<BoxedByteStream>;
}

/// A part store backed by a local directory, one file per part at `<root>/<channel>/<part>`.
#[derive(Clone, Debug)]
pub struct DirPool {
    root: PathBuf,
}

impl DirPool {
    /// Serves parts stored under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn part_path(&self, channel_id: i64, part_id: i64) -> PathBuf {
        self.root
            .join(channel_id.to_string())
            .join(part_id.to_string())
    }

    /// Writes the ciphertext of a part into the store.
    pub async fn store_part(&self, channel_id: i64, part_id: i64, ciphertext: &[u8]) -> Result<()> {
        let path = self.part_path(channel_id, part_id);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::write(path, ciphertext).await?;
        Ok(())
    }
}

#[async_trait]
impl ChunkPool for DirPool {
    async fn locate(&self, channel_id: i64, part_id: i64) -> Result<Location> {
        let path = self.part_path(channel_id, part_id);
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound {
                    channel_id,
                    part_id,
                })
            }
            Err(error) => return Err(error.into()),
        };
        Ok(Location {
            channel_id,
            part_id,
            size: metadata.len(),
            handle: path.to_string_lossy().into_owned(),
        })
    }

    async fn open_range(
        &self,
        location: &Location,
        offset: u64,
        length: u64,
    ) -> Result<BoxedByteStream> {
        let mut file = match File::open(&location.handle).await {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound {
                    channel_id: location.channel_id,
                    part_id: location.part_id,
                })
            }
            Err(error) => return Err(error.into()),
        };
        let _ = file.seek(SeekFrom::Start(offset)).await?;
        Ok(Box::new(ReaderStream::new(file.take(length))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::read_to_end;

    #[test]
    fn locations_survive_the_cache_encoding() -> Result<()> {
        let location = Location {
            channel_id: -100,
            part_id: 7,
            size: 1234,
            handle: "msg:99".to_string(),
        };
        assert_eq!(Location::from_bytes(&location.to_bytes()?)?, location);
        assert!(Location::from_bytes(b"\x01").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn dir_pool_serves_ranges() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pool = DirPool::new(dir.path());
        let data: Vec<u8> = (0..=255).collect();
        pool.store_part(1, 2, &data).await?;

        let location = pool.locate(1, 2).await?;
        assert_eq!(location.size, 256);

        let mut stream = pool.open_range(&location, 10, 20).await?;
        let bytes = read_to_end(&mut stream, 20).await?;
        assert_eq!(bytes.as_ref(), &data[10..30]);

        let mut tail = pool.open_range(&location, 250, 100).await?;
        assert_eq!(read_to_end(&mut tail, 100).await?.as_ref(), &data[250..]);
        Ok(())
    }

    #[tokio::test]
    async fn missing_parts_are_not_found() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pool = DirPool::new(dir.path());
        assert!(matches!(
            pool.locate(1, 3).await,
            Err(Error::NotFound {
                channel_id: 1,
                part_id: 3
            })
        ));
        Ok(())
    }
}

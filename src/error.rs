// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use std::{io, sync::Arc};
use thiserror::Error;

/// Specialisation of `std::Result` for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors which can arise while planning, fetching or decrypting a ranged read.
///
/// The error is `Clone` so that a reader which failed can hand the same error back on every
/// subsequent call.
#[derive(Debug, Error, Clone)]
#[allow(missing_docs)]
pub enum Error {
    #[error("Invalid read span: {0}")]
    InvalidSpan(String),
    #[error("Invalid part list: {0}")]
    InvalidParts(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Decryption error: {0}")]
    Decryption(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Part {part_id} not found in channel {channel_id}")]
    NotFound { channel_id: i64, part_id: i64 },
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
    #[error("Serialisation error: {0}")]
    Serialisation(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Reader is closed")]
    Closed,
    #[error("Stream ended early, {expected} bytes still expected")]
    Truncated { expected: u64 },
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

impl From<bincode::Error> for Error {
    fn from(error: bincode::Error) -> Self {
        Self::Serialisation(error.to_string())
    }
}

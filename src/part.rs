// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! File and part metadata as supplied by the caller.

use crate::{cipher::encrypted_size, Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

/// Size of a part salt in bytes.
pub const SALT_SIZE: usize = 32;

/// Per-part salt, combined with the shared encryption key to derive that part's cipher.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Salt(pub [u8; SALT_SIZE]);

impl Salt {
    /// A fresh random salt.
    pub fn random() -> Self {
        Self(rand::thread_rng().gen())
    }

    /// Parses a hex-encoded salt.
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let mut salt = [0u8; SALT_SIZE];
        hex::decode_to_slice(encoded.trim(), &mut salt)
            .map_err(|e| Error::InvalidParts(format!("malformed salt {encoded:?}: {e}")))?;
        Ok(Self(salt))
    }

    /// Hex encoding of this salt.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for Salt {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for Salt {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Display for Salt {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        write!(formatter, "{}", self.to_hex())
    }
}

impl Debug for Salt {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        let s = &self.0;
        write!(
            formatter,
            "Salt({:02x}{:02x}{:02x}..{:02x}{:02x}{:02x})",
            s[0],
            s[1],
            s[2],
            s[SALT_SIZE - 3],
            s[SALT_SIZE - 2],
            s[SALT_SIZE - 1]
        )
    }
}

/// One independently stored and encrypted chunk of a logical file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    /// Sequence index of the part within its file (starts at 0).
    pub part_no: usize,
    /// Remote identifier of the part.
    pub id: i64,
    /// Plaintext length.
    pub decrypted_size: u64,
    /// Ciphertext length as stored remotely.
    pub size: u64,
    /// Salt used when this part was encrypted.
    pub salt: Salt,
}

/// Identity of the logical file the parts belong to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// File identifier, used to namespace cached part locations.
    pub id: String,
    /// Channel (container) holding the parts.
    pub channel_id: i64,
}

/// Inclusive byte span `[start, end]` of the logical, decrypted file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadSpan {
    start: u64,
    end: u64,
}

impl ReadSpan {
    /// Creates a span, rejecting `start > end`.
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidSpan(format!(
                "start {start} is past end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Span covering `len` bytes from `start`.
    pub fn from_len(start: u64, len: u64) -> Result<Self> {
        if len == 0 {
            return Err(Error::InvalidSpan("span must cover at least one byte".to_string()));
        }
        let end = start
            .checked_add(len - 1)
            .ok_or_else(|| Error::InvalidSpan(format!("{len} bytes from {start} overflows")))?;
        Self::new(start, end)
    }

    /// First byte of the span.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last byte of the span (inclusive).
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of bytes the span covers.
    pub fn limit(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Checks the part list is usable for ranged reads and returns the total decrypted file size.
///
/// Every part but the last must share the decrypted size of the first part, since range planning
/// locates parts by dividing by that stride.  Each ciphertext size must match what the cipher
/// produces for the declared plaintext size.
pub fn validate_parts(parts: &[Part]) -> Result<u64> {
    let first = parts
        .first()
        .ok_or_else(|| Error::InvalidParts("file has no parts".to_string()))?;
    let stride = first.decrypted_size;
    if stride == 0 {
        return Err(Error::InvalidParts("first part is empty".to_string()));
    }

    let last_index = parts.len() - 1;
    let mut total: u64 = 0;
    for (index, part) in parts.iter().enumerate() {
        let uniform = if index < last_index {
            part.decrypted_size == stride
        } else {
            part.decrypted_size > 0 && part.decrypted_size <= stride
        };
        if !uniform {
            return Err(Error::InvalidParts(format!(
                "part {index} has decrypted size {}, stride is {stride}",
                part.decrypted_size
            )));
        }
        let expected = encrypted_size(part.decrypted_size);
        if part.size != expected {
            return Err(Error::InvalidParts(format!(
                "part {index} has ciphertext size {}, expected {expected}",
                part.size
            )));
        }
        total = total
            .checked_add(part.decrypted_size)
            .ok_or_else(|| Error::InvalidParts("total size overflows".to_string()))?;
    }
    Ok(total)
}

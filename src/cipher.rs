// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Per-part block cipher with seekable decryption.
//!
//! A part's plaintext is cut into blocks of [`BLOCK_DATA_SIZE`] bytes and every block is
//! encrypted on its own with AES-128-CBC and PKCS#7 padding.  Full blocks therefore occupy
//! [`BLOCK_SIZE`] bytes of ciphertext, and any plaintext offset maps onto a whole number of
//! ciphertext blocks which can be fetched and decrypted without touching the rest of the part.

use crate::{
    part::Salt,
    stream::{read_full, BoxedByteStream, ByteStream, BytesStream},
    Error, Result,
};
use aes::{
    cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit},
    Aes128,
};
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use rand::Rng;
use rayon::prelude::*;
use std::fmt::{self, Debug, Formatter};
use tokio_util::sync::CancellationToken;
use xor_name::XorName;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

pub(crate) const KEY_SIZE: usize = 16;
pub(crate) const IV_SIZE: usize = 16;
const AES_BLOCK_SIZE: u64 = 16;

/// Plaintext bytes per cipher block: 64KB.
pub const BLOCK_DATA_SIZE: usize = 64 * 1024;
/// Ciphertext bytes per full cipher block (a full block of padding is added by PKCS#7).
pub const BLOCK_SIZE: usize = BLOCK_DATA_SIZE + AES_BLOCK_SIZE as usize;
/// Number of blocks fetched and decrypted together.
const DECRYPT_BATCH_BLOCKS: u64 = 4;

const KEY_DERIVATION_DOMAIN: &[u8] = b"part_reader/part-cipher/v1";

/// Ciphertext length produced for `decrypted_size` bytes of plaintext.
pub fn encrypted_size(decrypted_size: u64) -> u64 {
    let block_data = BLOCK_DATA_SIZE as u64;
    let full_blocks = decrypted_size / block_data;
    let tail = decrypted_size % block_data;
    let tail_size = if tail > 0 {
        (tail / AES_BLOCK_SIZE + 1) * AES_BLOCK_SIZE
    } else {
        0
    };
    full_blocks * BLOCK_SIZE as u64 + tail_size
}

/// Secret shared by every part of a file.  Each part combines it with its own salt.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Wraps raw key material.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derives key material from a passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self(XorName::from_content(passphrase.as_bytes()).0)
    }

    /// A fresh random key.
    pub fn random() -> Self {
        Self(rand::thread_rng().gen())
    }
}

impl Debug for EncryptionKey {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        write!(formatter, "EncryptionKey(..)")
    }
}

#[derive(Clone)]
pub(crate) struct Key(pub(crate) [u8; KEY_SIZE]);
#[derive(Clone)]
pub(crate) struct Iv(pub(crate) [u8; IV_SIZE]);

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Iv {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Cipher for a single part.  Deterministic for a given key and salt.
#[derive(Clone)]
pub struct Cipher {
    key: Key,
    iv_base: Iv,
}

impl Debug for Cipher {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        write!(formatter, "Cipher(..)")
    }
}

impl Cipher {
    /// Builds the cipher of the part salted with `salt`.
    pub fn new(key: &EncryptionKey, salt: &Salt) -> Self {
        let hash = XorName::from_content_parts(&[KEY_DERIVATION_DOMAIN, &key.0[..], salt.as_ref()]);
        let mut aes_key = [0u8; KEY_SIZE];
        let mut iv_base = [0u8; IV_SIZE];
        aes_key.copy_from_slice(&hash.0[..KEY_SIZE]);
        iv_base.copy_from_slice(&hash.0[KEY_SIZE..KEY_SIZE + IV_SIZE]);
        Self {
            key: Key(aes_key),
            iv_base: Iv(iv_base),
        }
    }

    fn block_iv(&self, index: u64) -> Iv {
        let mut iv = self.iv_base.0;
        for (byte, mask) in iv[IV_SIZE - 8..].iter_mut().zip(index.to_be_bytes()) {
            *byte ^= mask;
        }
        Iv(iv)
    }

    fn encrypt_block(&self, index: u64, data: &[u8]) -> Vec<u8> {
        let iv = self.block_iv(index);
        let cipher = Aes128CbcEnc::new(self.key.as_ref().into(), iv.as_ref().into());
        cipher.encrypt_padded_vec_mut::<Pkcs7>(data)
    }

    fn decrypt_block(&self, index: u64, data: &[u8]) -> Result<Vec<u8>> {
        let iv = self.block_iv(index);
        let cipher = Aes128CbcDec::new(self.key.as_ref().into(), iv.as_ref().into());
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|e| Error::Decryption(format!("Decrypt failed for block {index} with {e}")))
    }

    /// Encrypts the whole plaintext of a part.  Blocks are encrypted in parallel.
    pub fn encrypt_part(&self, data: &[u8]) -> Bytes {
        let blocks: Vec<Vec<u8>> = data
            .par_chunks(BLOCK_DATA_SIZE)
            .enumerate()
            .map(|(index, block)| self.encrypt_block(index as u64, block))
            .collect();
        let mut out = BytesMut::with_capacity(encrypted_size(data.len() as u64) as usize);
        for block in blocks {
            out.extend_from_slice(&block);
        }
        out.freeze()
    }

    /// Decrypts a complete part held in memory.
    pub fn decrypt_part(&self, encrypted: &[u8]) -> Result<Bytes> {
        self.decrypt_blocks(0, encrypted)
    }

    fn decrypt_blocks(&self, first_block: u64, encrypted: &[u8]) -> Result<Bytes> {
        let blocks: Vec<Vec<u8>> = encrypted
            .par_chunks(BLOCK_SIZE)
            .enumerate()
            .map(|(offset, block)| self.decrypt_block(first_block + offset as u64, block))
            .collect::<Result<_>>()?;
        let mut out = BytesMut::with_capacity(blocks.iter().map(Vec::len).sum());
        for block in blocks {
            out.extend_from_slice(&block);
        }
        Ok(out.freeze())
    }

    /// Opens a plaintext stream over `range_len` bytes starting at `range_start` of this part.
    ///
    /// Only the ciphertext blocks covering the range are requested from `fetch`, as a single
    /// `(offset, limit)` call made before this returns.  The fetch may clip `limit` to the end of
    /// the part.
    pub async fn decrypt_seek(
        &self,
        token: &CancellationToken,
        fetch: &dyn CiphertextFetch,
        range_start: u64,
        range_len: u64,
    ) -> Result<DecryptingStream> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let block_data = BLOCK_DATA_SIZE as u64;
        if range_len == 0 {
            return Ok(DecryptingStream {
                cipher: self.clone(),
                source: Box::new(BytesStream::default()),
                next_block: range_start / block_data,
                blocks_left: 0,
                pending: Bytes::new(),
                skip: 0,
                remaining: 0,
                closed: false,
            });
        }

        let range_end = range_start
            .checked_add(range_len - 1)
            .ok_or_else(|| Error::InvalidSpan(format!("{range_len} bytes from {range_start}")))?;
        let first_block = range_start / block_data;
        let last_block = range_end / block_data;
        let block_count = last_block - first_block + 1;

        let source = fetch
            .fetch(
                token,
                first_block * BLOCK_SIZE as u64,
                block_count * BLOCK_SIZE as u64,
            )
            .await?;

        Ok(DecryptingStream {
            cipher: self.clone(),
            source,
            next_block: first_block,
            blocks_left: block_count,
            pending: Bytes::new(),
            skip: (range_start - first_block * block_data) as usize,
            remaining: range_len,
            closed: false,
        })
    }
}

/// Supplies ciphertext of a part: `limit` bytes starting at `offset`.
#[async_trait]
pub trait CiphertextFetch: Send + Sync {
    /// Opens a stream over the requested ciphertext.
    async fn fetch(
        &self,
        token: &CancellationToken,
        offset: u64,
        limit: u64,
    ) -> Result<BoxedByteStream>;
}

/// Plaintext of one range of one part, decrypted batch by batch as it is read.
pub struct DecryptingStream {
    cipher: Cipher,
    source: BoxedByteStream,
    next_block: u64,
    blocks_left: u64,
    pending: Bytes,
    skip: usize,
    remaining: u64,
    closed: bool,
}

impl DecryptingStream {
    /// Plaintext bytes of the range not yet returned.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    async fn fill(&mut self) -> Result<()> {
        let count = self.blocks_left.min(DECRYPT_BATCH_BLOCKS);
        let wanted = count as usize * BLOCK_SIZE;
        let mut encrypted = vec![0u8; wanted];
        let n = read_full(&mut self.source, &mut encrypted).await?;
        if n == 0 {
            self.blocks_left = 0;
            return Err(Error::Truncated {
                expected: self.remaining,
            });
        }
        encrypted.truncate(n);

        let mut plain = self.cipher.decrypt_blocks(self.next_block, &encrypted)?;
        if n < wanted {
            // Short read: the part ends within this batch.
            self.blocks_left = 0;
        } else {
            self.blocks_left -= count;
        }
        self.next_block += count;

        let skipped = self.skip.min(plain.len());
        plain.advance(skipped);
        self.skip -= skipped;
        self.pending = plain;
        Ok(())
    }
}

#[async_trait]
impl ByteStream for DecryptingStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::Closed);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.remaining == 0 {
                return Ok(0);
            }
            if !self.pending.is_empty() {
                let n = buf
                    .len()
                    .min(self.pending.len())
                    .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
                buf[..n].copy_from_slice(&self.pending[..n]);
                self.pending.advance(n);
                self.remaining -= n as u64;
                return Ok(n);
            }
            if self.blocks_left == 0 {
                return Err(Error::Truncated {
                    expected: self.remaining,
                });
            }
            self.fill().await?;
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.pending = Bytes::new();
        self.source.close().await
    }
}

// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Decrypting ranged reads over files stored as independently encrypted parts.
//!
//! A logical file is held remotely as an ordered list of [`Part`]s.  Each part is encrypted on its
//! own, under a key shared by the whole file combined with a salt unique to the part.  Given an
//! inclusive byte span of the decrypted file, a [`DecryptedReader`] works out which parts and
//! which ranges within them are needed, then fetches, decrypts and hands back those bytes in
//! order, holding at most one part open at a time.
//!
//! Each part's ciphertext is fetched either over a single stream or, when
//! [`StreamConfig::concurrency`] is two or more, as stripes fetched in parallel and reassembled
//! in order.  The choice makes no difference to the bytes returned.
//!
//! # Examples
//!
//! ```
//! use part_reader::{
//!     test_helpers::Fixture, DecryptedReader, ReadSpan, Result, StreamConfig,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // 1000 random bytes, stored as parts of 300 bytes.
//!     let fixture = Fixture::new(1000, 300);
//!     let span = ReadSpan::new(250, 649)?;
//!
//!     let mut reader = DecryptedReader::new(
//!         fixture.file.clone(),
//!         fixture.parts.clone(),
//!         span,
//!         fixture.services(),
//!         StreamConfig::default().with_concurrency(4),
//!         CancellationToken::new(),
//!     )
//!     .await?;
//!
//!     let mut out = Vec::new();
//!     let mut buf = [0u8; 128];
//!     loop {
//!         let n = reader.read(&mut buf).await?;
//!         if n == 0 {
//!             break;
//!         }
//!         out.extend_from_slice(&buf[..n]);
//!     }
//!     reader.close().await?;
//!
//!     assert_eq!(out, fixture.expected(&span));
//!     Ok(())
//! }
//! ```

#![doc(test(attr(forbid(warnings))))]
// For explanation of lint checks, run `rustc -W help` or see
// https://github.com/maidsafe/QA/blob/master/Documentation/Rust%20Lint%20Checks.md
#![forbid(
    arithmetic_overflow,
    mutable_transmutes,
    no_mangle_const_items,
    unknown_crate_types
)]
#![deny(
    bad_style,
    deprecated,
    improper_ctypes,
    missing_docs,
    non_shorthand_field_patterns,
    overflowing_literals,
    stable_features,
    unconditional_recursion,
    unknown_lints,
    unsafe_code,
    unused,
    unused_allocation,
    unused_attributes,
    unused_comparisons,
    unused_parens,
    while_true
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results
)]
#![allow(
    missing_copy_implementations,
    missing_debug_implementations,
    variant_size_differences
)]

pub mod cache;
pub mod cipher;
pub mod config;
mod error;
pub mod part;
pub mod plan;
pub mod pool;
mod reader;
pub mod source;
pub mod strategy;
pub mod stream;
pub mod test_helpers;

pub use self::{
    cache::{Cache, MemoryCache, NoCache},
    cipher::{encrypted_size, Cipher, EncryptionKey},
    config::StreamConfig,
    error::{Error, Result},
    part::{FileMeta, Part, ReadSpan, Salt},
    plan::{plan_ranges, ByteRange},
    pool::{ChunkPool, DirPool, Location},
    reader::{DecryptedReader, Services},
    source::ChunkSource,
    strategy::FetchStrategy,
    stream::{BoxedByteStream, ByteStream},
};

// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use clap::Parser;
use part_reader::{
    test_helpers::encrypt_parts, ChunkPool, DecryptedReader, DirPool, EncryptionKey, Error,
    FileMeta, MemoryCache, ReadSpan, Result, Services, StreamConfig,
};
use std::{path::PathBuf, sync::Arc, time::Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Stores a file as encrypted parts in a directory, then reads an inclusive byte span of it back
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// File to split and encrypt
    #[arg(short, long)]
    input: PathBuf,

    /// Directory the encrypted parts are written to
    #[arg(short, long)]
    store: PathBuf,

    /// Where the decrypted span is written
    #[arg(short, long)]
    output: PathBuf,

    /// First byte of the span
    #[arg(long, default_value_t = 0)]
    start: u64,

    /// Last byte of the span (inclusive); defaults to the end of the file
    #[arg(long)]
    end: Option<u64>,

    /// Plaintext bytes per part
    #[arg(long, default_value_t = 8 * 1024 * 1024)]
    part_size: usize,

    /// Parallel stripes per part (1 for a single stream); overrides PART_READER_CONCURRENCY
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Passphrase the file key is derived from
    #[arg(long, default_value = "part_reader demo")]
    passphrase: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if !args.input.is_file() {
        return Err(Error::Config(format!(
            "input is not a file: {}",
            args.input.display()
        )));
    }

    let data = tokio::fs::read(&args.input).await?;
    if data.is_empty() {
        return Err(Error::Config("input file is empty".to_string()));
    }

    let key = EncryptionKey::from_passphrase(&args.passphrase);
    let file = FileMeta {
        id: args.input.to_string_lossy().into_owned(),
        channel_id: 1,
    };
    let pool = DirPool::new(&args.store);
    let mut parts = Vec::new();
    for (part, ciphertext) in encrypt_parts(&key, &data, args.part_size, 1) {
        pool.store_part(file.channel_id, part.id, &ciphertext).await?;
        parts.push(part);
    }
    println!(
        "Stored {} bytes as {} parts under {}",
        data.len(),
        parts.len(),
        pool.root().display()
    );

    let mut config = StreamConfig::from_env();
    if let Some(concurrency) = args.concurrency {
        config = config.with_concurrency(concurrency);
    }
    let end = args.end.unwrap_or(data.len() as u64 - 1);
    let span = ReadSpan::new(args.start, end)?;

    let pool: Arc<dyn ChunkPool> = Arc::new(pool);
    let services = Services {
        pool,
        cache: Arc::new(MemoryCache::new()),
        key,
    };

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    let _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let started = Instant::now();
    let mut reader = DecryptedReader::new(file, parts, span, services, config, token).await?;
    let mut output = tokio::fs::File::create(&args.output).await?;
    let mut buf = vec![0u8; 256 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        output.write_all(&buf[..n]).await?;
    }
    output.flush().await?;
    let delivered = reader.delivered();
    reader.close().await?;

    println!(
        "Wrote bytes [{}, {}] ({delivered} bytes) to {} in {:?}",
        span.start(),
        span.end(),
        args.output.display(),
        started.elapsed()
    );
    Ok(())
}

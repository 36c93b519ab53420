// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use part_reader::{
    test_helpers::{Fixture, MemoryPool},
    DecryptedReader, ReadSpan, Result, StreamConfig,
};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

const PART_SIZE: usize = 4 * 1024 * 1024;
const FILE_SIZE: usize = 3 * PART_SIZE + 1024 * 1024;

async fn read_span(fixture: &Fixture, span: ReadSpan, concurrency: usize) -> Result<u64> {
    let config = StreamConfig::default()
        .with_concurrency(concurrency)
        .with_stripe_size(512 * 1024);
    let mut reader = DecryptedReader::new(
        fixture.file.clone(),
        fixture.parts.clone(),
        span,
        fixture.services(),
        config,
        CancellationToken::new(),
    )
    .await?;

    let mut buf = vec![0u8; 256 * 1024];
    let mut total = 0;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        total += n as u64;
    }
    reader.close().await?;
    Ok(total)
}

fn ranged_reads(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    // Each read from the store waits a little, as a remote fetch would.
    let pool = MemoryPool::new()
        .with_latency(Duration::from_micros(200))
        .with_max_read(64 * 1024);
    let fixture = Fixture::with_pool(FILE_SIZE, PART_SIZE, pool);
    let span = ReadSpan::new(1024, FILE_SIZE as u64 - 1024).unwrap();

    let mut group = c.benchmark_group("ranged_read");
    group.sample_size(10);
    group.throughput(Throughput::Bytes(span.limit()));
    for concurrency in [1, 4, 8] {
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&runtime)
                    .iter(|| async { black_box(read_span(&fixture, span, concurrency).await.unwrap()) })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, ranged_reads);
criterion_main!(benches);

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures_util::StreamExt;
use zipstream::{stream_archive, ArchiveRequest, AsyncStreamingZipWriter, ResponseSink};

fn generate_compressible_data(size: usize) -> Vec<u8> {
    let pattern = b"The quick brown fox jumps over the lazy dog. ";
    let mut data = Vec::with_capacity(size);
    while data.len() < size {
        data.extend_from_slice(pattern);
    }
    data.truncate(size);
    data
}

fn format_size(size: usize) -> String {
    if size >= 1024 * 1024 {
        format!("{}MB", size / (1024 * 1024))
    } else {
        format!("{}KB", size / 1024)
    }
}

fn bench_writer_levels(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let data = generate_compressible_data(1024 * 1024);

    let mut group = c.benchmark_group("writer_levels_1MB");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for level in [1u32, 6, 9] {
        group.bench_with_input(BenchmarkId::new("deflate", level), &level, |b, &level| {
            b.to_async(&runtime).iter(|| async {
                let mut writer =
                    AsyncStreamingZipWriter::from_writer_with_compression(Vec::new(), level);
                writer.start_entry("test.bin").await.unwrap();
                for chunk in data.chunks(64 * 1024) {
                    writer.write_data(black_box(chunk)).await.unwrap();
                }
                writer.finish().await.unwrap()
            });
        });
    }

    group.finish();
}

fn bench_directory_to_body(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for size in [100 * 1024, 5 * 1024 * 1024] {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            std::fs::write(
                dir.path().join(format!("file{}.txt", i)),
                generate_compressible_data(size / 4),
            )
            .unwrap();
        }

        let mut group = c.benchmark_group(format!("directory_to_body_{}", format_size(size)));
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function("stream", |b| {
            b.to_async(&runtime).iter(|| async {
                let mut request = ArchiveRequest::new(dir.path());
                let plan = request.plan().await.unwrap();
                let (sink, handle, mut body) = ResponseSink::channel(16);
                let task = tokio::spawn(stream_archive(request, plan, sink, handle));

                let mut total = 0usize;
                while let Some(chunk) = body.next().await {
                    total += chunk.unwrap().len();
                }
                task.await.unwrap();
                total
            });
        });
        group.finish();
    }
}

criterion_group!(benches, bench_writer_levels, bench_directory_to_body);
criterion_main!(benches);

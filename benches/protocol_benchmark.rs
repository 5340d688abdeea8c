//! Benchmarks for splitting worker output into sentinel-terminated blocks.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use exifbatch::batch::{DEFAULT_SENTINEL, ResponseBuffer, ToolProtocol};

/// `count` JSON responses, each followed by the sentinel line.
fn stream(count: usize) -> String {
    let mut out = String::new();
    for i in 0..count {
        out.push_str(&format!(
            "[{{\"SourceFile\": \"IMG_{i:04}.jpg\", \"Make\": \"Canon\", \"ISO\": 200}}]\n"
        ));
        out.push_str(DEFAULT_SENTINEL);
        out.push('\n');
    }
    out
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_buffer");
    let input = stream(1000);
    group.throughput(Throughput::Bytes(input.len() as u64));

    for chunk_size in [16usize, 512, 8192].iter() {
        group.bench_with_input(BenchmarkId::new("chunk", chunk_size), chunk_size, |b, &size| {
            b.iter(|| {
                let mut buffer = ResponseBuffer::new(DEFAULT_SENTINEL);
                let mut blocks = 0;
                let bytes = input.as_bytes();
                let mut start = 0;
                while start < bytes.len() {
                    let mut end = (start + size).min(bytes.len());
                    while !input.is_char_boundary(end) {
                        end += 1;
                    }
                    blocks += buffer.push(black_box(&input[start..end])).len();
                    start = end;
                }
                black_box(blocks)
            });
        });
    }

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let protocol = ToolProtocol::exiftool("exiftool");
    let args: Vec<String> = ["-json", "-struct", "-charset", "filename=utf8", "/photos/IMG_0001.jpg"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    c.bench_function("encode_command", |b| {
        b.iter(|| black_box(protocol.encode_command(black_box(&args))))
    });
}

criterion_group!(benches, bench_split, bench_encode);
criterion_main!(benches);

//! Benchmarks for JPEG frame extraction and fan-out
//!
//! Covers:
//! - Extraction throughput across chunk sizes (decoder pipes deliver 4K-64K reads)
//! - Resuming the end-marker search on a large unterminated frame
//! - Broadcasting a released frame to many viewers
//!
//! Platform: Cross-platform (synthetic data, CI-safe)

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use framecast::broadcast::{BroadcastSink, Outbound, ViewerTransport};
use framecast::test_utils::{concat_jpegs, synthetic_jpeg};
use framecast::{Frame, FrameExtractor};
use std::hint::black_box;
use std::sync::Arc;

/// Viewer that discards what it is sent
struct DiscardingViewer {
    ready: bool,
}

impl ViewerTransport for DiscardingViewer {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn send(&self, message: Outbound) -> framecast::Result<()> {
        black_box(message);
        Ok(())
    }
}

/// Roughly one second of 5fps 720p MJPEG
fn synthetic_stream() -> Vec<u8> {
    let jpegs: Vec<_> = (0..5).map(|i| synthetic_jpeg(60_000 + i * 1_000, i as u8)).collect();
    concat_jpegs(&jpegs)
}

fn bench_chunked_extraction(c: &mut Criterion) {
    let stream = synthetic_stream();

    let mut group = c.benchmark_group("chunked_extraction");
    group.throughput(Throughput::Bytes(stream.len() as u64));

    for chunk_size in [4 * 1024, 16 * 1024, 64 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk_size), &chunk_size, |b, &size| {
            b.iter(|| {
                let mut extractor = FrameExtractor::new();
                let mut frames = 0;
                for chunk in stream.chunks(size) {
                    frames += extractor.feed(black_box(chunk)).len();
                }
                black_box(frames)
            })
        });
    }

    group.finish();
}

fn bench_unterminated_frame(c: &mut Criterion) {
    // One 1MB frame arriving in 4KB chunks, terminated only at the end
    let jpeg = synthetic_jpeg(1024 * 1024, 7);

    c.bench_function("unterminated_1mb_frame_4k_chunks", |b| {
        b.iter(|| {
            let mut extractor = FrameExtractor::new();
            let mut frames = Vec::new();
            for chunk in jpeg.chunks(4096) {
                frames.extend(extractor.feed(black_box(chunk)));
            }
            black_box(frames)
        })
    });
}

fn bench_broadcast(c: &mut Criterion) {
    let frame = Frame::new(synthetic_jpeg(60_000, 1), 1);

    let mut group = c.benchmark_group("broadcast_frame");
    for viewers in [1usize, 16, 128] {
        let sink = BroadcastSink::new();
        for i in 0..viewers {
            // Half the viewers are not ready and get skipped
            sink.register(Arc::new(DiscardingViewer { ready: i % 2 == 0 }));
        }

        group.bench_with_input(BenchmarkId::from_parameter(viewers), &sink, |b, sink| {
            b.iter(|| black_box(sink.broadcast(Outbound::Binary(Bytes::clone(&frame.data)))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chunked_extraction, bench_unterminated_frame, bench_broadcast);
criterion_main!(benches);

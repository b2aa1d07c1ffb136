//! Criterion benchmarks for the splitflap frame codec.
//!
//! Run with:
//! ```bash
//! cargo bench --package splitflap-core --bench frame_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use splitflap_core::protocol::frame::MAX_PAYLOAD_LEN;
use splitflap_core::{decode_frame, encode_frame, Frame, FrameDecoder, Request};

fn make_set_text(modules: usize) -> Frame {
    // Cycle through indices so the escape path is exercised too.
    let indices = (0..modules).map(|i| (i * 37 % 256) as u8).collect();
    Request::SetText(indices).to_frame(0xC0)
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_frame");
    for modules in [8usize, 108, MAX_PAYLOAD_LEN] {
        let frame = make_set_text(modules);
        group.bench_with_input(BenchmarkId::from_parameter(modules), &frame, |b, f| {
            b.iter(|| encode_frame(black_box(f)).unwrap())
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_frame");
    for modules in [8usize, 108, MAX_PAYLOAD_LEN] {
        let wire = encode_frame(&make_set_text(modules)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(modules), &wire, |b, w| {
            b.iter(|| decode_frame(black_box(w)).unwrap())
        });
    }
    group.finish();
}

fn bench_streaming_decoder(c: &mut Criterion) {
    // Ten frames delivered in serial-sized chunks.
    let mut stream = Vec::new();
    for _ in 0..10 {
        stream.extend(encode_frame(&make_set_text(108)).unwrap());
    }
    c.bench_function("frame_decoder_push_chunks", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            let mut count = 0;
            for chunk in black_box(&stream).chunks(32) {
                count += decoder.push(chunk).len();
            }
            count
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_streaming_decoder);
criterion_main!(benches);

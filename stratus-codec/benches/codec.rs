//! Codec benchmarks - encode and decode throughput.
//!
//! These benchmarks measure the wire codec in isolation: request
//! serialization at various payload sizes and streaming response decoding.

use std::hint::black_box;

use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stratus_codec::{RequestEncoder, ResponseDecoder};
use stratus_core::{Flags, PooledBuffer, Request};

/// Benchmark meta-set encoding at various payload sizes.
fn bench_encode_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_set");
    let encoder = RequestEncoder::new();

    for size in [16, 256, 1024, 10_240, 102_400] {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let payload = vec![0xAB; size];
            let mut buf = BytesMut::with_capacity(size + 64);

            b.iter(|| {
                buf.clear();
                let request = Request::set(
                    "benchmark_key",
                    PooledBuffer::from_slice(&payload),
                    Flags::new(),
                )
                .unwrap();
                encoder.encode(black_box(&request), &mut buf);
                black_box(buf.len())
            });
        });
    }

    group.finish();
}

/// Benchmark meta-get encoding (small fixed-size requests).
fn bench_encode_get(c: &mut Criterion) {
    let encoder = RequestEncoder::new();

    c.bench_function("encode_get", |b| {
        let mut buf = BytesMut::with_capacity(64);

        b.iter(|| {
            buf.clear();
            let request = Request::get("benchmark_key", Flags::new().return_value(true)).unwrap();
            encoder.encode(black_box(&request), &mut buf);
            black_box(buf.len())
        });
    });
}

/// Benchmark decoding a stream of `VA` responses.
fn bench_decode_value(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_value");
    let decoder = ResponseDecoder::new();

    for size in [16, 256, 1024, 10_240, 102_400] {
        let mut frame = Vec::new();
        frame.extend_from_slice(format!("VA {size}\r\n").as_bytes());
        frame.extend_from_slice(&vec![0xCD; size]);
        frame.extend_from_slice(b"\r\n");

        group.throughput(Throughput::Bytes(frame.len() as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| {
                let mut buf = BytesMut::from(&frame[..]);
                let response = decoder.decode(&mut buf).unwrap().unwrap();
                black_box(response.value().map(<[u8]>::len))
            });
        });
    }

    group.finish();
}

/// Benchmark decoding a pipelined burst of header-only responses.
fn bench_decode_pipelined(c: &mut Criterion) {
    let decoder = ResponseDecoder::new();
    let stream: Vec<u8> = b"HD\r\n".repeat(64);

    let mut group = c.benchmark_group("decode_pipelined");
    group.throughput(Throughput::Elements(64));

    group.bench_function("headers_x64", |b| {
        b.iter(|| {
            let mut buf = BytesMut::from(&stream[..]);
            let mut count = 0;
            while let Some(response) = decoder.decode(&mut buf).unwrap() {
                black_box(response.code);
                count += 1;
            }
            black_box(count)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_set,
    bench_encode_get,
    bench_decode_value,
    bench_decode_pipelined
);
criterion_main!(benches);

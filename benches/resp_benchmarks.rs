// ABOUTME: Benchmark suite for the RESP codec hot paths
// ABOUTME: Measures command encoding, frame decoding and the borrowed-to-owned copy

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use respipe::codec::{command_len, encode_command, try_read};
use respipe::command::Command;
use std::time::Duration;

fn bench_encode_command(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_command");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("ping", |b| {
        let mut buf = BytesMut::with_capacity(64);
        b.iter(|| {
            buf.clear();
            encode_command(&mut buf, black_box(&[b"PING"]));
            buf.len()
        })
    });

    group.bench_function("set_small", |b| {
        let mut buf = BytesMut::with_capacity(128);
        b.iter(|| {
            buf.clear();
            encode_command(&mut buf, black_box(&[b"SET", b"key:0001", b"value"]));
            buf.len()
        })
    });

    let payload = vec![b'x'; 4096];
    group.bench_function("set_4k_value", |b| {
        let args: [&[u8]; 3] = [b"SET", b"key:0001", payload.as_slice()];
        let mut buf = BytesMut::with_capacity(command_len(&args) + 16);
        b.iter(|| {
            buf.clear();
            encode_command(&mut buf, black_box(&args));
            buf.len()
        })
    });

    group.bench_function("precomputed_ping_clone", |b| {
        b.iter(|| black_box(Command::ping()).bytes().clone())
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("simple_string", |b| {
        b.iter(|| try_read(black_box(b"+OK\r\n")).unwrap().unwrap().1)
    });

    group.bench_function("integer", |b| {
        b.iter(|| try_read(black_box(b":1234567890\r\n")).unwrap().unwrap().1)
    });

    for &size in &[16usize, 256, 4096] {
        let mut wire = Vec::new();
        wire.extend_from_slice(format!("${size}\r\n").as_bytes());
        wire.extend(std::iter::repeat_n(b'x', size));
        wire.extend_from_slice(b"\r\n");

        group.bench_with_input(BenchmarkId::new("bulk_string", size), &wire, |b, wire| {
            b.iter(|| try_read(black_box(wire.as_slice())).unwrap().unwrap().1)
        });
    }

    // A pipelined burst of replies, decoded in a loop the way the endpoint
    // reader does it.
    let mut burst = Vec::new();
    for i in 0..64 {
        burst.extend_from_slice(format!(":{i}\r\n").as_bytes());
    }
    group.bench_function("burst_of_64_integers", |b| {
        b.iter(|| {
            let mut offset = 0;
            let mut frames = 0;
            while let Some((_, used)) = try_read(black_box(&burst[offset..])).unwrap() {
                offset += used;
                frames += 1;
            }
            frames
        })
    });

    group.finish();
}

fn bench_to_owned(c: &mut Criterion) {
    let mut group = c.benchmark_group("to_owned");
    group.measurement_time(Duration::from_secs(10));

    let wire = b"*3\r\n$5\r\nhello\r\n:42\r\n*2\r\n+a\r\n+b\r\n";
    group.bench_function("nested_array", |b| {
        b.iter(|| {
            let (frame, _) = try_read(black_box(wire)).unwrap().unwrap();
            frame.to_owned()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_encode_command, bench_decode, bench_to_owned);
criterion_main!(benches);

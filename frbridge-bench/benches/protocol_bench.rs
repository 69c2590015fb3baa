//! CRC and frame codec benchmarks.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use frbridge_protocol::{crc, Decoder, Encoder, Frame, Indicators, Source};

fn test_frame(payload_size: usize) -> Frame {
    let payload: Vec<u8> = (0..payload_size).map(|i| i as u8).collect();
    Frame::new(0x44, 4, Indicators::new(), &payload, Source::Ecu).unwrap()
}

fn bench_header_crc(c: &mut Criterion) {
    c.bench_function("header_crc", |b| {
        b.iter(|| black_box(crc::header_crc(black_box(0), black_box(0x6B), black_box(1))));
    });
}

fn bench_frame_crc(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_crc");

    for size in [16, 64, 254] {
        let frame = test_frame(size);
        let encoded = frame.encode();
        let data = encoded[..encoded.len() - 3].to_vec();

        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| black_box(crc::frame_crc(data)));
        });
    }

    group.finish();
}

fn bench_e2e_crc(c: &mut Criterion) {
    let data = [0xFEu8, 0xD0, 0xE7, 0xFF, 0x7F, 0x1E, 0x00];
    c.bench_function("e2e_crc", |b| {
        b.iter(|| black_box(crc::e2e_crc(black_box(&data), 0xDC)));
    });
}

fn bench_frame_decode_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode_validate");

    for size in [16, 64, 254] {
        let encoded = test_frame(size).encode();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, raw| {
            b.iter(|| {
                let frame = Frame::decode(raw, Source::Ecu).unwrap();
                black_box(frame.is_valid(raw))
            });
        });
    }

    group.finish();
}

fn bench_record_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_encode");

    for size in [16, 254] {
        let frame = test_frame(size);
        let mut buf = BytesMut::with_capacity(Encoder::record_len(&frame));

        group.throughput(Throughput::Bytes(Encoder::record_len(&frame) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| {
                buf.clear();
                Encoder::encode_record_into(frame, &mut buf);
                black_box(buf.len())
            });
        });
    }

    group.finish();
}

fn bench_record_stream_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_stream_decode");

    let frame = test_frame(16);
    let mut stream = BytesMut::new();
    for _ in 0..100 {
        Encoder::encode_record_into(&frame, &mut stream);
    }

    group.throughput(Throughput::Elements(100));
    group.bench_function("100_records", |b| {
        b.iter(|| {
            let mut decoder = Decoder::new();
            decoder.extend(&stream);
            let mut count = 0;
            while let Some(frame) = decoder.decode_record().unwrap() {
                black_box(frame);
                count += 1;
            }
            black_box(count)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_header_crc,
    bench_frame_crc,
    bench_e2e_crc,
    bench_frame_decode_validate,
    bench_record_encode,
    bench_record_stream_decode,
);

criterion_main!(benches);

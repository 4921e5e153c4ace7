use criterion::{Criterion, Throughput};
use libmqtt::mqtt::QoS;
use libmqtt::mqtt::packet::{Frame, decode, encode_publish};
use std::hint::black_box;

pub fn bench_decode_publish(c: &mut Criterion) {
    let payload = [0x5Au8; 512];
    let mut frame = Frame::new();
    encode_publish("bench/decode", &payload, QoS::AtLeastOnce, Some(1), false, &mut frame)
        .expect("frame fits");

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("publish_512", |b| {
        b.iter(|| decode(black_box(&frame)).expect("valid frame"))
    });
    group.finish();
}

pub fn bench_encode_publish(c: &mut Criterion) {
    let payload = [0xA5u8; 512];
    let mut frame = Frame::new();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("publish_512", |b| {
        b.iter(|| {
            encode_publish(
                black_box("bench/encode"),
                black_box(&payload),
                QoS::ExactlyOnce,
                Some(42),
                false,
                &mut frame,
            )
            .expect("frame fits")
        })
    });
    group.finish();
}

use criterion::{criterion_group, criterion_main};

mod mqtt;

criterion_group!(
    benches,
    mqtt::topic::bench_match_single,
    mqtt::topic::bench_match_random,
    mqtt::topic::bench_subscription_table,
    mqtt::packet::bench_decode_publish,
    mqtt::packet::bench_encode_publish
);
criterion_main!(benches);

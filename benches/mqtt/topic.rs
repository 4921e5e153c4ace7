use criterion::{BatchSize, Criterion, Throughput};
use libmqtt::mqtt::topic::matches;
use libmqtt::mqtt::{QoS, SubscriptionTable};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

const WORDS: [&str; 6] = ["home", "kitchen", "sensor", "temp", "status", "+"];

fn random_path(rng: &mut StdRng, allow_wildcards: bool) -> String {
    let depth = rng.gen_range(1..=6);
    let mut levels: Vec<&str> = (0..depth)
        .map(|_| {
            let word = WORDS[rng.gen_range(0..WORDS.len())];
            if word == "+" && !allow_wildcards {
                "x"
            } else {
                word
            }
        })
        .collect();
    if allow_wildcards && rng.gen_bool(0.3) {
        levels.push("#");
    }
    levels.join("/")
}

pub fn bench_match_single(c: &mut Criterion) {
    let mut group = c.benchmark_group("topic_match");
    group.bench_function("literal", |b| {
        b.iter(|| {
            matches(
                black_box("home/kitchen/sensor/temp"),
                black_box("home/kitchen/sensor/temp"),
            )
        })
    });
    group.bench_function("single_level", |b| {
        b.iter(|| matches(black_box("home/kitchen/sensor/temp"), black_box("home/+/sensor/+")))
    });
    group.bench_function("multi_level", |b| {
        b.iter(|| matches(black_box("home/kitchen/sensor/temp"), black_box("home/#")))
    });
    group.finish();
}

pub fn bench_match_random(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let pairs: Vec<(String, String)> = (0..1024)
        .map(|_| (random_path(&mut rng, false), random_path(&mut rng, true)))
        .collect();

    let mut group = c.benchmark_group("topic_match_random");
    group.throughput(Throughput::Elements(pairs.len() as u64));
    group.bench_function("1024_pairs", |b| {
        b.iter(|| {
            pairs
                .iter()
                .filter(|(topic, filter)| matches(topic, filter))
                .count()
        })
    });
    group.finish();
}

pub fn bench_subscription_table(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(11);
    let mut group = c.benchmark_group("subscription_table");
    group.bench_function("match_qos_full_table", |b| {
        b.iter_batched_ref(
            || {
                let mut table = SubscriptionTable::new();
                while table.has_room_for("\0") {
                    let filter = random_path(&mut rng, true);
                    let _ = table.upsert(&filter, QoS::AtLeastOnce, QoS::AtLeastOnce);
                }
                table
            },
            |table| table.match_qos(black_box("home/kitchen/sensor/temp")),
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

//! Benchmarks for scenario loading and dispatch

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use matbc_scenario::{CommandQueue, LoadPolicy, ScenarioLoader};

/// One parameter change per second for `n` seconds, with a few same-second
/// priority clashes
fn scenario(n: u32) -> String {
    let mut text = String::from("0:00:00;resman;start\n0:00:00;sysmon;start\n");
    for s in 1..=n {
        let (h, m, sec) = (s / 3600, (s / 60) % 60, s % 60);
        text.push_str(&format!("{}:{:02}:{:02};resman;tolerancelevel;{}\n", h, m, sec, s % 1000));
        if s % 10 == 0 {
            text.push_str(&format!("{}:{:02}:{:02}-5;sysmon;scales-1-failure;up\n", h, m, sec));
        }
    }
    text
}

fn bench_load(c: &mut Criterion) {
    let loader = ScenarioLoader::new(LoadPolicy::FailFast);
    let mut group = c.benchmark_group("scenario_load");

    for lines in [100u32, 1_000, 10_000] {
        let text = scenario(lines);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &text, |b, text| {
            b.iter(|| loader.load_str(black_box(text)).unwrap())
        });
    }

    group.finish();
}

fn bench_queue_load(c: &mut Criterion) {
    let commands = ScenarioLoader::new(LoadPolicy::FailFast)
        .load_str(&scenario(10_000))
        .unwrap();

    c.bench_function("queue_load_10000", |b| {
        b.iter(|| {
            let mut queue = CommandQueue::new();
            queue.load(black_box(commands.clone()));
            queue
        })
    });
}

fn bench_queue_advance(c: &mut Criterion) {
    let commands = ScenarioLoader::new(LoadPolicy::FailFast)
        .load_str(&scenario(3_600))
        .unwrap();

    c.bench_function("queue_advance_one_hour", |b| {
        b.iter_batched(
            || {
                let mut queue = CommandQueue::new();
                queue.load(commands.clone());
                queue
            },
            |mut queue| {
                let mut dispatched = 0;
                for now in 0..=3_600 {
                    dispatched += queue.advance(black_box(now)).len();
                }
                dispatched
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_load, bench_queue_load, bench_queue_advance);
criterion_main!(benches);

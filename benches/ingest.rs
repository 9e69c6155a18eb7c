//! Benchmarks for passing ingestion
//!
//! Covers decoder log parsing and the per-passing path through
//! `Race::manual_passing`: validation, lap routing and announcements.

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use roadrace::config::RaceConfig;
use roadrace::decoder::ReplaySource;
use roadrace::race::Race;
use roadrace::registry::RiderRegistry;
use roadrace::types::{Bib, Tod};
use std::fmt::Write;
use std::hint::black_box;

const RIDERS: usize = 100;
const LAPS: i64 = 10;

fn passing_log() -> String {
    let mut log = String::from("# synthetic lap passings\n");
    for lap in 1..=LAPS {
        for rider in 1..=RIDERS {
            let at = Tod::from_millis(36_000_000 + lap * 360_000 + rider as i64 * 250);
            let _ = writeln!(log, "{} t{:03} lap", at.timestr(3), rider);
        }
    }
    log
}

fn bench_log_parsing(c: &mut Criterion) {
    let log = passing_log();
    let mut group = c.benchmark_group("replay_log");
    group.throughput(Throughput::Bytes(log.len() as u64));

    group.bench_function("from_log", |b| {
        b.iter(|| black_box(ReplaySource::from_log("bench", black_box(&log)).expect("valid log")))
    });

    group.finish();
}

fn started_race() -> (Race, Vec<Bib>) {
    let bibs: Vec<Bib> = (1..=RIDERS).map(|i| Bib::new(i.to_string())).collect();
    let mut race = Race::new(RaceConfig::default(), RiderRegistry::new());
    race.add_riders(&bibs);
    race.arm_start().expect("arm start");
    race.start_trigger(Tod::ZERO);
    race.take_announcements();
    (race, bibs)
}

fn bench_manual_passings(c: &mut Criterion) {
    let mut group = c.benchmark_group("manual_passing");
    group.throughput(Throughput::Elements(RIDERS as u64 * LAPS as u64));

    group.bench_function("lap_field", |b| {
        b.iter_batched(
            started_race,
            |(mut race, bibs)| {
                for lap in 1..=LAPS {
                    for (i, bib) in bibs.iter().enumerate() {
                        let at = Tod::from_millis(lap * 360_000 + i as i64 * 250);
                        black_box(race.manual_passing(std::slice::from_ref(bib), at));
                    }
                }
                race.take_announcements();
                race
            },
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_log_parsing, bench_manual_passings);
criterion_main!(benches);

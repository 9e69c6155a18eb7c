//! Test utilities: fixture races, registries and synthetic fields
//!
//! Shared by unit tests, the integration tests under `tests/` and the
//! criterion benches.

#![cfg(any(test, feature = "benchmark"))]

use std::path::PathBuf;

use crate::config::RaceConfig;
use crate::race::Race;
use crate::registry::{RegistryEntry, RiderRegistry};
use crate::types::{Rider, RiderTable, Tod};

/// Directory holding the YAML fixtures.
pub fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("data")
}

/// Resolve a fixture file under [`fixture_dir`].
pub fn fixture_path(name: &str) -> PathBuf {
    fixture_dir().join(name)
}

fn entry(bib: &str, first: &str, last: &str, category: &str, refid: Option<&str>) -> RegistryEntry {
    RegistryEntry {
        bib: bib.to_string(),
        first: first.to_string(),
        last: last.to_string(),
        club: String::new(),
        category: category.to_string(),
        refid: refid.map(str::to_string),
    }
}

/// Small registry with two categories and a spare bike tag.
pub fn registry() -> RiderRegistry {
    RiderRegistry::from_entries([
        entry("1", "Cadel", "Evans", "A", Some("t001")),
        entry("2", "Robbie", "McEwen", "A", Some("t002")),
        entry("3", "Stuart", "O'Grady", "A", Some("t003")),
        entry("4", "Baden", "Cooke", "A", Some("t004")),
        entry("12", "Ann", "Smith", "a", None),
        entry("21", "Kathy", "Watt", "B", Some("t021")),
        entry("22", "Anna", "Wilson", "B", Some("t022")),
        entry("900", "Spare", "", "SPARE", Some("spare1")),
    ])
}

/// Criterium with an untargeted category A and category B on 3 laps.
pub fn crit_config() -> RaceConfig {
    RaceConfig::from_yaml(
        r#"
title: Club Crit
race_type: crit
min_lap: 30
categories:
  - id: A
  - id: B
    target_laps: 3
"#,
    )
    .expect("crit fixture config")
}

/// Race started at zero with the given riders, default config.
pub fn running_race(bibs: &[&str]) -> Race {
    running_race_with(RaceConfig::default(), bibs)
}

pub fn running_race_with(config: RaceConfig, bibs: &[&str]) -> Race {
    let mut race = Race::new(config, registry());
    for bib in bibs {
        race.add_rider(bib).expect("fixture rider");
    }
    race.arm_start().expect("arm start");
    race.start_trigger(Tod::ZERO);
    race.take_announcements();
    race
}

/// Synthetic field of `n` finished riders, one second apart in pairs.
pub fn finished_field(n: usize) -> RiderTable {
    (0..n)
        .map(|i| {
            let mut rider = Rider::new((i + 1).to_string()).with_category(if i % 2 == 0 { "A" } else { "B" });
            rider.laps = 10;
            rider.finish = Some(Tod::from_millis(3_600_000 + (i as i64 / 2) * 1500));
            rider.passings = (1..=10).map(|lap| Tod::from_secs(lap * 360)).collect();
            rider
        })
        .collect()
}

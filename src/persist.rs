//! Saved race state
//!
//! [`SavedRace`] is the field set that must survive a restart: places,
//! intermediate places, the clock, comments and every rider row. It is
//! written as YAML; the file helpers add path context with `anyhow`.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::Result;
use crate::clock::TimerStatus;
use crate::places::PlacesLedger;
use crate::race::Race;
use crate::types::{Rider, RiderTable, Tod};

/// Persisted race state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SavedRace {
    pub places: String,
    pub intermediates: BTreeMap<String, String>,
    pub comments: Vec<String>,
    pub time_limit: Option<String>,
    pub timer: SavedClock,
    pub riders: Vec<Rider>,
}

/// Clock fields of a saved race.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SavedClock {
    pub status: Option<TimerStatus>,
    pub start: Option<Tod>,
    pub finish: Option<Tod>,
    pub lap_start: Option<Tod>,
    pub lap_finish: Option<Tod>,
    pub cur_lap: u32,
    pub on_lap: u32,
    pub total_laps: Option<u32>,
    pub lap_times: Vec<Tod>,
    pub category_laps: BTreeMap<String, u32>,
}

impl SavedRace {
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read race file {}", path.display()))?;
        let saved = Self::from_yaml(&text)
            .with_context(|| format!("Failed to parse race file {}", path.display()))?;
        debug!("Loaded {} riders from {}", saved.riders.len(), path.display());
        Ok(saved)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let yaml = self.to_yaml().context("Failed to serialize race")?;
        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write race file {}", path.display()))?;
        info!("Race saved to {}", path.display());
        Ok(())
    }
}

impl Race {
    pub fn save(&self) -> SavedRace {
        let clock = &self.clock;
        SavedRace {
            places: self.places.to_string(),
            intermediates: self.intermediates.iter().map(|(id, l)| (id.clone(), l.to_string())).collect(),
            comments: self.comments.clone(),
            time_limit: self.recalc.time_limit().map(str::to_string),
            timer: SavedClock {
                status: Some(clock.status),
                start: clock.start,
                finish: clock.finish,
                lap_start: clock.lap_start,
                lap_finish: clock.lap_finish,
                cur_lap: clock.cur_lap,
                on_lap: clock.on_lap,
                total_laps: clock.total_laps,
                lap_times: clock.lap_times.clone(),
                category_laps: clock.cat_on_lap.clone(),
            },
            riders: self.riders.iter().cloned().collect(),
        }
    }

    /// Replace the race state with a saved one and mark it for recalculation.
    ///
    /// Riders repeated in the saved list keep their first row.
    pub fn restore(&mut self, saved: SavedRace) {
        self.places = PlacesLedger::parse(&saved.places);
        for (id, places) in saved.intermediates {
            self.intermediates.insert(id, PlacesLedger::parse(&places));
        }
        self.comments = saved.comments;
        if saved.time_limit.is_some() {
            self.recalc.set_time_limit(saved.time_limit);
        }

        let timer = saved.timer;
        let clock = &mut self.clock;
        clock.reset();
        clock.start = timer.start;
        clock.finish = timer.finish;
        clock.lap_start = timer.lap_start;
        clock.lap_finish = timer.lap_finish;
        clock.cur_lap = timer.cur_lap;
        clock.on_lap = timer.on_lap;
        clock.set_total_laps(timer.total_laps.or(self.config.total_laps()));
        clock.lap_times = timer.lap_times;
        clock.cat_on_lap = timer.category_laps;
        clock.status = match timer.status {
            Some(status) => status,
            None if timer.start.is_some() => TimerStatus::Running,
            None => TimerStatus::Idle,
        };

        self.riders = saved.riders.into_iter().collect::<RiderTable>();
        info!("Restored {} riders, timer {}", self.riders.len(), self.clock.status());
        self.mark_dirty();
        self.reannounce_times();
    }
}

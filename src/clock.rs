//! Race clock: timer status, start/finish and lap instants
//!
//! ```text
//!            arm_start            first event / trigger        arm_finish
//!   Idle ───────────────► ArmStart ──────────────────► Running ◄──────────► ArmFinish
//!    │ ▲                     │                            ▲                    │
//!    │ └─────────────────────┘ arm_start (disarm)         │ arm_start          │ set_finished
//!    ▼ set_ready                                          │                    ▼
//!  Ready ─────────────────────────────────────────────────┘                Finished
//! ```
//!
//! The clock only records instants and enforces the transitions; what a
//! passing means for laps and places is decided in [`crate::laps`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, info};

use crate::types::Tod;
use crate::{RaceError, Result};

const MILLIS_PER_DAY: u128 = 86_400_000;

/// Source of the current time of day.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Tod;
}

/// Wall clock time of day (UTC).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Tod {
        let ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Tod::from_millis((ms % MILLIS_PER_DAY) as i64)
    }
}

/// Time source set by hand, for replays and tests.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    ms: AtomicI64,
}

impl ManualTimeSource {
    pub fn new(initial: Tod) -> Self {
        Self { ms: AtomicI64::new(initial.as_millis()) }
    }

    pub fn set(&self, now: Tod) {
        self.ms.store(now.as_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Tod) {
        self.ms.fetch_add(by.as_millis(), Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Tod {
        Tod::from_millis(self.ms.load(Ordering::SeqCst))
    }
}

/// Timer status of the race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    #[default]
    Idle,
    Ready,
    ArmStart,
    Running,
    ArmFinish,
    Finished,
}

impl TimerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TimerStatus::Idle => "idle",
            TimerStatus::Ready => "ready",
            TimerStatus::ArmStart => "armstart",
            TimerStatus::Running => "running",
            TimerStatus::ArmFinish => "armfinish",
            TimerStatus::Finished => "finished",
        }
    }

    /// Whether passings are accepted in this status.
    pub fn accepts_passings(self) -> bool {
        !matches!(self, TimerStatus::Idle | TimerStatus::Ready | TimerStatus::ArmStart)
    }
}

impl fmt::Display for TimerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an arm-start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmStartOutcome {
    /// Waiting for the start trigger; category lap counters were reset
    Armed,
    /// Start disarmed before any event arrived
    Disarmed,
    /// Ready timer moved straight to running
    Running,
}

/// Start, finish and lap instants plus the timer status.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimingClock {
    pub(crate) status: TimerStatus,
    pub(crate) start: Option<Tod>,
    pub(crate) finish: Option<Tod>,
    pub(crate) lap_start: Option<Tod>,
    pub(crate) lap_finish: Option<Tod>,
    /// Lap the leaders are racing, zero before the first lap is armed
    pub(crate) cur_lap: u32,
    /// Lap count shown on the scoreboard
    pub(crate) on_lap: u32,
    pub(crate) total_laps: Option<u32>,
    pub(crate) cat_on_lap: BTreeMap<String, u32>,
    pub(crate) lap_times: Vec<Tod>,
    /// Auxiliary finish impulse channel armed
    pub(crate) aux_armed: bool,
}

impl TimingClock {
    pub fn new(total_laps: Option<u32>) -> Self {
        Self { total_laps: total_laps.filter(|&n| n > 0), ..Self::default() }
    }

    pub fn status(&self) -> TimerStatus {
        self.status
    }

    pub fn start(&self) -> Option<Tod> {
        self.start
    }

    pub fn finish(&self) -> Option<Tod> {
        self.finish
    }

    pub fn lap_start(&self) -> Option<Tod> {
        self.lap_start
    }

    pub fn lap_finish(&self) -> Option<Tod> {
        self.lap_finish
    }

    pub fn current_lap(&self) -> u32 {
        self.cur_lap
    }

    pub fn on_lap(&self) -> u32 {
        self.on_lap
    }

    pub fn total_laps(&self) -> Option<u32> {
        self.total_laps
    }

    pub fn lap_times(&self) -> &[Tod] {
        &self.lap_times
    }

    pub fn category_on_lap(&self, category: &str) -> Option<u32> {
        self.cat_on_lap.get(category).copied()
    }

    pub fn aux_armed(&self) -> bool {
        self.aux_armed
    }

    pub fn set_total_laps(&mut self, total: Option<u32>) {
        self.total_laps = total.filter(|&n| n > 0);
    }

    /// Operator override of the current lap.
    pub fn set_current_lap(&mut self, lap: u32) {
        self.cur_lap = lap;
    }

    pub fn set_ready(&mut self) -> Result<()> {
        if self.status != TimerStatus::Idle {
            return Err(RaceError::invalid_transition("set ready", self.status));
        }
        self.status = TimerStatus::Ready;
        Ok(())
    }

    pub fn arm_start(&mut self) -> Result<ArmStartOutcome> {
        match self.status {
            TimerStatus::Idle => {
                self.status = TimerStatus::ArmStart;
                Ok(ArmStartOutcome::Armed)
            }
            TimerStatus::ArmStart => {
                self.status = TimerStatus::Idle;
                Ok(ArmStartOutcome::Disarmed)
            }
            TimerStatus::Ready => {
                self.status = TimerStatus::Running;
                Ok(ArmStartOutcome::Running)
            }
            other => Err(RaceError::invalid_transition("arm start", other)),
        }
    }

    /// Restart every listed category at lap zero.
    pub fn reset_category_laps<I, S>(&mut self, categories: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut changed = false;
        for cat in categories {
            self.cat_on_lap.insert(cat.into(), 0);
            changed = true;
        }
        changed
    }

    /// Apply a start trigger; only an armed start takes it.
    pub fn start_trigger(&mut self, at: Tod) -> bool {
        if self.status == TimerStatus::ArmStart {
            info!("Start trigger: {}", at);
            self.set_start(Some(at));
            true
        } else {
            debug!("Start trigger ignored in {} status", self.status);
            false
        }
    }

    /// Set or clear the race start; resets the lap state.
    pub fn set_start(&mut self, start: Option<Tod>) {
        self.lap_start = None;
        self.lap_finish = None;
        self.start = start;
        if start.is_some() {
            self.cur_lap = 0;
            self.on_lap = 1;
            if self.finish.is_none() {
                self.status = TimerStatus::Running;
            }
        }
    }

    /// Set or clear the race finish. A finish without a start forces the
    /// start to zero.
    pub fn set_finish(&mut self, finish: Option<Tod>) {
        self.finish = finish;
        match finish {
            None => {
                if self.start.is_some() {
                    self.status = TimerStatus::Running;
                }
            }
            Some(_) => {
                if self.start.is_none() {
                    self.set_start(Some(Tod::ZERO));
                }
            }
        }
    }

    /// Toggle finish arming. Returns true when armed.
    pub fn arm_finish(&mut self) -> Result<bool> {
        match self.status {
            TimerStatus::Ready | TimerStatus::Running | TimerStatus::Finished => {
                self.status = TimerStatus::ArmFinish;
                self.aux_armed = true;
                Ok(true)
            }
            TimerStatus::ArmFinish => {
                self.status = TimerStatus::Running;
                self.aux_armed = false;
                Ok(false)
            }
            other => Err(RaceError::invalid_transition("arm finish", other)),
        }
    }

    /// Whether a lap should be armed before the finish is armed.
    pub fn lap_pending_before_finish(&self) -> bool {
        match self.total_laps {
            Some(total) => self.cur_lap > 0 && self.cur_lap < total,
            None => true,
        }
    }

    pub fn set_finished(&mut self, now: Tod) -> Result<()> {
        if self.status != TimerStatus::ArmFinish {
            return Err(RaceError::invalid_transition("confirm finish", self.status));
        }
        self.status = TimerStatus::Finished;
        self.aux_armed = false;
        if self.finish.is_none() {
            self.set_finish(Some(now));
        }
        Ok(())
    }

    /// Consume the one-shot auxiliary impulse if armed.
    pub fn take_aux_impulse(&mut self) -> bool {
        std::mem::replace(&mut self.aux_armed, false)
    }

    pub fn reset(&mut self) {
        self.aux_armed = false;
        self.set_finish(None);
        self.set_start(None);
        self.status = TimerStatus::Idle;
        self.cur_lap = 0;
        self.on_lap = 0;
        self.lap_times.clear();
    }

    /// Record the leader crossing the line at the end of a lap.
    pub fn set_lap_finish(&mut self, at: Tod) {
        self.lap_times.push(at);
        self.lap_finish = Some(at);
        self.on_lap += 1;
    }

    /// Whole seconds since the start while the race is not finished.
    pub fn elapsed(&self, now: Tod) -> Option<Tod> {
        match (self.start, self.status) {
            (_, TimerStatus::Finished) => None,
            (Some(start), _) => Some((now - start).truncate()),
            (None, _) => None,
        }
    }
}

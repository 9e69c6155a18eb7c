//! Lap arming and routing of accepted passings
//!
//! Two counting regimes exist side by side:
//!
//! - **Target laps**: a category with a lap target counts each rider's own
//!   passings; a rider on `target - 1` laps is on the finish path and the
//!   category on-lap counter follows the furthest rider.
//! - **Leader laps**: all other riders are counted against the race lap
//!   the operator arms. The first rider on the previous lap to cross an
//!   armed line is the lap leader and records the lap finish; riders seen
//!   later are pulled onto the current lap.
//!
//! Routing works on a passing the [`crate::ingest::PassingIngestor`] has
//! already accepted.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};

use crate::clock::{TimerStatus, TimingClock};
use crate::config::RaceConfig;
use crate::types::{Rider, RiderStatus, Tod};

/// Lap armed by [`LapStateMachine::arm_lap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmedLap {
    pub lap: u32,
    /// Scoreboard lap label, absent once the finish is armed
    pub label: Option<String>,
    pub sprint: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArmLap {
    /// Race not underway; only the times are re-announced
    TimesOnly,
    Armed(ArmedLap),
}

/// Classification of a routed passing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LapOutcome {
    /// Rider crossed the finish; raw finish recorded
    Finished,
    /// Placed or withdrawn rider crossed the finish
    FinishIgnored,
    DuplicateFinish,
    /// Rider recorded a lap finish as the leader
    NewLeader,
    /// Rider counted on the current lap
    OnLap,
    /// Lap counted, rider not on the lead lap
    Counted,
    PreviousLap,
    Mismatch,
    /// No lap effect in the current timer status
    NoLapEffect,
}

/// Side effects to announce after routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LapEvent {
    RaceFinish(Tod),
    LapFinish { at: Tod, on_lap: u32 },
    LapArmed(ArmedLap),
    CategoryLap { category: String, lap: u32 },
    RiderSeen { at: Tod },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LapRouting {
    pub outcome: LapOutcome,
    pub events: Vec<LapEvent>,
    /// Results need recalculating
    pub dirty: bool,
}

impl LapRouting {
    fn new(outcome: LapOutcome) -> Self {
        Self { outcome, events: Vec::new(), dirty: false }
    }
}

/// Lap labels and routing rules for one race.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LapStateMachine {
    pass_threshold: Tod,
    sprint_laps: BTreeSet<u32>,
    pass_labels: BTreeMap<u32, String>,
}

impl LapStateMachine {
    pub fn new(pass_threshold: Tod) -> Self {
        Self { pass_threshold, ..Self::default() }
    }

    pub fn from_config(config: &RaceConfig) -> Self {
        Self {
            pass_threshold: config.pass_threshold(),
            sprint_laps: config.sprint_laps.iter().copied().collect(),
            pass_labels: config.pass_labels.clone(),
        }
    }

    pub fn with_sprint_laps(mut self, laps: impl IntoIterator<Item = u32>) -> Self {
        self.sprint_laps = laps.into_iter().collect();
        self
    }

    pub fn with_pass_label(mut self, lap: u32, label: impl Into<String>) -> Self {
        self.pass_labels.insert(lap, label.into());
        self
    }

    pub fn is_sprint_lap(&self, lap: u32) -> bool {
        self.sprint_laps.contains(&lap)
    }

    /// Arm the next lap. The lap only advances when none is running yet or
    /// the previous lap has a recorded finish.
    pub fn arm_lap(&self, clock: &mut TimingClock) -> ArmLap {
        info!("Arming lap");
        if matches!(clock.status, TimerStatus::Idle | TimerStatus::ArmStart) {
            return ArmLap::TimesOnly;
        }

        if clock.cur_lap == 0 || clock.lap_finish.is_some() {
            clock.cur_lap += 1;
            if let Some(total) = clock.total_laps {
                if clock.cur_lap > total {
                    info!("Too many laps");
                    clock.cur_lap = total;
                }
            }
            if clock.on_lap != clock.cur_lap {
                debug!("Cur/on lap mismatch fixed: {} -> {}", clock.on_lap, clock.cur_lap);
                clock.on_lap = clock.cur_lap;
            }
        }

        let mut armed = ArmedLap { lap: clock.cur_lap, label: None, sprint: false };
        if !matches!(clock.status, TimerStatus::ArmFinish | TimerStatus::Finished) {
            clock.lap_start = clock.lap_finish.or(clock.lap_start).or(clock.start);
            armed.label = Some(match clock.total_laps {
                Some(total) => format!("Lap {}/{}", clock.on_lap, total),
                None => match self.pass_labels.get(&clock.cur_lap) {
                    Some(label) => format!("At {label}"),
                    None => format!("Lap {}", clock.on_lap),
                },
            });
            armed.sprint = self.is_sprint_lap(clock.cur_lap);
            clock.lap_finish = None;
        }
        ArmLap::Armed(armed)
    }

    /// Route an accepted passing to the finish or lapping path.
    ///
    /// `target` is the lap target of the rider's category.
    pub fn route_passing(
        &self,
        clock: &mut TimingClock,
        rider: &mut Rider,
        at: Tod,
        target: Option<u32>,
    ) -> LapRouting {
        let cat_finish = target.is_some_and(|t| rider.laps + 1 >= t);
        if clock.status == TimerStatus::ArmFinish || cat_finish {
            self.finish_path(clock, rider, at, cat_finish)
        } else if clock.status == TimerStatus::Running {
            self.lapping_path(clock, rider, at, target)
        } else {
            LapRouting::new(LapOutcome::NoLapEffect)
        }
    }

    fn finish_path(
        &self,
        clock: &mut TimingClock,
        rider: &mut Rider,
        at: Tod,
        cat_finish: bool,
    ) -> LapRouting {
        let mut routing = LapRouting::new(LapOutcome::Finished);
        if clock.finish.is_none() {
            clock.set_finish(Some(at));
            routing.events.push(LapEvent::RaceFinish(at));
        }

        if rider.finish.is_some() {
            info!(bib = %rider.bib, "Duplicate finish @ {}", at.timestr(2));
            routing.outcome = LapOutcome::DuplicateFinish;
            return routing;
        }

        if rider.status == RiderStatus::Withdrawn {
            warn!(bib = %rider.bib, "Withdrawn rider seen at finish @ {}", at.timestr(2));
            routing.outcome = LapOutcome::FinishIgnored;
            return routing;
        }

        if rider.place.is_none() {
            rider.finish = Some(at);
            routing.dirty = true;
        } else {
            error!(bib = %rider.bib, "Placed rider seen at finish @ {}", at.timestr(2));
            routing.outcome = LapOutcome::FinishIgnored;
        }

        if rider.in_race {
            if !cat_finish && clock.cur_lap > 0 {
                rider.laps = clock.cur_lap;
            } else {
                rider.laps += 1;
                let category = rider.category_key();
                if let Some(on_lap) = clock.cat_on_lap.get_mut(&category) {
                    if rider.laps > *on_lap {
                        *on_lap = rider.laps;
                        routing.events.push(LapEvent::CategoryLap { category, lap: rider.laps });
                    }
                }
            }
            if clock.lap_finish.is_none() {
                clock.set_lap_finish(at);
                routing.events.push(LapEvent::LapFinish { at, on_lap: clock.on_lap });
            }
            routing.events.push(LapEvent::RiderSeen { at });
        }
        routing
    }

    fn lapping_path(
        &self,
        clock: &mut TimingClock,
        rider: &mut Rider,
        at: Tod,
        target: Option<u32>,
    ) -> LapRouting {
        let mut routing = LapRouting::new(LapOutcome::NoLapEffect);
        routing.dirty = true;
        if !rider.in_race {
            return routing;
        }

        if target.is_some() {
            rider.laps += 1;
            let category = rider.category_key();
            let cat_lap = clock.cat_on_lap.entry(category.clone()).or_insert(0);
            // a rider taking the category onto a new lap only moves the counter
            routing.outcome = if rider.laps > *cat_lap {
                *cat_lap = rider.laps;
                routing.events.push(LapEvent::CategoryLap { category, lap: rider.laps });
                LapOutcome::Counted
            } else if rider.laps == *cat_lap {
                LapOutcome::OnLap
            } else {
                LapOutcome::Counted
            };
        } else if let Some(lap_start) = clock.lap_finish {
            if at < lap_start {
                info!(bib = %rider.bib, "Passing from previous lap {} < {}", at.timestr(2), lap_start.timestr(2));
                routing.outcome = LapOutcome::PreviousLap;
            } else if at < lap_start + self.pass_threshold || rider.laps < clock.cur_lap {
                rider.laps = clock.cur_lap;
                routing.outcome = LapOutcome::OnLap;
            } else if rider.laps == clock.cur_lap {
                if let ArmLap::Armed(armed) = self.arm_lap(clock) {
                    routing.events.push(LapEvent::LapArmed(armed));
                }
                clock.set_lap_finish(at);
                routing.events.push(LapEvent::LapFinish { at, on_lap: clock.on_lap });
                rider.laps = clock.cur_lap;
                routing.outcome = LapOutcome::NewLeader;
            } else {
                info!(bib = %rider.bib, "Rider lap number mismatch: {} <=> {}", rider.laps, clock.cur_lap);
                routing.outcome = LapOutcome::Mismatch;
            }
        } else if clock.cur_lap > 0 && rider.laps + 1 == clock.cur_lap {
            clock.set_lap_finish(at);
            routing.events.push(LapEvent::LapFinish { at, on_lap: clock.on_lap });
            rider.laps = clock.cur_lap;
            routing.outcome = LapOutcome::NewLeader;
        } else {
            rider.laps += 1;
            routing.outcome = LapOutcome::Counted;
        }

        if matches!(routing.outcome, LapOutcome::OnLap | LapOutcome::NewLeader) {
            routing.events.push(LapEvent::RiderSeen { at });
        }
        routing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(total: Option<u32>) -> TimingClock {
        let mut clock = TimingClock::new(total);
        clock.arm_start().unwrap();
        clock.start_trigger(Tod::ZERO);
        clock
    }

    fn machine() -> LapStateMachine {
        LapStateMachine::new(Tod::from_secs(30))
    }

    #[test]
    fn arm_lap_idle_only_announces() {
        let mut clock = TimingClock::new(Some(5));
        assert_eq!(machine().arm_lap(&mut clock), ArmLap::TimesOnly);
        assert_eq!(clock.current_lap(), 0);
    }

    #[test]
    fn arm_lap_labels() {
        let mut clock = running(Some(5));
        let laps = machine().with_sprint_laps([1]);
        match laps.arm_lap(&mut clock) {
            ArmLap::Armed(armed) => {
                assert_eq!(armed.lap, 1);
                assert_eq!(armed.label.as_deref(), Some("Lap 1/5"));
                assert!(armed.sprint);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(clock.lap_start(), Some(Tod::ZERO));

        let mut clock = running(None);
        let laps = machine().with_pass_label(1, "Summit");
        match laps.arm_lap(&mut clock) {
            ArmLap::Armed(armed) => assert_eq!(armed.label.as_deref(), Some("At Summit")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn arm_lap_waits_for_lap_finish() {
        let mut clock = running(Some(5));
        let laps = machine();
        laps.arm_lap(&mut clock);
        laps.arm_lap(&mut clock);
        assert_eq!(clock.current_lap(), 1);
        clock.set_lap_finish(Tod::from_secs(300));
        laps.arm_lap(&mut clock);
        assert_eq!(clock.current_lap(), 2);
        assert_eq!(clock.lap_start(), Some(Tod::from_secs(300)));
    }

    #[test]
    fn arm_lap_clamps_to_total() {
        let mut clock = running(Some(1));
        let laps = machine();
        laps.arm_lap(&mut clock);
        clock.set_lap_finish(Tod::from_secs(300));
        laps.arm_lap(&mut clock);
        assert_eq!(clock.current_lap(), 1);
    }

    #[test]
    fn first_rider_on_previous_lap_leads() {
        let mut clock = running(Some(5));
        let laps = machine();
        laps.arm_lap(&mut clock);

        let mut leader = Rider::new("1");
        let routing = laps.route_passing(&mut clock, &mut leader, Tod::from_secs(300), None);
        assert_eq!(routing.outcome, LapOutcome::NewLeader);
        assert_eq!(leader.laps, 1);
        assert_eq!(clock.lap_finish(), Some(Tod::from_secs(300)));
        assert_eq!(clock.on_lap(), 2);

        // folded onto the current lap inside the threshold
        let mut chaser = Rider::new("2");
        let routing = laps.route_passing(&mut clock, &mut chaser, Tod::from_secs(310), None);
        assert_eq!(routing.outcome, LapOutcome::OnLap);
        assert_eq!(chaser.laps, 1);

        // previous lap
        let mut late = Rider::new("3");
        let routing = laps.route_passing(&mut clock, &mut late, Tod::from_secs(290), None);
        assert_eq!(routing.outcome, LapOutcome::PreviousLap);
    }

    #[test]
    fn rider_on_current_lap_becomes_new_leader() {
        let mut clock = running(Some(5));
        let laps = machine();
        laps.arm_lap(&mut clock);
        let mut rider = Rider::new("1");
        laps.route_passing(&mut clock, &mut rider, Tod::from_secs(300), None);

        let routing = laps.route_passing(&mut clock, &mut rider, Tod::from_secs(600), None);
        assert_eq!(routing.outcome, LapOutcome::NewLeader);
        assert!(routing.events.iter().any(|e| matches!(e, LapEvent::LapArmed(a) if a.lap == 2)));
        assert_eq!(rider.laps, 2);
        assert_eq!(clock.current_lap(), 2);
    }

    #[test]
    fn unarmed_laps_boost_riders() {
        let mut clock = running(Some(5));
        let mut rider = Rider::new("1");
        let routing = machine().route_passing(&mut clock, &mut rider, Tod::from_secs(300), None);
        assert_eq!(routing.outcome, LapOutcome::Counted);
        assert_eq!(rider.laps, 1);
        assert!(routing.dirty);
    }

    #[test]
    fn target_regime_finishes_once() {
        let mut clock = running(Some(10));
        clock.reset_category_laps(["B"]);
        let laps = machine();
        let mut rider = Rider::new("5").with_category("b");
        rider.laps = 4;

        let routing = laps.route_passing(&mut clock, &mut rider, Tod::from_secs(1500), Some(5));
        assert_eq!(routing.outcome, LapOutcome::Finished);
        assert_eq!(rider.finish, Some(Tod::from_secs(1500)));
        assert_eq!(rider.laps, 5);
        assert_eq!(clock.category_on_lap("B"), Some(5));
        assert!(routing.events.contains(&LapEvent::RaceFinish(Tod::from_secs(1500))));

        let again = laps.route_passing(&mut clock, &mut rider, Tod::from_secs(1800), Some(5));
        assert_eq!(again.outcome, LapOutcome::DuplicateFinish);
        assert_eq!(rider.finish, Some(Tod::from_secs(1500)));
    }

    #[test]
    fn target_regime_counts_laps() {
        let mut clock = running(None);
        let laps = machine();
        let mut rider = Rider::new("5").with_category("B");
        let routing = laps.route_passing(&mut clock, &mut rider, Tod::from_secs(300), Some(5));
        assert_eq!(routing.outcome, LapOutcome::Counted);
        assert_eq!(routing.events, vec![LapEvent::CategoryLap { category: "B".to_string(), lap: 1 }]);
        assert_eq!(clock.category_on_lap("B"), Some(1));

        let mut other = Rider::new("6").with_category("B");
        let routing = laps.route_passing(&mut clock, &mut other, Tod::from_secs(320), Some(5));
        assert_eq!(routing.outcome, LapOutcome::OnLap);
        assert_eq!(routing.events, vec![LapEvent::RiderSeen { at: Tod::from_secs(320) }]);
        assert_eq!(other.laps, 1);
        assert_eq!(clock.category_on_lap("B"), Some(1));

        // a lapped rider is counted without an announcement
        let mut lapped = Rider::new("7").with_category("B");
        clock.cat_on_lap.insert("B".to_string(), 3);
        let routing = laps.route_passing(&mut clock, &mut lapped, Tod::from_secs(900), Some(5));
        assert_eq!(routing.outcome, LapOutcome::Counted);
        assert!(routing.events.is_empty());
    }

    #[test]
    fn armed_finish_takes_leader_lap() {
        let mut clock = running(Some(3));
        let laps = machine();
        laps.arm_lap(&mut clock);
        clock.cur_lap = 3;
        clock.arm_finish().unwrap();

        let mut rider = Rider::new("9");
        let routing = laps.route_passing(&mut clock, &mut rider, Tod::from_secs(3600), None);
        assert_eq!(routing.outcome, LapOutcome::Finished);
        assert_eq!(rider.laps, 3);
        assert_eq!(clock.finish(), Some(Tod::from_secs(3600)));
    }

    #[test]
    fn placed_or_withdrawn_riders_do_not_take_a_finish() {
        let mut clock = running(None);
        clock.arm_finish().unwrap();
        let laps = machine();

        let mut placed = Rider::new("1");
        placed.place = Some(1);
        let routing = laps.route_passing(&mut clock, &mut placed, Tod::from_secs(900), None);
        assert_eq!(routing.outcome, LapOutcome::FinishIgnored);
        assert_eq!(placed.finish, None);

        let mut withdrawn = Rider::new("2");
        withdrawn.status = RiderStatus::Withdrawn;
        let routing = laps.route_passing(&mut clock, &mut withdrawn, Tod::from_secs(901), None);
        assert_eq!(routing.outcome, LapOutcome::FinishIgnored);
        assert_eq!(withdrawn.finish, None);
    }
}

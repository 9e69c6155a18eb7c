//! Result recalculation pipeline
//!
//! A full recompute of places, awards, order, bunch times, race status and
//! time-limit cutoffs from the current rider rows and places ledger. Every
//! step only writes derived fields, so running the pipeline twice yields
//! the same rows.
//!
//! | step | writes |
//! |------|--------|
//! | [`reset_places`] | rider places |
//! | [`assign_finish`] | rider places from the ledger |
//! | contests | the [`TallyBoard`] |
//! | [`sort_rough`] | row order |
//! | [`assign_bunches`] | computed bunch, race finish |
//! | [`sort_final`] | row order |
//! | [`apply_limits`] | otl status, race status |

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

use crate::clock::{TimerStatus, TimingClock};
use crate::config::RaceConfig;
use crate::contest::{ContestInputs, ContestTallyEngine, TallyBoard};
use crate::places::{PLACEHOLDER, PlacesLedger};
use crate::types::{Rider, RiderStatus, RiderTable, Tod};
use crate::{RaceError, Result};

/// Riders placed before a result counts as provisional in a large field.
const PROVISIONAL_PLACED: usize = 10;

/// Field size below which any placed rider makes the result provisional.
const SMALL_FIELD: usize = 20;

/// Standing of the result as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaceStatus {
    #[default]
    Prerace,
    Virtual,
    Provisional,
    Final,
}

impl fmt::Display for RaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RaceStatus::Prerace => "prerace",
            RaceStatus::Virtual => "virtual",
            RaceStatus::Provisional => "provisional",
            RaceStatus::Final => "final",
        };
        f.write_str(s)
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecalcSummary {
    pub race_status: RaceStatus,
    /// Bunch time of the first finisher
    pub winner_bunch: Option<Tod>,
    /// Elapsed time over which unplaced riders are outside the limit
    pub time_limit: Option<Tod>,
    pub race_finish: Option<Tod>,
    pub placed: usize,
    pub handled: usize,
    pub total: usize,
}

/// Clear every rider's place.
pub fn reset_places(riders: &mut RiderTable) {
    for rider in riders.iter_mut() {
        rider.place = None;
    }
}

/// Copy ledger ranks onto in-race riders.
///
/// Rank is one more than the number of in-race riders placed before the
/// group, so a dead heat shares a rank and the next group skips ahead.
pub fn assign_finish(riders: &mut RiderTable, places: &PlacesLedger) {
    let mut seen = HashSet::new();
    let mut idx = 0u32;
    for group in places.groups() {
        let rank = idx + 1;
        for bib in group {
            if !seen.insert(bib.clone()) {
                warn!(bib = %bib, "Duplicate no. in finish places");
                continue;
            }
            if bib.as_str() == PLACEHOLDER {
                idx += 1;
                continue;
            }
            match riders.get_mut(bib.as_str()) {
                Some(rider) if rider.in_race => {
                    idx += 1;
                    rider.place = Some(rank);
                }
                Some(_) => warn!(bib = %bib, "DNF rider in finish places"),
                None => warn!(bib = %bib, "Unknown rider in finish places"),
            }
        }
    }
}

fn none_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn rough_order(a: &Rider, b: &Rider) -> Ordering {
    b.in_race
        .cmp(&a.in_race)
        .then_with(|| none_last(a.place, b.place))
        .then_with(|| none_last(a.finish, b.finish))
        .then_with(|| b.laps.cmp(&a.laps))
        .then_with(|| {
            let last = |r: &Rider| r.last_passing().unwrap_or(Tod::ZERO);
            last(a).cmp(&last(b))
        })
        .then_with(|| a.bib.cmp(&b.bib))
}

fn final_order(a: &Rider, b: &Rider) -> Ordering {
    b.in_race.cmp(&a.in_race).then_with(|| {
        if a.in_race {
            none_last(a.place, b.place)
                .then_with(|| none_last(a.effective_bunch(), b.effective_bunch()))
        } else {
            a.status
                .precedence()
                .cmp(&b.status.precedence())
                .then_with(|| a.bib.cmp(&b.bib))
        }
    })
}

/// In race first, then place, raw finish, laps, oldest last passing and
/// bib. The order never depends on the previous row order.
pub fn sort_rough(riders: &mut RiderTable) {
    riders.sort_by(rough_order);
}

/// In race first, then place and effective bunch; riders out of the race
/// by status then bib. Stable over the rough order.
pub fn sort_final(riders: &mut RiderTable) {
    riders.sort_by(final_order);
}

/// Running state of the bunch pass.
#[derive(Debug, Default)]
struct BunchScan {
    first: Option<Tod>,
    last: Option<Tod>,
    current: Option<Tod>,
    race_finish: Option<Tod>,
}

/// Compute bunch times over riders in finish order.
///
/// Returns the first bunch time (winner's elapsed) and the raw finish of
/// the first timed rider.
pub fn assign_bunches(riders: &mut RiderTable, start: Tod, gap: Tod) -> (Option<Tod>, Option<Tod>) {
    let mut scan = BunchScan::default();
    for rider in riders.iter_mut() {
        if !(rider.in_race || rider.status == RiderStatus::OutsideTimeLimit) {
            continue;
        }
        if let Some(manual) = rider.manual_bunch {
            scan.current = Some(manual);
            rider.bunch = Some(manual);
            scan.first.get_or_insert(manual);
            scan.last = Some(manual);
        } else if let Some(finish) = rider.finish {
            let elapsed = finish - start;
            match (scan.first, scan.last) {
                (Some(_), Some(last)) if elapsed < last || elapsed - last < gap => {}
                (Some(_), _) => scan.current = Some(elapsed.truncate()),
                (None, _) => {
                    scan.race_finish = Some(finish);
                    scan.first = Some(elapsed.truncate());
                    scan.current = scan.first;
                }
            }
            rider.bunch = scan.current;
            scan.last = Some(elapsed);
        } else if rider.place.is_some() {
            rider.bunch = scan.current;
        } else {
            rider.bunch = None;
        }
    }
    (scan.first, scan.race_finish)
}

/// Decode a time limit against the winner's elapsed time.
///
/// Accepts `h:mm:ss` (a bunch time, or a down time when shorter than the
/// winner), `+m:ss` (down time) and `N%` (fraction of the winner's time).
/// The result is an elapsed bunch time truncated to whole seconds.
pub fn decode_limit(limit: &str, winner: Option<Tod>) -> Result<Tod> {
    let unparsable = || RaceError::UnparsableTimeLimit { limit: limit.to_string() };
    let mut text = limit.trim().to_string();
    let mut down = false;
    if text.contains('+') {
        down = true;
        text = text.replace('+', "");
    }

    let value = if text.contains('%') {
        down = true;
        let frac: f64 = text.replace('%', "").trim().parse().map_err(|_| unparsable())?;
        winner.ok_or_else(unparsable)?.scale(0.01 * frac)
    } else {
        let value: Tod = text.parse().map_err(|_| unparsable())?;
        if winner.is_some_and(|w| value < w) {
            down = true;
        }
        value
    };

    if down {
        let limit = winner.ok_or_else(unparsable)?.checked_add(value).ok_or_else(unparsable)?;
        Ok(limit.truncate())
    } else {
        Ok(value.truncate())
    }
}

/// Recomputes derived rider fields and the race status.
#[derive(Debug, Clone, Default)]
pub struct ResultRecalculator {
    gap_threshold: Tod,
    time_limit: Option<String>,
}

impl ResultRecalculator {
    pub fn new(gap_threshold: Tod) -> Self {
        Self { gap_threshold, time_limit: None }
    }

    pub fn from_config(config: &RaceConfig) -> Self {
        Self {
            gap_threshold: config.gap_threshold(),
            time_limit: config.time_limit.clone().filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn with_time_limit(mut self, limit: impl Into<String>) -> Self {
        self.time_limit = Some(limit.into());
        self
    }

    pub fn gap_threshold(&self) -> Tod {
        self.gap_threshold
    }

    pub fn time_limit(&self) -> Option<&str> {
        self.time_limit.as_deref()
    }

    pub fn set_time_limit(&mut self, limit: Option<String>) {
        self.time_limit = limit.filter(|t| !t.trim().is_empty());
    }

    /// Run the full pipeline.
    pub fn recalculate(
        &self,
        riders: &mut RiderTable,
        places: &PlacesLedger,
        clock: &mut TimingClock,
        contests: &ContestTallyEngine,
        board: &mut TallyBoard,
        intermediates: &BTreeMap<String, PlacesLedger>,
    ) -> RecalcSummary {
        debug!("Recalculate model");
        reset_places(riders);
        assign_finish(riders, places);
        contests.run(board, &ContestInputs { riders: &*riders, finish: places, intermediates });
        sort_rough(riders);

        let (winner, race_finish) = match clock.start() {
            Some(start) => assign_bunches(riders, start, self.gap_threshold),
            None => (None, None),
        };
        if let Some(finish) = race_finish {
            clock.set_finish(Some(finish));
        }

        sort_final(riders);

        let mut summary = self.apply_limits(riders, clock.status(), winner);
        summary.race_finish = race_finish;
        debug!("Race status: {}", summary.race_status);
        summary
    }

    /// Apply time-limit cutoffs and derive the race status.
    pub fn apply_limits(
        &self,
        riders: &mut RiderTable,
        status: TimerStatus,
        winner: Option<Tod>,
    ) -> RecalcSummary {
        let mut summary = RecalcSummary { total: riders.len(), ..RecalcSummary::default() };
        if status == TimerStatus::Idle {
            return summary;
        }

        if let (Some(text), Some(winner)) = (self.time_limit.as_deref(), winner) {
            match decode_limit(text, Some(winner)) {
                Ok(limit) => {
                    info!("Time limit: {} = {}, +{}", text, limit.timestr(0), (limit - winner).timestr(0));
                    summary.time_limit = Some(limit);
                }
                Err(e) => warn!("{}", e),
            }
        }

        for rider in riders.iter_mut() {
            if !rider.in_race {
                summary.handled += 1;
                continue;
            }
            let bunch = rider.effective_bunch();
            summary.winner_bunch = summary.winner_bunch.or(bunch);
            if rider.place.is_some() {
                summary.placed += 1;
                summary.handled += 1;
            } else if let Some(limit) = summary.time_limit {
                match bunch {
                    Some(bunch) if bunch > limit => rider.status = RiderStatus::OutsideTimeLimit,
                    _ if rider.status == RiderStatus::OutsideTimeLimit => {
                        rider.status = RiderStatus::None
                    }
                    _ => {}
                }
            }
        }

        summary.race_status = if status == TimerStatus::Finished || summary.handled == summary.total {
            RaceStatus::Final
        } else if summary.placed >= PROVISIONAL_PLACED
            || (summary.placed > 0 && summary.total < SMALL_FIELD)
        {
            RaceStatus::Provisional
        } else {
            RaceStatus::Virtual
        };
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn secs(s: i64) -> Tod {
        Tod::from_secs(s)
    }

    fn finishers(times: &[(&str, i64)]) -> RiderTable {
        times
            .iter()
            .map(|(bib, ms)| {
                let mut rider = Rider::new(*bib);
                rider.finish = Some(Tod::from_millis(*ms));
                rider
            })
            .collect()
    }

    #[test]
    fn bunches_follow_the_gap() {
        let mut riders = finishers(&[("1", 61_000), ("2", 61_500), ("3", 64_000)]);
        let (winner, finish) = assign_bunches(&mut riders, Tod::ZERO, Tod::from_millis(1120));
        assert_eq!(winner, Some(secs(61)));
        assert_eq!(finish, Some(secs(61)));
        assert_eq!(riders.get("1").unwrap().bunch, Some(secs(61)));
        assert_eq!(riders.get("2").unwrap().bunch, Some(secs(61)));
        assert_eq!(riders.get("3").unwrap().bunch, Some(secs(64)));
    }

    #[test]
    fn bunch_chain_extends_with_each_rider() {
        // each gap under the threshold keeps the bunch even past the total
        let mut riders = finishers(&[("1", 100_000), ("2", 101_000), ("3", 102_000), ("4", 103_000)]);
        assign_bunches(&mut riders, Tod::ZERO, Tod::from_millis(1120));
        assert!(riders.iter().all(|r| r.bunch == Some(secs(100))));
    }

    #[test]
    fn placed_rider_without_time_inherits_bunch() {
        let mut riders = finishers(&[("1", 61_000)]);
        let mut untimed = Rider::new("2");
        untimed.place = Some(2);
        riders.insert(untimed).unwrap();
        riders.insert(Rider::new("3")).unwrap();
        assign_bunches(&mut riders, Tod::ZERO, Tod::from_millis(1120));
        assert_eq!(riders.get("2").unwrap().bunch, Some(secs(61)));
        assert_eq!(riders.get("3").unwrap().bunch, None);
    }

    #[test]
    fn manual_bunch_overrides() {
        let mut riders = finishers(&[("1", 61_000), ("2", 70_000)]);
        riders.get_mut("2").unwrap().manual_bunch = Some(secs(61));
        assign_bunches(&mut riders, Tod::ZERO, Tod::from_millis(1120));
        assert_eq!(riders.get("2").unwrap().bunch, Some(secs(61)));
    }

    #[test]
    fn dead_heat_ranks_skip_ahead() {
        let mut riders = finishers(&[("1", 0), ("2", 0), ("3", 0)]);
        assign_finish(&mut riders, &PlacesLedger::parse("1-2 3"));
        assert_eq!(riders.get("1").unwrap().place, Some(1));
        assert_eq!(riders.get("2").unwrap().place, Some(1));
        assert_eq!(riders.get("3").unwrap().place, Some(3));
    }

    #[test]
    fn out_of_race_riders_are_not_ranked() {
        let mut riders = finishers(&[("1", 0), ("2", 0), ("3", 0)]);
        riders.get_mut("1").unwrap().in_race = false;
        assign_finish(&mut riders, &PlacesLedger::parse("1 2 3"));
        assert_eq!(riders.get("1").unwrap().place, None);
        assert_eq!(riders.get("2").unwrap().place, Some(1));
        assert_eq!(riders.get("3").unwrap().place, Some(2));
    }

    #[test]
    fn final_sort_orders_statuses() {
        let mut riders: RiderTable = ["9", "3", "5", "7", "2"].into_iter().map(Rider::new).collect();
        for (bib, status) in [
            ("9", RiderStatus::DidNotStart),
            ("3", RiderStatus::DidNotFinish),
            ("5", RiderStatus::OutsideTimeLimit),
            ("7", RiderStatus::Disqualified),
        ] {
            let rider = riders.get_mut(bib).unwrap();
            rider.status = status;
            rider.in_race = false;
        }
        sort_final(&mut riders);
        let order: Vec<&str> = riders.bibs().map(|b| b.as_str()).collect();
        assert_eq!(order, vec!["2", "5", "7", "3", "9"]);
    }

    /// Placement, bunch and sort passes in pipeline order.
    fn run_passes(riders: &mut RiderTable, places: &PlacesLedger) -> Vec<(String, Option<u32>, Option<Tod>)> {
        reset_places(riders);
        assign_finish(riders, places);
        sort_rough(riders);
        assign_bunches(riders, Tod::ZERO, Tod::from_millis(1120));
        sort_final(riders);
        riders.iter().map(|r| (r.bib.to_string(), r.place, r.bunch)).collect()
    }

    #[test]
    fn rough_sort_breaks_ties_by_bib() {
        let mut riders: RiderTable = ["3", "1", "2"].into_iter().map(Rider::new).collect();
        sort_rough(&mut riders);
        let order: Vec<&str> = riders.bibs().map(|b| b.as_str()).collect();
        assert_eq!(order, vec!["1", "2", "3"]);
    }

    #[test]
    fn dead_heat_with_manual_bunch_settles_in_one_pass() {
        let mut riders: RiderTable = ["1", "2"].into_iter().map(Rider::new).collect();
        riders.get_mut("2").unwrap().manual_bunch = Some(secs(100));
        let places = PlacesLedger::parse("1-2");
        let first = run_passes(&mut riders, &places);
        assert_eq!(run_passes(&mut riders, &places), first);
    }

    /// Riders with optional finishes and manual bunches, plus finish
    /// places over a prefix of them where `true` joins a dead heat.
    fn field() -> impl Strategy<Value = (Vec<(Option<i64>, Option<i64>)>, Vec<bool>, usize)> {
        prop::collection::vec(
            (prop::option::of(60_000i64..70_000), prop::option::weighted(0.2, 55i64..75)),
            1..10,
        )
        .prop_flat_map(|rows| {
            let n = rows.len();
            (Just(rows), prop::collection::vec(any::<bool>(), n), 0..=n)
        })
    }

    proptest! {
        #[test]
        fn passes_are_idempotent_and_order_free((rows, joins, placed) in field()) {
            let riders: Vec<Rider> = rows
                .iter()
                .enumerate()
                .map(|(i, (finish, manual))| {
                    let mut rider = Rider::new((i + 1).to_string());
                    rider.finish = finish.map(Tod::from_millis);
                    rider.manual_bunch = manual.map(Tod::from_secs);
                    rider
                })
                .collect();

            let mut text = String::new();
            for i in 0..placed {
                if i > 0 {
                    text.push(if joins[i] { '-' } else { ' ' });
                }
                text.push_str(&(i + 1).to_string());
            }
            let places = PlacesLedger::parse(&text);

            let mut forward: RiderTable = riders.iter().cloned().collect();
            let mut reversed: RiderTable = riders.iter().rev().cloned().collect();
            let first = run_passes(&mut forward, &places);
            prop_assert_eq!(&run_passes(&mut forward, &places), &first);
            prop_assert_eq!(&run_passes(&mut reversed, &places), &first);
        }
    }

    #[test]
    fn rough_sort_prefers_more_laps_then_older_passing() {
        let mut riders: RiderTable = ["1", "2", "3"].into_iter().map(Rider::new).collect();
        riders.get_mut("1").unwrap().laps = 3;
        riders.get_mut("1").unwrap().passings = vec![secs(900)];
        riders.get_mut("2").unwrap().laps = 4;
        riders.get_mut("2").unwrap().passings = vec![secs(1000)];
        riders.get_mut("3").unwrap().laps = 3;
        riders.get_mut("3").unwrap().passings = vec![secs(800)];
        sort_rough(&mut riders);
        let order: Vec<&str> = riders.bibs().map(|b| b.as_str()).collect();
        assert_eq!(order, vec!["2", "3", "1"]);
    }

    #[test]
    fn decode_limit_forms() {
        let winner = Some(secs(3600));
        assert_eq!(decode_limit("+5:00", winner).unwrap(), secs(3900));
        assert_eq!(decode_limit("8%", winner).unwrap(), secs(3888));
        assert_eq!(decode_limit("1:10:00", winner).unwrap(), secs(4200));
        // shorter than the winner is a down time
        assert_eq!(decode_limit("10:00", winner).unwrap(), secs(4200));
        assert!(matches!(
            decode_limit("soon", winner),
            Err(RaceError::UnparsableTimeLimit { .. })
        ));
        assert!(decode_limit("8%", None).is_err());
    }

    #[test]
    fn oversized_limit_is_unparsable() {
        let winner = Some(secs(100));
        for limit in ["+9223372036854775", "1e300%"] {
            assert!(matches!(
                decode_limit(limit, winner),
                Err(RaceError::UnparsableTimeLimit { .. })
            ));
        }
    }

    #[test]
    fn limits_mark_and_clear_otl() {
        let mut riders: RiderTable = ["1", "2", "3"].into_iter().map(Rider::new).collect();
        riders.get_mut("1").unwrap().bunch = Some(secs(3600));
        riders.get_mut("1").unwrap().place = Some(1);
        riders.get_mut("2").unwrap().bunch = Some(secs(4000));
        riders.get_mut("3").unwrap().bunch = Some(secs(3700));
        riders.get_mut("3").unwrap().status = RiderStatus::OutsideTimeLimit;

        let recalc = ResultRecalculator::new(Tod::from_millis(1120)).with_time_limit("+5:00");
        let summary = recalc.apply_limits(&mut riders, TimerStatus::Running, Some(secs(3600)));
        assert_eq!(summary.time_limit, Some(secs(3900)));
        assert_eq!(riders.get("2").unwrap().status, RiderStatus::OutsideTimeLimit);
        assert_eq!(riders.get("3").unwrap().status, RiderStatus::None);
        assert_eq!(summary.race_status, RaceStatus::Provisional);
    }

    #[test]
    fn race_status_thresholds() {
        let recalc = ResultRecalculator::new(Tod::from_millis(1120));
        let mut riders: RiderTable = (1..=25).map(|n| Rider::new(n.to_string())).collect();
        assert_eq!(recalc.apply_limits(&mut riders, TimerStatus::Idle, None).race_status, RaceStatus::Prerace);
        assert_eq!(recalc.apply_limits(&mut riders, TimerStatus::Running, None).race_status, RaceStatus::Virtual);

        for n in 1..=10 {
            riders.get_mut(&n.to_string()).unwrap().place = Some(n);
        }
        assert_eq!(
            recalc.apply_limits(&mut riders, TimerStatus::Running, None).race_status,
            RaceStatus::Provisional
        );
        assert_eq!(recalc.apply_limits(&mut riders, TimerStatus::Finished, None).race_status, RaceStatus::Final);

        for rider in riders.iter_mut().filter(|r| r.place.is_none()) {
            rider.in_race = false;
        }
        assert_eq!(recalc.apply_limits(&mut riders, TimerStatus::Running, None).race_status, RaceStatus::Final);
    }
}

//! Bonuses, points and countback from finish and intermediate places
//!
//! Each contest reads an ordered place list from its source and awards
//! time bonuses and tally points by rank. Tallies accumulate points from
//! any number of contests; ties on points are broken by countback.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

use crate::config::{ContestConfig, RESERVED_SOURCES, RaceConfig, TallyConfig};
use crate::places::{PLACEHOLDER, PlacesLedger};
use crate::types::{Bib, RiderStatus, RiderTable, Tod};

/// Tally whose finish contest counts only the winner.
const SPRINT_TALLIES: &[&str] = &["sprint", "crit"];

/// Tally counting category winners in the slot of the climb category.
const CLIMB_TALLY: &str = "climb";

/// Count of placings per countback slot.
///
/// Slot 0 holds finish wins, higher slots intermediate placings or climb
/// categories. Comparison walks slots upward from 0; the first slot with
/// different counts decides.
#[derive(Debug, Clone, Default)]
pub struct Countback {
    counts: BTreeMap<u32, u32>,
}

impl Countback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `1,-,2` text form.
    pub fn parse(text: &str) -> Self {
        let counts = text
            .split(',')
            .enumerate()
            .filter_map(|(i, v)| v.trim().parse::<u32>().ok().map(|n| (i as u32, n)))
            .filter(|(_, n)| *n > 0)
            .collect();
        Self { counts }
    }

    pub fn add(&mut self, slot: u32) {
        *self.counts.entry(slot).or_insert(0) += 1;
    }

    pub fn get(&self, slot: u32) -> u32 {
        self.counts.get(&slot).copied().unwrap_or(0)
    }

    pub fn max_slot(&self) -> u32 {
        self.counts.keys().next_back().copied().unwrap_or(0)
    }
}

impl Ord for Countback {
    fn cmp(&self, other: &Self) -> Ordering {
        let top = self.max_slot().max(other.max_slot());
        (0..=top)
            .map(|i| self.get(i).cmp(&other.get(i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Countback {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Countback {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Countback {}

impl fmt::Display for Countback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..=self.max_slot() {
            if i > 0 {
                f.write_str(",")?;
            }
            match self.get(i) {
                0 => f.write_str("-")?,
                n => write!(f, "{n}")?,
            }
        }
        Ok(())
    }
}

/// Where a contest reads its places from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContestSource {
    Finish,
    /// Every rider in the race table
    Registered,
    /// Riders not marked dns, or still in the race
    Starters,
    Intermediate(String),
    /// Finish places of one category
    CategoryFinish(String),
}

impl ContestSource {
    pub fn resolve(source: &str, config: &RaceConfig) -> Option<Self> {
        match source {
            "fin" => Some(ContestSource::Finish),
            "reg" => Some(ContestSource::Registered),
            "start" => Some(ContestSource::Starters),
            _ => {
                if let Some(cat) = config.category_sources().get(source) {
                    Some(ContestSource::CategoryFinish(cat.clone()))
                } else if config.intermediate(source).is_some()
                    && !RESERVED_SOURCES.contains(&source)
                {
                    Some(ContestSource::Intermediate(source.to_string()))
                } else {
                    None
                }
            }
        }
    }
}

/// One line of a points classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    pub bib: Bib,
    pub points: i64,
    pub countback: Countback,
}

/// Accumulated bonuses, points and countbacks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TallyBoard {
    bonuses: BTreeMap<Bib, Tod>,
    points: BTreeMap<String, BTreeMap<Bib, i64>>,
    countbacks: BTreeMap<String, BTreeMap<Bib, Countback>>,
}

impl TallyBoard {
    /// Clear all awards and open an empty table per tally.
    pub fn reset<'a>(&mut self, tallies: impl IntoIterator<Item = &'a TallyConfig>) {
        self.bonuses.clear();
        self.points.clear();
        self.countbacks.clear();
        for tally in tallies {
            self.points.insert(tally.id.clone(), BTreeMap::new());
            self.countbacks.insert(tally.id.clone(), BTreeMap::new());
        }
    }

    pub fn has_tally(&self, tally: &str) -> bool {
        self.points.contains_key(tally)
    }

    pub fn bonus(&self, bib: &str) -> Option<Tod> {
        self.bonuses.get(bib).copied()
    }

    pub fn bonuses(&self) -> impl Iterator<Item = (&Bib, &Tod)> {
        self.bonuses.iter()
    }

    pub fn points(&self, tally: &str, bib: &str) -> Option<i64> {
        self.points.get(tally).and_then(|t| t.get(bib)).copied()
    }

    pub fn countback(&self, tally: &str, bib: &str) -> Option<&Countback> {
        self.countbacks.get(tally).and_then(|t| t.get(bib))
    }

    fn add_bonus(&mut self, bib: &Bib, bonus: Tod) {
        *self.bonuses.entry(bib.clone()).or_default() += bonus;
    }

    fn add_points(&mut self, tally: &str, bib: &Bib, points: i64) {
        if let Some(table) = self.points.get_mut(tally) {
            *table.entry(bib.clone()).or_insert(0) += points;
        }
    }

    fn countback_mut(&mut self, tally: &str, bib: &Bib) -> Option<&mut Countback> {
        self.countbacks.get_mut(tally).map(|t| t.entry(bib.clone()).or_default())
    }

    /// Tally standings: points descending, countback descending, then bib.
    pub fn standings(&self, tally: &str) -> Vec<Standing> {
        let Some(table) = self.points.get(tally) else {
            return Vec::new();
        };
        let mut standings: Vec<Standing> = table
            .iter()
            .map(|(bib, &points)| Standing {
                bib: bib.clone(),
                points,
                countback: self.countback(tally, bib.as_str()).cloned().unwrap_or_default(),
            })
            .collect();
        standings.sort_by(|a, b| {
            b.points
                .cmp(&a.points)
                .then_with(|| b.countback.cmp(&a.countback))
                .then_with(|| a.bib.cmp(&b.bib))
        });
        standings
    }
}

/// Place lists the contests read from.
pub struct ContestInputs<'a> {
    pub riders: &'a RiderTable,
    pub finish: &'a PlacesLedger,
    pub intermediates: &'a BTreeMap<String, PlacesLedger>,
}

impl ContestInputs<'_> {
    fn places(&self, source: &ContestSource) -> PlacesLedger {
        match source {
            ContestSource::Finish => self.finish.clone(),
            ContestSource::Registered => ledger_of(self.riders.bibs()),
            ContestSource::Starters => ledger_of(
                self.riders
                    .iter()
                    .filter(|r| r.status != RiderStatus::DidNotStart || r.in_race)
                    .map(|r| &r.bib),
            ),
            ContestSource::Intermediate(id) => {
                self.intermediates.get(id).cloned().unwrap_or_default()
            }
            ContestSource::CategoryFinish(cat) => self.finish.for_category(self.riders, cat),
        }
    }
}

fn ledger_of<'a>(bibs: impl Iterator<Item = &'a Bib>) -> PlacesLedger {
    let text: Vec<&str> = bibs.map(Bib::as_str).collect();
    PlacesLedger::parse(&text.join(" "))
}

/// Contest and tally definitions for one race.
#[derive(Debug, Clone, Default)]
pub struct ContestTallyEngine {
    contests: Vec<(ContestConfig, Option<ContestSource>)>,
    tallies: Vec<TallyConfig>,
}

impl ContestTallyEngine {
    pub fn from_config(config: &RaceConfig) -> Self {
        let contests = config
            .contests
            .iter()
            .map(|c| {
                let source = ContestSource::resolve(c.source(), config);
                if source.is_none() {
                    warn!("Invalid source {:?} in contest {:?}", c.source(), c.id);
                }
                (c.clone(), source)
            })
            .collect();
        Self { contests, tallies: config.tallies.clone() }
    }

    pub fn tallies(&self) -> &[TallyConfig] {
        &self.tallies
    }

    pub fn contests(&self) -> impl Iterator<Item = &ContestConfig> {
        self.contests.iter().map(|(c, _)| c)
    }

    /// Reset the board and award every contest.
    pub fn run(&self, board: &mut TallyBoard, inputs: &ContestInputs<'_>) {
        board.reset(&self.tallies);
        for (contest, source) in &self.contests {
            match source {
                Some(source) => {
                    let places = inputs.places(source);
                    self.assign(board, contest, source, &places, inputs.riders);
                }
                None => debug!("Contest {:?} skipped, no valid source", contest.id),
            }
        }
    }

    fn assign(
        &self,
        board: &mut TallyBoard,
        contest: &ContestConfig,
        source: &ContestSource,
        places: &PlacesLedger,
        riders: &RiderTable,
    ) {
        let tally = contest.tally.as_deref().filter(|t| !t.is_empty() && board.has_tally(t));
        let winner_only = match source {
            ContestSource::Finish => tally.is_some_and(|t| SPRINT_TALLIES.contains(&t)),
            ContestSource::CategoryFinish(_) => true,
            _ => false,
        };

        let mut seen = HashSet::new();
        let mut idx = 0u32;
        for group in places.groups() {
            let rank = idx + 1;
            for bib in group {
                if !seen.insert(bib) {
                    warn!(bib = %bib, "Duplicate no. in {:?} places", contest.id);
                    continue;
                }
                idx += 1;
                if bib.as_str() == PLACEHOLDER {
                    continue;
                }
                if !riders.contains(bib.as_str()) {
                    warn!(bib = %bib, "Unknown rider in {:?} places skipped", contest.id);
                    continue;
                }

                if contest.all_source {
                    if let Some(&bonus) = contest.bonuses.first().filter(|b| **b != Tod::ZERO) {
                        board.add_bonus(bib, bonus);
                    }
                    if let (Some(tally), Some(&points)) = (tally, contest.points.first()) {
                        if points != 0 {
                            board.add_points(tally, bib, points);
                            board.countback_mut(tally, bib);
                        }
                    }
                    continue;
                }

                let slot = rank as usize - 1;
                if let Some(&bonus) = contest.bonuses.get(slot) {
                    board.add_bonus(bib, bonus);
                }
                let Some(tally) = tally else { continue };
                if let Some(&points) = contest.points.get(slot) {
                    board.add_points(tally, bib, points);
                }
                let Some(countback) = board.countback_mut(tally, bib) else { continue };
                if winner_only {
                    if rank == 1 {
                        countback.add(0);
                    }
                } else if tally == CLIMB_TALLY {
                    if rank == 1 {
                        countback.add(contest.category);
                    }
                } else {
                    countback.add(rank);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rider;

    fn config() -> RaceConfig {
        RaceConfig::from_yaml(
            r#"
categories: [{id: A}, {id: B}]
intermediates:
  - id: s1
    places: "3 1"
  - id: kom1
    places: "2 3"
contests:
  - id: fin
    tally: sprint
    points: [10, 6, 3]
    bonuses: [10, 6, 4]
  - id: s1
    tally: sprint
    points: [3, 2]
    bonuses: [3, 2]
  - id: kom1
    tally: climb
    points: [5, 3]
    category: 2
  - id: afin
    tally: sprint
    points: [1]
  - id: start
    tally: sprint
    all_source: true
    points: [1]
tallies:
  - id: sprint
  - id: climb
"#,
        )
        .unwrap()
    }

    fn riders() -> RiderTable {
        let mut table: RiderTable = [
            Rider::new("1").with_category("A"),
            Rider::new("2").with_category("B"),
            Rider::new("3").with_category("A"),
            Rider::new("4").with_category("B"),
        ]
        .into_iter()
        .collect();
        let dns = table.get_mut("4").unwrap();
        dns.status = RiderStatus::DidNotStart;
        dns.in_race = false;
        table
    }

    fn run(finish: &str) -> TallyBoard {
        let config = config();
        let engine = ContestTallyEngine::from_config(&config);
        let riders = riders();
        let finish = PlacesLedger::parse(finish);
        let intermediates: BTreeMap<String, PlacesLedger> = config
            .intermediates
            .iter()
            .map(|i| (i.id.clone(), PlacesLedger::parse(&i.places)))
            .collect();
        let mut board = TallyBoard::default();
        engine.run(&mut board, &ContestInputs { riders: &riders, finish: &finish, intermediates: &intermediates });
        board
    }

    #[test]
    fn countback_compares_from_slot_zero() {
        let a = Countback::parse("1,-,2");
        let b = Countback::parse("1,3");
        assert!(b > a);
        assert_eq!(a.to_string(), "1,-,2");
        assert_eq!(Countback::parse("-,-"), Countback::new());
        assert_eq!(Countback::new().to_string(), "-");
    }

    #[test]
    fn finish_and_intermediate_awards() {
        let board = run("1 2 3");
        // fin 10 + s1 2 + afin 1 + start 1
        assert_eq!(board.points("sprint", "1"), Some(14));
        // fin 3 + s1 3 + start 1
        assert_eq!(board.points("sprint", "3"), Some(7));
        assert_eq!(board.bonus("1"), Some(Tod::from_secs(12)));
        assert_eq!(board.bonus("3"), Some(Tod::from_secs(7)));
        // dns rider out of race is not a starter
        assert_eq!(board.points("sprint", "4"), None);
    }

    #[test]
    fn countback_slots() {
        let board = run("1 2 3");
        // finish win (slot 0), category win (slot 0), second in s1 (slot 2)
        assert_eq!(board.countback("sprint", "1").unwrap().to_string(), "2,-,1");
        // s1 winner counts slot 1 only
        assert_eq!(board.countback("sprint", "3").unwrap().to_string(), "-,1");
        // climb winner counts in the climb category slot
        assert_eq!(board.countback("climb", "2").unwrap().to_string(), "-,-,1");
        assert_eq!(board.countback("climb", "3").unwrap().to_string(), "-");
    }

    #[test]
    fn dead_heat_shares_rank() {
        let board = run("1-2 3");
        assert_eq!(board.bonus("2"), Some(Tod::from_secs(10)));
        // third place after a two rider dead heat
        assert_eq!(board.bonus("3"), Some(Tod::from_secs(4) + Tod::from_secs(3)));
    }

    #[test]
    fn standings_sort_points_then_countback() {
        let board = run("1 2 3");
        let standings = board.standings("sprint");
        let order: Vec<&str> = standings.iter().map(|s| s.bib.as_str()).collect();
        assert_eq!(order, vec!["1", "3", "2"]);
    }

    #[test]
    fn unknown_riders_are_skipped() {
        let board = run("9 1");
        assert_eq!(board.points("sprint", "9"), None);
        // rank two still applies to the next rider
        assert_eq!(board.bonus("1"), Some(Tod::from_secs(6) + Tod::from_secs(2)));
    }
}

//! Finish order with dead-heat groups
//!
//! The ledger is the operator's authoritative finish order. Its text form
//! is whitespace-separated place groups, with the riders of a dead heat
//! joined by `-`:
//!
//! ```rust
//! use roadrace::places::PlacesLedger;
//!
//! let ledger = PlacesLedger::parse("12 4 - 7  31 --9");
//! assert_eq!(ledger.to_string(), "12 4-7 31-9");
//! assert!(ledger.has_dead_heat());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{info, warn};

use crate::types::{Bib, RiderTable};
use crate::{RaceError, Result};

/// Place holder bib, keeps a rank open to be filled in later.
pub const PLACEHOLDER: &str = "x";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PlacesLedger {
    groups: Vec<Vec<Bib>>,
}

impl PlacesLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and normalise a place string.
    pub fn parse(text: &str) -> Self {
        let mut groups: Vec<Vec<Bib>> = Vec::new();
        let mut join_next = false;
        let mut token = String::new();

        let flush = |token: &mut String, join_next: &mut bool, groups: &mut Vec<Vec<Bib>>| {
            if token.is_empty() {
                return;
            }
            let bib = Bib::new(token.as_str());
            match groups.last_mut() {
                Some(group) if *join_next => group.push(bib),
                _ => groups.push(vec![bib]),
            }
            token.clear();
            *join_next = false;
        };

        for c in text.chars() {
            match c {
                '-' => {
                    flush(&mut token, &mut join_next, &mut groups);
                    join_next = !groups.is_empty();
                }
                c if c.is_whitespace() || c == ',' => {
                    flush(&mut token, &mut join_next, &mut groups);
                }
                c => token.push(c),
            }
        }
        flush(&mut token, &mut join_next, &mut groups);
        Self { groups }
    }

    pub fn groups(&self) -> &[Vec<Bib>] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn bibs(&self) -> impl Iterator<Item = &Bib> {
        self.groups.iter().flatten()
    }

    pub fn contains(&self, bib: &str) -> bool {
        self.bibs().any(|b| b.as_str() == bib)
    }

    pub fn has_dead_heat(&self) -> bool {
        self.groups.iter().any(|g| g.len() > 1)
    }

    /// Replace the ledger with an operator-entered order.
    pub fn assign_manual_order(&mut self, text: &str) {
        *self = Self::parse(text);
        info!("Finish places: {}", self);
    }

    /// Validate the ledger against the riders in the race.
    ///
    /// Duplicates and unknown bibs are always rejected; riders out of the
    /// race only when `allow_non_finishers` is false.
    pub fn check(&self, riders: &RiderTable, allow_non_finishers: bool) -> Result<()> {
        let mut seen = HashSet::new();
        let mut problems = Vec::new();
        for bib in self.bibs() {
            if bib.as_str() == PLACEHOLDER {
                info!("Placeholder in places");
                continue;
            }
            if !seen.insert(bib) {
                problems.push(format!("duplicate {bib}"));
            }
            match riders.get(bib.as_str()) {
                None => problems.push(format!("non-starter {bib}")),
                Some(rider) if !rider.in_race => {
                    info!(bib = %bib, "Rider out of race in places");
                    if !allow_non_finishers {
                        problems.push(format!("{bib} not in race"));
                    }
                }
                Some(_) => {}
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(RaceError::invalid_places(self.to_string(), problems.join(", ")))
        }
    }

    fn refuse_dead_heat(&self, operation: &str) -> Result<()> {
        if self.has_dead_heat() {
            warn!("{} with dead heat not implemented", operation);
            return Err(RaceError::DeadHeatUnsupported { operation: operation.to_string() });
        }
        Ok(())
    }

    /// Place every in-race rider in displayed order down to `bib`,
    /// keeping the remaining old places after them.
    pub fn fill_through(&mut self, bib: &str, displayed: &RiderTable) -> Result<()> {
        self.refuse_dead_heat("Fill places")?;
        let mut old: Vec<Bib> = self.bibs().cloned().collect();
        let mut new = Vec::new();
        for rider in displayed.iter() {
            old.retain(|b| *b != rider.bib);
            if rider.in_race {
                new.push(rider.bib.clone());
            }
            if rider.bib.as_str() == bib {
                break;
            }
        }
        new.extend(old);
        self.groups = new.into_iter().map(|b| vec![b]).collect();
        info!("Confirmed places to {}: {}", bib, self);
        Ok(())
    }

    /// Move `bib` to the next place after the current last place.
    pub fn append_next(&mut self, bib: &str) {
        self.remove(bib);
        self.groups.push(vec![Bib::new(bib)]);
        info!("Confirmed next place: {}", bib);
    }

    /// Drop `bib` and every place after it.
    pub fn clear_from(&mut self, bib: &str) -> Result<()> {
        self.refuse_dead_heat("Clear places")?;
        if let Some(pos) = self.groups.iter().position(|g| g[0].as_str() == bib) {
            self.groups.truncate(pos);
        }
        info!("Cleared places from {}", bib);
        Ok(())
    }

    /// Remove one rider from the places.
    pub fn clear_rider(&mut self, bib: &str) -> Result<()> {
        self.refuse_dead_heat("Clear place")?;
        self.remove(bib);
        info!("Cleared {} from places", bib);
        Ok(())
    }

    /// Remove a bib wherever it is, dead heat or not.
    pub fn remove(&mut self, bib: &str) -> bool {
        let before = self.bibs().count();
        for group in &mut self.groups {
            group.retain(|b| b.as_str() != bib);
        }
        self.groups.retain(|g| !g.is_empty());
        self.bibs().count() != before
    }

    /// Places restricted to riders of one category, groups preserved.
    pub fn for_category(&self, riders: &RiderTable, category: &str) -> PlacesLedger {
        let groups = self
            .groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .filter(|b| {
                        riders
                            .get(b.as_str())
                            .is_some_and(|r| r.category_key().eq_ignore_ascii_case(category))
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .filter(|g| !g.is_empty())
            .collect();
        PlacesLedger { groups }
    }

    /// Places as currently displayed: in-race placed riders in row order,
    /// equal places forming a dead heat.
    pub fn from_displayed_order(riders: &RiderTable) -> PlacesLedger {
        let mut groups: Vec<Vec<Bib>> = Vec::new();
        let mut last_place = None;
        for rider in riders.iter().filter(|r| r.in_race) {
            let Some(place) = rider.place else { continue };
            match groups.last_mut() {
                Some(group) if last_place == Some(place) => group.push(rider.bib.clone()),
                _ => groups.push(vec![rider.bib.clone()]),
            }
            last_place = Some(place);
        }
        PlacesLedger { groups }
    }
}

impl fmt::Display for PlacesLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, group) in self.groups.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            for (j, bib) in group.iter().enumerate() {
                if j > 0 {
                    f.write_str("-")?;
                }
                write!(f, "{bib}")?;
            }
        }
        Ok(())
    }
}

impl From<String> for PlacesLedger {
    fn from(text: String) -> Self {
        PlacesLedger::parse(&text)
    }
}

impl From<PlacesLedger> for String {
    fn from(ledger: PlacesLedger) -> Self {
        ledger.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rider;
    use proptest::prelude::*;

    fn table(bibs: &[&str]) -> RiderTable {
        bibs.iter().map(|b| Rider::new(*b)).collect()
    }

    #[test]
    fn normalises_dashes_and_spaces() {
        assert_eq!(PlacesLedger::parse("  1  2 -3 - 4 5").to_string(), "1 2-3-4 5");
        assert_eq!(PlacesLedger::parse("-1 2-").to_string(), "1 2");
        assert_eq!(PlacesLedger::parse("1,2,,3").to_string(), "1 2 3");
        assert!(PlacesLedger::parse("   ").is_empty());
    }

    #[test]
    fn check_rejects_duplicates_and_unknown() {
        let riders = table(&["1", "2", "3"]);
        assert!(PlacesLedger::parse("1 2 x 3").check(&riders, false).is_ok());

        let err = PlacesLedger::parse("1 2 1 9").check(&riders, false).unwrap_err();
        match err {
            RaceError::InvalidPlaces { reason, .. } => {
                assert!(reason.contains("duplicate 1"));
                assert!(reason.contains("non-starter 9"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn check_non_finishers_is_configurable() {
        let mut riders = table(&["1", "2"]);
        riders.get_mut("2").unwrap().in_race = false;
        let ledger = PlacesLedger::parse("1 2");
        assert!(ledger.check(&riders, false).is_err());
        assert!(ledger.check(&riders, true).is_ok());
    }

    #[test]
    fn fill_through_uses_displayed_order() {
        let mut riders = table(&["5", "3", "8", "2"]);
        riders.get_mut("3").unwrap().in_race = false;
        let mut ledger = PlacesLedger::parse("2 3");
        ledger.fill_through("8", &riders).unwrap();
        assert_eq!(ledger.to_string(), "5 8 2");
    }

    #[test]
    fn dead_heat_blocks_fill_and_clear() {
        let riders = table(&["1", "2", "3"]);
        let mut ledger = PlacesLedger::parse("1-2 3");
        assert!(matches!(
            ledger.fill_through("3", &riders),
            Err(RaceError::DeadHeatUnsupported { .. })
        ));
        assert!(ledger.clear_from("3").is_err());
        assert!(ledger.clear_rider("3").is_err());
        assert_eq!(ledger.to_string(), "1-2 3");

        // delete still purges the bib
        assert!(ledger.remove("2"));
        assert_eq!(ledger.to_string(), "1 3");
    }

    #[test]
    fn append_and_clear() {
        let mut ledger = PlacesLedger::parse("1 2 3 4");
        ledger.append_next("2");
        assert_eq!(ledger.to_string(), "1 3 4 2");
        ledger.clear_from("4").unwrap();
        assert_eq!(ledger.to_string(), "1 3");
        ledger.clear_rider("1").unwrap();
        assert_eq!(ledger.to_string(), "3");
    }

    #[test]
    fn category_projection_keeps_groups() {
        let riders: RiderTable = [
            Rider::new("1").with_category("A"),
            Rider::new("2").with_category("B"),
            Rider::new("3").with_category("a"),
        ]
        .into_iter()
        .collect();
        let ledger = PlacesLedger::parse("2 1-2 3");
        assert_eq!(ledger.for_category(&riders, "A").to_string(), "1 3");
        assert_eq!(ledger.for_category(&riders, "B").to_string(), "2 2");
    }

    #[test]
    fn displayed_order_builds_dead_heats() {
        let mut riders = table(&["4", "7", "9", "11"]);
        for (bib, place) in [("4", 1), ("7", 1), ("9", 3)] {
            riders.get_mut(bib).unwrap().place = Some(place);
        }
        assert_eq!(PlacesLedger::from_displayed_order(&riders).to_string(), "4-7 9");
    }

    proptest! {
        #[test]
        fn parse_is_idempotent(text in "[0-9 x\\-]{0,40}") {
            let once = PlacesLedger::parse(&text);
            let twice = PlacesLedger::parse(&once.to_string());
            prop_assert_eq!(once, twice);
        }
    }
}

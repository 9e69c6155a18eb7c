//! Passing validation and insertion into a rider's passing history

use std::fmt;
use tracing::{debug, info, warn};

use crate::clock::TimingClock;
use crate::config::RaceConfig;
use crate::types::{Rider, Tod};

/// Source id used for passings entered by the operator.
pub const MANUAL_SOURCE: &str = "man";

/// What happened to an offered passing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassingOutcome {
    Accepted,
    /// At or before start + category offset + pass threshold
    RejectedEarly,
    /// Too close to the previous recorded passing
    RejectedDuplicate,
    /// Too close to a later recorded passing
    RejectedSpurious,
    /// Timer idle, ready or waiting for the start
    NotRunning,
    /// Pre-finish loop passing, recorded separately
    PreFinishLoop,
    /// Source not in the configured passing sources
    SourceFiltered,
}

impl PassingOutcome {
    pub fn is_accepted(self) -> bool {
        self == PassingOutcome::Accepted
    }
}

impl fmt::Display for PassingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PassingOutcome::Accepted => "accepted",
            PassingOutcome::RejectedEarly => "early",
            PassingOutcome::RejectedDuplicate => "duplicate",
            PassingOutcome::RejectedSpurious => "spurious",
            PassingOutcome::NotRunning => "not running",
            PassingOutcome::PreFinishLoop => "pre-finish loop",
            PassingOutcome::SourceFiltered => "source filtered",
        };
        f.write_str(s)
    }
}

/// Validates decoder passings against the clock and the rider's history.
#[derive(Debug, Clone, PartialEq)]
pub struct PassingIngestor {
    pass_threshold: Tod,
    preloop: Option<String>,
    sources: Vec<String>,
}

impl PassingIngestor {
    pub fn new(pass_threshold: Tod) -> Self {
        Self { pass_threshold, preloop: None, sources: Vec::new() }
    }

    pub fn from_config(config: &RaceConfig) -> Self {
        Self {
            pass_threshold: config.pass_threshold(),
            preloop: config.preloop.as_deref().map(str::to_lowercase).filter(|s| !s.is_empty()),
            sources: config.passing_sources.iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    pub fn with_preloop(mut self, source: impl Into<String>) -> Self {
        self.preloop = Some(source.into().to_lowercase());
        self
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.sources = sources.into_iter().map(|s| s.as_ref().to_lowercase()).collect();
        self
    }

    pub fn pass_threshold(&self) -> Tod {
        self.pass_threshold
    }

    /// Whether a passing from `source` counts as a lap passing at all:
    /// not the pre-finish loop and not filtered out.
    pub fn admits_source(&self, source: &str) -> bool {
        let source = source.to_lowercase();
        if self.preloop.as_deref() == Some(source.as_str()) {
            return false;
        }
        self.sources.is_empty() || source == MANUAL_SOURCE || self.sources.contains(&source)
    }

    /// Offer a passing for `rider`; on acceptance it is inserted in order.
    ///
    /// `offset` is the rider's category start offset.
    pub fn accept(
        &self,
        rider: &mut Rider,
        at: Tod,
        source: &str,
        clock: &TimingClock,
        offset: Tod,
    ) -> PassingOutcome {
        let source = source.to_lowercase();
        let bib = &rider.bib;

        if self.preloop.as_deref() == Some(source.as_str()) {
            if rider.pre_passing.is_some() {
                warn!(bib = %bib, "Rider already pre-passed");
            } else {
                info!(bib = %bib, "Prepass @ {}/{}", at.timestr(2), source);
                rider.pre_passing = Some(at);
            }
            return PassingOutcome::PreFinishLoop;
        }

        if !self.sources.is_empty() && source != MANUAL_SOURCE && !self.sources.contains(&source) {
            info!(bib = %bib, "Source not configured @ {}/{}", at.timestr(2), source);
            return PassingOutcome::SourceFiltered;
        }

        if rider.in_race {
            info!(bib = %bib, "Saw @ {}", at.timestr(2));
        } else {
            // recorded anyway in case the status is wrong
            warn!(bib = %bib, "Passing for rider out of race @ {}", at.timestr(2));
        }

        if !clock.status().accepts_passings() {
            debug!(bib = %bib, "Passing ignored while {}", clock.status());
            return PassingOutcome::NotRunning;
        }

        let earliest = clock.start().unwrap_or(Tod::ZERO) + offset + self.pass_threshold;
        if at <= earliest {
            info!(bib = %bib, "Ignored early passing < {}", earliest.timestr(2));
            return PassingOutcome::RejectedEarly;
        }

        let passings = &mut rider.passings;
        let pos = passings.partition_point(|p| *p <= at);
        if let Some(&prev) = pos.checked_sub(1).and_then(|i| passings.get(i)) {
            if at - prev < self.pass_threshold {
                info!(bib = %bib, "Ignored short lap < {}", (prev + self.pass_threshold).timestr(2));
                return PassingOutcome::RejectedDuplicate;
            }
        }
        if let Some(&next) = passings.get(pos) {
            if next - at <= self.pass_threshold {
                info!(
                    bib = %bib,
                    "Ignored spurious pre-passing {} < {}",
                    at.timestr(2),
                    next.timestr(2)
                );
                return PassingOutcome::RejectedSpurious;
            }
        }

        passings.insert(pos, at);
        PassingOutcome::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn running_clock(start: Tod) -> TimingClock {
        let mut clock = TimingClock::new(None);
        clock.arm_start().unwrap();
        clock.start_trigger(start);
        clock
    }

    #[test]
    fn admits_only_lap_sources() {
        let ingestor = PassingIngestor::new(Tod::from_secs(30)).with_preloop("PRE").with_sources(["a"]);
        assert!(ingestor.admits_source("A"));
        assert!(ingestor.admits_source(MANUAL_SOURCE));
        assert!(!ingestor.admits_source("pre"));
        assert!(!ingestor.admits_source("b"));
        assert!(PassingIngestor::new(Tod::ZERO).admits_source("anything"));
    }

    #[test]
    fn rejects_while_not_running() {
        let ingestor = PassingIngestor::new(Tod::from_secs(30));
        let clock = TimingClock::new(None);
        let mut rider = Rider::new("1");
        let outcome = ingestor.accept(&mut rider, Tod::from_secs(100), "a", &clock, Tod::ZERO);
        assert_eq!(outcome, PassingOutcome::NotRunning);
        assert!(rider.passings.is_empty());
    }

    #[test]
    fn early_window_includes_category_offset() {
        let ingestor = PassingIngestor::new(Tod::from_secs(30));
        let clock = running_clock(Tod::ZERO);
        let mut rider = Rider::new("1");
        let offset = Tod::from_secs(60);
        assert_eq!(
            ingestor.accept(&mut rider, Tod::from_secs(90), "a", &clock, offset),
            PassingOutcome::RejectedEarly
        );
        assert_eq!(
            ingestor.accept(&mut rider, Tod::from_secs(91), "a", &clock, offset),
            PassingOutcome::Accepted
        );
    }

    #[test]
    fn reread_inside_threshold_is_a_duplicate() {
        let ingestor = PassingIngestor::new(Tod::from_secs(30));
        let clock = running_clock(Tod::ZERO);
        let mut rider = Rider::new("7");
        assert!(ingestor.accept(&mut rider, Tod::from_secs(100), "a", &clock, Tod::ZERO).is_accepted());
        assert_eq!(
            ingestor.accept(&mut rider, Tod::from_secs(110), "a", &clock, Tod::ZERO),
            PassingOutcome::RejectedDuplicate
        );
        assert_eq!(rider.passings, vec![Tod::from_secs(100)]);
    }

    #[test]
    fn out_of_order_passing_checks_right_neighbour() {
        let ingestor = PassingIngestor::new(Tod::from_secs(30));
        let clock = running_clock(Tod::ZERO);
        let mut rider = Rider::new("7");
        rider.passings = vec![Tod::from_secs(100), Tod::from_secs(200)];
        assert_eq!(
            ingestor.accept(&mut rider, Tod::from_secs(180), "a", &clock, Tod::ZERO),
            PassingOutcome::RejectedSpurious
        );
        assert!(ingestor.accept(&mut rider, Tod::from_secs(150), "a", &clock, Tod::ZERO).is_accepted());
        assert_eq!(rider.passings[1], Tod::from_secs(150));
    }

    #[test]
    fn preloop_records_first_passing_only() {
        let ingestor = PassingIngestor::new(Tod::from_secs(30)).with_preloop("C2");
        let clock = running_clock(Tod::ZERO);
        let mut rider = Rider::new("3");
        for t in [500, 520] {
            let outcome = ingestor.accept(&mut rider, Tod::from_secs(t), "c2", &clock, Tod::ZERO);
            assert_eq!(outcome, PassingOutcome::PreFinishLoop);
        }
        assert_eq!(rider.pre_passing, Some(Tod::from_secs(500)));
        assert!(rider.passings.is_empty());
    }

    #[test]
    fn source_filter_drops_other_sources() {
        let ingestor = PassingIngestor::new(Tod::from_secs(30)).with_sources(["A"]);
        let clock = running_clock(Tod::ZERO);
        let mut rider = Rider::new("3");
        assert_eq!(
            ingestor.accept(&mut rider, Tod::from_secs(100), "b", &clock, Tod::ZERO),
            PassingOutcome::SourceFiltered
        );
        assert!(ingestor.accept(&mut rider, Tod::from_secs(100), MANUAL_SOURCE, &clock, Tod::ZERO).is_accepted());
    }

    #[test]
    fn out_of_race_riders_still_record() {
        let ingestor = PassingIngestor::new(Tod::from_secs(30));
        let clock = running_clock(Tod::ZERO);
        let mut rider = Rider::new("4");
        rider.in_race = false;
        assert!(ingestor.accept(&mut rider, Tod::from_secs(100), "a", &clock, Tod::ZERO).is_accepted());
    }

    proptest! {
        #[test]
        fn accepted_passings_stay_sorted_and_separated(
            times in prop::collection::vec(31_000i64..2_000_000, 1..60),
            threshold in 1_000i64..60_000,
        ) {
            let ingestor = PassingIngestor::new(Tod::from_millis(threshold));
            let clock = running_clock(Tod::ZERO);
            let mut rider = Rider::new("1");
            for t in times {
                ingestor.accept(&mut rider, Tod::from_millis(t + threshold), "a", &clock, Tod::ZERO);
            }
            for pair in rider.passings.windows(2) {
                prop_assert!(pair[1] - pair[0] >= Tod::from_millis(threshold));
            }
        }
    }
}

//! Result listings and result announcements
//!
//! Read-only views over a recalculated [`Race`]: the result table per race
//! or category, points standings, the bonus list, start lists and the
//! finish and intermediate announcements. [`ResultSnapshot`] is the value
//! the engine publishes after each recalculation.

use serde::Serialize;
use tracing::{debug, info};

use crate::clock::TimerStatus;
use crate::race::Race;
use crate::recalc::RaceStatus;
use crate::scoreboard::Announcement;
use crate::types::{Bib, Rider, RiderStatus, Tod};

/// Riders named in a result scroll message.
const SCROLL_ENTRIES: usize = 5;

/// One row of a result listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultLine {
    /// Rank, or the status code for riders without one
    pub rank: String,
    pub bib: Bib,
    pub name: String,
    pub category: String,
    /// Bunch time less the rider's start offset
    pub time: Option<Tod>,
    /// Time down on the first listed rider
    pub down: Option<Tod>,
    pub bonus: Option<Tod>,
    pub penalty: Option<Tod>,
    pub laps: u32,
}

/// One row of a points standing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StandingLine {
    pub rank: u32,
    pub bib: Bib,
    pub name: String,
    pub points: i64,
    /// Countback in `1,-,2` form
    pub countback: String,
}

/// Published state of the race after a recalculation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSnapshot {
    pub race_status: RaceStatus,
    pub timer_status: TimerStatus,
    pub start: Option<Tod>,
    pub finish: Option<Tod>,
    pub on_lap: u32,
    pub total_laps: Option<u32>,
    pub winner_bunch: Option<Tod>,
    pub time_limit: Option<Tod>,
    pub places: String,
    pub lines: Vec<ResultLine>,
}

fn add_times(a: Option<Tod>, b: Option<Tod>) -> Option<Tod> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        (a, b) => a.or(b),
    }
}

fn display_name(rider: &Rider) -> String {
    if rider.short_name.is_empty() { rider.name.clone() } else { rider.short_name.clone() }
}

impl Race {
    fn rider_offset(&self, rider: &Rider) -> Tod {
        rider.start_offset.unwrap_or_else(|| self.config.category_offset(&rider.category_key()))
    }

    /// Result rows in standing order, optionally for one category.
    ///
    /// Within a category the rank is the row count at each change of
    /// place, so dead heats share a rank.
    pub fn result_lines(&self, category: Option<&str>) -> Vec<ResultLine> {
        let mut lines = Vec::new();
        let mut count = 0u32;
        let mut rank = 0u32;
        let mut last_place = None;
        let mut first_time = None;

        let rows = self.riders.iter().filter(|r| {
            category.is_none_or(|c| r.category_key().eq_ignore_ascii_case(c.trim()))
        });
        for rider in rows {
            count += 1;
            let rank_text = match rider.place {
                Some(place) => {
                    if last_place != Some(place) {
                        rank = count;
                        last_place = Some(place);
                    }
                    rank.to_string()
                }
                None if rider.status != RiderStatus::None => rider.status.code().to_string(),
                None => String::new(),
            };

            let time = if rider.in_race || rider.status == RiderStatus::OutsideTimeLimit {
                rider.effective_bunch().map(|b| b - self.rider_offset(rider))
            } else {
                None
            };
            if first_time.is_none() {
                first_time = time;
            }
            let down = match (time, first_time) {
                (Some(t), Some(first)) if t > first => Some(t - first),
                _ => None,
            };

            lines.push(ResultLine {
                rank: rank_text,
                bib: rider.bib.clone(),
                name: rider.name.clone(),
                category: rider.category.clone(),
                time,
                down,
                bonus: add_times(self.board.bonus(rider.bib.as_str()), rider.bonus),
                penalty: rider.penalty,
                laps: rider.laps,
            });
        }
        lines
    }

    /// Points standings for a tally.
    ///
    /// Riders out of the race are dropped unless the tally keeps them.
    pub fn standings(&self, tally: &str) -> Vec<StandingLine> {
        let keep_dnf = self.config.tallies.iter().find(|t| t.id == tally).is_some_and(|t| t.keep_dnf);
        let mut lines: Vec<StandingLine> = Vec::new();
        for standing in self.board.standings(tally) {
            let Some(rider) = self.riders.get(standing.bib.as_str()) else {
                debug!(bib = %standing.bib, "Standing for deleted rider skipped");
                continue;
            };
            if !rider.in_race && !keep_dnf {
                continue;
            }
            let countback = standing.countback.to_string();
            let rank = match lines.last() {
                Some(prev) if prev.points == standing.points && prev.countback == countback => prev.rank,
                _ => lines.len() as u32 + 1,
            };
            lines.push(StandingLine {
                rank,
                bib: standing.bib,
                name: rider.name.clone(),
                points: standing.points,
                countback,
            });
        }
        lines
    }

    /// Riders with a time bonus, in standing order.
    pub fn bonus_list(&self) -> Vec<(Bib, Tod)> {
        self.riders
            .iter()
            .filter_map(|r| {
                add_times(self.board.bonus(r.bib.as_str()), r.bonus).map(|b| (r.bib.clone(), b))
            })
            .filter(|(_, b)| *b != Tod::ZERO)
            .collect()
    }

    /// Every registered bib, sorted.
    pub fn start_list(&self) -> String {
        let mut bibs: Vec<&Bib> = self.riders.bibs().collect();
        bibs.sort();
        bibs.iter().map(|b| b.as_str()).collect::<Vec<_>>().join(" ")
    }

    /// Bibs of the riders who started, sorted.
    pub fn starters(&self) -> String {
        let mut bibs: Vec<&Bib> = self
            .riders
            .iter()
            .filter(|r| r.status != RiderStatus::DidNotStart || r.in_race)
            .map(|r| &r.bib)
            .collect();
        bibs.sort();
        bibs.iter().map(|b| b.as_str()).collect::<Vec<_>>().join(" ")
    }

    /// Ranked riders of an intermediate; dead heats share a rank.
    pub fn intermediate_lines(&self, id: &str) -> Vec<(u32, Bib, String)> {
        let Some(ledger) = self.intermediates.get(id) else {
            return Vec::new();
        };
        let mut lines = Vec::new();
        let mut rank = 1u32;
        for group in ledger.groups() {
            for bib in group {
                if let Some(rider) = self.riders.get(bib.as_str()) {
                    lines.push((rank, bib.clone(), display_name(rider)));
                }
            }
            rank += group.len() as u32;
        }
        lines
    }

    pub fn snapshot(&self) -> ResultSnapshot {
        ResultSnapshot {
            race_status: self.summary.race_status,
            timer_status: self.clock.status(),
            start: self.clock.start(),
            finish: self.clock.finish(),
            on_lap: self.clock.on_lap(),
            total_laps: self.clock.total_laps(),
            winner_bunch: self.summary.winner_bunch,
            time_limit: self.summary.time_limit,
            places: self.places.to_string(),
            lines: self.result_lines(None),
        }
    }

    /// Announce the placed riders as a provisional or final result.
    pub(crate) fn announce_finish(&mut self) {
        let is_final = self.summary.race_status == RaceStatus::Final;
        let title = if self.config.title.is_empty() { "Result".to_string() } else { self.config.title.clone() };
        let suffix = if is_final { ": Final Result" } else { ": Provisional" };

        let mut announcements = vec![Announcement::Title(format!("{title}{suffix}"))];
        let mut scroll = Vec::new();
        for line in self.result_lines(None).into_iter().filter(|l| l.rank.parse::<u32>().is_ok()) {
            let Some(rider) = self.riders.get(line.bib.as_str()) else { continue };
            let name = display_name(rider);
            if scroll.len() < SCROLL_ENTRIES {
                scroll.push(format!("{}. {}", line.rank, name));
            }
            announcements.push(Announcement::Rider {
                rank: format!("{}.", line.rank),
                bib: line.bib,
                name,
                category: line.category,
                time: line.time.map(|t| t.timestr(0)).unwrap_or_default(),
            });
        }
        let prefix = if is_final { "Result - " } else { "Provisional - " };
        announcements.insert(1, Announcement::ScrollMessage(format!("{prefix}{}", scroll.join(" "))));
        announcements.push(Announcement::Redraw);

        info!("Announce {} result", if is_final { "final" } else { "provisional" });
        for announcement in announcements {
            self.announce(announcement);
        }
    }

    /// Announce an intermediate with its ranked riders.
    pub(crate) fn announce_intermediate(&mut self, id: &str) {
        let descr = self
            .config
            .intermediate(id)
            .map(|i| if i.descr.is_empty() { i.id.clone() } else { i.descr.clone() })
            .unwrap_or_else(|| id.to_string());
        let lines = self.intermediate_lines(id);

        let mut scroll = descr.clone();
        for (rank, _, name) in lines.iter().take(SCROLL_ENTRIES) {
            scroll.push_str(&format!(" {rank}. {name}"));
        }
        self.announce(Announcement::Title(descr));
        self.announce(Announcement::ScrollMessage(scroll));
        for (rank, bib, name) in lines {
            let category = self.riders.get(bib.as_str()).map(|r| r.category.clone()).unwrap_or_default();
            self.announce(Announcement::Rider { rank: format!("{rank}."), bib, name, category, time: String::new() });
        }
        self.announce(Announcement::Redraw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RaceConfig;
    use crate::test_utils::{running_race, running_race_with};

    fn finish(race: &mut Race, passings: &[(&str, i64)]) {
        race.arm_finish().unwrap();
        for (bib, ms) in passings {
            race.manual_passing(&[Bib::new(*bib)], Tod::from_millis(*ms));
        }
    }

    #[test]
    fn dead_heat_shares_rank_and_down_times() {
        let mut race = running_race(&["1", "2", "3", "4"]);
        finish(&mut race, &[("1", 61_000), ("2", 61_500), ("3", 64_000)]);
        race.set_finish_places("1-2 3").unwrap();
        race.set_status(&[Bib::new("4")], RiderStatus::DidNotFinish);
        race.recalculate();

        let lines = race.result_lines(None);
        let ranks: Vec<&str> = lines.iter().map(|l| l.rank.as_str()).collect();
        assert_eq!(ranks, ["1", "1", "3", "dnf"]);
        assert_eq!(lines[1].down, None);
        assert_eq!(lines[2].down, Some(Tod::from_secs(3)));
        assert_eq!(lines[3].time, None);
    }

    #[test]
    fn category_ranks_count_rows() {
        let mut race = running_race(&["1", "21", "2", "22"]);
        finish(&mut race, &[("1", 100_000), ("21", 110_000), ("2", 120_000), ("22", 130_000)]);
        race.set_finish_places("1 21 2 22").unwrap();
        race.recalculate();

        let b: Vec<(String, String)> =
            race.result_lines(Some("b")).into_iter().map(|l| (l.rank, l.bib.to_string())).collect();
        assert_eq!(b, [("1".to_string(), "21".to_string()), ("2".to_string(), "22".to_string())]);
    }

    #[test]
    fn finish_announcement_scrolls_top_five() {
        let config = RaceConfig { title: "Club Race".to_string(), ..RaceConfig::default() };
        let bibs = ["1", "2", "3", "4", "21", "22"];
        let mut race = running_race_with(config, &bibs);
        let passings: Vec<(&str, i64)> =
            bibs.iter().enumerate().map(|(i, b)| (*b, 100_000 + i as i64 * 5000)).collect();
        finish(&mut race, &passings);
        race.set_finish_places("1 2 3 4 21 22").unwrap();
        race.take_announcements();
        race.recalculate();

        let announced = race.take_announcements();
        assert!(announced.contains(&Announcement::Title("Club Race: Final Result".to_string())));
        let scroll = announced.iter().find_map(|a| match a {
            Announcement::ScrollMessage(msg) => Some(msg.clone()),
            _ => None,
        });
        assert_eq!(
            scroll.as_deref(),
            Some("Result - 1. Cadel EVANS 2. Robbie MCEWEN 3. Stuart O'GRADY 4. Baden COOKE 5. Kathy WATT")
        );
        let riders = announced.iter().filter(|a| matches!(a, Announcement::Rider { .. })).count();
        assert_eq!(riders, 6);
    }

    #[test]
    fn start_lists_sort_numerically() {
        let mut race = running_race(&["21", "3", "12"]);
        race.set_status(&[Bib::new("3")], RiderStatus::DidNotStart);
        assert_eq!(race.start_list(), "3 12 21");
        assert_eq!(race.starters(), "12 21");
    }

    #[test]
    fn snapshot_serializes() {
        let mut race = running_race(&["1"]);
        race.recalculate();
        let snapshot = race.snapshot();
        assert_eq!(snapshot.race_status, RaceStatus::Virtual);
        let yaml = serde_yaml_ng::to_string(&snapshot).unwrap();
        assert!(yaml.contains("timer_status: running"));
    }
}

//! The race model of record
//!
//! [`Race`] owns the rider table, the finish and intermediate places, the
//! timing clock and the derived results. Every mutation goes through a
//! method here; the pipeline itself only runs from [`Race::recalculate`],
//! which the engine calls on its tick when the race is dirty.
//!
//! ```rust
//! use roadrace::config::RaceConfig;
//! use roadrace::race::Race;
//! use roadrace::registry::RiderRegistry;
//! use roadrace::types::Tod;
//!
//! let mut race = Race::new(RaceConfig::default(), RiderRegistry::new());
//! race.add_rider("1").unwrap();
//! race.arm_start().unwrap();
//! race.start_trigger(Tod::ZERO);
//! race.arm_finish().unwrap();
//! race.manual_passing(&["1".into()], Tod::from_secs(61));
//! race.recalculate();
//! assert_eq!(race.riders().get("1").unwrap().bunch, Some(Tod::from_secs(61)));
//! ```

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointManager;
use crate::clock::{ArmStartOutcome, TimerStatus, TimingClock};
use crate::config::{RESERVED_SOURCES, RaceConfig, RaceType};
use crate::contest::{ContestTallyEngine, TallyBoard};
use crate::decoder::DecoderEvent;
use crate::ingest::{MANUAL_SOURCE, PassingIngestor, PassingOutcome};
use crate::laps::{ArmLap, ArmedLap, LapEvent, LapStateMachine};
use crate::places::PlacesLedger;
use crate::recalc::{RecalcSummary, ResultRecalculator};
use crate::registry::RiderRegistry;
use crate::scoreboard::{Announcement, CategoryLapsToGo};
use crate::types::{Bib, Rider, RiderStatus, RiderTable, Tod};
use crate::{RaceError, Result};

/// Delay between the start trigger and the automatic first lap of a crit.
pub const CRIT_ARM_DELAY: Tod = Tod::from_secs(10);

/// Intermediate id listing the riders in a break.
pub const BREAK_INTERMEDIATE: &str = "brk";

/// One mass-start race.
pub struct Race {
    pub(crate) config: RaceConfig,
    pub(crate) registry: RiderRegistry,
    pub(crate) riders: RiderTable,
    pub(crate) places: PlacesLedger,
    pub(crate) intermediates: BTreeMap<String, PlacesLedger>,
    pub(crate) clock: TimingClock,
    ingestor: PassingIngestor,
    laps: LapStateMachine,
    contests: ContestTallyEngine,
    pub(crate) recalc: ResultRecalculator,
    pub(crate) board: TallyBoard,
    undo: CheckpointManager,
    pub(crate) comments: Vec<String>,
    pub(crate) summary: RecalcSummary,
    outbox: Vec<Announcement>,
    dirty: bool,
    /// Deadline for the automatic first lap of a crit
    auto_arm_at: Option<Tod>,
    /// Announce the finish once the next recalculation is done
    finish_pending: bool,
    bunch_trigger: Option<Tod>,
}

impl Race {
    pub fn new(config: RaceConfig, registry: RiderRegistry) -> Self {
        let cat_sources = config.category_sources();
        let intermediates = config
            .intermediates
            .iter()
            .filter(|i| {
                !i.id.is_empty()
                    && !RESERVED_SOURCES.contains(&i.id.as_str())
                    && !cat_sources.contains_key(&i.id)
            })
            .map(|i| (i.id.clone(), PlacesLedger::parse(&i.places)))
            .collect();

        let mut board = TallyBoard::default();
        board.reset(&config.tallies);

        Self {
            clock: TimingClock::new(config.total_laps()),
            ingestor: PassingIngestor::from_config(&config),
            laps: LapStateMachine::from_config(&config),
            contests: ContestTallyEngine::from_config(&config),
            recalc: ResultRecalculator::from_config(&config),
            board,
            registry,
            riders: RiderTable::new(),
            places: PlacesLedger::new(),
            intermediates,
            undo: CheckpointManager::new(),
            comments: Vec::new(),
            summary: RecalcSummary::default(),
            outbox: Vec::new(),
            dirty: false,
            auto_arm_at: None,
            finish_pending: false,
            bunch_trigger: None,
            config,
        }
    }

    pub fn config(&self) -> &RaceConfig {
        &self.config
    }

    pub fn registry(&self) -> &RiderRegistry {
        &self.registry
    }

    pub fn riders(&self) -> &RiderTable {
        &self.riders
    }

    pub fn places(&self) -> &PlacesLedger {
        &self.places
    }

    pub fn intermediate_places(&self, id: &str) -> Option<&PlacesLedger> {
        self.intermediates.get(id)
    }

    pub fn clock(&self) -> &TimingClock {
        &self.clock
    }

    pub fn tally_board(&self) -> &TallyBoard {
        &self.board
    }

    /// Summary of the last recalculation.
    pub fn summary(&self) -> &RecalcSummary {
        &self.summary
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    /// Time recorded by the auxiliary timer while the finish was armed.
    pub fn bunch_trigger(&self) -> Option<Tod> {
        self.bunch_trigger
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Drain queued scoreboard announcements.
    pub fn take_announcements(&mut self) -> Vec<Announcement> {
        std::mem::take(&mut self.outbox)
    }

    pub(crate) fn announce(&mut self, announcement: Announcement) {
        self.outbox.push(announcement);
    }

    pub fn elapsed(&self, now: Tod) -> Option<Tod> {
        self.clock.elapsed(now)
    }

    fn checkpoint(&mut self) {
        self.undo.checkpoint(&self.riders, &self.places);
    }

    // Riders

    /// Add a rider, taking name and category from the registry.
    pub fn add_rider(&mut self, bib: &str) -> Result<()> {
        let bib = Bib::new(bib);
        if bib.as_str().is_empty() {
            return Err(RaceError::unknown_rider(bib.as_str()));
        }
        let mut rider = Rider::new(bib.clone());
        if let Some(entry) = self.registry.get(bib.as_str()) {
            rider.name = entry.list_name();
            rider.short_name = entry.short_name();
            rider.category = entry.category.trim().to_uppercase();
        }
        self.riders.insert(rider)?;
        info!(bib = %bib, "Rider added");
        self.dirty = true;
        Ok(())
    }

    pub fn add_riders(&mut self, bibs: &[Bib]) -> usize {
        if !bibs.iter().any(|bib| !bib.as_str().is_empty() && !self.riders.contains(bib.as_str())) {
            warn!("No new riders to add");
            return 0;
        }
        self.checkpoint();
        bibs.iter()
            .filter(|bib| match self.add_rider(bib.as_str()) {
                Ok(()) => true,
                Err(e) => {
                    warn!(bib = %bib, "{}", e);
                    false
                }
            })
            .count()
    }

    /// Delete riders and purge them from every place list.
    pub fn delete_riders(&mut self, bibs: &[Bib]) -> usize {
        if !self.any_rider(bibs) {
            warn!("No riders to delete");
            return 0;
        }
        self.checkpoint();
        let mut deleted = 0;
        for bib in bibs {
            if self.riders.remove(bib.as_str()).is_none() {
                warn!(bib = %bib, "Delete of unknown rider ignored");
                continue;
            }
            self.places.remove(bib.as_str());
            for ledger in self.intermediates.values_mut() {
                ledger.remove(bib.as_str());
            }
            info!(bib = %bib, "Rider deleted");
            deleted += 1;
        }
        self.dirty |= deleted > 0;
        deleted
    }

    fn any_rider(&self, bibs: &[Bib]) -> bool {
        bibs.iter().any(|bib| self.riders.contains(bib.as_str()))
    }

    /// Checkpoint and apply to each known rider; nothing happens when no
    /// bib is known.
    fn for_each_rider<F>(&mut self, bibs: &[Bib], mut apply: F) -> usize
    where
        F: FnMut(&mut Rider),
    {
        if !self.any_rider(bibs) {
            for bib in bibs {
                warn!(bib = %bib, "Unknown rider ignored");
            }
            return 0;
        }
        self.checkpoint();
        let mut count = 0;
        for bib in bibs {
            match self.riders.get_mut(bib.as_str()) {
                Some(rider) => {
                    apply(rider);
                    count += 1;
                }
                None => warn!(bib = %bib, "Unknown rider ignored"),
            }
        }
        self.dirty |= count > 0;
        count
    }

    /// Apply a result status. Every status except `wd` takes the rider
    /// out of the race.
    pub fn set_status(&mut self, bibs: &[Bib], status: RiderStatus) -> usize {
        self.for_each_rider(bibs, |rider| {
            rider.status = status;
            if status.removes_from_race() {
                rider.in_race = false;
            }
            info!(bib = %rider.bib, "Status: {}", status.description());
        })
    }

    /// Put riders back in the race with no status.
    pub fn return_riders(&mut self, bibs: &[Bib]) -> usize {
        self.for_each_rider(bibs, |rider| {
            rider.in_race = true;
            rider.status = RiderStatus::None;
            info!(bib = %rider.bib, "Returned to race");
        })
    }

    pub fn set_laps(&mut self, bib: &str, laps: u32) -> Result<()> {
        let rider = self.riders.get_mut(bib).ok_or_else(|| RaceError::unknown_rider(bib))?;
        rider.laps = laps;
        info!(bib = %bib, "Lap count set to {}", laps);
        self.dirty = true;
        Ok(())
    }

    pub fn set_start_offset(&mut self, bib: &str, offset: Option<Tod>) -> Result<()> {
        let rider = self.riders.get_mut(bib).ok_or_else(|| RaceError::unknown_rider(bib))?;
        rider.start_offset = offset;
        self.dirty = true;
        Ok(())
    }

    pub fn add_comment(&mut self, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            info!("Comment: {}", text);
            self.comments.push(text.to_string());
        }
    }

    // Passings

    /// Inject an operator passing for each rider at `now`.
    pub fn manual_passing(&mut self, bibs: &[Bib], now: Tod) -> Vec<(Bib, PassingOutcome)> {
        let mut outcomes = Vec::new();
        for bib in bibs {
            match self.record_passing(bib, now, MANUAL_SOURCE) {
                Ok(outcome) => outcomes.push((bib.clone(), outcome)),
                Err(e) => warn!(bib = %bib, "{}", e),
            }
        }
        outcomes
    }

    /// Apply one decoder event.
    ///
    /// Returns the passing outcome for rider passings, `None` for other
    /// events.
    pub fn handle_decoder_event(&mut self, event: DecoderEvent) -> Result<Option<PassingOutcome>> {
        match event {
            DecoderEvent::Passing { time, refid, source } => {
                let bib = self.registry.resolve(&refid);
                if !self.riders.contains(bib.as_str()) {
                    let spare = self.registry.get(bib.as_str()).is_some_and(|e| e.is_spare());
                    if self.config.allow_spares && spare {
                        info!(bib = %bib, "Adding spare bike");
                        self.add_rider(bib.as_str())?;
                    } else {
                        warn!(bib = %bib, "Unknown rider @ {}/{}", time.timestr(2), source);
                        return Err(RaceError::unknown_rider(bib.as_str()));
                    }
                }
                if self.clock.status() == TimerStatus::ArmStart && self.ingestor.admits_source(&source) {
                    self.start_trigger(time);
                }
                self.record_passing(&bib, time, &source).map(Some)
            }
            DecoderEvent::StartTrigger { time } => {
                self.announce(Announcement::DecoderTrigger(time));
                self.start_trigger(time);
                Ok(None)
            }
            DecoderEvent::Status { source, message } => {
                info!("Decoder {} status: {}", source, message);
                Ok(None)
            }
            DecoderEvent::Impulse { time, channel } => {
                if self.clock.take_aux_impulse() {
                    info!("Bunch trigger C{}: {}", channel, time.timestr(2));
                    self.bunch_trigger = Some(time);
                    self.announce(Announcement::DecoderTrigger(time));
                } else {
                    debug!("Impulse C{} ignored @ {}", channel, time.timestr(2));
                }
                Ok(None)
            }
        }
    }

    fn record_passing(&mut self, bib: &Bib, at: Tod, source: &str) -> Result<PassingOutcome> {
        let (offset, target) = {
            let rider = self.riders.get(bib.as_str()).ok_or_else(|| RaceError::unknown_rider(bib.as_str()))?;
            let category = rider.category_key();
            (
                rider.start_offset.unwrap_or_else(|| self.config.category_offset(&category)),
                self.config.category_target(&category),
            )
        };

        let rider = self.riders.get_mut(bib.as_str()).ok_or_else(|| RaceError::unknown_rider(bib.as_str()))?;
        let outcome = self.ingestor.accept(rider, at, source, &self.clock, offset);
        if !outcome.is_accepted() {
            return Ok(outcome);
        }
        self.dirty = true;

        let routing = self.laps.route_passing(&mut self.clock, rider, at, target);
        let seen = Announcement::Rider {
            rank: String::new(),
            bib: rider.bib.clone(),
            name: rider.short_name.clone(),
            category: rider.category.clone(),
            time: self.clock.start().map(|start| (at - start).timestr(0)).unwrap_or_default(),
        };
        debug!(bib = %bib, "Passing routed: {:?}", routing.outcome);
        for event in routing.events {
            match event {
                LapEvent::RaceFinish(at) => self.announce(Announcement::Finish(Some(at))),
                LapEvent::LapFinish { at, on_lap } => {
                    self.announce(Announcement::LapFinish(Some(at)));
                    self.announce(Announcement::OnLap(on_lap));
                }
                LapEvent::LapArmed(armed) => self.announce_armed_lap(armed),
                LapEvent::CategoryLap { category, lap } => {
                    debug!("Category {} on lap {}", category, lap);
                    self.announce_category_laps();
                }
                LapEvent::RiderSeen { .. } => self.announce(seen.clone()),
            }
        }
        Ok(outcome)
    }

    // Timer

    pub fn arm_start(&mut self) -> Result<()> {
        match self.clock.arm_start()? {
            ArmStartOutcome::Armed => {
                self.reset_category_laps();
                info!("Start armed");
            }
            ArmStartOutcome::Disarmed => info!("Start disarmed"),
            ArmStartOutcome::Running => info!("Timer running"),
        }
        self.announce(Announcement::TimerStatus(self.clock.status()));
        Ok(())
    }

    /// Start the race if the start is armed.
    /// Restart every targeted category at lap 0.
    fn reset_category_laps(&mut self) {
        let targeted: Vec<String> = self
            .config
            .categories
            .iter()
            .filter(|c| c.target_laps.is_some_and(|n| n > 0))
            .map(|c| c.id.to_uppercase())
            .collect();
        if self.clock.reset_category_laps(targeted) {
            self.announce_category_laps();
        }
    }

    pub fn start_trigger(&mut self, at: Tod) -> bool {
        if !self.clock.start_trigger(at) {
            return false;
        }
        self.reset_category_laps();
        if self.config.race_type == RaceType::Crit {
            self.auto_arm_at = Some(at + CRIT_ARM_DELAY);
        }
        self.dirty = true;
        self.reannounce_times();
        true
    }

    pub fn arm_lap(&mut self) {
        match self.laps.arm_lap(&mut self.clock) {
            ArmLap::TimesOnly => self.reannounce_times(),
            ArmLap::Armed(armed) => self.announce_armed_lap(armed),
        }
    }

    /// Toggle finish arming; returns true when armed.
    pub fn arm_finish(&mut self) -> Result<bool> {
        let status = self.clock.status();
        if matches!(status, TimerStatus::Ready | TimerStatus::Running | TimerStatus::Finished)
            && self.clock.lap_pending_before_finish()
        {
            self.arm_lap();
        }
        let armed = self.clock.arm_finish()?;
        info!("Finish {}", if armed { "armed" } else { "disarmed" });
        self.announce(Announcement::TimerStatus(self.clock.status()));
        if armed {
            self.announce(Announcement::LapLabel(None));
            self.announce(Announcement::FinishString(Some("Finish".to_string())));
        } else {
            self.announce(Announcement::LapLabel(Some(self.lap_label())));
        }
        Ok(armed)
    }

    /// Confirm the race finished.
    pub fn set_finished(&mut self, now: Tod) -> Result<()> {
        self.clock.set_finished(now)?;
        info!("Race finished");
        self.finish_pending = true;
        self.dirty = true;
        self.reannounce_times();
        Ok(())
    }

    /// Back to idle, clearing the times and every result.
    pub fn reset_timer(&mut self) {
        self.checkpoint();
        self.clock.reset();
        self.auto_arm_at = None;
        self.bunch_trigger = None;
        self.finish_pending = false;
        self.places = PlacesLedger::new();
        for rider in self.riders.iter_mut() {
            rider.laps = 0;
            rider.place = None;
            rider.finish = None;
            rider.bunch = None;
            rider.manual_bunch = None;
            rider.pre_passing = None;
            rider.passings.clear();
        }
        self.board.reset(&self.config.tallies);
        info!("Timer reset");
        self.dirty = true;
        self.announce(Announcement::Clear);
        self.reannounce_times();
    }

    pub fn set_start(&mut self, start: Option<Tod>) {
        self.clock.set_start(start);
        self.dirty = true;
        self.reannounce_times();
    }

    pub fn set_finish(&mut self, finish: Option<Tod>) {
        self.clock.set_finish(finish);
        self.dirty = true;
        self.reannounce_times();
    }

    pub fn set_total_laps(&mut self, total: Option<u32>) {
        self.clock.set_total_laps(total);
        self.reannounce_times();
    }

    pub fn set_current_lap(&mut self, lap: u32) {
        self.clock.set_current_lap(lap);
        self.reannounce_times();
    }

    /// Run deferred timer actions that are due.
    pub fn check_deadlines(&mut self, now: Tod) {
        if self.auto_arm_at.is_some_and(|at| now >= at) {
            self.auto_arm_at = None;
            if self.clock.status() == TimerStatus::Running {
                info!("Auto arming first lap");
                self.arm_lap();
            }
        }
    }

    // Places

    /// Replace the finish places; riders out of the race are rejected.
    pub fn set_finish_places(&mut self, text: &str) -> Result<()> {
        let ledger = PlacesLedger::parse(text);
        ledger.check(&self.riders, false)?;
        self.checkpoint();
        self.places = ledger;
        info!("Finish places: {}", self.places);
        self.finish_pending = true;
        self.dirty = true;
        Ok(())
    }

    /// Replace the places of an intermediate.
    pub fn set_intermediate_places(&mut self, id: &str, text: &str) -> Result<()> {
        let ledger = PlacesLedger::parse(text);
        if id == BREAK_INTERMEDIATE {
            let riders = ledger.bibs().map(|b| b.to_string()).collect::<Vec<_>>().join(" ");
            self.announce(Announcement::BreakRiders(riders));
            self.intermediates.insert(id.to_string(), ledger);
            return Ok(());
        }
        if !self.intermediates.contains_key(id) {
            return Err(RaceError::parse("intermediate", format!("unknown intermediate {id:?}")));
        }
        ledger.check(&self.riders, true)?;
        self.checkpoint();
        info!("Intermediate {} places: {}", id, ledger);
        self.intermediates.insert(id.to_string(), ledger);
        self.dirty = true;
        self.announce_intermediate(id);
        Ok(())
    }

    pub fn fill_places_to(&mut self, bib: &str) -> Result<()> {
        let mut places = self.places.clone();
        places.fill_through(bib, &self.riders)?;
        self.replace_places(places);
        Ok(())
    }

    pub fn append_place(&mut self, bib: &str) -> Result<()> {
        if !self.riders.contains(bib) {
            return Err(RaceError::unknown_rider(bib));
        }
        self.checkpoint();
        self.places.append_next(bib);
        self.dirty = true;
        Ok(())
    }

    pub fn clear_places_from(&mut self, bib: &str) -> Result<()> {
        let mut places = self.places.clone();
        places.clear_from(bib)?;
        self.replace_places(places);
        Ok(())
    }

    pub fn clear_place(&mut self, bib: &str) -> Result<()> {
        let mut places = self.places.clone();
        places.clear_rider(bib)?;
        self.replace_places(places);
        Ok(())
    }

    /// Install an edited ledger once the edit has succeeded.
    fn replace_places(&mut self, places: PlacesLedger) {
        self.checkpoint();
        self.places = places;
        info!("Finish places: {}", self.places);
        self.dirty = true;
    }

    /// Copy the displayed standings into the finish places.
    pub fn transfer_places(&mut self) {
        self.checkpoint();
        self.places = PlacesLedger::from_displayed_order(&self.riders);
        info!("Transferred places: {}", self.places);
        self.dirty = true;
    }

    /// Restore the riders and places saved before the last edit.
    pub fn undo(&mut self) -> Result<()> {
        self.undo.undo(&mut self.riders, &mut self.places)?;
        self.dirty = true;
        Ok(())
    }

    /// Set a rider's manual bunch.
    ///
    /// Empty text clears the rider's finish and bunch; `+t` is a down
    /// time on the winner's bunch. The new time is copied down to the
    /// following placed riders that shared the old bunch or had none.
    pub fn edit_bunch(&mut self, bib: &str, text: &str) -> Result<()> {
        let idx = self.riders.position(bib).ok_or_else(|| RaceError::unknown_rider(bib))?;
        let text = text.trim();
        let new = if text.is_empty() {
            None
        } else if let Some(down) = text.strip_prefix('+') {
            let down: Tod = down.parse()?;
            let winner = self.summary.winner_bunch.unwrap_or(Tod::ZERO);
            Some(winner.checked_add(down).ok_or_else(|| RaceError::InvalidTime { value: text.to_string() })?)
        } else {
            Some(text.parse::<Tod>()?)
        };

        self.checkpoint();
        self.dirty = true;
        let rows = self.riders.rows_mut();
        let Some(new) = new else {
            let rider = &mut rows[idx];
            rider.finish = None;
            rider.manual_bunch = None;
            rider.bunch = None;
            info!(bib = %bib, "Finish and bunch cleared");
            return Ok(());
        };

        let old = rows[idx].effective_bunch();
        rows[idx].manual_bunch = Some(new);
        info!(bib = %bib, "Manual bunch {}", new.timestr(0));
        for rider in rows[idx + 1..].iter_mut() {
            let bunch = rider.effective_bunch();
            if rider.place.is_none() || (bunch.is_some() && bunch != old) {
                break;
            }
            debug!(bib = %rider.bib, "Manual bunch follows {}", bib);
            rider.manual_bunch = Some(new);
        }
        Ok(())
    }

    /// Describe a rider's passings for the operator log.
    pub fn query_rider(&self, bib: &str) -> Result<Vec<String>> {
        let rider = self.riders.get(bib).ok_or_else(|| RaceError::unknown_rider(bib))?;
        let mut lines = Vec::new();

        let standing = match (rider.place, rider.status) {
            (Some(place), _) => format!("place {place}"),
            (None, RiderStatus::None) => "unplaced".to_string(),
            (None, status) => status.code().to_string(),
        };
        let bunch = rider.effective_bunch().map(|b| b.timestr(0)).unwrap_or_else(|| "-".to_string());
        lines.push(format!("{} {}: {} laps, bunch {}, {}", rider.bib, rider.name, rider.laps, bunch, standing));

        if let Some(pre) = rider.pre_passing {
            lines.push(format!("Prepass: {}", pre.timestr(2)));
        }
        let category_offset = self.config.category_offset(&rider.category_key());
        let mut last = self.clock.start().map(|s| s + rider.start_offset.unwrap_or(category_offset));
        for (lap, passing) in rider.passings.iter().enumerate() {
            let split = last.map(|l| (passing.truncate() - l.truncate()).timestr(0)).unwrap_or_default();
            lines.push(format!("Lap {}: {} {}", lap + 1, passing.timestr(2), split));
            last = Some(*passing);
        }
        if let Some(finish) = rider.finish {
            lines.push(format!("Finish: {}", finish.timestr(2)));
        }

        for line in &lines {
            info!(bib = %bib, "{}", line);
        }
        Ok(lines)
    }

    // Results

    /// Run the result pipeline and queue the resulting announcements.
    pub fn recalculate(&mut self) -> &RecalcSummary {
        let finish_before = self.clock.finish();
        let summary = self.recalc.recalculate(
            &mut self.riders,
            &self.places,
            &mut self.clock,
            &self.contests,
            &mut self.board,
            &self.intermediates,
        );
        if self.clock.finish() != finish_before {
            self.announce(Announcement::Finish(self.clock.finish()));
        }
        if let Some(limit) = summary.time_limit.filter(|l| Some(*l) != self.summary.time_limit) {
            self.announce(Announcement::TimeLimit(limit));
        }
        self.summary = summary;
        self.dirty = false;

        if std::mem::take(&mut self.finish_pending) {
            self.announce_finish();
        }
        &self.summary
    }

    fn lap_label(&self) -> String {
        match self.clock.total_laps() {
            Some(total) => format!("Lap {}/{}", self.clock.on_lap(), total),
            None => format!("Lap {}", self.clock.on_lap()),
        }
    }

    fn announce_armed_lap(&mut self, armed: ArmedLap) {
        info!("Armed lap {}", armed.lap);
        self.announce(Announcement::CurrentLap(armed.lap));
        self.announce(Announcement::OnLap(self.clock.on_lap()));
        self.announce(Announcement::LapStart(self.clock.lap_start()));
        self.announce(Announcement::LapFinish(self.clock.lap_finish()));
        if let Some(label) = armed.label {
            self.announce(Announcement::LapLabel(Some(label)));
            self.announce(Announcement::LapType(armed.sprint.then(|| "SPRINT".to_string())));
        }
    }

    /// Queue every timer value for the scoreboard.
    pub fn reannounce_times(&mut self) {
        let clock = &self.clock;
        let mut announcements = vec![
            Announcement::TimerStatus(clock.status()),
            Announcement::Start(clock.start()),
            Announcement::Finish(clock.finish()),
            Announcement::LapStart(clock.lap_start()),
            Announcement::LapFinish(clock.lap_finish()),
            Announcement::OnLap(clock.on_lap()),
            Announcement::CurrentLap(clock.current_lap()),
            Announcement::TotalLaps(clock.total_laps()),
        ];
        if !matches!(clock.status(), TimerStatus::ArmFinish | TimerStatus::Finished) {
            announcements.push(Announcement::LapLabel(Some(self.lap_label())));
        }
        self.outbox.extend(announcements);
    }

    /// Laps to go for the first two categories with a lap target.
    pub fn category_laps_to_go(&self) -> Vec<CategoryLapsToGo> {
        self.config
            .categories
            .iter()
            .filter_map(|cat| {
                let target = cat.target_laps.filter(|&n| n > 0)?;
                let count = self.clock.category_on_lap(&cat.id.to_uppercase())?;
                (count <= target).then(|| CategoryLapsToGo {
                    label: if cat.label.is_empty() { cat.id.to_uppercase() } else { cat.label.clone() },
                    to_go: target - count,
                })
            })
            .take(2)
            .collect()
    }

    pub fn announce_category_laps(&mut self) {
        let mut to_go = self.category_laps_to_go().into_iter();
        let top = to_go.next();
        let bottom = to_go.next();
        self.announce(Announcement::CategoryLaps { top, bottom });
    }
}

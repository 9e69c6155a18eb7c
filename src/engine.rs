//! Shared race engine
//!
//! [`RaceEngine`] wraps the [`Race`] in one mutex and coalesces
//! recalculations behind a dirty flag. Event and command handlers lock,
//! mutate and return; only [`RaceEngine::tick`] runs the pipeline, and
//! never more than one at a time.
//!
//! ```rust
//! use std::sync::Arc;
//! use roadrace::clock::ManualTimeSource;
//! use roadrace::config::RaceConfig;
//! use roadrace::engine::RaceEngine;
//! use roadrace::race::Race;
//! use roadrace::registry::RiderRegistry;
//! use roadrace::scoreboard::NullScoreboard;
//! use roadrace::command::Command;
//! use roadrace::types::Tod;
//!
//! let race = Race::new(RaceConfig::default(), RiderRegistry::new());
//! let engine = RaceEngine::new(race, Arc::new(NullScoreboard), Arc::new(ManualTimeSource::new(Tod::ZERO)));
//! engine.submit_command(Command::parse("add", "1 2 3").unwrap()).unwrap();
//! assert!(engine.tick().unwrap());
//! assert_eq!(engine.latest().unwrap().lines.len(), 3);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use futures::{Stream, StreamExt};
use tracing::{debug, trace, warn};

use crate::clock::TimeSource;
use crate::command::Command;
use crate::decoder::DecoderEvent;
use crate::ingest::PassingOutcome;
use crate::race::Race;
use crate::results::ResultSnapshot;
use crate::scoreboard::Scoreboard;
use crate::types::{Bib, Tod};
use crate::{RaceError, Result};

/// Thread-safe owner of the race model.
pub struct RaceEngine {
    race: Mutex<Race>,
    dirty: AtomicBool,
    scoreboard: Arc<dyn Scoreboard>,
    time: Arc<dyn TimeSource>,
    results: watch::Sender<Option<Arc<ResultSnapshot>>>,
}

impl RaceEngine {
    pub fn new(race: Race, scoreboard: Arc<dyn Scoreboard>, time: Arc<dyn TimeSource>) -> Self {
        let dirty = AtomicBool::new(race.is_dirty());
        let (results, _) = watch::channel(None);
        Self { race: Mutex::new(race), dirty, scoreboard, time, results }
    }

    pub fn now(&self) -> Tod {
        self.time.now()
    }

    fn lock(&self) -> MutexGuard<'_, Race> {
        // a panic inside a handler leaves the model usable
        self.race.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run a closure against the locked race, flushing its announcements.
    pub fn with_race<T>(&self, f: impl FnOnce(&mut Race) -> T) -> T {
        let mut race = self.lock();
        let result = f(&mut race);
        if race.is_dirty() {
            self.dirty.store(true, Ordering::Release);
        }
        let announcements = race.take_announcements();
        drop(race);
        self.scoreboard.announce_all(announcements);
        result
    }

    /// Offer a passing for a rider, as read by a decoder.
    pub fn submit_passing(&self, bib: &Bib, at: Tod, source: &str) -> Result<PassingOutcome> {
        let event = DecoderEvent::passing(at, bib.as_str(), source);
        self.submit_event(event)?.ok_or_else(|| RaceError::unknown_rider(bib.as_str()))
    }

    pub fn submit_event(&self, event: DecoderEvent) -> Result<Option<PassingOutcome>> {
        trace!("Decoder event: {:?}", event);
        self.with_race(|race| race.handle_decoder_event(event))
    }

    pub fn submit_command(&self, command: Command) -> Result<()> {
        let now = self.now();
        self.with_race(|race| race.apply_command(command, now))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Recalculate if anything changed since the last tick.
    ///
    /// Returns whether a recalculation ran. When another recalculation
    /// holds the model the flag is restored and
    /// [`RaceError::ConcurrentRecalcSkipped`] returned.
    pub fn tick(&self) -> Result<bool> {
        let now = self.now();
        let mut race = match self.race.try_lock() {
            Ok(race) => race,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                debug!("Recalculate already in progress");
                return Err(RaceError::ConcurrentRecalcSkipped);
            }
        };

        race.check_deadlines(now);
        let dirty = self.dirty.swap(false, Ordering::AcqRel) || race.is_dirty();
        if !dirty {
            let announcements = race.take_announcements();
            drop(race);
            self.scoreboard.announce_all(announcements);
            return Ok(false);
        }

        race.recalculate();
        let snapshot = Arc::new(race.snapshot());
        let announcements = race.take_announcements();
        drop(race);

        self.results.send_replace(Some(snapshot));
        self.scoreboard.announce_all(announcements);
        Ok(true)
    }

    /// Recalculate now, whether dirty or not.
    pub fn recalculate(&self) -> Result<()> {
        self.dirty.store(true, Ordering::Release);
        match self.tick() {
            Ok(_) => Ok(()),
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                warn!("{}", e);
                Err(e)
            }
        }
    }

    /// Last published snapshot.
    pub fn latest(&self) -> Option<Arc<ResultSnapshot>> {
        self.results.borrow().clone()
    }

    pub fn watch_results(&self) -> watch::Receiver<Option<Arc<ResultSnapshot>>> {
        self.results.subscribe()
    }

    /// Stream of published snapshots, starting with the current one.
    pub fn subscribe_results(&self) -> impl Stream<Item = Arc<ResultSnapshot>> + Send + 'static {
        WatchStream::new(self.results.subscribe()).filter_map(|snapshot| async move { snapshot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimeSource;
    use crate::config::RaceConfig;
    use crate::scoreboard::{Announcement, RecordingScoreboard};
    use crate::test_utils::{registry, running_race};

    fn engine(race: Race) -> (RaceEngine, Arc<RecordingScoreboard>, Arc<ManualTimeSource>) {
        let scoreboard = Arc::new(RecordingScoreboard::new());
        let time = Arc::new(ManualTimeSource::new(Tod::from_secs(60)));
        let engine = RaceEngine::new(race, scoreboard.clone(), time.clone());
        (engine, scoreboard, time)
    }

    #[test]
    fn tick_only_recalculates_when_dirty() {
        let (engine, _, _) = engine(running_race(&["1"]));
        assert!(engine.tick().unwrap());
        assert!(!engine.tick().unwrap());

        engine.submit_passing(&Bib::new("1"), Tod::from_secs(60), "A").unwrap();
        assert!(engine.is_dirty());
        assert!(engine.tick().unwrap());
        assert!(!engine.is_dirty());
    }

    #[test]
    fn concurrent_tick_is_skipped() {
        let (engine, _, _) = engine(running_race(&["1"]));
        engine.with_race(|race| race.mark_dirty());
        let guard = engine.race.lock().unwrap();
        assert!(matches!(engine.tick(), Err(RaceError::ConcurrentRecalcSkipped)));
        drop(guard);
        assert!(engine.is_dirty());
        assert!(engine.tick().unwrap());
    }

    #[test]
    fn commands_use_the_time_source() {
        let (engine, scoreboard, time) = engine(running_race(&["1"]));
        time.set(Tod::from_secs(95));
        engine.submit_command(Command::parse("man", "1").unwrap()).unwrap();
        engine.with_race(|race| assert_eq!(race.riders().get("1").unwrap().passings, vec![Tod::from_secs(95)]));
        assert!(scoreboard.take().iter().any(|a| matches!(a, Announcement::Rider { .. })));
    }

    #[test]
    fn unknown_rider_passing_is_an_error() {
        let (engine, _, _) = engine(Race::new(RaceConfig::default(), registry()));
        assert!(matches!(
            engine.submit_passing(&Bib::new("5"), Tod::from_secs(60), "A"),
            Err(RaceError::UnknownRider { .. })
        ));
    }

    #[tokio::test]
    async fn snapshots_are_streamed() {
        let (engine, _, _) = engine(running_race(&["1", "2"]));
        let mut results = Box::pin(engine.subscribe_results());
        engine.tick().unwrap();
        let snapshot = results.next().await.unwrap();
        assert_eq!(snapshot.lines.len(), 2);
    }
}

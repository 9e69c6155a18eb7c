//! Scoreboard output
//!
//! The race queues [`Announcement`]s as it changes; the engine drains the
//! queue into a [`Scoreboard`] after each mutation and recompute. How an
//! announcement is rendered is up to the sink.

use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::clock::TimerStatus;
use crate::types::{Bib, Tod};

/// Category and laps to go for the category lap display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryLapsToGo {
    pub label: String,
    pub to_go: u32,
}

/// A scoreboard update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    TimerStatus(TimerStatus),
    Start(Option<Tod>),
    Finish(Option<Tod>),
    LapStart(Option<Tod>),
    LapFinish(Option<Tod>),
    OnLap(u32),
    CurrentLap(u32),
    TotalLaps(Option<u32>),
    LapLabel(Option<String>),
    /// `SPRINT` on sprint laps
    LapType(Option<String>),
    /// Finish line caption shown when no lap label applies
    FinishString(Option<String>),
    Title(String),
    CategoryLaps {
        top: Option<CategoryLapsToGo>,
        bottom: Option<CategoryLapsToGo>,
    },
    Rider {
        rank: String,
        bib: Bib,
        name: String,
        category: String,
        time: String,
    },
    ScrollMessage(String),
    BreakRiders(String),
    TimeLimit(Tod),
    DecoderTrigger(Tod),
    /// Flush pending output
    Redraw,
    Clear,
}

/// Destination for announcements.
pub trait Scoreboard: Send + Sync {
    fn announce(&self, announcement: Announcement);

    fn announce_all(&self, announcements: Vec<Announcement>) {
        for announcement in announcements {
            self.announce(announcement);
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullScoreboard;

impl Scoreboard for NullScoreboard {
    fn announce(&self, announcement: Announcement) {
        trace!("Scoreboard (null): {:?}", announcement);
    }
}

/// Forwards announcements over an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelScoreboard {
    tx: mpsc::UnboundedSender<Announcement>,
}

impl ChannelScoreboard {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Announcement>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Scoreboard for ChannelScoreboard {
    fn announce(&self, announcement: Announcement) {
        if self.tx.send(announcement).is_err() {
            trace!("Scoreboard receiver dropped");
        }
    }
}

/// Keeps every announcement, for tests and replays.
#[derive(Debug, Default)]
pub struct RecordingScoreboard {
    log: Mutex<Vec<Announcement>>,
}

impl RecordingScoreboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<Announcement> {
        match self.log.lock() {
            Ok(mut log) => std::mem::take(&mut *log),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Scoreboard for RecordingScoreboard {
    fn announce(&self, announcement: Announcement) {
        match self.log.lock() {
            Ok(mut log) => log.push(announcement),
            Err(poisoned) => poisoned.into_inner().push(announcement),
        }
    }
}

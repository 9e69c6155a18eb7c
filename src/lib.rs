//! Timing and results engine for mass-start road races.
//!
//! Roadrace turns the passings read by RFID lap and finish decoders into
//! laps, finish places, bunch times and points standings, while operators
//! correct the result as the race unfolds.
//!
//! # Features
//!
//! - **Passing validation**: early, duplicate and spurious reads are rejected
//!   per rider against the minimum lap time
//! - **Lap tracking**: leader laps armed by the operator, or per-category lap
//!   targets counted from each rider's own passings
//! - **Results**: finish places with dead heats, bunch times, time limits,
//!   intermediate sprints, points tallies with countback
//! - **Live operation**: decoder events and operator commands are applied
//!   under one lock; recalculation is coalesced on a periodic tick
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use roadrace::clock::SystemTimeSource;
//! use roadrace::config::RaceConfig;
//! use roadrace::decoder::ReplaySource;
//! use roadrace::driver::Driver;
//! use roadrace::engine::RaceEngine;
//! use roadrace::race::Race;
//! use roadrace::registry::RiderRegistry;
//! use roadrace::scoreboard::ChannelScoreboard;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RaceConfig::load("race.yaml")?;
//!     let registry = RiderRegistry::load("riders.yaml")?;
//!     let (scoreboard, _announcements) = ChannelScoreboard::new();
//!
//!     let race = Race::new(config, registry);
//!     let engine = Arc::new(RaceEngine::new(race, Arc::new(scoreboard), Arc::new(SystemTimeSource)));
//!     let source = ReplaySource::from_log("replay", &std::fs::read_to_string("passings.log")?)?;
//!     let _driver = Driver::spawn(engine.clone(), source);
//!
//!     let mut results = Box::pin(engine.subscribe_results());
//!     while let Some(snapshot) = results.next().await {
//!         println!("{}: {} riders", snapshot.race_status, snapshot.lines.len());
//!     }
//!     Ok(())
//! }
//! ```

mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Race model
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod contest;
pub mod ingest;
pub mod laps;
pub mod places;
pub mod race;
pub mod recalc;
pub mod registry;

// Operation and output
pub mod command;
pub mod decoder;
pub mod driver;
pub mod engine;
pub mod persist;
pub mod results;
pub mod scoreboard;

// Core exports
pub use error::*;

pub use clock::{TimeSource, TimerStatus};
pub use command::Command;
pub use config::RaceConfig;
pub use decoder::{DecoderEvent, DecoderSource};
pub use driver::{Driver, DriverHandle};
pub use engine::RaceEngine;
pub use race::Race;
pub use recalc::RaceStatus;
pub use registry::RiderRegistry;
pub use results::ResultSnapshot;
pub use scoreboard::{Announcement, Scoreboard};

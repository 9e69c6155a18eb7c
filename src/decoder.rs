//! Decoder events and event sources

use std::collections::VecDeque;
use tokio::time::{Duration, Interval, interval};
use tracing::{debug, info};

use crate::types::Tod;
use crate::{RaceError, Result};

/// Channel marking a decoder status message.
pub const STATUS_CHANNEL: &str = "STS";

/// Tag ids that the decoder sends for its start trigger input.
pub const TRIGGER_REFIDS: &[&str] = &["", "255"];

/// Event as read off the decoder, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPassing {
    pub time: Tod,
    pub refid: String,
    pub source: String,
    pub channel: String,
}

/// Classified decoder event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderEvent {
    Passing { time: Tod, refid: String, source: String },
    StartTrigger { time: Tod },
    Status { source: String, message: String },
    /// Auxiliary timer impulse
    Impulse { time: Tod, channel: u8 },
}

impl DecoderEvent {
    pub fn from_raw(raw: RawPassing) -> Self {
        let refid = raw.refid.trim();
        if raw.channel.eq_ignore_ascii_case(STATUS_CHANNEL) {
            DecoderEvent::Status { source: raw.source, message: refid.to_string() }
        } else if TRIGGER_REFIDS.contains(&refid) {
            DecoderEvent::StartTrigger { time: raw.time }
        } else {
            DecoderEvent::Passing { time: raw.time, refid: refid.to_string(), source: raw.source }
        }
    }

    pub fn passing(time: Tod, refid: impl Into<String>, source: impl Into<String>) -> Self {
        DecoderEvent::Passing { time, refid: refid.into(), source: source.into() }
    }

    pub fn time(&self) -> Option<Tod> {
        match self {
            DecoderEvent::Passing { time, .. }
            | DecoderEvent::StartTrigger { time }
            | DecoderEvent::Impulse { time, .. } => Some(*time),
            DecoderEvent::Status { .. } => None,
        }
    }
}

/// Trait for decoder event sources
///
/// A source owns its connection and its own pacing; the driver simply
/// awaits the next event.
#[async_trait::async_trait]
pub trait DecoderSource: Send + 'static {
    /// Get the next decoder event
    ///
    /// Returns:
    /// - `Ok(Some(event))` - New event available
    /// - `Ok(None)` - Stream ended (normal termination)
    /// - `Err(e)` - Transient error, the caller may retry
    async fn next_event(&mut self) -> Result<Option<DecoderEvent>>;

    /// Identifier used in logs
    fn source_id(&self) -> &str;
}

/// Replays a recorded list of decoder events.
pub struct ReplaySource {
    id: String,
    events: VecDeque<DecoderEvent>,
    pace: Option<Interval>,
}

impl ReplaySource {
    pub fn new(id: impl Into<String>, events: impl IntoIterator<Item = DecoderEvent>) -> Self {
        Self { id: id.into(), events: events.into_iter().collect(), pace: None }
    }

    /// Parse a passing log: one `time refid [source] [channel]` per line.
    ///
    /// `time impulse <channel>` records an auxiliary impulse. Blank lines
    /// and `#` comments are skipped.
    pub fn from_log(id: impl Into<String>, log: &str) -> Result<Self> {
        let mut events = Vec::new();
        for (n, line) in log.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let bad_line = |why: &str| RaceError::parse("passing log", format!("line {}: {}", n + 1, why));
            let time: Tod = fields[0].parse().map_err(|_| bad_line("invalid time"))?;
            let refid = fields.get(1).copied().unwrap_or("");
            let third = fields.get(2).copied().unwrap_or("");

            let event = if refid.eq_ignore_ascii_case("impulse") {
                let channel = third.trim_start_matches(['C', 'c']).parse().map_err(|_| bad_line("invalid channel"))?;
                DecoderEvent::Impulse { time, channel }
            } else {
                DecoderEvent::from_raw(RawPassing {
                    time,
                    refid: refid.to_string(),
                    source: third.to_string(),
                    channel: fields.get(3).copied().unwrap_or("").to_string(),
                })
            };
            events.push(event);
        }
        debug!("Loaded {} decoder events", events.len());
        Ok(Self::new(id, events))
    }

    /// Deliver events no faster than one per `period`.
    pub fn with_pace(mut self, period: Duration) -> Self {
        self.pace = Some(interval(period));
        self
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

#[async_trait::async_trait]
impl DecoderSource for ReplaySource {
    async fn next_event(&mut self) -> Result<Option<DecoderEvent>> {
        if let Some(pace) = self.pace.as_mut() {
            pace.tick().await;
        }
        let event = self.events.pop_front();
        if event.is_none() {
            info!("Replay {} exhausted", self.id);
        }
        Ok(event)
    }

    fn source_id(&self) -> &str {
        &self.id
    }
}

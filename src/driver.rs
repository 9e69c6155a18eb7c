//! Driver spawns and manages race processing tasks

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::RaceError;
use crate::decoder::DecoderSource;
use crate::engine::RaceEngine;
use crate::results::ResultSnapshot;

/// Default interval between recalculation ticks.
pub const DEFAULT_TICK: Duration = Duration::from_millis(500);

/// Consecutive decoder errors before the reader gives up.
const MAX_ERRORS: u32 = 10;

/// Handle to running driver tasks
///
/// Dropping the handle cancels both tasks.
pub struct DriverHandle {
    /// Receiver for published result snapshots
    pub results: watch::Receiver<Option<Arc<ResultSnapshot>>>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
    reader: Option<JoinHandle<u64>>,
    ticker: Option<JoinHandle<()>>,
    events: u64,
}

impl DriverHandle {
    /// Cancel both tasks and wait for them to finish.
    ///
    /// Returns the number of decoder events read.
    pub async fn shutdown(mut self) -> u64 {
        self.cancel.cancel();
        let events = self.decoder_finished().await;
        if let Some(ticker) = self.ticker.take() {
            if let Err(e) = ticker.await {
                error!("Ticker task failed: {}", e);
            }
        }
        events
    }

    /// Wait for the decoder stream to end, leaving the ticker running.
    pub async fn decoder_finished(&mut self) -> u64 {
        if let Some(reader) = self.reader.take() {
            self.events = reader.await.unwrap_or_else(|e| {
                error!("Decoder reader task failed: {}", e);
                0
            });
        }
        self.events
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Driver spawns and manages race processing tasks
///
/// Spawns a decoder reader task that owns the [`DecoderSource`] and a ticker
/// task that recalculates results when the race is dirty.
pub struct Driver;

impl Driver {
    /// Spawn driver tasks for the given source with the default tick.
    pub fn spawn<S>(engine: Arc<RaceEngine>, source: S) -> DriverHandle
    where
        S: DecoderSource,
    {
        Self::spawn_with_tick(engine, source, DEFAULT_TICK)
    }

    pub fn spawn_with_tick<S>(engine: Arc<RaceEngine>, source: S, tick: Duration) -> DriverHandle
    where
        S: DecoderSource,
    {
        let cancel = CancellationToken::new();
        let results = engine.watch_results();

        let reader = tokio::spawn(Self::decoder_reader_task(engine.clone(), source, cancel.clone()));
        let ticker = tokio::spawn(Self::ticker_task(engine, tick, cancel.clone()));

        DriverHandle { results, cancel, reader: Some(reader), ticker: Some(ticker), events: 0 }
    }

    /// Decoder reader task - feeds decoder events into the engine
    async fn decoder_reader_task<S>(engine: Arc<RaceEngine>, mut source: S, cancel: CancellationToken) -> u64
    where
        S: DecoderSource,
    {
        info!("Decoder reader task started: {}", source.source_id());
        let mut event_count = 0u64;
        let mut error_count = 0u32;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Decoder reader cancelled");
                    break;
                }
                result = source.next_event() => result,
            };

            match result {
                Ok(Some(event)) => {
                    event_count += 1;
                    error_count = 0;
                    trace!("Event {}: {:?}", event_count, event);
                    match engine.submit_event(event) {
                        Ok(Some(outcome)) => debug!("Passing {}", outcome),
                        Ok(None) => {}
                        // unknown riders and the like are the operator's problem
                        Err(e) => warn!("{}", e),
                    }
                }
                Ok(None) => {
                    info!("Decoder {} stream ended after {} events", source.source_id(), event_count);
                    break;
                }
                Err(e) => {
                    error_count += 1;
                    error!("Decoder error ({}/{}): {}", error_count, MAX_ERRORS, e);

                    if error_count >= MAX_ERRORS {
                        error!("Too many decoder errors, shutting down");
                        break;
                    }

                    // Exponential backoff: 100ms, 200ms, 400ms, ...
                    let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        info!("Decoder reader task ended (processed {} events)", event_count);
        event_count
    }

    /// Ticker task - recalculates results on a fixed interval
    async fn ticker_task(engine: Arc<RaceEngine>, period: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            match engine.tick() {
                Ok(true) => trace!("Results recalculated"),
                Ok(false) => {}
                Err(RaceError::ConcurrentRecalcSkipped) => debug!("Tick skipped, recalculate in progress"),
                Err(e) => warn!("Tick failed: {}", e),
            }
        }

        // publish whatever arrived after the last tick
        if engine.is_dirty() {
            if let Err(e) = engine.tick() {
                warn!("Final tick failed: {}", e);
            }
        }
        info!("Ticker task ended");
    }
}

//! Single-slot undo

use tracing::info;

use crate::places::PlacesLedger;
use crate::types::RiderTable;
use crate::{RaceError, Result};

/// Rider rows and finish places as they were before a destructive edit.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub riders: RiderTable,
    pub places: PlacesLedger,
}

/// Holds at most one checkpoint, the most recent.
#[derive(Debug, Clone, Default)]
pub struct CheckpointManager {
    slot: Option<Checkpoint>,
}

impl CheckpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the model, replacing any earlier checkpoint.
    pub fn checkpoint(&mut self, riders: &RiderTable, places: &PlacesLedger) {
        self.slot = Some(Checkpoint { riders: riders.clone(), places: places.clone() });
    }

    pub fn can_undo(&self) -> bool {
        self.slot.is_some()
    }

    /// Restore the checkpoint into the model and empty the slot.
    pub fn undo(&mut self, riders: &mut RiderTable, places: &mut PlacesLedger) -> Result<()> {
        let Checkpoint { riders: saved_riders, places: saved_places } =
            self.slot.take().ok_or(RaceError::NothingToUndo)?;
        *riders = saved_riders;
        *places = saved_places;
        info!("Rider model restored from checkpoint");
        Ok(())
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

//! Operator commands
//!
//! Rider commands are entered as a code and a free-form rider list
//! (`dnf 12 14,15`); [`Command::parse`] turns them into a [`Command`].
//! Timing and places controls are built directly.

use tracing::{info, warn};

use crate::race::Race;
use crate::types::{Bib, RiderStatus, Tod};
use crate::{RaceError, Result};

/// One operator action on a race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(Vec<Bib>),
    Delete(Vec<Bib>),
    /// Log a rider's passings
    Query(Vec<Bib>),
    Status(RiderStatus, Vec<Bib>),
    /// Return to race, clearing the status
    Return(Vec<Bib>),
    /// Manual passing at the current time
    Manual(Vec<Bib>),
    Comment(String),
    FinishPlaces(String),
    IntermediatePlaces { id: String, places: String },

    ArmStart,
    ArmLap,
    ArmFinish,
    Finished,
    ResetTimer,
    SetStart(Option<Tod>),
    SetFinish(Option<Tod>),
    SetTotalLaps(Option<u32>),
    SetCurrentLap(u32),
    SetTimeLimit(Option<String>),

    FillPlacesTo(Bib),
    AppendPlace(Bib),
    ClearPlacesFrom(Bib),
    ClearPlace(Bib),
    TransferPlaces,
    Undo,
    EditBunch { bib: Bib, text: String },
    SetLaps { bib: Bib, laps: u32 },
    SetStartOffset { bib: Bib, offset: Option<Tod> },
}

impl Command {
    /// Parse a rider command code and its argument text.
    ///
    /// Codes other than the rider commands and status codes are taken as
    /// intermediate ids.
    pub fn parse(code: &str, args: &str) -> Result<Self> {
        let code = code.trim().to_lowercase();
        let bibs = || Bib::parse_list(args);
        let command = match code.as_str() {
            "" => return Err(RaceError::parse("command", "empty command code")),
            "add" => Command::Add(bibs()),
            "del" => Command::Delete(bibs()),
            "que" => Command::Query(bibs()),
            "ret" => Command::Return(bibs()),
            "man" => Command::Manual(bibs()),
            "com" => Command::Comment(args.trim().to_string()),
            "fin" => Command::FinishPlaces(args.to_string()),
            other => match RiderStatus::from_code(other) {
                Some(status) => Command::Status(status, bibs()),
                None if other.chars().all(|c| c.is_ascii_alphanumeric()) => {
                    Command::IntermediatePlaces { id: other.to_string(), places: args.to_string() }
                }
                None => return Err(RaceError::parse("command", format!("unknown code {other:?}"))),
            },
        };
        Ok(command)
    }

    /// Whether applying the command can change results.
    pub fn mutates_results(&self) -> bool {
        !matches!(self, Command::Query(_) | Command::Comment(_))
    }
}

fn require_bibs(code: &str, bibs: &[Bib]) -> Result<()> {
    if bibs.is_empty() {
        warn!("{} without riders ignored", code);
        return Err(RaceError::parse(code, "no riders listed"));
    }
    Ok(())
}

impl Race {
    /// Apply an operator command. `now` is the time of day for manual
    /// passings and the finish confirmation.
    pub fn apply_command(&mut self, command: Command, now: Tod) -> Result<()> {
        info!("Command: {:?}", command);
        match command {
            Command::Add(bibs) => {
                require_bibs("add", &bibs)?;
                self.add_riders(&bibs);
            }
            Command::Delete(bibs) => {
                require_bibs("del", &bibs)?;
                self.delete_riders(&bibs);
            }
            Command::Query(bibs) => {
                for bib in &bibs {
                    if let Err(e) = self.query_rider(bib.as_str()) {
                        warn!("{}", e);
                    }
                }
            }
            Command::Status(status, bibs) => {
                require_bibs(status.code(), &bibs)?;
                self.set_status(&bibs, status);
            }
            Command::Return(bibs) => {
                require_bibs("ret", &bibs)?;
                self.return_riders(&bibs);
            }
            Command::Manual(bibs) => {
                require_bibs("man", &bibs)?;
                for (bib, outcome) in self.manual_passing(&bibs, now) {
                    info!(bib = %bib, "Manual passing {}", outcome);
                }
            }
            Command::Comment(text) => self.add_comment(&text),
            Command::FinishPlaces(places) => self.set_finish_places(&places)?,
            Command::IntermediatePlaces { id, places } => self.set_intermediate_places(&id, &places)?,

            Command::ArmStart => self.arm_start()?,
            Command::ArmLap => self.arm_lap(),
            Command::ArmFinish => {
                self.arm_finish()?;
            }
            Command::Finished => self.set_finished(now)?,
            Command::ResetTimer => self.reset_timer(),
            Command::SetStart(start) => self.set_start(start),
            Command::SetFinish(finish) => self.set_finish(finish),
            Command::SetTotalLaps(total) => self.set_total_laps(total),
            Command::SetCurrentLap(lap) => self.set_current_lap(lap),
            Command::SetTimeLimit(limit) => {
                self.recalc.set_time_limit(limit);
                self.mark_dirty();
            }

            Command::FillPlacesTo(bib) => self.fill_places_to(bib.as_str())?,
            Command::AppendPlace(bib) => self.append_place(bib.as_str())?,
            Command::ClearPlacesFrom(bib) => self.clear_places_from(bib.as_str())?,
            Command::ClearPlace(bib) => self.clear_place(bib.as_str())?,
            Command::TransferPlaces => self.transfer_places(),
            Command::Undo => self.undo()?,
            Command::EditBunch { bib, text } => self.edit_bunch(bib.as_str(), &text)?,
            Command::SetLaps { bib, laps } => self.set_laps(bib.as_str(), laps)?,
            Command::SetStartOffset { bib, offset } => self.set_start_offset(bib.as_str(), offset)?,
        }
        Ok(())
    }
}

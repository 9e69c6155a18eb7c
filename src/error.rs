//! Error types for race timing and results processing.
//!
//! Every failure in the engine is non-fatal: it is logged, the offending
//! input is discarded, and processing continues. Public mutation operations
//! return these errors instead of panicking so the caller (operator console,
//! decoder task) can report them on its own channel.
//!
//! ## Error Categories
//!
//! - **Reference Errors**: commands or contest sources naming unknown riders
//! - **Places Errors**: invalid finish or intermediate place submissions
//! - **Timing Errors**: unparsable times, time limits and invalid timer transitions
//! - **Config Errors**: categories or contests with missing or inconsistent fields
//! - **Concurrency**: a recalculation skipped because another is in flight
//!
//! Passing rejections (early, duplicate, spurious) are not errors; they are
//! reported through [`crate::ingest::PassingOutcome`].
//!
//! ```rust
//! use roadrace::RaceError;
//!
//! let error = RaceError::unknown_rider("101");
//! assert!(!error.is_retryable());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for race operations.
pub type Result<T, E = RaceError> = std::result::Result<T, E>;

/// Main error type for race operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RaceError {
    #[error("Rider {bib} is not in the race")]
    UnknownRider { bib: String },

    #[error("Rider {bib} is already in the race")]
    DuplicateRider { bib: String },

    #[error("Invalid places '{places}': {reason}")]
    InvalidPlaces { places: String, reason: String },

    #[error("{operation} is not available while the places contain a dead heat")]
    DeadHeatUnsupported { operation: String },

    #[error("Unable to decode time limit '{limit}'")]
    UnparsableTimeLimit { limit: String },

    #[error("Invalid time '{value}'")]
    InvalidTime { value: String },

    #[error("Cannot {operation} while timer is {status}")]
    InvalidTransition { operation: String, status: String },

    #[error("Category {category} config: {details}")]
    MissingCategoryConfig { category: String, details: String },

    #[error("Recalculate already in progress")]
    ConcurrentRecalcSkipped,

    #[error("No checkpoint available to undo")]
    NothingToUndo,

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Race file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Decoder {source_id} error: {reason}")]
    Decoder {
        source_id: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl RaceError {
    /// Returns whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RaceError::ConcurrentRecalcSkipped => true,
            RaceError::Decoder { .. } => true,
            RaceError::File { .. } => true,
            RaceError::UnknownRider { .. } => false,
            RaceError::DuplicateRider { .. } => false,
            RaceError::InvalidPlaces { .. } => false,
            RaceError::DeadHeatUnsupported { .. } => false,
            RaceError::UnparsableTimeLimit { .. } => false,
            RaceError::InvalidTime { .. } => false,
            RaceError::InvalidTransition { .. } => false,
            RaceError::MissingCategoryConfig { .. } => false,
            RaceError::NothingToUndo => false,
            RaceError::Parse { .. } => false,
        }
    }

    /// Returns suggested operator actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            RaceError::UnknownRider { .. } => vec![
                "Check the rider number against the start list",
                "Add the rider to the race before assigning results",
            ],
            RaceError::DuplicateRider { .. } => vec!["Rider is already registered, edit instead"],
            RaceError::InvalidPlaces { .. } => vec![
                "Remove duplicate rider numbers from the places",
                "Return withdrawn riders to the race before placing them",
                "Check every placed rider is in the start list",
            ],
            RaceError::DeadHeatUnsupported { .. } => {
                vec!["Edit the finish places directly to resolve the dead heat first"]
            }
            RaceError::UnparsableTimeLimit { .. } => vec![
                "Use an absolute time (h:mm:ss), a down time (+m:ss) or a percentage (8%)",
            ],
            RaceError::InvalidTime { .. } => {
                vec!["Enter times as h:mm:ss.dc, m:ss.dc or seconds"]
            }
            RaceError::InvalidTransition { .. } => vec![
                "Check the timer status before arming",
                "Reset the timer to start over",
            ],
            RaceError::MissingCategoryConfig { .. } => vec![
                "Check the category start offset and target laps",
                "Default values are used until the config is corrected",
            ],
            RaceError::ConcurrentRecalcSkipped => {
                vec!["No action required, the next tick recalculates"]
            }
            RaceError::NothingToUndo => vec!["Only the most recent change can be undone"],
            RaceError::Parse { .. } => vec![
                "Check the file format",
                "Verify source data integrity",
            ],
            RaceError::File { .. } => vec![
                "Check the file exists and is readable",
                "Check file permissions",
            ],
            RaceError::Decoder { .. } => vec![
                "Check the decoder connection",
                "Passings are replayed once the decoder reconnects",
            ],
        }
    }

    /// Helper constructor for unknown rider references.
    pub fn unknown_rider(bib: impl Into<String>) -> Self {
        RaceError::UnknownRider { bib: bib.into() }
    }

    /// Helper constructor for rejected place submissions.
    pub fn invalid_places(places: impl Into<String>, reason: impl Into<String>) -> Self {
        RaceError::InvalidPlaces { places: places.into(), reason: reason.into() }
    }

    /// Helper constructor for timer transitions refused in the current status.
    pub fn invalid_transition(operation: impl Into<String>, status: impl ToString) -> Self {
        RaceError::InvalidTransition { operation: operation.into(), status: status.to_string() }
    }

    /// Helper constructor for parse failures.
    pub fn parse(context: impl Into<String>, details: impl ToString) -> Self {
        RaceError::Parse { context: context.into(), details: details.to_string() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        RaceError::File { path, source }
    }

    /// Helper constructor for decoder failures.
    pub fn decoder(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        RaceError::Decoder { source_id: source_id.into(), reason: reason.into(), source: None }
    }
}

impl From<std::io::Error> for RaceError {
    fn from(err: std::io::Error) -> Self {
        RaceError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}

impl From<serde_yaml_ng::Error> for RaceError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        RaceError::parse("YAML", err)
    }
}

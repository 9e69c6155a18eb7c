//! Race configuration
//!
//! The configuration is an explicit value handed to [`crate::race::Race::new`];
//! nothing reads it from global state. It is normally loaded from YAML:
//!
//! ```rust
//! use roadrace::config::RaceConfig;
//! use roadrace::types::Tod;
//!
//! let config = RaceConfig::from_yaml(r#"
//! title: Club Criterium
//! race_type: crit
//! min_lap: 45
//! total_laps: 20
//! sprint_laps: [5, 10, 15]
//! categories:
//!   - id: A
//!   - id: B
//!     start_offset: "1:00"
//!     target_laps: 15
//! contests:
//!   - id: fin
//!     tally: sprint
//!     points: [10, 6, 3]
//!     bonuses: [10, 6, 4]
//! tallies:
//!   - id: sprint
//! "#).unwrap();
//!
//! assert_eq!(config.pass_threshold(), Tod::from_secs(45));
//! assert_eq!(config.category_offset("b"), Tod::from_secs(60));
//! assert_eq!(config.category_target("B"), Some(15));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

use crate::types::Tod;
use crate::{RaceError, Result};

/// Minimum interval between two passings when `min_lap` is not configured.
pub const DEFAULT_PASS_THRESHOLD: Tod = Tod::from_secs(30);

/// Elapsed-time gap that starts a new bunch when not configured.
pub const DEFAULT_GAP_THRESHOLD: Tod = Tod::from_millis(1120);

/// Contest sources that are not intermediates.
pub const RESERVED_SOURCES: &[&str] = &["fin", "reg", "start"];

/// Race format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaceType {
    /// Open road race, laps armed by the operator
    #[default]
    Road,
    /// Criterium, first lap armed automatically after the start
    Crit,
}

/// Per-category start stagger and lap target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub start_offset: Option<Tod>,
    #[serde(default)]
    pub target_laps: Option<u32>,
}

/// Intermediate sprint or climb with its recorded places.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntermediateConfig {
    pub id: String,
    pub descr: String,
    pub abbr: String,
    pub places: String,
    pub distance: Option<f64>,
    pub show: bool,
}

/// Points and bonus allocation for one result source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContestConfig {
    pub id: String,
    pub descr: String,
    /// Source of the places, the contest id when absent
    pub source: Option<String>,
    pub tally: Option<String>,
    pub bonuses: Vec<Tod>,
    pub points: Vec<i64>,
    /// Every rider listed in the source gets the first bonus/points value
    pub all_source: bool,
    /// Climb category, used as the countback slot for climb tallies
    pub category: u32,
}

impl ContestConfig {
    pub fn source(&self) -> &str {
        match self.source.as_deref() {
            Some(src) if !src.is_empty() => src,
            _ => &self.id,
        }
    }

    pub fn description(&self) -> &str {
        if self.descr.is_empty() { &self.id } else { &self.descr }
    }
}

/// A points classification accumulated from one or more contests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    pub id: String,
    pub descr: String,
    pub keep_dnf: bool,
}

/// Complete configuration of one mass-start event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceConfig {
    pub title: String,
    pub race_type: RaceType,
    /// Minimum lap time, also the duplicate-read threshold
    pub min_lap: Option<Tod>,
    pub gap_threshold: Option<Tod>,
    /// Total laps; absent or zero means unknown
    pub total_laps: Option<u32>,
    pub sprint_laps: Vec<u32>,
    pub pass_labels: BTreeMap<u32, String>,
    /// Decoder source of the pre-finish loop
    pub preloop: Option<String>,
    /// When non-empty, passings from other sources are ignored
    pub passing_sources: Vec<String>,
    pub allow_spares: bool,
    pub time_limit: Option<String>,
    pub categories: Vec<CategoryConfig>,
    pub intermediates: Vec<IntermediateConfig>,
    pub contests: Vec<ContestConfig>,
    pub tallies: Vec<TallyConfig>,
}

impl RaceConfig {
    /// Parse a YAML configuration document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RaceConfig = serde_yaml_ng::from_str(yaml)
            .map_err(|e| RaceError::parse("race config", e))?;
        for warning in config.validate() {
            warn!("{}", warning);
        }
        Ok(config)
    }

    /// Load a YAML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading race config: {}", path.display());
        let text = std::fs::read_to_string(path)
            .map_err(|e| RaceError::file_error(path.to_path_buf(), e))?;
        Self::from_yaml(&text)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn pass_threshold(&self) -> Tod {
        self.min_lap.filter(|t| *t > Tod::ZERO).unwrap_or(DEFAULT_PASS_THRESHOLD)
    }

    pub fn gap_threshold(&self) -> Tod {
        self.gap_threshold.filter(|t| *t > Tod::ZERO).unwrap_or(DEFAULT_GAP_THRESHOLD)
    }

    pub fn total_laps(&self) -> Option<u32> {
        self.total_laps.filter(|&n| n > 0)
    }

    pub fn category(&self, key: &str) -> Option<&CategoryConfig> {
        let key = key.trim();
        self.categories.iter().find(|c| c.id.eq_ignore_ascii_case(key))
    }

    /// Configured category ids, upper-cased, in config order.
    pub fn category_ids(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.id.to_uppercase()).collect()
    }

    pub fn category_offset(&self, key: &str) -> Tod {
        self.category(key).and_then(|c| c.start_offset).unwrap_or(Tod::ZERO)
    }

    /// Lap target for the category; a zero target counts as none.
    pub fn category_target(&self, key: &str) -> Option<u32> {
        self.category(key).and_then(|c| c.target_laps).filter(|&n| n > 0)
    }

    pub fn intermediate(&self, id: &str) -> Option<&IntermediateConfig> {
        self.intermediates.iter().find(|i| i.id == id)
    }

    /// Category finish source id (`afin` for category `A`) to category.
    pub fn category_sources(&self) -> BTreeMap<String, String> {
        self.categories
            .iter()
            .filter(|c| !c.id.is_empty())
            .map(|c| (format!("{}fin", c.id.to_lowercase()), c.id.to_uppercase()))
            .collect()
    }

    /// Check the configuration; problems are returned, not fatal.
    ///
    /// Each reported problem falls back to a default when the race runs.
    pub fn validate(&self) -> Vec<RaceError> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();

        for cat in &self.categories {
            if cat.id.trim().is_empty() {
                problems.push(RaceError::MissingCategoryConfig {
                    category: String::new(),
                    details: "category without an id is ignored".to_string(),
                });
                continue;
            }
            if !seen.insert(cat.id.to_uppercase()) {
                problems.push(RaceError::MissingCategoryConfig {
                    category: cat.id.clone(),
                    details: "duplicate category, first entry is used".to_string(),
                });
            }
            if cat.target_laps == Some(0) {
                problems.push(RaceError::MissingCategoryConfig {
                    category: cat.id.clone(),
                    details: "zero target laps, leader lap counting is used".to_string(),
                });
            }
            if let (Some(target), Some(total)) = (cat.target_laps, self.total_laps()) {
                if target > total {
                    problems.push(RaceError::MissingCategoryConfig {
                        category: cat.id.clone(),
                        details: format!("target laps {target} exceeds race total {total}"),
                    });
                }
            }
            if cat.start_offset.is_some_and(Tod::is_negative) {
                problems.push(RaceError::MissingCategoryConfig {
                    category: cat.id.clone(),
                    details: "negative start offset".to_string(),
                });
            }
        }

        let cat_sources = self.category_sources();
        for inter in &self.intermediates {
            if RESERVED_SOURCES.contains(&inter.id.as_str()) || cat_sources.contains_key(&inter.id) {
                problems.push(RaceError::parse(
                    "intermediates",
                    format!("reserved intermediate id {:?} ignored", inter.id),
                ));
            }
        }

        let tallies: HashSet<&str> = self.tallies.iter().map(|t| t.id.as_str()).collect();
        for contest in &self.contests {
            let src = contest.source();
            let known = RESERVED_SOURCES.contains(&src)
                || cat_sources.contains_key(src)
                || self.intermediate(src).is_some();
            if !known {
                problems.push(RaceError::parse(
                    "contests",
                    format!("invalid source {:?} in contest {:?}", src, contest.id),
                ));
            }
            match contest.tally.as_deref() {
                None | Some("") if !contest.points.is_empty() => problems.push(RaceError::parse(
                    "contests",
                    format!("no tally for points in contest {:?}", contest.id),
                )),
                Some(t) if !t.is_empty() && !tallies.contains(t) => {
                    problems.push(RaceError::parse(
                        "contests",
                        format!("tally {:?} of contest {:?} is not listed", t, contest.id),
                    ))
                }
                _ => {}
            }
            if contest.all_source && (contest.points.len() > 1 || contest.bonuses.len() > 1) {
                problems.push(RaceError::parse(
                    "contests",
                    format!("extra points/bonus ignored for all source contest {:?}", contest.id),
                ));
            }
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        let config = RaceConfig::default();
        assert_eq!(config.pass_threshold(), DEFAULT_PASS_THRESHOLD);
        assert_eq!(config.gap_threshold(), DEFAULT_GAP_THRESHOLD);
        assert_eq!(config.total_laps(), None);
        assert_eq!(config.category_offset("X"), Tod::ZERO);
    }

    #[test]
    fn zero_total_laps_means_unknown() {
        let config = RaceConfig::from_yaml("total_laps: 0").unwrap();
        assert_eq!(config.total_laps(), None);
    }

    #[test]
    fn category_sources_are_lower_case_fin() {
        let config = RaceConfig::from_yaml("categories: [{id: A}, {id: w}]").unwrap();
        let sources = config.category_sources();
        assert_eq!(sources.get("afin").map(String::as_str), Some("A"));
        assert_eq!(sources.get("wfin").map(String::as_str), Some("W"));
    }

    #[test]
    fn validate_reports_inconsistent_categories() {
        let config = RaceConfig::from_yaml(
            "total_laps: 5\ncategories:\n  - id: A\n    target_laps: 8\n  - id: B\n    target_laps: 0\n",
        )
        .unwrap();
        let problems = config.validate();
        assert_eq!(problems.len(), 2);
        assert!(problems.iter().all(|p| matches!(p, RaceError::MissingCategoryConfig { .. })));
        assert_eq!(config.category_target("B"), None);
    }

    #[test]
    fn validate_reports_contest_problems() {
        let config = RaceConfig::from_yaml(
            "contests:\n  - id: s1\n    points: [3, 2]\n  - id: kom\n    source: fin\n    tally: climb\n",
        )
        .unwrap();
        let problems = config.validate();
        // unknown source s1, points without tally, unlisted tally
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let err = RaceConfig::from_yaml("categories: {").unwrap_err();
        assert!(matches!(err, RaceError::Parse { .. }));
    }
}

//! Rider registry: names, categories and transponder tags
//!
//! The registry is the read-only rider database the race pulls names and
//! categories from when riders are added, and the lookup that turns a
//! decoder tag into a bib. A tag with no registry entry is treated as a
//! bib typed directly, which is what manual passings use.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::types::Bib;
use crate::{RaceError, Result};

/// Registry category marking a spare bike transponder.
pub const SPARE_CATEGORY: &str = "SPARE";

/// One registered rider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryEntry {
    pub bib: String,
    pub first: String,
    pub last: String,
    pub club: String,
    pub category: String,
    /// Transponder tag id
    pub refid: Option<String>,
}

impl RegistryEntry {
    /// `First LAST (Club)` style list name.
    pub fn list_name(&self) -> String {
        let mut name = self.short_name();
        if !self.club.is_empty() {
            name.push_str(&format!(" ({})", self.club));
        }
        name
    }

    /// `First LAST` without the club.
    pub fn short_name(&self) -> String {
        let parts: Vec<String> = [self.first.trim().to_string(), self.last.trim().to_uppercase()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        parts.join(" ")
    }

    pub fn is_spare(&self) -> bool {
        self.category.eq_ignore_ascii_case(SPARE_CATEGORY)
    }
}

/// Bib and tag indexed rider database.
#[derive(Debug, Clone, Default)]
pub struct RiderRegistry {
    entries: HashMap<Bib, RegistryEntry>,
    tags: HashMap<String, Bib>,
}

impl RiderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = RegistryEntry>) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            registry.insert(entry);
        }
        registry
    }

    /// Parse a YAML list of entries.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let entries: Vec<RegistryEntry> =
            serde_yaml_ng::from_str(yaml).map_err(|e| RaceError::parse("rider registry", e))?;
        Ok(Self::from_entries(entries))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RaceError::file_error(path.to_path_buf(), e))?;
        Self::from_yaml(&text)
    }

    pub fn insert(&mut self, entry: RegistryEntry) {
        let bib = Bib::new(&entry.bib);
        if let Some(tag) = entry.refid.as_deref().filter(|t| !t.is_empty()) {
            self.tags.insert(tag.to_lowercase(), bib.clone());
        }
        self.entries.insert(bib, entry);
    }

    pub fn get(&self, bib: &str) -> Option<&RegistryEntry> {
        self.entries.get(bib)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a decoder tag to a bib; untagged input is taken as a bib.
    pub fn resolve(&self, refid: &str) -> Bib {
        let refid = refid.trim();
        match self.tags.get(&refid.to_lowercase()) {
            Some(bib) => bib.clone(),
            None => Bib::new(refid.strip_prefix("riderno:").unwrap_or(refid)),
        }
    }

    pub fn is_known_tag(&self, refid: &str) -> bool {
        self.tags.contains_key(&refid.trim().to_lowercase())
    }

    /// Bibs registered in a category.
    pub fn bibs_in_category(&self, category: &str) -> Vec<Bib> {
        let mut bibs: Vec<Bib> = self
            .entries
            .iter()
            .filter(|(_, e)| e.category.eq_ignore_ascii_case(category))
            .map(|(b, _)| b.clone())
            .collect();
        bibs.sort();
        bibs
    }
}

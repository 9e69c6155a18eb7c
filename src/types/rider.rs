//! Rider rows and the indexed rider table

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use super::{Bib, RiderStatus, Tod};
use crate::{RaceError, Result};

/// One race entrant.
///
/// `bunch` is derived by the recalculator and never edited directly;
/// `manual_bunch` is the operator override and wins when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rider {
    pub bib: Bib,
    pub name: String,
    pub short_name: String,
    pub category: String,
    pub comment: String,
    pub in_race: bool,
    pub status: RiderStatus,
    pub laps: u32,
    pub place: Option<u32>,
    pub finish: Option<Tod>,
    pub bunch: Option<Tod>,
    pub manual_bunch: Option<Tod>,
    pub start_offset: Option<Tod>,
    pub bonus: Option<Tod>,
    pub penalty: Option<Tod>,
    pub pre_passing: Option<Tod>,
    pub passings: Vec<Tod>,
}

impl Rider {
    pub fn new(bib: impl Into<Bib>) -> Self {
        Self {
            bib: bib.into(),
            name: String::new(),
            short_name: String::new(),
            category: String::new(),
            comment: String::new(),
            in_race: true,
            status: RiderStatus::None,
            laps: 0,
            place: None,
            finish: None,
            bunch: None,
            manual_bunch: None,
            start_offset: None,
            bonus: None,
            penalty: None,
            pre_passing: None,
            passings: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Manual bunch if set, otherwise the computed one.
    pub fn effective_bunch(&self) -> Option<Tod> {
        self.manual_bunch.or(self.bunch)
    }

    pub fn last_passing(&self) -> Option<Tod> {
        self.passings.last().copied()
    }

    /// Upper-cased category key used for category lookups.
    pub fn category_key(&self) -> String {
        self.category.trim().to_uppercase()
    }
}

/// Ordered rider rows with a bib index.
///
/// Row order is the displayed standing; the recalculator reorders rows
/// in place and the index is rebuilt after every structural change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiderTable {
    rows: Vec<Rider>,
    index: HashMap<Bib, usize>,
}

impl RiderTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, bib: &str) -> bool {
        self.index.contains_key(bib)
    }

    pub fn get(&self, bib: &str) -> Option<&Rider> {
        self.index.get(bib).map(|&i| &self.rows[i])
    }

    pub fn get_mut(&mut self, bib: &str) -> Option<&mut Rider> {
        match self.index.get(bib) {
            Some(&i) => Some(&mut self.rows[i]),
            None => None,
        }
    }

    pub fn position(&self, bib: &str) -> Option<usize> {
        self.index.get(bib).copied()
    }

    pub fn insert(&mut self, rider: Rider) -> Result<()> {
        if self.index.contains_key(rider.bib.as_str()) {
            return Err(RaceError::DuplicateRider { bib: rider.bib.to_string() });
        }
        self.index.insert(rider.bib.clone(), self.rows.len());
        self.rows.push(rider);
        Ok(())
    }

    pub fn remove(&mut self, bib: &str) -> Option<Rider> {
        let i = self.index.remove(bib)?;
        let rider = self.rows.remove(i);
        self.reindex();
        Some(rider)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rider> {
        self.rows.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Rider> {
        self.rows.iter_mut()
    }

    pub fn rows(&self) -> &[Rider] {
        &self.rows
    }

    /// Mutable access to rows by position; bibs must not be changed.
    pub fn rows_mut(&mut self) -> &mut [Rider] {
        &mut self.rows
    }

    pub fn bibs(&self) -> impl Iterator<Item = &Bib> {
        self.rows.iter().map(|r| &r.bib)
    }

    /// Stable sort of the rows, then rebuild the index.
    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&Rider, &Rider) -> Ordering,
    {
        self.rows.sort_by(compare);
        self.reindex();
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, rider) in self.rows.iter().enumerate() {
            self.index.insert(rider.bib.clone(), i);
        }
    }
}

impl FromIterator<Rider> for RiderTable {
    fn from_iter<I: IntoIterator<Item = Rider>>(iter: I) -> Self {
        let mut table = RiderTable::new();
        for rider in iter {
            // later duplicates are dropped
            let _ = table.insert(rider);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_rejects_duplicate_bibs() {
        let mut table = RiderTable::new();
        table.insert(Rider::new("1")).unwrap();
        assert!(matches!(table.insert(Rider::new("1")), Err(RaceError::DuplicateRider { .. })));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn index_follows_sort_and_remove() {
        let mut table: RiderTable = ["3", "1", "2"].into_iter().map(Rider::new).collect();
        table.sort_by(|a, b| a.bib.cmp(&b.bib));
        assert_eq!(table.position("1"), Some(0));
        assert_eq!(table.position("3"), Some(2));

        table.remove("1");
        assert_eq!(table.position("2"), Some(0));
        assert_eq!(table.get("3").map(|r| r.bib.as_str()), Some("3"));
        assert!(table.get("1").is_none());
    }

    #[test]
    fn effective_bunch_prefers_manual() {
        let mut rider = Rider::new("7");
        rider.bunch = Some(Tod::from_secs(61));
        assert_eq!(rider.effective_bunch(), Some(Tod::from_secs(61)));
        rider.manual_bunch = Some(Tod::from_secs(65));
        assert_eq!(rider.effective_bunch(), Some(Tod::from_secs(65)));
    }
}

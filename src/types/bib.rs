//! Rider numbers

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;

/// A rider's race number.
///
/// Bibs compare numerically on their digits first so `9` sorts before
/// `10`, then on the raw text so ordering stays total.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bib(String);

impl Bib {
    pub fn new(bib: impl AsRef<str>) -> Self {
        Bib(bib.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn number(&self) -> u64 {
        let digits: String = self.0.chars().filter(char::is_ascii_digit).collect();
        digits.parse().unwrap_or(u64::MAX)
    }

    /// Split a free-form rider list on whitespace and commas.
    pub fn parse_list(list: &str) -> Vec<Bib> {
        list.split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(Bib::new)
            .collect()
    }
}

impl Ord for Bib {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number().cmp(&other.number()).then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Bib {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Bib {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Bib {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Bib {
    fn from(bib: &str) -> Self {
        Bib::new(bib)
    }
}

impl From<String> for Bib {
    fn from(bib: String) -> Self {
        Bib::new(bib)
    }
}

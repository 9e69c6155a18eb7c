//! Millisecond time-of-day values for passings and elapsed times

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use crate::{RaceError, Result};

/// A time of day or a duration, stored as signed milliseconds.
///
/// Decoder passings, the race start and finish, bunch times, bonuses and
/// thresholds all share this representation so they can be added and
/// compared directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tod(i64);

impl Tod {
    pub const ZERO: Tod = Tod(0);

    pub const fn from_millis(ms: i64) -> Self {
        Tod(ms)
    }

    /// Whole seconds, saturating at the representable range.
    pub const fn from_secs(secs: i64) -> Self {
        Tod(secs.saturating_mul(1000))
    }

    pub const fn checked_from_secs(secs: i64) -> Option<Self> {
        match secs.checked_mul(1000) {
            Some(ms) => Some(Tod(ms)),
            None => None,
        }
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Tod((secs * 1000.0).round() as i64)
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    pub const fn checked_add(self, rhs: Tod) -> Option<Tod> {
        match self.0.checked_add(rhs.0) {
            Some(ms) => Some(Tod(ms)),
            None => None,
        }
    }

    pub const fn checked_sub(self, rhs: Tod) -> Option<Tod> {
        match self.0.checked_sub(rhs.0) {
            Some(ms) => Some(Tod(ms)),
            None => None,
        }
    }

    /// Drop the fractional seconds, rounding toward zero.
    pub const fn truncate(self) -> Self {
        Tod(self.0 / 1000 * 1000)
    }

    /// Scale a duration by a fraction, truncated to whole seconds.
    pub fn scale(self, frac: f64) -> Self {
        Tod::from_secs((frac * self.as_secs_f64()) as i64)
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Parse an optional time, treating blank input as absent.
    pub fn parse_opt(value: &str) -> Result<Option<Tod>> {
        if value.trim().is_empty() { Ok(None) } else { value.parse().map(Some) }
    }

    /// Format as `h:mm:ss`, `m:ss` or `s` with up to three decimal places.
    pub fn timestr(self, places: usize) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let secs = abs / 1000;
        let (h, m, s) = (secs / 3600, (secs / 60) % 60, secs % 60);

        let mut out = if h > 0 {
            format!("{sign}{h}:{m:02}:{s:02}")
        } else if m > 0 {
            format!("{sign}{m}:{s:02}")
        } else {
            format!("{sign}{s}")
        };

        let places = places.min(3);
        if places > 0 {
            let frac = (abs % 1000) / 10u64.pow(3 - places as u32);
            out.push_str(&format!(".{frac:0width$}", width = places));
        }
        out
    }
}

impl fmt::Display for Tod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.timestr(2))
    }
}

impl FromStr for Tod {
    type Err = RaceError;

    /// Accepts `[-]h:mm:ss.fff`, `m:ss.fff` or `ss.fff`.
    fn from_str(value: &str) -> Result<Self> {
        let invalid = || RaceError::InvalidTime { value: value.to_string() };
        let text = value.trim();
        let (negative, text) = match text.strip_prefix('-') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, text),
        };
        if text.is_empty() {
            return Err(invalid());
        }

        let parts: Vec<&str> = text.split(':').collect();
        if parts.len() > 3 {
            return Err(invalid());
        }

        let (whole, frac) = match parts[parts.len() - 1].split_once('.') {
            Some((w, f)) => (w, f),
            None => (parts[parts.len() - 1], ""),
        };
        if !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let mut secs: i64 = 0;
        for part in parts[..parts.len() - 1].iter().copied().chain(std::iter::once(whole)) {
            let part = if part.is_empty() { "0" } else { part };
            if !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            let v: i64 = part.parse().map_err(|_| invalid())?;
            secs = secs.checked_mul(60).and_then(|s| s.checked_add(v)).ok_or_else(invalid)?;
        }

        let mut millis = 0i64;
        for (i, c) in frac.chars().take(3).enumerate() {
            millis += (c as i64 - '0' as i64) * 10i64.pow(2 - i as u32);
        }

        let total = secs.checked_mul(1000).and_then(|s| s.checked_add(millis)).ok_or_else(invalid)?;
        Ok(Tod(if negative { -total } else { total }))
    }
}

// Operators saturate; use checked_add/checked_sub where overflow is an error.
impl Add for Tod {
    type Output = Tod;
    fn add(self, rhs: Tod) -> Tod {
        Tod(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Tod {
    fn add_assign(&mut self, rhs: Tod) {
        *self = *self + rhs;
    }
}

impl Sub for Tod {
    type Output = Tod;
    fn sub(self, rhs: Tod) -> Tod {
        Tod(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Tod {
    fn sub_assign(&mut self, rhs: Tod) {
        *self = *self - rhs;
    }
}

impl Neg for Tod {
    type Output = Tod;
    fn neg(self) -> Tod {
        Tod(self.0.saturating_neg())
    }
}

impl Serialize for Tod {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.timestr(3))
    }
}

impl<'de> Deserialize<'de> for Tod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Float(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(secs) => Tod::checked_from_secs(secs)
                .ok_or_else(|| serde::de::Error::custom(format!("time out of range: {secs} s"))),
            Raw::Float(secs) => Ok(Tod::from_secs_f64(secs)),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

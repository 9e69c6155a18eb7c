//! Rider status codes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result status of a rider.
///
/// Every code except [`RiderStatus::Withdrawn`] also takes the rider out
/// of the race when applied by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RiderStatus {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "dns")]
    DidNotStart,
    #[serde(rename = "dnf")]
    DidNotFinish,
    #[serde(rename = "wd")]
    Withdrawn,
    #[serde(rename = "dsq")]
    Disqualified,
    #[serde(rename = "otl", alias = "hd")]
    OutsideTimeLimit,
}

impl RiderStatus {
    /// Decode an operator status code. `hd` is accepted for `otl`.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "" => Some(RiderStatus::None),
            "dns" => Some(RiderStatus::DidNotStart),
            "dnf" => Some(RiderStatus::DidNotFinish),
            "wd" => Some(RiderStatus::Withdrawn),
            "dsq" => Some(RiderStatus::Disqualified),
            "otl" | "hd" => Some(RiderStatus::OutsideTimeLimit),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            RiderStatus::None => "",
            RiderStatus::DidNotStart => "dns",
            RiderStatus::DidNotFinish => "dnf",
            RiderStatus::Withdrawn => "wd",
            RiderStatus::Disqualified => "dsq",
            RiderStatus::OutsideTimeLimit => "otl",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            RiderStatus::None => "",
            RiderStatus::DidNotStart => "Did not start",
            RiderStatus::DidNotFinish => "Did not finish",
            RiderStatus::Withdrawn => "Withdraw",
            RiderStatus::Disqualified => "Disqualify",
            RiderStatus::OutsideTimeLimit => "Outside time limit",
        }
    }

    /// Sort order for riders out of the race.
    pub fn precedence(self) -> u8 {
        match self {
            RiderStatus::OutsideTimeLimit => 0,
            RiderStatus::Disqualified => 1,
            RiderStatus::None | RiderStatus::Withdrawn => 2,
            RiderStatus::DidNotFinish => 3,
            RiderStatus::DidNotStart => 4,
        }
    }

    pub fn removes_from_race(self) -> bool {
        !matches!(self, RiderStatus::None | RiderStatus::Withdrawn)
    }
}

impl fmt::Display for RiderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for status in [
            RiderStatus::None,
            RiderStatus::DidNotStart,
            RiderStatus::DidNotFinish,
            RiderStatus::Withdrawn,
            RiderStatus::Disqualified,
            RiderStatus::OutsideTimeLimit,
        ] {
            assert_eq!(RiderStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(RiderStatus::from_code("HD"), Some(RiderStatus::OutsideTimeLimit));
        assert_eq!(RiderStatus::from_code("xyz"), None);
    }

    #[test]
    fn precedence_orders_out_of_race_riders() {
        assert!(RiderStatus::OutsideTimeLimit.precedence() < RiderStatus::Disqualified.precedence());
        assert!(RiderStatus::Disqualified.precedence() < RiderStatus::DidNotFinish.precedence());
        assert!(RiderStatus::DidNotFinish.precedence() < RiderStatus::DidNotStart.precedence());
    }
}

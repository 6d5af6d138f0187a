//! Timeframe registry
//!
//! Canonical bar durations, their length in minutes and the importance weight
//! used by confluence classification and strength scoring.
//!
//! Unknown labels are never rejected: they survive as [`Timeframe::Unknown`],
//! weigh 1 (the lowest weight) and sort after every known timeframe.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Weight assigned to timeframe labels the registry does not recognise.
pub const UNKNOWN_WEIGHT: u32 = 1;

/// Bar duration a pattern was detected on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    D1,
    W1,
    /// Label kept verbatim (trimmed, lowercased) for display and grouping.
    Unknown(String),
}

/// Known timeframes from highest weight to lowest.
pub static CANONICAL_ORDER: [Timeframe; 10] = [
    Timeframe::W1,
    Timeframe::D1,
    Timeframe::H4,
    Timeframe::H2,
    Timeframe::H1,
    Timeframe::M30,
    Timeframe::M15,
    Timeframe::M5,
    Timeframe::M3,
    Timeframe::M1,
];

impl Timeframe {
    /// Parse a feed label. Case-insensitive, accepts the usual aliases.
    pub fn parse(label: &str) -> Self {
        let norm = label.trim().to_ascii_lowercase();
        match norm.as_str() {
            "1m" | "1min" | "1minute" | "m1" => Timeframe::M1,
            "3m" | "3min" | "3minute" | "m3" => Timeframe::M3,
            "5m" | "5min" | "5minute" | "m5" => Timeframe::M5,
            "15m" | "15min" | "15minute" | "m15" => Timeframe::M15,
            "30m" | "30min" | "30minute" | "m30" => Timeframe::M30,
            "1h" | "60m" | "60min" | "1hour" | "h1" | "hourly" => Timeframe::H1,
            "2h" | "120m" | "2hour" | "h2" => Timeframe::H2,
            "4h" | "240m" | "4hour" | "h4" => Timeframe::H4,
            "1d" | "d" | "d1" | "1day" | "day" | "daily" => Timeframe::D1,
            "1w" | "w" | "w1" | "1week" | "week" | "weekly" => Timeframe::W1,
            _ => Timeframe::Unknown(norm),
        }
    }

    /// Canonical label, e.g. `"15m"`, `"4h"`, `"1d"`.
    pub fn label(&self) -> &str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
            Timeframe::Unknown(label) => label,
        }
    }

    /// Length of one bar in minutes. Unknown timeframes report 0.
    pub fn duration_minutes(&self) -> u32 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M3 => 3,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H2 => 120,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1_440,
            Timeframe::W1 => 10_080,
            Timeframe::Unknown(_) => 0,
        }
    }

    /// Importance weight, higher = more significant.
    pub fn weight(&self) -> u32 {
        match self {
            Timeframe::M1 | Timeframe::M3 => 1,
            Timeframe::M5 => 2,
            Timeframe::M15 => 3,
            Timeframe::M30 => 4,
            Timeframe::H1 => 5,
            Timeframe::H2 => 6,
            Timeframe::H4 => 7,
            Timeframe::D1 => 8,
            Timeframe::W1 => 9,
            Timeframe::Unknown(_) => UNKNOWN_WEIGHT,
        }
    }

    #[inline]
    pub fn is_known(&self) -> bool {
        !matches!(self, Timeframe::Unknown(_))
    }

    /// Ordering with the most significant timeframe first.
    ///
    /// Weight descending, then duration descending (so `3m` precedes `1m`),
    /// unknown labels last and alphabetical among themselves.
    pub fn cmp_significance(&self, other: &Self) -> Ordering {
        other
            .weight()
            .cmp(&self.weight())
            .then_with(|| self.is_known().cmp(&other.is_known()).reverse())
            .then_with(|| other.duration_minutes().cmp(&self.duration_minutes()))
            .then_with(|| self.label().cmp(other.label()))
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for Timeframe {
    fn from(label: String) -> Self {
        Timeframe::parse(&label)
    }
}

impl From<&str> for Timeframe {
    fn from(label: &str) -> Self {
        Timeframe::parse(label)
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.label().to_string()
    }
}

/// Free-function form of [`Timeframe::duration_minutes`].
#[inline]
pub fn duration_minutes(tf: &Timeframe) -> u32 {
    tf.duration_minutes()
}

/// Free-function form of [`Timeframe::weight`].
#[inline]
pub fn weight(tf: &Timeframe) -> u32 {
    tf.weight()
}

/// Known timeframes from highest weight to lowest.
#[inline]
pub fn canonical_order() -> &'static [Timeframe] {
    &CANONICAL_ORDER
}

// ============================================================
// TESTS
// ============================================================

//! Strength scorer
//!
//! One 0-100 conviction number per instrument: timeframe-weighted mean
//! confidence, discounted when active signals disagree, plus a small bonus
//! per independent timeframe.

use std::collections::HashSet;

use serde::Serialize;

use super::helpers::consensus;
use crate::grouping::InstrumentGroup;

/// Multiplier applied when active directional signals disagree.
pub const SPLIT_ALIGNMENT: f64 = 0.7;
/// Bonus points per distinct active timeframe.
pub const COVERAGE_POINTS: f64 = 2.0;
/// Cap on the coverage bonus.
pub const COVERAGE_CAP: f64 = 10.0;

/// Integer conviction score in 0..=100
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StrengthScore(u8);

impl StrengthScore {
    pub const ZERO: StrengthScore = StrengthScore(0);

    /// Round and clamp a raw score into range.
    pub fn from_raw(raw: f64) -> Self {
        if raw.is_nan() {
            return Self::ZERO;
        }
        Self(raw.round().clamp(0.0, 100.0) as u8)
    }

    #[inline]
    pub fn get(self) -> u8 {
        self.0
    }
}

/// Intermediate terms, exposed for display and tests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    /// Weighted mean confidence scaled to 0..=100
    pub base: f64,
    pub alignment: f64,
    pub coverage_bonus: f64,
    pub score: StrengthScore,
}

impl ScoreBreakdown {
    const EMPTY: ScoreBreakdown = ScoreBreakdown {
        base: 0.0,
        alignment: 1.0,
        coverage_bonus: 0.0,
        score: StrengthScore::ZERO,
    };
}

pub fn score(group: &InstrumentGroup) -> StrengthScore {
    breakdown(group).score
}

pub fn breakdown(group: &InstrumentGroup) -> ScoreBreakdown {
    let now = group.evaluated_at;
    let active: Vec<_> = group.active_signals().filter(|s| s.is_active(now)).collect();
    if active.is_empty() {
        return ScoreBreakdown::EMPTY;
    }

    let (weighted, total_weight) = active.iter().fold((0.0, 0.0), |(w, t), s| {
        let weight = f64::from(s.timeframe.weight());
        (w + s.confidence.get() * weight, t + weight)
    });
    let base = 100.0 * weighted / total_weight;

    let alignment = if consensus(active.iter().map(|s| s.direction)).is_aligned() {
        1.0
    } else {
        SPLIT_ALIGNMENT
    };

    let distinct: HashSet<_> = active.iter().map(|s| &s.timeframe).collect();
    let coverage_bonus = (COVERAGE_POINTS * distinct.len() as f64).min(COVERAGE_CAP);

    ScoreBreakdown {
        base,
        alignment,
        coverage_bonus,
        score: StrengthScore::from_raw((base * alignment + coverage_bonus).min(100.0)),
    }
}

//! Chronological narrator
//!
//! Walks an instrument's history newest-first and emits typed findings with
//! their evidence attached, so callers render text in whatever locale they
//! like and tests assert on data instead of prose.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::helpers::best_risk_reward;
use crate::grouping::InstrumentGroup;
use crate::timeframe::Timeframe;
use crate::{Direction, PatternSignal, PatternType};

/// Number of most recent directional signals considered for momentum.
pub const MOMENTUM_WINDOW: usize = 3;

/// Compact reference to the signal a finding points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalRef {
    pub pattern_id: String,
    pub pattern_type: PatternType,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub triggered_at: Option<DateTime<Utc>>,
}

impl From<&PatternSignal> for SignalRef {
    fn from(s: &PatternSignal) -> Self {
        Self {
            pattern_id: s.pattern_id.clone(),
            pattern_type: s.pattern_type.clone(),
            timeframe: s.timeframe.clone(),
            direction: s.direction,
            triggered_at: s.triggered_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Finding {
    /// Exactly one signal on record
    InsufficientData { signal: SignalRef },
    /// Nothing active remains
    AllExpired {
        expired_count: usize,
        latest: SignalRef,
    },
    /// Latest active signal points the other way from the latest expired one
    ReversalSuspected {
        from: Direction,
        to: Direction,
        prior: SignalRef,
        current: SignalRef,
    },
    /// The newest directional signal and at least one more in the window agree
    MomentumBuilding {
        direction: Direction,
        recent_direction_count: usize,
        signals: Vec<SignalRef>,
        best_risk_reward: Option<f64>,
    },
    /// Several active signals, no shared direction
    MixedSignals {
        bullish: usize,
        bearish: usize,
        neutral: usize,
        best_risk_reward: Option<f64>,
    },
    /// Expired predecessors alongside live signals
    ExpiryNote {
        expired_count: usize,
        expired: Vec<SignalRef>,
    },
}

impl Finding {
    /// Stable tag for the finding kind.
    pub fn code(&self) -> &'static str {
        match self {
            Finding::InsufficientData { .. } => "INSUFFICIENT_DATA",
            Finding::AllExpired { .. } => "ALL_EXPIRED",
            Finding::ReversalSuspected { .. } => "REVERSAL_SUSPECTED",
            Finding::MomentumBuilding { .. } => "MOMENTUM_BUILDING",
            Finding::MixedSignals { .. } => "MIXED_SIGNALS",
            Finding::ExpiryNote { .. } => "EXPIRY_NOTE",
        }
    }
}

/// Findings for a group's history, evaluated at the group's instant.
pub fn narrate(group: &InstrumentGroup) -> Vec<Finding> {
    narrate_history(&group.history, group.evaluated_at)
}

/// Findings for a newest-first history.
///
/// Anything no longer ACTIVE at `now` (expired locally, completed or
/// invalidated) counts as an expired predecessor.
pub fn narrate_history(history: &[PatternSignal], now: DateTime<Utc>) -> Vec<Finding> {
    let mut findings = Vec::new();
    let Some(latest) = history.first() else {
        return findings;
    };

    let (active, expired): (Vec<&PatternSignal>, Vec<&PatternSignal>) =
        history.iter().partition(|s| s.is_active(now));

    if history.len() == 1 {
        findings.push(Finding::InsufficientData {
            signal: latest.into(),
        });
        if active.is_empty() {
            findings.push(Finding::AllExpired {
                expired_count: 1,
                latest: latest.into(),
            });
        }
        return findings;
    }

    if active.is_empty() {
        findings.push(Finding::AllExpired {
            expired_count: expired.len(),
            latest: latest.into(),
        });
        return findings;
    }

    let reversal = match (expired.first(), active.first()) {
        (Some(prior), Some(current))
            if prior.direction.is_directional()
                && current.direction.is_directional()
                && prior.direction != current.direction =>
        {
            Some(Finding::ReversalSuspected {
                from: prior.direction,
                to: current.direction,
                prior: (*prior).into(),
                current: (*current).into(),
            })
        },
        _ => None,
    };

    // Momentum is led by the newest directional signal.
    let recent: Vec<&PatternSignal> = active
        .iter()
        .copied()
        .filter(|s| s.direction.is_directional())
        .take(MOMENTUM_WINDOW)
        .collect();
    let momentum = recent.first().and_then(|lead| {
        let following: Vec<&PatternSignal> = recent
            .iter()
            .copied()
            .filter(|s| s.direction == lead.direction)
            .collect();
        (following.len() >= 2).then(|| Finding::MomentumBuilding {
            direction: lead.direction,
            recent_direction_count: following.len(),
            signals: following.iter().map(|s| (*s).into()).collect(),
            best_risk_reward: best_risk_reward(active.iter().copied()),
        })
    });

    let mixed = (active.len() >= 2 && reversal.is_none() && momentum.is_none()).then(|| {
        let count = |d: Direction| active.iter().filter(|s| s.direction == d).count();
        Finding::MixedSignals {
            bullish: count(Direction::Bullish),
            bearish: count(Direction::Bearish),
            neutral: count(Direction::Neutral),
            best_risk_reward: best_risk_reward(active.iter().copied()),
        }
    });

    findings.extend(reversal);
    findings.extend(momentum);
    findings.extend(mixed);

    if !expired.is_empty() {
        findings.push(Finding::ExpiryNote {
            expired_count: expired.len(),
            expired: expired.iter().map(|s| (*s).into()).collect(),
        });
    }

    findings
}

// ============================================================
// TESTS
// ============================================================

//! Multi-rule confluence search
//!
//! "Which instruments have ever shown all of these (pattern, timeframe)
//! pairs?" Expiry is deliberately ignored: a historical match is evidence
//! of confluence even if it is no longer actionable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::grouping::cmp_newest_first;
use crate::timeframe::Timeframe;
use crate::{PatternSignal, PatternType};

/// Fewest rules that count as confluence.
pub const MIN_RULES: usize = 2;

/// One (pattern type, timeframe) requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchRule {
    pub pattern_type: PatternType,
    pub timeframe: Timeframe,
}

impl SearchRule {
    pub fn new(pattern_type: impl Into<PatternType>, timeframe: impl Into<Timeframe>) -> Self {
        Self {
            pattern_type: pattern_type.into(),
            timeframe: timeframe.into(),
        }
    }

    #[inline]
    pub fn matches(&self, signal: &PatternSignal) -> bool {
        signal.pattern_type == self.pattern_type && signal.timeframe == self.timeframe
    }
}

/// A rule and the signal that satisfied it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleMatch {
    pub rule: SearchRule,
    pub signal: PatternSignal,
}

/// An instrument satisfying every rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub instrument_id: String,
    /// One entry per rule, in rule order
    pub matches: Vec<RuleMatch>,
}

impl SearchHit {
    #[inline]
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }
}

/// Instruments where every rule is met by at least one signal.
///
/// Fewer than [`MIN_RULES`] rules always yields no hits. Each rule reports
/// the newest matching signal. Hits are ordered by match count descending,
/// then instrument id.
pub fn search(signals: &[PatternSignal], rules: &[SearchRule]) -> Vec<SearchHit> {
    if rules.len() < MIN_RULES {
        return Vec::new();
    }

    let mut by_instrument: BTreeMap<&str, Vec<&PatternSignal>> = BTreeMap::new();
    for signal in signals {
        if rules.iter().any(|r| r.matches(signal)) {
            by_instrument
                .entry(signal.instrument_id.as_str())
                .or_default()
                .push(signal);
        }
    }

    let mut hits: Vec<SearchHit> = by_instrument
        .into_iter()
        .filter_map(|(instrument_id, candidates)| {
            let matches = rules
                .iter()
                .map(|rule| {
                    candidates
                        .iter()
                        .copied()
                        .filter(|s| rule.matches(s))
                        .min_by(|a, b| cmp_newest_first(a, b))
                        .map(|s| RuleMatch {
                            rule: rule.clone(),
                            signal: s.clone(),
                        })
                })
                .collect::<Option<Vec<_>>>()?;
            Some(SearchHit {
                instrument_id: instrument_id.to_string(),
                matches,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.match_count()
            .cmp(&a.match_count())
            .then_with(|| a.instrument_id.cmp(&b.instrument_id))
    });
    hits
}

// ============================================================
// TESTS
// ============================================================

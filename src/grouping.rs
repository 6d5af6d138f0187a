//! Instrument grouper
//!
//! Partitions a signal set by instrument, then by timeframe. Timeframe
//! buckets come out most significant first and each bucket is sorted by
//! confidence, so the first bucket is always the anchor the classifier reads.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::timeframe::Timeframe;
use crate::PatternSignal;

// ============================================================
// HORIZON
// ============================================================

/// Which part of the signal history a grouping pass looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "hours", rename_all = "snake_case")]
pub enum Horizon {
    /// Whole history
    #[default]
    All,
    /// Active signals only (expired predecessors are not narrated)
    ActiveOnly,
    /// Signals triggered within the last N hours
    LastHours(u32),
}

impl Horizon {
    /// Signals without a usable timestamp are always admitted.
    pub fn admits(&self, signal: &PatternSignal, now: DateTime<Utc>) -> bool {
        match *self {
            Horizon::All => true,
            Horizon::ActiveOnly => signal.is_active(now),
            Horizon::LastHours(hours) => match signal.triggered_at {
                Some(at) => at >= now - Duration::hours(i64::from(hours)),
                None => true,
            },
        }
    }
}

// ============================================================
// GROUP TYPES
// ============================================================

/// Active signals of one instrument on one timeframe, highest confidence first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeframeGroup {
    pub timeframe: Timeframe,
    pub signals: Vec<PatternSignal>,
}

/// Everything known about one instrument at one evaluation instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentGroup {
    pub instrument_id: String,
    /// Instant the activity split was computed against
    pub evaluated_at: DateTime<Utc>,
    /// Active signals, most significant timeframe first
    pub timeframes: Vec<TimeframeGroup>,
    /// All signals in the horizon (active and not), newest first
    pub history: Vec<PatternSignal>,
}

impl InstrumentGroup {
    /// The most significant timeframe with an active signal.
    #[inline]
    pub fn anchor(&self) -> Option<&TimeframeGroup> {
        self.timeframes.first()
    }

    pub fn active_signals(&self) -> impl Iterator<Item = &PatternSignal> {
        self.timeframes.iter().flat_map(|b| b.signals.iter())
    }

    pub fn active_count(&self) -> usize {
        self.timeframes.iter().map(|b| b.signals.len()).sum()
    }

    pub fn has_active(&self) -> bool {
        self.timeframes.iter().any(|b| !b.signals.is_empty())
    }
}

// ============================================================
// ORDERING
// ============================================================

/// Newest `triggered_at` first; undated signals last; pattern id breaks ties.
pub(crate) fn cmp_newest_first(a: &PatternSignal, b: &PatternSignal) -> Ordering {
    match (a.triggered_at, b.triggered_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.pattern_id.cmp(&b.pattern_id))
}

/// Highest confidence first, then newest first.
pub(crate) fn cmp_confidence(a: &PatternSignal, b: &PatternSignal) -> Ordering {
    b.confidence
        .get()
        .total_cmp(&a.confidence.get())
        .then_with(|| cmp_newest_first(a, b))
}

// ============================================================
// GROUPING
// ============================================================

/// One group per instrument present in `signals`, ordered by instrument id.
pub fn group_by_instrument(
    signals: &[PatternSignal],
    now: DateTime<Utc>,
    horizon: Horizon,
) -> Vec<InstrumentGroup> {
    let mut by_instrument: BTreeMap<&str, Vec<&PatternSignal>> = BTreeMap::new();
    for signal in signals.iter().filter(|s| horizon.admits(s, now)) {
        by_instrument
            .entry(signal.instrument_id.as_str())
            .or_default()
            .push(signal);
    }

    by_instrument
        .into_iter()
        .map(|(instrument_id, members)| build_group(instrument_id, members, now))
        .collect()
}

/// Group for a single instrument, `None` if it has nothing in the horizon.
pub fn group_instrument(
    instrument_id: &str,
    signals: &[PatternSignal],
    now: DateTime<Utc>,
    horizon: Horizon,
) -> Option<InstrumentGroup> {
    let members: Vec<&PatternSignal> = signals
        .iter()
        .filter(|s| s.instrument_id == instrument_id && horizon.admits(s, now))
        .collect();
    (!members.is_empty()).then(|| build_group(instrument_id, members, now))
}

fn build_group(
    instrument_id: &str,
    members: Vec<&PatternSignal>,
    now: DateTime<Utc>,
) -> InstrumentGroup {
    let mut buckets: HashMap<&Timeframe, Vec<PatternSignal>> = HashMap::new();
    for signal in members.iter().filter(|s| s.is_active(now)) {
        buckets
            .entry(&signal.timeframe)
            .or_default()
            .push((*signal).clone());
    }

    let mut timeframes: Vec<TimeframeGroup> = buckets
        .into_iter()
        .map(|(timeframe, mut signals)| {
            signals.sort_by(cmp_confidence);
            TimeframeGroup {
                timeframe: timeframe.clone(),
                signals,
            }
        })
        .collect();
    timeframes.sort_by(|a, b| a.timeframe.cmp_significance(&b.timeframe));

    let mut history: Vec<PatternSignal> = members.into_iter().cloned().collect();
    history.sort_by(cmp_newest_first);

    InstrumentGroup {
        instrument_id: instrument_id.to_string(),
        evaluated_at: now,
        timeframes,
        history,
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Direction, SignalStatus};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn sig(id: &str, inst: &str, tf: Timeframe, conf: f64, mins_ago: i64) -> PatternSignal {
        PatternSignal::new(id, inst, "HAMMER", tf, Direction::Bullish, conf)
            .triggered_at(t0() - Duration::minutes(mins_ago))
    }

    #[test]
    fn test_partitions_by_instrument_and_timeframe() {
        let signals = vec![
            sig("a", "X", Timeframe::M15, 0.6, 1),
            sig("b", "Y", Timeframe::H1, 0.9, 1),
            sig("c", "X", Timeframe::H4, 0.5, 1),
            sig("d", "X", Timeframe::M15, 0.8, 2),
        ];
        let groups = group_by_instrument(&signals, t0(), Horizon::All);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].instrument_id, "X");

        let x = &groups[0];
        let tfs: Vec<_> = x.timeframes.iter().map(|b| b.timeframe.clone()).collect();
        assert_eq!(tfs, vec![Timeframe::H4, Timeframe::M15]);
        assert_eq!(x.anchor().unwrap().timeframe, Timeframe::H4);

        let m15: Vec<_> = x.timeframes[1].signals.iter().map(|s| s.pattern_id.as_str()).collect();
        assert_eq!(m15, vec!["d", "a"]);
        assert_eq!(x.active_count(), 3);
    }

    #[test]
    fn test_confidence_ties_newest_first() {
        let signals = vec![
            sig("old", "X", Timeframe::M5, 0.7, 4),
            sig("new", "X", Timeframe::M5, 0.7, 1),
        ];
        let groups = group_by_instrument(&signals, t0(), Horizon::All);
        let ids: Vec<_> = groups[0].timeframes[0]
            .signals
            .iter()
            .map(|s| s.pattern_id.as_str())
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn test_expired_only_in_history() {
        let signals = vec![
            sig("live", "X", Timeframe::H1, 0.7, 10),
            sig("gone", "X", Timeframe::M5, 0.9, 30),
            sig("won", "X", Timeframe::D1, 0.9, 30).status(SignalStatus::CompletedWin),
        ];
        let groups = group_by_instrument(&signals, t0(), Horizon::All);
        let x = &groups[0];
        assert_eq!(x.active_count(), 1);
        assert_eq!(x.history.len(), 3);
        assert_eq!(x.history[0].pattern_id, "live");
    }

    #[test]
    fn test_unknown_timeframe_bucket_last() {
        let signals = vec![
            sig("u", "X", Timeframe::parse("13m"), 0.99, 1),
            sig("m", "X", Timeframe::M1, 0.1, 0),
        ];
        let groups = group_by_instrument(&signals, t0(), Horizon::All);
        assert_eq!(groups[0].timeframes[0].timeframe, Timeframe::M1);
        assert_eq!(groups[0].timeframes[1].timeframe.label(), "13m");
    }

    #[test]
    fn test_horizon_filters() {
        let undated = PatternSignal::new("n", "X", "DOJI", Timeframe::H1, Direction::Neutral, 0.3);
        let signals = vec![
            sig("recent", "X", Timeframe::D1, 0.7, 60),
            sig("stale", "X", Timeframe::D1, 0.7, 60 * 30),
            sig("expired", "X", Timeframe::M5, 0.7, 30),
            undated,
        ];

        let last_day = group_by_instrument(&signals, t0(), Horizon::LastHours(24));
        assert_eq!(last_day[0].history.len(), 3);

        let active = group_by_instrument(&signals, t0(), Horizon::ActiveOnly);
        let ids: Vec<_> = active[0].history.iter().map(|s| s.pattern_id.as_str()).collect();
        assert_eq!(ids, vec!["recent", "n"]);
    }

    #[test]
    fn test_group_instrument_single() {
        let signals = vec![sig("a", "X", Timeframe::H1, 0.6, 1)];
        assert!(group_instrument("X", &signals, t0(), Horizon::All).is_some());
        assert!(group_instrument("Y", &signals, t0(), Horizon::All).is_none());
    }
}

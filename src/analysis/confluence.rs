//! Confluence classifier
//!
//! Reads the per-timeframe direction of one instrument's active signals and
//! decides whether the timeframes agree. Higher timeframes are treated as
//! the more durable read: when most lower timeframes oppose the anchor the
//! verdict is DIVERGENT (anchor direction kept), not a plain conflict.

use serde::Serialize;

use super::helpers::{bucket_direction, BucketDirection};
use crate::grouping::InstrumentGroup;
use crate::timeframe::Timeframe;
use crate::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictKind {
    /// Every directional timeframe agrees
    Strong,
    /// A strict majority of lower timeframes oppose the anchor
    Divergent,
    /// Disagreement without a lower-timeframe majority against the anchor
    Conflicting,
    /// Fewer than two directional timeframes
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfluenceVerdict {
    pub kind: VerdictKind,
    pub dominant: Direction,
    /// Anchor timeframe among the directional buckets
    pub anchor: Option<Timeframe>,
    /// Buckets that contributed a direction (MIXED and all-NEUTRAL excluded)
    pub directional_timeframes: usize,
    /// Lower-timeframe buckets opposing the anchor
    pub opposing_timeframes: usize,
}

impl ConfluenceVerdict {
    fn none(dominant: Direction, anchor: Option<Timeframe>, directional: usize) -> Self {
        Self {
            kind: VerdictKind::None,
            dominant,
            anchor,
            directional_timeframes: directional,
            opposing_timeframes: 0,
        }
    }
}

/// Classify one instrument group.
pub fn classify(group: &InstrumentGroup) -> ConfluenceVerdict {
    let now = group.evaluated_at;

    // Buckets are already most-significant first; keep that order.
    let directional: Vec<(&Timeframe, Direction)> = group
        .timeframes
        .iter()
        .filter_map(|bucket| {
            let active = bucket.signals.iter().filter(|s| s.is_active(now));
            match bucket_direction(active) {
                BucketDirection::Directional(d) => Some((&bucket.timeframe, d)),
                BucketDirection::Mixed | BucketDirection::Silent => None,
            }
        })
        .collect();

    let (anchor_tf, anchor_dir) = match directional.first() {
        Some(&(tf, d)) => (tf.clone(), d),
        None => return ConfluenceVerdict::none(Direction::Neutral, None, 0),
    };

    if directional.len() < 2 {
        return ConfluenceVerdict::none(anchor_dir, Some(anchor_tf), 1);
    }

    let lower = &directional[1..];
    let opposing = lower.iter().filter(|(_, d)| *d != anchor_dir).count();

    let (kind, dominant) = if opposing == 0 {
        (VerdictKind::Strong, anchor_dir)
    } else if opposing * 2 > lower.len() {
        (VerdictKind::Divergent, anchor_dir)
    } else {
        (VerdictKind::Conflicting, Direction::Neutral)
    };

    ConfluenceVerdict {
        kind,
        dominant,
        anchor: Some(anchor_tf),
        directional_timeframes: directional.len(),
        opposing_timeframes: opposing,
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::{group_by_instrument, Horizon};
    use crate::PatternSignal;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use Direction::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn verdict(layout: &[(&str, Timeframe, Direction)]) -> ConfluenceVerdict {
        let signals: Vec<PatternSignal> = layout
            .iter()
            .map(|(id, tf, d)| {
                PatternSignal::new(*id, "X", "PATTERN", tf.clone(), *d, 0.7).triggered_at(t0())
            })
            .collect();
        let groups = group_by_instrument(&signals, t0(), Horizon::All);
        classify(&groups[0])
    }

    #[test]
    fn test_strong_alignment() {
        let v = verdict(&[("a", Timeframe::H1, Bullish), ("b", Timeframe::H4, Bullish)]);
        assert_eq!(v.kind, VerdictKind::Strong);
        assert_eq!(v.dominant, Bullish);
        assert_eq!(v.anchor, Some(Timeframe::H4));
    }

    #[test]
    fn test_single_directional_bucket_is_none() {
        let v = verdict(&[("a", Timeframe::H1, Bearish), ("b", Timeframe::M5, Neutral)]);
        assert_eq!(v.kind, VerdictKind::None);
        assert_eq!(v.dominant, Bearish);
    }

    #[test]
    fn test_no_active_is_none_neutral() {
        let signals = vec![PatternSignal::new("a", "X", "P", Timeframe::M1, Bullish, 0.9)
            .triggered_at(t0() - Duration::hours(1))];
        let groups = group_by_instrument(&signals, t0(), Horizon::All);
        let v = classify(&groups[0]);
        assert_eq!(v.kind, VerdictKind::None);
        assert_eq!(v.dominant, Neutral);
        assert_eq!(v.anchor, None);
    }

    #[test]
    fn test_mixed_bucket_dropped() {
        let v = verdict(&[
            ("a", Timeframe::D1, Bullish),
            ("b", Timeframe::D1, Bearish),
            ("c", Timeframe::H1, Bearish),
            ("d", Timeframe::M15, Bearish),
        ]);
        // D1 is mixed and ignored; H1 becomes the anchor.
        assert_eq!(v.kind, VerdictKind::Strong);
        assert_eq!(v.dominant, Bearish);
        assert_eq!(v.anchor, Some(Timeframe::H1));
    }

    #[test]
    fn test_divergent_when_lower_majority_opposes() {
        let v = verdict(&[
            ("a", Timeframe::D1, Bullish),
            ("b", Timeframe::H1, Bearish),
            ("c", Timeframe::M15, Bearish),
            ("d", Timeframe::M5, Bullish),
        ]);
        assert_eq!(v.kind, VerdictKind::Divergent);
        assert_eq!(v.dominant, Bullish);
        assert_eq!(v.opposing_timeframes, 2);
    }

    #[test]
    fn test_even_split_is_conflicting() {
        let v = verdict(&[
            ("a", Timeframe::D1, Bullish),
            ("b", Timeframe::H1, Bearish),
            ("c", Timeframe::M15, Bullish),
        ]);
        assert_eq!(v.kind, VerdictKind::Conflicting);
        assert_eq!(v.dominant, Neutral);
    }

    #[test]
    fn test_two_buckets_opposed_is_divergent() {
        let v = verdict(&[("a", Timeframe::H4, Bearish), ("b", Timeframe::M5, Bullish)]);
        assert_eq!(v.kind, VerdictKind::Divergent);
        assert_eq!(v.dominant, Bearish);
    }
}

//! Direction consensus helpers shared by the classifier, scorer and narrator.

use crate::{Direction, PatternSignal};

/// Agreement among a set of directions, NEUTRAL excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consensus {
    /// No directional input at all
    Empty,
    Unanimous(Direction),
    Split,
}

impl Consensus {
    /// `true` unless the directional inputs disagree.
    #[inline]
    pub fn is_aligned(self) -> bool {
        !matches!(self, Consensus::Split)
    }
}

/// Fold directions into a [`Consensus`], ignoring NEUTRAL.
pub fn consensus(directions: impl IntoIterator<Item = Direction>) -> Consensus {
    let mut seen: Option<Direction> = None;
    for d in directions.into_iter().filter(|d| d.is_directional()) {
        match seen {
            None => seen = Some(d),
            Some(prev) if prev != d => return Consensus::Split,
            Some(_) => {},
        }
    }
    match seen {
        Some(d) => Consensus::Unanimous(d),
        None => Consensus::Empty,
    }
}

/// Direction read of one timeframe bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketDirection {
    Directional(Direction),
    /// Bucket signals disagree
    Mixed,
    /// Only NEUTRAL signals
    Silent,
}

pub fn bucket_direction<'a>(signals: impl IntoIterator<Item = &'a PatternSignal>) -> BucketDirection {
    match consensus(signals.into_iter().map(|s| s.direction)) {
        Consensus::Unanimous(d) => BucketDirection::Directional(d),
        Consensus::Split => BucketDirection::Mixed,
        Consensus::Empty => BucketDirection::Silent,
    }
}

/// Best finite risk:reward among `signals`.
pub fn best_risk_reward<'a>(signals: impl IntoIterator<Item = &'a PatternSignal>) -> Option<f64> {
    signals
        .into_iter()
        .filter_map(|s| s.risk_reward_ratio)
        .filter(|rr| rr.is_finite())
        .max_by(f64::total_cmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use Direction::*;

    #[test]
    fn test_consensus() {
        assert_eq!(consensus(Vec::<Direction>::new()), Consensus::Empty);
        assert_eq!(consensus([Neutral, Neutral]), Consensus::Empty);
        assert_eq!(consensus([Neutral, Bullish, Bullish]), Consensus::Unanimous(Bullish));
        assert_eq!(consensus([Bearish, Neutral, Bullish]), Consensus::Split);
        assert!(Consensus::Empty.is_aligned());
        assert!(!Consensus::Split.is_aligned());
    }
}

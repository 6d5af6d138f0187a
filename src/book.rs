//! Signal book
//!
//! Single-writer store of the current signal set, keyed by pattern id.
//! Every merge that changes something publishes a new immutable
//! [`Snapshot`]; all derived queries run against a snapshot, never against
//! the live map.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::analysis::{self, InstrumentReport};
use crate::gate::{self, MarketContext, Rejection, TradeDecision};
use crate::grouping::{self, Horizon, InstrumentGroup};
use crate::params::GateConfig;
use crate::search::{self, SearchHit, SearchRule};
use crate::PatternSignal;

// ============================================================
// OBSERVERS
// ============================================================

/// Notified synchronously with each newly published snapshot.
pub trait SnapshotObserver: Send + Sync {
    fn on_snapshot(&self, snapshot: &Snapshot);
}

impl<F> SnapshotObserver for F
where
    F: Fn(&Snapshot) + Send + Sync,
{
    fn on_snapshot(&self, snapshot: &Snapshot) {
        self(snapshot)
    }
}

// ============================================================
// SNAPSHOT
// ============================================================

/// Immutable view of the signal set at one version.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    version: u64,
    signals: Arc<[PatternSignal]>,
}

impl Snapshot {
    /// Snapshot of an arbitrary signal set, sorted by pattern id.
    pub fn from_signals(version: u64, mut signals: Vec<PatternSignal>) -> Self {
        signals.sort_by(|a, b| a.pattern_id.cmp(&b.pattern_id));
        Self {
            version,
            signals: signals.into(),
        }
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    pub fn signals(&self) -> &[PatternSignal] {
        &self.signals
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn get(&self, pattern_id: &str) -> Option<&PatternSignal> {
        self.signals
            .binary_search_by(|s| s.pattern_id.as_str().cmp(pattern_id))
            .ok()
            .map(|i| &self.signals[i])
    }

    pub fn instrument_groups(&self, now: DateTime<Utc>, horizon: Horizon) -> Vec<InstrumentGroup> {
        grouping::group_by_instrument(&self.signals, now, horizon)
    }

    pub fn instrument_group(
        &self,
        instrument_id: &str,
        now: DateTime<Utc>,
        horizon: Horizon,
    ) -> Option<InstrumentGroup> {
        grouping::group_instrument(instrument_id, &self.signals, now, horizon)
    }

    /// Reports for every instrument, computed sequentially.
    pub fn analyze(&self, now: DateTime<Utc>, horizon: Horizon) -> Vec<InstrumentReport> {
        let mut reports: Vec<InstrumentReport> = self
            .instrument_groups(now, horizon)
            .into_iter()
            .map(InstrumentReport::from_group)
            .collect();
        analysis::sort_reports(&mut reports);
        reports
    }

    /// Same output as [`Snapshot::analyze`], one rayon task per instrument.
    pub fn analyze_parallel(&self, now: DateTime<Utc>, horizon: Horizon) -> Vec<InstrumentReport> {
        crate::analyze_parallel(self.instrument_groups(now, horizon))
    }

    /// Search always sees the whole snapshot, regardless of horizon.
    pub fn search(&self, rules: &[SearchRule]) -> Vec<SearchHit> {
        search::search(&self.signals, rules)
    }

    pub fn propose(
        &self,
        instrument_id: &str,
        market: &MarketContext,
        now: DateTime<Utc>,
        horizon: Horizon,
        config: &GateConfig,
    ) -> TradeDecision {
        match self.instrument_group(instrument_id, now, horizon) {
            Some(group) => gate::propose(&group, market, config),
            None => {
                debug!(instrument = instrument_id, "no signals for instrument");
                TradeDecision::Rejected(Rejection::NoCandidate)
            },
        }
    }
}

// ============================================================
// BOOK
// ============================================================

/// Outcome counts of one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub inserted: usize,
    pub replaced: usize,
    /// Identical redeliveries
    pub unchanged: usize,
}

impl MergeStats {
    #[inline]
    pub fn changed(&self) -> bool {
        self.inserted + self.replaced > 0
    }
}

/// Current signal set with last-writer-wins merge per pattern id.
#[derive(Default)]
pub struct SignalBook {
    signals: HashMap<String, PatternSignal>,
    current: Snapshot,
    observers: Vec<Box<dyn SnapshotObserver>>,
}

impl fmt::Debug for SignalBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalBook")
            .field("signals", &self.signals.len())
            .field("version", &self.current.version)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl SignalBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Box<dyn SnapshotObserver>) {
        self.observers.push(observer);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.current.version
    }

    /// The latest published snapshot.
    #[inline]
    pub fn snapshot(&self) -> Snapshot {
        self.current.clone()
    }

    /// Merge a batch by whole-record replace.
    ///
    /// Within a batch the later record for a pattern id wins. A batch that
    /// changes nothing publishes nothing.
    pub fn apply(&mut self, batch: impl IntoIterator<Item = PatternSignal>) -> MergeStats {
        let mut stats = MergeStats::default();
        for signal in batch {
            match self.signals.get_mut(&signal.pattern_id) {
                Some(existing) if *existing == signal => stats.unchanged += 1,
                Some(existing) => {
                    *existing = signal;
                    stats.replaced += 1;
                },
                None => {
                    self.signals.insert(signal.pattern_id.clone(), signal);
                    stats.inserted += 1;
                },
            }
        }

        if stats.changed() {
            self.publish();
        }
        debug!(
            inserted = stats.inserted,
            replaced = stats.replaced,
            unchanged = stats.unchanged,
            version = self.current.version,
            "merged signal batch"
        );
        stats
    }

    fn publish(&mut self) {
        let version = self.current.version + 1;
        self.current = Snapshot::from_signals(version, self.signals.values().cloned().collect());
        for observer in &self.observers {
            observer.on_snapshot(&self.current);
        }
    }
}

// ============================================================
// TESTS
// ============================================================

//! # Confluence - pattern confluence & trade-gating engine
//!
//! Consumes a feed of detected chart-pattern signals and turns it into
//! per-instrument cross-timeframe verdicts, 0-100 conviction scores,
//! chronological findings, multi-rule searches and gated, sized option
//! proposals.
//!
//! ## Quick Start
//!
//! ```rust
//! use confluence::prelude::*;
//! use chrono::{TimeZone, Utc};
//!
//! let now = Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap();
//!
//! let mut engine = EngineBuilder::new().build().unwrap();
//! engine.ingest(vec![
//!     PatternSignal::new("p-1", "NSE:INFY", "HAMMER", Timeframe::H1, Direction::Bullish, 0.8)
//!         .triggered_at(now - chrono::Duration::minutes(10)),
//!     PatternSignal::new("p-2", "NSE:INFY", "BREAKOUT", Timeframe::H4, Direction::Bullish, 0.75)
//!         .triggered_at(now - chrono::Duration::minutes(30)),
//! ]);
//!
//! let report = engine.report("NSE:INFY", now).unwrap();
//! assert_eq!(report.verdict.kind, VerdictKind::Strong);
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

pub mod analysis;
pub mod book;
pub mod gate;
pub mod grouping;
pub mod normalize;
pub mod params;
pub mod search;
pub mod timeframe;

pub mod prelude {
    pub use crate::{
        // Analysis
        analysis::{
            classify, narrate, score, ConfluenceVerdict, Finding, InstrumentReport,
            StrengthScore, VerdictKind,
        },
        analyze_parallel,
        // Book
        book::{MergeStats, SignalBook, Snapshot, SnapshotObserver},
        // Gate
        gate::{propose, MarketContext, OptionSide, Proposal, Rejection, TradeDecision},
        // Grouping
        grouping::{group_by_instrument, Horizon, InstrumentGroup, TimeframeGroup},
        // Normalization
        normalize::{decode_feed, is_expired, FeedDecode, RawSignal},
        // Config
        params::{get_count, get_ratio, EngineConfig, GateConfig, ParamMeta},
        // Search
        search::{search, RuleMatch, SearchHit, SearchRule},
        // Timeframes
        timeframe::Timeframe,
        // Types
        ConfluenceEngine,
        ConfluenceError,
        Direction,
        EngineBuilder,
        PatternSignal,
        PatternType,
        PriceLevel,
        Ratio,
        Result,
        SignalStatus,
        TradingRegime,
    };
}

use analysis::InstrumentReport;
use book::{MergeStats, SignalBook, Snapshot, SnapshotObserver};
use gate::{MarketContext, TradeDecision};
use grouping::InstrumentGroup;
use normalize::FeedDecode;
use params::EngineConfig;
use search::{SearchHit, SearchRule};
use timeframe::Timeframe;

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, ConfluenceError>;

/// Caller-side failures. Business outcomes (NONE verdicts, gate rejections)
/// are values, never errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfluenceError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Malformed feed record at index {index}: {reason}")]
    MalformedRecord { index: usize, reason: String },

    #[error("Feed decode failed: {0}")]
    Decode(String),
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(ConfluenceError::InvalidValue(
                "Ratio cannot be NaN or infinite",
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfluenceError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    /// Saturating constructor: out-of-range values are clamped, NaN maps to 0.
    pub fn clamped(value: f64) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 1.0))
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// PATTERN TYPE
// ============================================================

/// Pattern tag as emitted by the detector feed, e.g. `HAMMER`, `BREAKOUT`.
///
/// Stored uppercased with spaces and dashes folded to underscores, so
/// `"bullish engulfing"` and `"BULLISH_ENGULFING"` are the same pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PatternType(String);

impl PatternType {
    pub fn new(tag: &str) -> Self {
        let tag = tag
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        Self(tag)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the typical/expected direction of this pattern.
    ///
    /// - `Some(Direction::Bullish)` - pattern typically signals bullish moves
    /// - `Some(Direction::Bearish)` - pattern typically signals bearish moves
    /// - `Some(Direction::Neutral)` - pattern has no directional bias
    /// - `None` - unknown or bidirectional, direction must come from the feed
    pub fn typical_direction(&self) -> Option<Direction> {
        match self.0.as_str() {
            "HAMMER"
            | "INVERTED_HAMMER"
            | "BULLISH_ENGULFING"
            | "BULLISH_HARAMI"
            | "MORNING_STAR"
            | "MORNING_DOJI_STAR"
            | "PIERCING_LINE"
            | "THREE_WHITE_SOLDIERS"
            | "DRAGONFLY_DOJI"
            | "TWEEZER_BOTTOM"
            | "BREAKOUT"
            | "DOUBLE_BOTTOM"
            | "INVERSE_HEAD_AND_SHOULDERS"
            | "BULL_FLAG"
            | "ASCENDING_TRIANGLE"
            | "GOLDEN_CROSS" => Some(Direction::Bullish),
            "SHOOTING_STAR"
            | "HANGING_MAN"
            | "BEARISH_ENGULFING"
            | "BEARISH_HARAMI"
            | "EVENING_STAR"
            | "EVENING_DOJI_STAR"
            | "DARK_CLOUD_COVER"
            | "THREE_BLACK_CROWS"
            | "GRAVESTONE_DOJI"
            | "TWEEZER_TOP"
            | "BREAKDOWN"
            | "DOUBLE_TOP"
            | "HEAD_AND_SHOULDERS"
            | "BEAR_FLAG"
            | "DESCENDING_TRIANGLE"
            | "DEATH_CROSS" => Some(Direction::Bearish),
            "DOJI" | "LONG_LEGGED_DOJI" | "SPINNING_TOP" | "INSIDE_BAR"
            | "SYMMETRICAL_TRIANGLE" => Some(Direction::Neutral),
            _ => None,
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PatternType {
    fn from(tag: String) -> Self {
        PatternType::new(&tag)
    }
}

impl From<&str> for PatternType {
    fn from(tag: &str) -> Self {
        PatternType::new(tag)
    }
}

impl From<PatternType> for String {
    fn from(p: PatternType) -> Self {
        p.0
    }
}

// ============================================================
// DIRECTION / STATUS / REGIME
// ============================================================

/// Direction/bias of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Bullish,
    Neutral,
    Bearish,
}

impl Direction {
    /// Case-insensitive parse; `None` for labels that carry no direction.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "BULLISH" | "BULL" | "LONG" | "BUY" | "UP" => Some(Direction::Bullish),
            "BEARISH" | "BEAR" | "SHORT" | "SELL" | "DOWN" => Some(Direction::Bearish),
            "NEUTRAL" | "FLAT" | "NONE" => Some(Direction::Neutral),
            _ => None,
        }
    }

    #[inline]
    pub fn is_bullish(self) -> bool {
        matches!(self, Direction::Bullish)
    }

    #[inline]
    pub fn is_bearish(self) -> bool {
        matches!(self, Direction::Bearish)
    }

    #[inline]
    pub fn is_directional(self) -> bool {
        !matches!(self, Direction::Neutral)
    }

    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Direction::Bullish => Direction::Bearish,
            Direction::Bearish => Direction::Bullish,
            Direction::Neutral => Direction::Neutral,
        }
    }
}

/// Lifecycle status as reported by the feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    #[default]
    Active,
    CompletedWin,
    CompletedLoss,
    Expired,
    Invalidated,
}

impl SignalStatus {
    /// Case-insensitive parse, unknown labels read as `Active`.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().replace([' ', '-'], "_").as_str() {
            "COMPLETED_WIN" | "WIN" | "TARGET_HIT" => SignalStatus::CompletedWin,
            "COMPLETED_LOSS" | "LOSS" | "STOPPED_OUT" => SignalStatus::CompletedLoss,
            "EXPIRED" => SignalStatus::Expired,
            "INVALIDATED" | "CANCELLED" => SignalStatus::Invalidated,
            _ => SignalStatus::Active,
        }
    }

    #[inline]
    pub fn is_completed(self) -> bool {
        matches!(self, SignalStatus::CompletedWin | SignalStatus::CompletedLoss)
    }
}

/// Market regime tag attached to a signal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TradingRegime {
    Trending,
    Ranging,
    Volatile,
    Breakout,
    /// Hard no-trade regime
    Avoid,
    Other(String),
}

impl TradingRegime {
    pub fn parse(label: &str) -> Self {
        let norm = label.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        match norm.as_str() {
            "TRENDING" | "TREND" | "TRENDING_UP" | "TRENDING_DOWN" => TradingRegime::Trending,
            "RANGING" | "RANGE" | "SIDEWAYS" | "CHOP" => TradingRegime::Ranging,
            "VOLATILE" | "HIGH_VOLATILITY" => TradingRegime::Volatile,
            "BREAKOUT" => TradingRegime::Breakout,
            "AVOID" | "NO_TRADE" | "DO_NOT_TRADE" => TradingRegime::Avoid,
            _ => TradingRegime::Other(norm),
        }
    }

    #[inline]
    pub fn is_avoid(&self) -> bool {
        matches!(self, TradingRegime::Avoid)
    }

    pub fn label(&self) -> &str {
        match self {
            TradingRegime::Trending => "TRENDING",
            TradingRegime::Ranging => "RANGING",
            TradingRegime::Volatile => "VOLATILE",
            TradingRegime::Breakout => "BREAKOUT",
            TradingRegime::Avoid => "AVOID",
            TradingRegime::Other(tag) => tag,
        }
    }
}

impl From<String> for TradingRegime {
    fn from(label: String) -> Self {
        TradingRegime::parse(&label)
    }
}

impl From<TradingRegime> for String {
    fn from(r: TradingRegime) -> Self {
        r.label().to_string()
    }
}

// ============================================================
// PRICE LEVEL - missing vs. data error
// ============================================================

/// A price field that keeps "absent" and "present but unusable" apart.
///
/// `Missing` means the feed did not send the field. `Invalid` means it sent
/// zero, a negative or a non-finite number, which is never a real price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceLevel {
    #[default]
    Missing,
    Invalid(f64),
    Price(f64),
}

impl PriceLevel {
    pub fn from_raw(raw: Option<f64>) -> Self {
        match raw {
            None => PriceLevel::Missing,
            Some(v) if v.is_finite() && v > 0.0 => PriceLevel::Price(v),
            Some(v) => PriceLevel::Invalid(v),
        }
    }

    #[inline]
    pub fn price(self) -> Option<f64> {
        match self {
            PriceLevel::Price(p) => Some(p),
            _ => None,
        }
    }

    #[inline]
    pub fn is_missing(self) -> bool {
        matches!(self, PriceLevel::Missing)
    }

    #[inline]
    pub fn is_invalid(self) -> bool {
        matches!(self, PriceLevel::Invalid(_))
    }

    /// Apply `f` to a valid price; sentinels pass through untouched.
    pub fn map(self, f: impl FnOnce(f64) -> f64) -> Self {
        match self {
            PriceLevel::Price(p) => PriceLevel::Price(f(p)),
            other => other,
        }
    }

    /// Display form: the number, `MISSING`, or `DATA_ERROR`.
    pub fn label(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PriceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceLevel::Missing => f.write_str("MISSING"),
            PriceLevel::Invalid(_) => f.write_str("DATA_ERROR"),
            PriceLevel::Price(p) => write!(f, "{p:.2}"),
        }
    }
}

// ============================================================
// PATTERN SIGNAL
// ============================================================

/// One detected occurrence of a named chart pattern.
///
/// Records are never edited in place: a feed update replaces the whole record
/// keyed by `pattern_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSignal {
    pub pattern_id: String,
    pub instrument_id: String,
    pub pattern_type: PatternType,
    pub timeframe: Timeframe,
    /// `None` when the feed timestamp was missing or unparseable
    pub triggered_at: Option<DateTime<Utc>>,
    /// Explicit expiry override
    pub expires_at: Option<DateTime<Utc>>,
    pub direction: Direction,
    pub confidence: Ratio,
    pub entry_price: PriceLevel,
    pub stop_loss: PriceLevel,
    pub targets: [PriceLevel; 4],
    pub risk_reward_ratio: Option<f64>,
    pub volume_confirmed: bool,
    pub trading_regime: Option<TradingRegime>,
    pub spread_impact_pct: Option<f64>,
    pub status: SignalStatus,
    pub actual_pnl: Option<f64>,
    pub r_multiple: Option<f64>,
}

impl PatternSignal {
    /// Minimal ACTIVE signal; remaining fields are set with the chained setters.
    pub fn new(
        pattern_id: impl Into<String>,
        instrument_id: impl Into<String>,
        pattern_type: impl Into<PatternType>,
        timeframe: Timeframe,
        direction: Direction,
        confidence: f64,
    ) -> Self {
        Self {
            pattern_id: pattern_id.into(),
            instrument_id: instrument_id.into(),
            pattern_type: pattern_type.into(),
            timeframe,
            triggered_at: None,
            expires_at: None,
            direction,
            confidence: Ratio::clamped(confidence),
            entry_price: PriceLevel::Missing,
            stop_loss: PriceLevel::Missing,
            targets: [PriceLevel::Missing; 4],
            risk_reward_ratio: None,
            volume_confirmed: false,
            trading_regime: None,
            spread_impact_pct: None,
            status: SignalStatus::Active,
            actual_pnl: None,
            r_multiple: None,
        }
    }

    pub fn triggered_at(mut self, at: DateTime<Utc>) -> Self {
        self.triggered_at = Some(at);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Set entry, stop and first target from raw feed values.
    ///
    /// Risk:reward is re-derived from the new prices unless the current
    /// value was supplied by the feed rather than derived.
    pub fn levels(mut self, entry: Option<f64>, stop: Option<f64>, target1: Option<f64>) -> Self {
        let derived = self.risk_reward_ratio.is_none()
            || self.risk_reward_ratio == normalize::derive_risk_reward(&self);
        self.entry_price = PriceLevel::from_raw(entry);
        self.stop_loss = PriceLevel::from_raw(stop);
        self.targets[0] = PriceLevel::from_raw(target1);
        if derived {
            self.risk_reward_ratio = normalize::derive_risk_reward(&self);
        }
        self
    }

    pub fn target(mut self, n: usize, value: Option<f64>) -> Self {
        if (1..=4).contains(&n) {
            self.targets[n - 1] = PriceLevel::from_raw(value);
        }
        self
    }

    pub fn volume_confirmed(mut self, confirmed: bool) -> Self {
        self.volume_confirmed = confirmed;
        self
    }

    pub fn regime(mut self, regime: TradingRegime) -> Self {
        self.trading_regime = Some(regime);
        self
    }

    pub fn status(mut self, status: SignalStatus) -> Self {
        self.status = status;
        self
    }

    /// Target `n` in 1..=4; anything else reads as missing.
    pub fn target_level(&self, n: usize) -> PriceLevel {
        match n {
            1..=4 => self.targets[n - 1],
            _ => PriceLevel::Missing,
        }
    }

    /// See [`normalize::expiry_at`].
    #[inline]
    pub fn expiry_at(&self) -> Option<DateTime<Utc>> {
        normalize::expiry_at(self)
    }

    /// See [`normalize::is_expired`].
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        normalize::is_expired(self, now)
    }

    #[inline]
    pub fn effective_status(&self, now: DateTime<Utc>) -> SignalStatus {
        normalize::effective_status(self, now)
    }

    /// Active = still ACTIVE after local expiry is applied.
    #[inline]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == SignalStatus::Active
    }
}

// ============================================================
// ENGINE
// ============================================================

/// Signal book plus configuration; the in-process façade the presentation
/// layer talks to.
pub struct ConfluenceEngine {
    book: SignalBook,
    config: EngineConfig,
}

impl ConfluenceEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            book: SignalBook::new(),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register an observer notified with every new snapshot.
    pub fn subscribe(&mut self, observer: Box<dyn SnapshotObserver>) {
        self.book.subscribe(observer);
    }

    /// Merge an already-normalized batch (whole-record replace per pattern id).
    pub fn ingest(&mut self, batch: impl IntoIterator<Item = PatternSignal>) -> MergeStats {
        self.book.apply(batch)
    }

    /// Decode a JSON feed payload and merge every keyable record.
    ///
    /// Records that could not be keyed are returned in `FeedDecode::rejected`;
    /// the merge still happens for the rest.
    pub fn ingest_json(&mut self, payload: &str) -> Result<(MergeStats, FeedDecode)> {
        let mut decoded = normalize::decode_feed(payload)?;
        let stats = self.book.apply(std::mem::take(&mut decoded.signals));
        info!(
            inserted = stats.inserted,
            replaced = stats.replaced,
            rejected = decoded.rejected.len(),
            "ingested feed payload"
        );
        Ok((stats, decoded))
    }

    /// Immutable view of the current signal set.
    #[inline]
    pub fn snapshot(&self) -> Snapshot {
        self.book.snapshot()
    }

    /// Groups for the configured horizon, evaluated at `now`.
    pub fn groups(&self, now: DateTime<Utc>) -> Vec<InstrumentGroup> {
        self.snapshot().instrument_groups(now, self.config.horizon)
    }

    /// Reports for every instrument, computed in parallel.
    pub fn reports(&self, now: DateTime<Utc>) -> Vec<InstrumentReport> {
        analyze_parallel(self.groups(now))
    }

    pub fn report(&self, instrument_id: &str, now: DateTime<Utc>) -> Option<InstrumentReport> {
        self.snapshot()
            .instrument_group(instrument_id, now, self.config.horizon)
            .map(InstrumentReport::from_group)
    }

    pub fn search(&self, rules: &[SearchRule]) -> Vec<SearchHit> {
        self.snapshot().search(rules)
    }

    pub fn propose(
        &self,
        instrument_id: &str,
        market: &MarketContext,
        now: DateTime<Utc>,
    ) -> TradeDecision {
        self.snapshot()
            .propose(instrument_id, market, now, self.config.horizon, &self.config.gate)
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating ConfluenceEngine instances
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    observers: Vec<Box<dyn SnapshotObserver>>,
    seed: Vec<PatternSignal>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Load configuration from TOML
    pub fn config_toml(mut self, toml: &str) -> Result<Self> {
        self.config = EngineConfig::from_toml_str(toml)?;
        Ok(self)
    }

    pub fn gate(mut self, gate: params::GateConfig) -> Self {
        self.config.gate = gate;
        self
    }

    pub fn horizon(mut self, horizon: grouping::Horizon) -> Self {
        self.config.horizon = horizon;
        self
    }

    /// Add a snapshot observer
    pub fn observer<O: SnapshotObserver + 'static>(mut self, observer: O) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Initial bulk history, merged before observers are attached
    pub fn seed(mut self, signals: impl IntoIterator<Item = PatternSignal>) -> Self {
        self.seed.extend(signals);
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<ConfluenceEngine> {
        let mut engine = ConfluenceEngine::new(self.config)?;
        if !self.seed.is_empty() {
            engine.ingest(self.seed);
        }
        for observer in self.observers {
            engine.subscribe(observer);
        }
        Ok(engine)
    }
}

// ============================================================
// PARALLEL ANALYSIS
// ============================================================

/// Analyze independent instrument groups in parallel.
///
/// Output is ordered by score descending, then instrument id, regardless of
/// how rayon scheduled the work.
pub fn analyze_parallel<I>(groups: I) -> Vec<InstrumentReport>
where
    I: IntoParallelIterator<Item = InstrumentGroup>,
{
    let mut reports: Vec<InstrumentReport> = groups
        .into_par_iter()
        .map(InstrumentReport::from_group)
        .collect();
    analysis::sort_reports(&mut reports);
    reports
}

// ============================================================
// TESTS
// ============================================================

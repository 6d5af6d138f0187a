//! Signal normalizer
//!
//! Turns raw feed records into [`PatternSignal`]s and answers the one
//! temporal question everything downstream asks: is this signal still live?
//!
//! Malformed input degrades instead of failing. An unparseable timestamp or
//! an unknown timeframe yields a signal that never expires; only records
//! that cannot be keyed at all are rejected.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::timeframe::Timeframe;
use crate::{
    ConfluenceError, Direction, PatternSignal, PatternType, PriceLevel, Ratio, Result,
    SignalStatus, TradingRegime,
};

// ============================================================
// RAW FEED RECORD
// ============================================================

/// Timestamp as the feed sends it. Shapes that are not a number or a string
/// are kept so the record still decodes; they read as "no timestamp".
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Millis(i64),
    FractionalMillis(f64),
    Text(String),
    Other(serde_json::Value),
}

/// Record key as the feed sends it: a string or a bare number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl RawId {
    pub fn into_string(self) -> String {
        match self {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

impl From<&str> for RawId {
    fn from(s: &str) -> Self {
        RawId::Text(s.to_string())
    }
}

impl From<String> for RawId {
    fn from(s: String) -> Self {
        RawId::Text(s)
    }
}

/// Feed record before normalization (camelCase JSON).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawSignal {
    #[serde(alias = "pattern_id", alias = "id")]
    pub pattern_id: Option<RawId>,
    #[serde(alias = "instrument_id", alias = "symbol")]
    pub instrument_id: Option<RawId>,
    #[serde(alias = "pattern_type")]
    pub pattern_type: Option<String>,
    pub timeframe: Option<String>,
    #[serde(alias = "triggered_at")]
    pub triggered_at: Option<RawTimestamp>,
    #[serde(alias = "expires_at")]
    pub expires_at: Option<RawTimestamp>,
    pub direction: Option<String>,
    pub confidence: Option<f64>,
    #[serde(alias = "entry_price")]
    pub entry_price: Option<f64>,
    #[serde(alias = "stop_loss")]
    pub stop_loss: Option<f64>,
    pub target1: Option<f64>,
    pub target2: Option<f64>,
    pub target3: Option<f64>,
    pub target4: Option<f64>,
    #[serde(alias = "risk_reward_ratio")]
    pub risk_reward_ratio: Option<f64>,
    #[serde(alias = "volume_confirmed")]
    pub volume_confirmed: Option<bool>,
    #[serde(alias = "trading_regime")]
    pub trading_regime: Option<String>,
    #[serde(alias = "spread_impact_pct")]
    pub spread_impact_pct: Option<f64>,
    pub status: Option<String>,
    #[serde(alias = "actual_pnl")]
    pub actual_pnl: Option<f64>,
    #[serde(alias = "r_multiple")]
    pub r_multiple: Option<f64>,
}

/// Result of decoding one feed payload
#[derive(Debug, Clone, Default)]
pub struct FeedDecode {
    pub signals: Vec<PatternSignal>,
    /// Records that could not be keyed, with their position in the payload
    pub rejected: Vec<ConfluenceError>,
}

// ============================================================
// DECODING
// ============================================================

/// Decode a JSON payload holding either an array of records or one record.
///
/// Each record is decoded on its own so one bad element never costs the
/// rest of the batch. Only a payload that is not JSON at all is an error.
pub fn decode_feed(payload: &str) -> Result<FeedDecode> {
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| ConfluenceError::Decode(e.to_string()))?;

    let records = match value {
        serde_json::Value::Array(items) => items,
        obj @ serde_json::Value::Object(_) => vec![obj],
        other => {
            return Err(ConfluenceError::Decode(format!(
                "expected array or object, got {}",
                json_kind(&other)
            )))
        },
    };

    let mut out = FeedDecode::default();
    for (index, record) in records.into_iter().enumerate() {
        let decoded = serde_json::from_value::<RawSignal>(record)
            .map_err(|e| ConfluenceError::MalformedRecord {
                index,
                reason: e.to_string(),
            })
            .and_then(|raw| normalize(raw, index));

        match decoded {
            Ok(signal) => out.signals.push(signal),
            Err(e) => {
                warn!(index, error = %e, "dropping unkeyable feed record");
                out.rejected.push(e);
            },
        }
    }
    Ok(out)
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ============================================================
// NORMALIZATION
// ============================================================

/// Canonicalize one raw record. `index` is only used for error reporting.
pub fn normalize(raw: RawSignal, index: usize) -> Result<PatternSignal> {
    let pattern_id = non_empty(raw.pattern_id).ok_or_else(|| ConfluenceError::MalformedRecord {
        index,
        reason: "missing patternId".into(),
    })?;
    let instrument_id =
        non_empty(raw.instrument_id).ok_or_else(|| ConfluenceError::MalformedRecord {
            index,
            reason: format!("signal {pattern_id} has no instrumentId"),
        })?;

    let pattern_type = PatternType::new(raw.pattern_type.as_deref().unwrap_or("UNKNOWN"));

    let timeframe = match raw.timeframe.as_deref() {
        Some(label) => Timeframe::parse(label),
        None => Timeframe::Unknown("unknown".into()),
    };
    if !timeframe.is_known() {
        warn!(%pattern_id, timeframe = %timeframe, "unknown timeframe, signal will never expire");
    }

    let triggered_at = raw.triggered_at.as_ref().and_then(|ts| {
        let parsed = parse_raw_timestamp(ts);
        if parsed.is_none() {
            warn!(%pattern_id, raw = ?ts, "unparseable triggeredAt, signal will never expire");
        }
        parsed
    });
    let expires_at = raw.expires_at.as_ref().and_then(parse_raw_timestamp);

    let direction = raw
        .direction
        .as_deref()
        .and_then(Direction::parse)
        .or_else(|| pattern_type.typical_direction())
        .unwrap_or(Direction::Neutral);

    let status = raw
        .status
        .as_deref()
        .map(SignalStatus::parse)
        .unwrap_or_default();

    let (actual_pnl, r_multiple) = if status.is_completed() {
        (finite(raw.actual_pnl), finite(raw.r_multiple))
    } else {
        if raw.actual_pnl.is_some() || raw.r_multiple.is_some() {
            debug!(%pattern_id, ?status, "ignoring outcome fields on an open signal");
        }
        (None, None)
    };

    let mut signal = PatternSignal {
        pattern_id,
        instrument_id,
        pattern_type,
        timeframe,
        triggered_at,
        expires_at,
        direction,
        confidence: confidence_from_raw(raw.confidence),
        entry_price: PriceLevel::from_raw(raw.entry_price),
        stop_loss: PriceLevel::from_raw(raw.stop_loss),
        targets: [
            PriceLevel::from_raw(raw.target1),
            PriceLevel::from_raw(raw.target2),
            PriceLevel::from_raw(raw.target3),
            PriceLevel::from_raw(raw.target4),
        ],
        risk_reward_ratio: finite(raw.risk_reward_ratio).filter(|rr| *rr >= 0.0),
        volume_confirmed: raw.volume_confirmed.unwrap_or(false),
        trading_regime: raw.trading_regime.as_deref().map(TradingRegime::parse),
        spread_impact_pct: finite(raw.spread_impact_pct),
        status,
        actual_pnl,
        r_multiple,
    };

    if signal.risk_reward_ratio.is_none() {
        signal.risk_reward_ratio = derive_risk_reward(&signal);
    }

    Ok(signal)
}

fn non_empty(id: Option<RawId>) -> Option<String> {
    id.map(|id| id.into_string().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|v| v.is_finite())
}

/// Clamp to [0, 1]; values in (1, 100] are percentages.
fn confidence_from_raw(raw: Option<f64>) -> Ratio {
    match raw {
        Some(v) if v > 1.0 && v <= 100.0 => Ratio::clamped(v / 100.0),
        Some(v) => Ratio::clamped(v),
        None => Ratio::clamped(0.0),
    }
}

/// Reward over risk from entry, stop and first target.
///
/// `None` unless all three are valid prices and the risk is nonzero.
pub fn derive_risk_reward(signal: &PatternSignal) -> Option<f64> {
    let entry = signal.entry_price.price()?;
    let stop = signal.stop_loss.price()?;
    let target = signal.targets[0].price()?;
    let risk = (entry - stop).abs();
    (risk > f64::EPSILON).then(|| (target - entry).abs() / risk)
}

// ============================================================
// TIMESTAMPS
// ============================================================

fn parse_raw_timestamp(ts: &RawTimestamp) -> Option<DateTime<Utc>> {
    match ts {
        RawTimestamp::Millis(ms) => DateTime::<Utc>::from_timestamp_millis(*ms),
        RawTimestamp::FractionalMillis(ms) if ms.is_finite() => {
            DateTime::<Utc>::from_timestamp_millis(ms.trunc() as i64)
        },
        RawTimestamp::FractionalMillis(_) | RawTimestamp::Other(_) => None,
        RawTimestamp::Text(s) => parse_timestamp(s),
    }
}

/// RFC 3339, naive `YYYY-MM-DD HH:MM:SS` (read as UTC) or epoch millis.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(naive.and_utc());
        }
    }
    text.parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

// ============================================================
// EXPIRY
// ============================================================

/// Instant after which the signal is expired.
///
/// The explicit `expires_at` override wins; otherwise the close of the
/// triggering bar. `None` means the signal never expires.
pub fn expiry_at(signal: &PatternSignal) -> Option<DateTime<Utc>> {
    if signal.expires_at.is_some() {
        return signal.expires_at;
    }
    let minutes = signal.timeframe.duration_minutes();
    if minutes == 0 {
        return None;
    }
    signal
        .triggered_at
        .and_then(|at| at.checked_add_signed(Duration::minutes(i64::from(minutes))))
}

/// `true` once `now` is past the signal's expiry. Pure in `(signal, now)`.
#[inline]
pub fn is_expired(signal: &PatternSignal, now: DateTime<Utc>) -> bool {
    match expiry_at(signal) {
        Some(expiry) => now > expiry,
        None => false,
    }
}

/// Stored status with local expiry applied on top.
pub fn effective_status(signal: &PatternSignal, now: DateTime<Utc>) -> SignalStatus {
    match signal.status {
        SignalStatus::Active if is_expired(signal, now) => SignalStatus::Expired,
        status => status,
    }
}

// ============================================================
// TESTS
// ============================================================

//! Trade gate & sizer
//!
//! Picks the best actionable signal of an instrument, runs it through the
//! hard gates in a fixed order and, if it survives, sizes an option position
//! and maps the underlying's levels into contract prices.
//!
//! Gate order: candidate → volume → regime → level consistency → sizing.
//! Every failure is a [`Rejection`] value; none of them is an error.

use serde::Serialize;
use tracing::debug;

use crate::grouping::{cmp_confidence, InstrumentGroup};
use crate::params::GateConfig;
use crate::{ConfluenceError, Direction, PatternSignal, PriceLevel, Ratio, Result};

// ============================================================
// MARKET CONTEXT
// ============================================================

/// Account and contract facts supplied by the caller for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarketContext {
    capital: f64,
    lot_size: u32,
    contract_price: f64,
}

impl MarketContext {
    /// `capital` available to allocate, contract `lot_size` (multiplier) and
    /// the estimated price of one unit of the contract.
    pub fn new(capital: f64, lot_size: u32, contract_price: f64) -> Result<Self> {
        if !capital.is_finite() || capital < 0.0 {
            return Err(ConfluenceError::InvalidValue(
                "capital must be finite and non-negative",
            ));
        }
        if lot_size == 0 {
            return Err(ConfluenceError::InvalidValue("lot size must be >= 1"));
        }
        if !contract_price.is_finite() || contract_price <= 0.0 {
            return Err(ConfluenceError::InvalidValue(
                "contract price must be finite and > 0",
            ));
        }
        Ok(Self {
            capital,
            lot_size,
            contract_price,
        })
    }

    #[inline]
    pub fn capital(&self) -> f64 {
        self.capital
    }

    #[inline]
    pub fn lot_size(&self) -> u32 {
        self.lot_size
    }

    #[inline]
    pub fn contract_price(&self) -> f64 {
        self.contract_price
    }

    #[inline]
    pub fn cost_per_contract(&self) -> f64 {
        self.contract_price * f64::from(self.lot_size)
    }
}

// ============================================================
// OUTCOMES
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionSide {
    Call,
    Put,
}

impl OptionSide {
    pub fn for_direction(direction: Direction) -> Option<Self> {
        match direction {
            Direction::Bullish => Some(OptionSide::Call),
            Direction::Bearish => Some(OptionSide::Put),
            Direction::Neutral => None,
        }
    }

    /// +1 when the contract gains as the underlying rises.
    #[inline]
    fn sign(self) -> f64 {
        match self {
            OptionSide::Call => 1.0,
            OptionSide::Put => -1.0,
        }
    }
}

/// Levels expressed in contract price units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContractLevels {
    pub entry: f64,
    pub stop: f64,
    /// Missing or invalid underlying targets stay as sentinels
    pub targets: [PriceLevel; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proposal {
    pub pattern_id: String,
    pub instrument_id: String,
    pub side: OptionSide,
    pub confidence: Ratio,
    pub contracts: u32,
    pub lot_size: u32,
    /// Capital share granted by the confidence band
    pub budget: f64,
    /// Capital actually spent on whole contracts
    pub allocated: f64,
    pub underlying_entry: f64,
    pub underlying_stop: f64,
    pub levels: ContractLevels,
    /// Loss if the contract stop is hit
    pub max_loss: f64,
}

/// Why no proposal was made. Each variant is an expected outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rejection {
    /// No active directional signal with stop, target and enough confidence
    NoCandidate,
    NoVolumeConfirmation { pattern_id: String },
    RegimeAvoid { pattern_id: String },
    InconsistentLevels {
        pattern_id: String,
        reason: &'static str,
    },
    /// Allocation does not cover one whole contract
    CannotSize {
        pattern_id: String,
        allocation: f64,
        cost_per_contract: f64,
    },
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::NoCandidate => "NO_CANDIDATE",
            Rejection::NoVolumeConfirmation { .. } => "NO_VOLUME_CONFIRMATION",
            Rejection::RegimeAvoid { .. } => "REGIME_AVOID",
            Rejection::InconsistentLevels { .. } => "INCONSISTENT_LEVELS",
            Rejection::CannotSize { .. } => "CANNOT_SIZE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum TradeDecision {
    Proposed(Proposal),
    Rejected(Rejection),
}

impl TradeDecision {
    #[inline]
    pub fn is_proposed(&self) -> bool {
        matches!(self, TradeDecision::Proposed(_))
    }

    pub fn proposal(&self) -> Option<&Proposal> {
        match self {
            TradeDecision::Proposed(p) => Some(p),
            TradeDecision::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            TradeDecision::Proposed(_) => None,
            TradeDecision::Rejected(r) => Some(r),
        }
    }
}

// ============================================================
// CANDIDATE SELECTION
// ============================================================

fn is_candidate(signal: &PatternSignal, config: &GateConfig) -> bool {
    signal.direction.is_directional()
        && signal.stop_loss.price().is_some()
        && signal.targets[0].price().is_some()
        && signal.confidence.get() >= config.min_confidence
}

/// Highest-confidence qualifying active signal; newest wins ties.
pub fn select_candidate<'a>(
    group: &'a InstrumentGroup,
    config: &GateConfig,
) -> Option<&'a PatternSignal> {
    let now = group.evaluated_at;
    group
        .active_signals()
        .filter(|s| s.is_active(now) && is_candidate(s, config))
        .min_by(|a, b| cmp_confidence(a, b))
}

// ============================================================
// LEVEL MAPPING
// ============================================================

/// Map underlying entry/stop/targets into contract prices.
///
/// `contract(level) = contract_price + delta * sign * (level - entry)`,
/// floored at the minimum contract price. Fails unless the stop sits on the
/// losing side of entry and every valid target on the winning side, and the
/// mapped stop stays strictly below the mapped entry.
pub fn map_levels(
    signal: &PatternSignal,
    side: OptionSide,
    market: &MarketContext,
    config: &GateConfig,
) -> std::result::Result<ContractLevels, &'static str> {
    let entry = signal.entry_price.price().ok_or("entry price missing or invalid")?;
    let stop = signal.stop_loss.price().ok_or("stop loss missing or invalid")?;
    let sign = side.sign();

    if sign * (stop - entry) >= 0.0 {
        return Err("stop is not on the losing side of entry");
    }
    let wrong_target = signal
        .targets
        .iter()
        .filter_map(|t| t.price())
        .any(|t| sign * (t - entry) <= 0.0);
    if wrong_target {
        return Err("target is not on the winning side of entry");
    }

    let premium = market.contract_price();
    let to_contract = |level: f64| {
        (premium + config.delta * sign * (level - entry)).max(config.min_contract_price)
    };

    let levels = ContractLevels {
        entry: premium,
        stop: to_contract(stop),
        targets: signal.targets.map(|t| t.map(&to_contract)),
    };

    if levels.stop >= levels.entry {
        return Err("contract stop collapses onto entry or the price floor");
    }
    let collapsed_target = levels
        .targets
        .iter()
        .filter_map(|t| t.price())
        .any(|t| t <= levels.entry);
    if collapsed_target {
        return Err("contract target collapses onto entry");
    }
    debug_assert!(levels
        .targets
        .iter()
        .filter_map(|t| t.price())
        .all(|t| t > levels.entry));

    Ok(levels)
}

// ============================================================
// PROPOSAL
// ============================================================

/// Run the gates for one instrument group.
pub fn propose(group: &InstrumentGroup, market: &MarketContext, config: &GateConfig) -> TradeDecision {
    let decision = evaluate(group, market, config);
    match &decision {
        TradeDecision::Proposed(p) => debug!(
            instrument = %group.instrument_id,
            pattern_id = %p.pattern_id,
            contracts = p.contracts,
            "trade proposed"
        ),
        TradeDecision::Rejected(r) => debug!(
            instrument = %group.instrument_id,
            code = r.code(),
            "trade rejected"
        ),
    }
    decision
}

fn evaluate(group: &InstrumentGroup, market: &MarketContext, config: &GateConfig) -> TradeDecision {
    let Some(signal) = select_candidate(group, config) else {
        return TradeDecision::Rejected(Rejection::NoCandidate);
    };
    let pattern_id = signal.pattern_id.clone();

    if !signal.volume_confirmed {
        return TradeDecision::Rejected(Rejection::NoVolumeConfirmation { pattern_id });
    }
    if signal.trading_regime.as_ref().is_some_and(|r| r.is_avoid()) {
        return TradeDecision::Rejected(Rejection::RegimeAvoid { pattern_id });
    }

    // Candidates are directional, so a side always exists.
    let Some(side) = OptionSide::for_direction(signal.direction) else {
        return TradeDecision::Rejected(Rejection::NoCandidate);
    };

    let levels = match map_levels(signal, side, market, config) {
        Ok(levels) => levels,
        Err(reason) => {
            return TradeDecision::Rejected(Rejection::InconsistentLevels { pattern_id, reason })
        },
    };

    let budget = market.capital() * config.allocation_fraction(signal.confidence);
    let cost = market.cost_per_contract();
    let contracts = (budget / cost).floor();
    if contracts < 1.0 {
        return TradeDecision::Rejected(Rejection::CannotSize {
            pattern_id,
            allocation: budget,
            cost_per_contract: cost,
        });
    }
    let contracts = contracts.min(f64::from(u32::MAX)) as u32;

    let units = f64::from(contracts) * f64::from(market.lot_size());
    TradeDecision::Proposed(Proposal {
        pattern_id,
        instrument_id: group.instrument_id.clone(),
        side,
        confidence: signal.confidence,
        contracts,
        lot_size: market.lot_size(),
        budget,
        allocated: units * levels.entry,
        underlying_entry: signal.entry_price.price().unwrap_or_default(),
        underlying_stop: signal.stop_loss.price().unwrap_or_default(),
        max_loss: units * (levels.entry - levels.stop),
        levels,
    })
}

// ============================================================
// TESTS
// ============================================================

//! Engine configuration and parameter metadata
//!
//! This module provides metadata about tunable parameters, enabling:
//! - Range validation with descriptive errors
//! - Parameter documentation
//! - Configuration from TOML or from a flat key/value map
//!
//! # Example
//!
//! ```rust
//! use confluence::params::{EngineConfig, GateConfig};
//!
//! for param in GateConfig::param_meta() {
//!     println!("{}: {:?} (default: {})", param.name, param.param_type, param.default);
//! }
//!
//! let config = EngineConfig::from_toml_str(r#"
//!     horizon = { mode = "last_hours", hours = 12 }
//!
//!     [gate]
//!     min_confidence = 0.65
//! "#).unwrap();
//! assert_eq!(config.gate.min_confidence, 0.65);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::grouping::Horizon;
use crate::{ConfluenceError, Ratio, Result};

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Type of parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  /// Fraction in 0.0..=1.0
  Ratio,
  /// Strictly positive price
  Price,
}

/// Metadata for a single parameter
#[derive(Debug, Clone)]
pub struct ParamMeta {
  /// Parameter name (e.g., "min_confidence")
  pub name: &'static str,
  pub param_type: ParamType,
  pub default: f64,
  /// Accepted range (min, max), inclusive
  pub range: (f64, f64),
  pub description: &'static str,
}

impl ParamMeta {
  pub const fn ratio(
    name: &'static str,
    default: f64,
    range: (f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Ratio, default, range, description }
  }

  pub const fn price(
    name: &'static str,
    default: f64,
    range: (f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Price, default, range, description }
  }

  /// Validate a value for this parameter
  pub fn validate(&self, value: f64) -> Result<()> {
    if !value.is_finite() {
      return Err(ConfluenceError::InvalidConfig(format!("{} must be finite", self.name)));
    }
    let (min, max) = self.range;
    if value < min || value > max {
      return Err(ConfluenceError::OutOfRange { field: self.name, value, min, max });
    }
    match self.param_type {
      ParamType::Ratio => Ratio::new(value).map(|_| ()),
      ParamType::Price => {
        if value <= 0.0 {
          return Err(ConfluenceError::InvalidValue("Price parameters must be > 0"));
        }
        Ok(())
      },
    }
  }
}

// ============================================================
// PARAMETER VALUE HELPERS
// ============================================================

/// Helper to get a Ratio from params with default fallback
pub fn get_ratio(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<Ratio> {
  let value = params.get(key).copied().unwrap_or(default);
  Ratio::new(value)
}

/// Helper to get a non-negative whole number from params with default fallback
pub fn get_count(params: &HashMap<&str, f64>, key: &str, default: u32) -> Result<u32> {
  let value = params.get(key).copied().unwrap_or(f64::from(default));
  if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > f64::from(u32::MAX) {
    return Err(ConfluenceError::InvalidValue("Count must be a non-negative integer"));
  }
  Ok(value as u32)
}

// ============================================================
// GATE CONFIG
// ============================================================

static GATE_PARAMS: [ParamMeta; 5] = [
  ParamMeta::ratio(
    "min_confidence",
    0.6,
    (0.0, 0.99),
    "Lowest confidence a signal needs to be a trade candidate",
  ),
  ParamMeta::ratio(
    "min_allocation",
    0.02,
    (0.0, 1.0),
    "Share of capital allocated at min_confidence",
  ),
  ParamMeta::ratio("max_allocation", 0.05, (0.0, 1.0), "Share of capital allocated at confidence 1.0"),
  ParamMeta::ratio(
    "delta",
    0.5,
    (0.01, 1.0),
    "Contract price move per unit move of the underlying",
  ),
  ParamMeta::price(
    "min_contract_price",
    0.05,
    (0.01, 1_000.0),
    "Floor for mapped contract levels (one tick)",
  ),
];

/// Trade gate and sizer settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
  pub min_confidence: f64,
  pub min_allocation: f64,
  pub max_allocation: f64,
  pub delta: f64,
  pub min_contract_price: f64,
}

impl Default for GateConfig {
  fn default() -> Self {
    Self {
      min_confidence: GATE_PARAMS[0].default,
      min_allocation: GATE_PARAMS[1].default,
      max_allocation: GATE_PARAMS[2].default,
      delta: GATE_PARAMS[3].default,
      min_contract_price: GATE_PARAMS[4].default,
    }
  }
}

impl GateConfig {
  /// Returns metadata for all configurable parameters
  pub fn param_meta() -> &'static [ParamMeta] {
    &GATE_PARAMS
  }

  /// Creates a config from a flat map; missing keys use their defaults.
  pub fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
    let get = |meta: &ParamMeta| params.get(meta.name).copied().unwrap_or(meta.default);
    let config = Self {
      min_confidence: get(&GATE_PARAMS[0]),
      min_allocation: get(&GATE_PARAMS[1]),
      max_allocation: get(&GATE_PARAMS[2]),
      delta: get(&GATE_PARAMS[3]),
      min_contract_price: get(&GATE_PARAMS[4]),
    };
    config.validate()?;
    Ok(config)
  }

  fn values(&self) -> [f64; 5] {
    [
      self.min_confidence,
      self.min_allocation,
      self.max_allocation,
      self.delta,
      self.min_contract_price,
    ]
  }

  pub fn validate(&self) -> Result<()> {
    for (meta, value) in GATE_PARAMS.iter().zip(self.values()) {
      meta.validate(value)?;
    }
    if self.min_allocation > self.max_allocation {
      return Err(ConfluenceError::InvalidConfig(format!(
        "min_allocation {} exceeds max_allocation {}",
        self.min_allocation, self.max_allocation
      )));
    }
    Ok(())
  }

  /// Capital share for a candidate of the given confidence.
  ///
  /// Linear from `min_allocation` at `min_confidence` to `max_allocation`
  /// at 1.0, clamped to that band.
  pub fn allocation_fraction(&self, confidence: Ratio) -> f64 {
    let span = 1.0 - self.min_confidence;
    let t = ((confidence.get() - self.min_confidence) / span).clamp(0.0, 1.0);
    self.min_allocation + t * (self.max_allocation - self.min_allocation)
  }
}

// ============================================================
// ENGINE CONFIG
// ============================================================

/// Top-level engine configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
  pub horizon: Horizon,
  pub gate: GateConfig,
}

impl EngineConfig {
  /// Parse and validate a TOML document
  pub fn from_toml_str(text: &str) -> Result<Self> {
    let config: EngineConfig =
      toml::from_str(text).map_err(|e| ConfluenceError::InvalidConfig(e.to_string()))?;
    config.validate()?;
    Ok(config)
  }

  /// Flat-map form: gate keys plus `horizon_hours` (0 = whole history).
  pub fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
    let horizon = match get_count(params, "horizon_hours", 0)? {
      0 => Horizon::All,
      hours => Horizon::LastHours(hours),
    };
    Ok(Self { horizon, gate: GateConfig::with_params(params)? })
  }

  pub fn validate(&self) -> Result<()> {
    if self.horizon == Horizon::LastHours(0) {
      return Err(ConfluenceError::InvalidConfig("horizon of 0 hours admits nothing".into()));
    }
    self.gate.validate()
  }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_param_meta_ratio() {
    let meta = ParamMeta::ratio("test_ratio", 0.5, (0.3, 0.7), "Test ratio parameter");

    assert_eq!(meta.name, "test_ratio");
    assert_eq!(meta.param_type, ParamType::Ratio);
    assert!(meta.validate(0.5).is_ok());
    assert!(meta.validate(0.2).is_err());
    assert!(meta.validate(0.8).is_err());
    assert!(meta.validate(f64::NAN).is_err());
  }

  #[test]
  fn test_param_meta_price() {
    let meta = ParamMeta::price("tick", 0.05, (0.0, 10.0), "Test price parameter");

    assert_eq!(meta.param_type, ParamType::Price);
    assert!(meta.validate(0.05).is_ok());
    assert!(meta.validate(0.0).is_err());
  }

  #[test]
  fn test_get_ratio_helper() {
    let mut params = HashMap::new();
    params.insert("key1", 0.8);

    assert!((get_ratio(&params, "key1", 0.5).unwrap().get() - 0.8).abs() < f64::EPSILON);
    assert!((get_ratio(&params, "key2", 0.5).unwrap().get() - 0.5).abs() < f64::EPSILON);
    params.insert("bad", 1.5);
    assert!(get_ratio(&params, "bad", 0.5).is_err());
  }

  #[test]
  fn test_get_count_helper() {
    let mut params = HashMap::new();
    params.insert("hours", 12.0);
    params.insert("frac", 1.5);

    assert_eq!(get_count(&params, "hours", 4).unwrap(), 12);
    assert_eq!(get_count(&params, "missing", 4).unwrap(), 4);
    assert!(get_count(&params, "frac", 4).is_err());
  }

  #[test]
  fn test_gate_defaults_valid() {
    let gate = GateConfig::default();
    assert!(gate.validate().is_ok());
    assert_eq!(gate.min_confidence, 0.6);
    assert_eq!(GateConfig::param_meta().len(), 5);
  }

  #[test]
  fn test_allocation_fraction_interpolates() {
    let gate = GateConfig::default();
    assert!((gate.allocation_fraction(Ratio::clamped(0.6)) - 0.02).abs() < 1e-12);
    assert!((gate.allocation_fraction(Ratio::clamped(0.8)) - 0.035).abs() < 1e-12);
    assert!((gate.allocation_fraction(Ratio::clamped(1.0)) - 0.05).abs() < 1e-12);
    assert!((gate.allocation_fraction(Ratio::clamped(0.1)) - 0.02).abs() < 1e-12);
  }

  #[test]
  fn test_with_params() {
    let mut params = HashMap::new();
    params.insert("min_confidence", 0.7);
    params.insert("horizon_hours", 6.0);
    let config = EngineConfig::with_params(&params).unwrap();
    assert_eq!(config.gate.min_confidence, 0.7);
    assert_eq!(config.horizon, Horizon::LastHours(6));

    params.insert("delta", 3.0);
    assert!(EngineConfig::with_params(&params).is_err());
  }

  #[test]
  fn test_from_toml() {
    let config = EngineConfig::from_toml_str(
      r#"
      horizon = { mode = "active_only" }

      [gate]
      max_allocation = 0.08
      "#,
    )
    .unwrap();
    assert_eq!(config.horizon, Horizon::ActiveOnly);
    assert_eq!(config.gate.max_allocation, 0.08);
    assert_eq!(config.gate.delta, 0.5);

    assert!(EngineConfig::from_toml_str("").is_ok());
    assert!(EngineConfig::from_toml_str("[gate]\nbogus = 1").is_err());
    assert!(EngineConfig::from_toml_str("[gate]\nmin_allocation = 0.5").is_err());
    assert!(EngineConfig::from_toml_str("horizon = { mode = \"last_hours\", hours = 0 }").is_err());
  }
}

//! Per-instrument derived outputs
//!
//! Three independent pure readers of an [`InstrumentGroup`]:
//!
//! - **Confluence** - cross-timeframe verdict and dominant direction
//! - **Strength** - 0-100 conviction score
//! - **Narrative** - chronological findings with evidence
//!
//! [`InstrumentReport`] bundles all three for the presentation layer.

pub mod helpers;

pub mod confluence;
pub mod narrative;
pub mod strength;

pub use confluence::{classify, ConfluenceVerdict, VerdictKind};
pub use narrative::{narrate, narrate_history, Finding, SignalRef};
pub use strength::{breakdown, score, ScoreBreakdown, StrengthScore};

use serde::Serialize;

use crate::grouping::InstrumentGroup;

/// Group plus everything derived from it at the group's evaluation instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentReport {
    pub group: InstrumentGroup,
    pub verdict: ConfluenceVerdict,
    pub score: StrengthScore,
    pub breakdown: ScoreBreakdown,
    pub narrative: Vec<Finding>,
}

impl InstrumentReport {
    pub fn from_group(group: InstrumentGroup) -> Self {
        let verdict = classify(&group);
        let breakdown = breakdown(&group);
        let narrative = narrate(&group);
        Self {
            verdict,
            score: breakdown.score,
            breakdown,
            narrative,
            group,
        }
    }

    #[inline]
    pub fn instrument_id(&self) -> &str {
        &self.group.instrument_id
    }
}

/// Highest score first, instrument id for ties.
pub(crate) fn sort_reports(reports: &mut [InstrumentReport]) {
    reports.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.group.instrument_id.cmp(&b.group.instrument_id))
    });
}

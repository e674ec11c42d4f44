//! Weighted total score over the five components.
//!
//! Deterministic: a plain weighted sum in fixed field order, rounded to the
//! four decimal places we persist, so identical inputs always produce
//! bit-identical totals.

use common::config::Scoring;
use common::error::ScoreError;
use common::types::{ComponentScores, PartialComponents};

/// Component weights. Injectable configuration; the MVP default is uniform
/// 0.2 across all five.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub activity: f64,
    pub diversification: f64,
    pub risk: f64,
    pub profitability: f64,
    pub stability: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            activity: 0.2,
            diversification: 0.2,
            risk: 0.2,
            profitability: 0.2,
            stability: 0.2,
        }
    }
}

impl ScoreWeights {
    pub fn from_config(cfg: &Scoring) -> Self {
        Self {
            activity: cfg.weight_activity,
            diversification: cfg.weight_diversification,
            risk: cfg.weight_risk,
            profitability: cfg.weight_profitability,
            stability: cfg.weight_stability,
        }
    }

    fn total(&self) -> f64 {
        self.activity + self.diversification + self.risk + self.profitability + self.stability
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Weighted total in `[0, 1]`, normalized by the weight sum and rounded to
/// 4 decimal places.
pub fn total_score(components: &ComponentScores, weights: &ScoreWeights) -> f64 {
    let total_w = weights.total();
    if total_w <= 0.0 {
        return 0.0;
    }

    let weighted = weights.activity * components.activity
        + weights.diversification * components.diversification
        + weights.risk * components.risk
        + weights.profitability * components.profitability
        + weights.stability * components.stability;

    round4((weighted / total_w).clamp(0.0, 1.0))
}

/// Enforce the all-five invariant and compute the total in one step. A
/// missing component is an upstream bug and surfaces as
/// [`ScoreError::IncompleteComponents`], never a silent default.
pub fn finalize(
    partial: PartialComponents,
    weights: &ScoreWeights,
) -> Result<(ComponentScores, f64), ScoreError> {
    let components = partial.complete()?;
    let total = total_score(&components, weights);
    Ok((components, total))
}

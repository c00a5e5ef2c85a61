//! End-state scoring.
//!
//! ```text
//!   end context ──► quality ─────────┐
//!               ──► diversification ─┤  regime-adaptive   ┌──────────────┐
//!               ──► risk ────────────┼──── weights ──────►│ blend - cost │──► [0, 1]
//!   start + end ──► improvement ─────┘                    │   penalty    │
//!                                                         └──────────────┘
//! ```
//!
//! Scoring is a pure function of its inputs: every map is ordered, so the
//! same inputs give bit-identical scores.

pub mod components;
pub mod weights;

use serde::Serialize;

use crate::domain::{ActionSequence, PortfolioContext};
use crate::simulation::TransactionCostModel;

pub use weights::{regime_adaptive_weights, ScoringWeights};

/// Denominator floor for the cost penalty.
const MIN_PORTFOLIO_VALUE: f64 = 1e-9;

/// Every intermediate value of one score, for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub quality: f64,
    pub diversification: f64,
    pub risk: f64,
    pub improvement: f64,
    pub weights: ScoringWeights,
    /// Weighted blend before the cost penalty
    pub blended: f64,
    pub cost_penalty: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sortino: Option<f64>,
    pub score: f64,
}

/// Score an end state, charging `transaction_cost` against it.
pub fn score_breakdown(
    start: &PortfolioContext,
    end: &PortfolioContext,
    transaction_cost: f64,
    cost_penalty_factor: f64,
) -> ScoreBreakdown {
    let weights = regime_adaptive_weights(end.market_regime_score);

    let quality = components::portfolio_quality(end);
    let diversification = components::diversification(end);
    let risk = components::risk_adjusted(end);
    let improvement = components::improvement(start, end);

    let blended = quality * weights.quality
        + diversification * weights.diversification
        + risk * weights.risk
        + improvement * weights.improvement;

    let cost_penalty = if cost_penalty_factor > 0.0 {
        transaction_cost.abs() / end.total_value.max(MIN_PORTFOLIO_VALUE) * cost_penalty_factor
    } else {
        0.0
    };

    ScoreBreakdown {
        quality,
        diversification,
        risk,
        improvement,
        weights,
        blended,
        cost_penalty,
        sortino: components::weighted_sortino(end),
        score: (blended - cost_penalty).clamp(0.0, 1.0),
    }
}

/// Score an end state given the realized transaction cost.
pub fn score_end_state(
    start: &PortfolioContext,
    end: &PortfolioContext,
    transaction_cost: f64,
    cost_penalty_factor: f64,
) -> f64 {
    score_breakdown(start, end, transaction_cost, cost_penalty_factor).score
}

/// Score an end state, pricing the sequence with `costs`.
pub fn evaluate_end_state(
    start: &PortfolioContext,
    end: &PortfolioContext,
    sequence: &ActionSequence,
    costs: &TransactionCostModel,
    cost_penalty_factor: f64,
) -> f64 {
    score_end_state(start, end, costs.sequence_cost(sequence), cost_penalty_factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::{buy, context};

    fn scored_context() -> PortfolioContext {
        let mut ctx = context(&[("A", 600.0), ("B", 400.0)]);
        ctx.security_scores.insert("A".into(), 0.8);
        ctx.security_scores.insert("B".into(), 0.6);
        ctx.security_sharpe.insert("A".into(), 1.2);
        ctx.security_countries.insert("A".into(), "EU".into());
        ctx.security_countries.insert("B".into(), "US".into());
        ctx.country_weights.insert("EU".into(), 0.5);
        ctx.country_weights.insert("US".into(), 0.5);
        ctx
    }

    #[test]
    fn test_score_in_unit_interval() {
        let ctx = scored_context();
        let breakdown = score_breakdown(&ctx, &ctx, 0.0, 0.1);
        assert!(breakdown.score > 0.0 && breakdown.score <= 1.0);
        assert_eq!(breakdown.cost_penalty, 0.0);
        assert_eq!(breakdown.blended, breakdown.score);
    }

    #[test]
    fn test_deterministic() {
        let ctx = scored_context();
        let seq = ActionSequence::custom(vec![buy("A", 100.0)]);
        let costs = TransactionCostModel::simple(2.0, 0.002);
        let first = evaluate_end_state(&ctx, &ctx, &seq, &costs, 0.1);
        for _ in 0..10 {
            let again = evaluate_end_state(&ctx, &ctx, &seq, &costs, 0.1);
            assert_eq!(first.to_bits(), again.to_bits());
        }
    }

    #[test]
    fn test_cost_penalty() {
        let ctx = scored_context();
        let free = score_end_state(&ctx, &ctx, 0.0, 0.1);
        let charged = score_end_state(&ctx, &ctx, 100.0, 0.1);
        // 100 / 1000 * 0.1
        assert!((free - charged - 0.01).abs() < 1e-12);

        let ignored = score_end_state(&ctx, &ctx, 100.0, 0.0);
        assert_eq!(free, ignored);
    }

    #[test]
    fn test_penalty_on_empty_portfolio_clamps_to_zero() {
        let ctx = context(&[]);
        assert_eq!(score_end_state(&ctx, &ctx, 5.0, 0.1), 0.0);
    }

    #[test]
    fn test_higher_cost_rate_never_scores_higher() {
        let ctx = scored_context();
        let seq = ActionSequence::custom(vec![buy("A", 250.0), buy("B", 250.0)]);
        let mut last = f64::INFINITY;
        for rate in [0.0, 0.001, 0.005, 0.01, 0.05, 0.2] {
            let score =
                evaluate_end_state(&ctx, &ctx, &seq, &TransactionCostModel::simple(1.0, rate), 0.1);
            assert!(score <= last);
            last = score;
        }
    }

    #[test]
    fn test_regime_changes_weights() {
        let mut bull = scored_context();
        bull.market_regime_score = 1.0;
        let breakdown = score_breakdown(&bull, &bull, 0.0, 0.0);
        assert!((breakdown.weights.quality - 0.38).abs() < 1e-9);
    }

    #[test]
    fn test_higher_quality_scores_higher_quality_component() {
        let start = scored_context();
        let mut better = start.clone();
        better.security_scores.insert("B".into(), 0.9);

        let low = score_breakdown(&start, &start, 0.0, 0.1);
        let high = score_breakdown(&start, &better, 0.0, 0.1);
        assert!(high.quality >= low.quality);
        assert!(high.score >= low.score);
    }
}

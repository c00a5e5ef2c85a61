//! Transaction cost model.

use serde::Serialize;

use crate::domain::{ActionSequence, EvaluationContext};

/// Per-trade cost parameters.
///
/// Cost of one trade of value `v`:
///
/// ```text
/// fixed + |v| * (variable + spread + slippage [+ market_impact])
/// ```
///
/// The market impact term is what makes the model "enhanced"; it is zero by
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransactionCostModel {
    pub fixed: f64,
    pub variable_percent: f64,
    pub spread_percent: f64,
    pub slippage_percent: f64,
    pub market_impact_percent: f64,
}

impl TransactionCostModel {
    /// Fixed plus variable fee only.
    pub fn simple(fixed: f64, variable_percent: f64) -> Self {
        Self {
            fixed,
            variable_percent,
            spread_percent: 0.0,
            slippage_percent: 0.0,
            market_impact_percent: 0.0,
        }
    }

    pub fn from_context(ctx: &EvaluationContext) -> Self {
        Self {
            fixed: ctx.transaction_cost_fixed,
            variable_percent: ctx.transaction_cost_percent,
            spread_percent: ctx.spread_cost_percent,
            slippage_percent: ctx.slippage_percent,
            market_impact_percent: ctx.market_impact_percent,
        }
    }

    pub fn is_enhanced(&self) -> bool {
        self.market_impact_percent > 0.0
    }

    /// Proportional rate applied to the absolute trade value.
    pub fn proportional_rate(&self) -> f64 {
        let rate = self.variable_percent + self.spread_percent + self.slippage_percent;
        if self.is_enhanced() {
            rate + self.market_impact_percent
        } else {
            rate
        }
    }

    /// Cost of one trade. Side-independent.
    pub fn cost(&self, value: f64) -> f64 {
        self.fixed + value.abs() * self.proportional_rate()
    }

    /// Cost of every action of a sequence at its quoted value.
    pub fn sequence_cost(&self, sequence: &ActionSequence) -> f64 {
        sequence.actions.iter().map(|a| self.cost(a.value())).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::{buy, context, sell};

    #[test]
    fn test_simple_cost() {
        let model = TransactionCostModel::simple(2.0, 0.002);
        assert!((model.cost(500.0) - 3.0).abs() < 1e-12);
        assert!(!model.is_enhanced());
    }

    #[test]
    fn test_cost_uses_absolute_value() {
        let model = TransactionCostModel::simple(1.0, 0.01);
        assert_eq!(model.cost(-100.0), model.cost(100.0));
    }

    #[test]
    fn test_default_context_cost() {
        let model = TransactionCostModel::from_context(&EvaluationContext::new(context(&[]), 0.0));
        // 2 + 500 * (0.002 + 0.001 + 0.0015)
        assert!((model.cost(500.0) - 4.25).abs() < 1e-12);
    }

    #[test]
    fn test_enhanced_adds_market_impact() {
        let mut model = TransactionCostModel::simple(0.0, 0.001);
        let base = model.cost(1000.0);
        model.market_impact_percent = 0.002;
        assert!(model.is_enhanced());
        assert!((model.cost(1000.0) - base - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_sequence_cost_sums_actions() {
        let model = TransactionCostModel::simple(1.0, 0.0);
        let seq = ActionSequence::custom(vec![sell("A", 100.0), buy("B", 50.0)]);
        assert_eq!(model.sequence_cost(&seq), 2.0);
        assert_eq!(model.sequence_cost(&ActionSequence::custom(vec![])), 0.0);
    }
}

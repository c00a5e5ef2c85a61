//! Per-call evaluation inputs and per-sequence results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zero_common::{Validate, ValidationError, ValidationResult};

use super::action::ActionSequence;
use super::portfolio::{PortfolioContext, Position, Security};

// ============================================================================
// Evaluation Context
// ============================================================================

/// Inputs of one evaluation call. Constructed per request, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
    #[serde(default)]
    pub portfolio_context: PortfolioContext,
    #[serde(default)]
    pub positions: Vec<Position>,
    /// Directory slice covering every security the sequences touch
    #[serde(default)]
    pub securities: Vec<Security>,

    /// Cash in base currency
    pub available_cash: f64,
    #[serde(default)]
    pub total_portfolio_value: f64,

    #[serde(default = "default_cost_fixed")]
    pub transaction_cost_fixed: f64,
    #[serde(default = "default_cost_percent")]
    pub transaction_cost_percent: f64,
    #[serde(default = "default_spread")]
    pub spread_cost_percent: f64,
    #[serde(default = "default_slippage")]
    pub slippage_percent: f64,
    /// Enables the enhanced cost model when positive
    #[serde(default)]
    pub market_impact_percent: f64,

    #[serde(default = "default_cost_penalty_factor")]
    pub cost_penalty_factor: f64,

    /// ISIN or symbol -> price multiplier
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub price_adjustments: BTreeMap<String, f64>,
}

pub const DEFAULT_TRANSACTION_COST_FIXED: f64 = 2.0;
pub const DEFAULT_TRANSACTION_COST_PERCENT: f64 = 0.002;
pub const DEFAULT_SPREAD_COST_PERCENT: f64 = 0.001;
pub const DEFAULT_SLIPPAGE_PERCENT: f64 = 0.0015;
pub const DEFAULT_COST_PENALTY_FACTOR: f64 = 0.1;

fn default_cost_fixed() -> f64 {
    DEFAULT_TRANSACTION_COST_FIXED
}

fn default_cost_percent() -> f64 {
    DEFAULT_TRANSACTION_COST_PERCENT
}

fn default_spread() -> f64 {
    DEFAULT_SPREAD_COST_PERCENT
}

fn default_slippage() -> f64 {
    DEFAULT_SLIPPAGE_PERCENT
}

fn default_cost_penalty_factor() -> f64 {
    DEFAULT_COST_PENALTY_FACTOR
}

impl EvaluationContext {
    /// Context with default cost parameters.
    pub fn new(portfolio_context: PortfolioContext, available_cash: f64) -> Self {
        let total_portfolio_value = portfolio_context.total_value + available_cash;
        Self {
            portfolio_context,
            positions: Vec::new(),
            securities: Vec::new(),
            available_cash,
            total_portfolio_value,
            transaction_cost_fixed: DEFAULT_TRANSACTION_COST_FIXED,
            transaction_cost_percent: DEFAULT_TRANSACTION_COST_PERCENT,
            spread_cost_percent: DEFAULT_SPREAD_COST_PERCENT,
            slippage_percent: DEFAULT_SLIPPAGE_PERCENT,
            market_impact_percent: 0.0,
            cost_penalty_factor: DEFAULT_COST_PENALTY_FACTOR,
            price_adjustments: BTreeMap::new(),
        }
    }

    /// Multiplier for a security, looked up by ISIN first, then symbol.
    pub fn price_multiplier(&self, isin: &str, symbol: &str) -> f64 {
        self.price_adjustments
            .get(isin)
            .or_else(|| self.price_adjustments.get(symbol))
            .copied()
            .unwrap_or(1.0)
    }

    /// Copy of this context with each `(isin, symbol, multiplier)` applied
    /// on top of the adjustment already in effect for that security.
    ///
    /// The compounded multiplier is stored under the ISIN.
    pub fn with_security_shocks<'s>(
        &self,
        shocks: impl IntoIterator<Item = (&'s str, &'s str, f64)>,
    ) -> Self {
        let mut ctx = self.clone();
        for (isin, symbol, multiplier) in shocks {
            let current = self.price_multiplier(isin, symbol);
            ctx.price_adjustments
                .insert(isin.to_string(), current * multiplier);
        }
        ctx
    }

    /// Like [`with_security_shocks`](Self::with_security_shocks), and also
    /// marks held positions of the shocked securities to the new prices.
    pub fn with_market_shocks(&self, shocks: &[(&str, &str, f64)]) -> Self {
        let mut ctx = self.with_security_shocks(shocks.iter().copied());
        let portfolio = &mut ctx.portfolio_context;
        let mut revaluation = 0.0;
        for &(isin, _, multiplier) in shocks {
            if let Some(value) = portfolio.positions.get_mut(isin) {
                revaluation += *value * (multiplier - 1.0);
                *value *= multiplier;
            }
            if let Some(price) = portfolio.current_prices.get_mut(isin) {
                *price *= multiplier;
            }
        }
        portfolio.total_value += revaluation;
        ctx.total_portfolio_value += revaluation;
        ctx
    }
}

impl Validate for EvaluationContext {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if !self.available_cash.is_finite() {
            errors.push(ValidationError::invalid(
                "evaluation_context.available_cash",
                "must be a finite number",
            ));
        }

        for (field, value) in [
            ("transaction_cost_fixed", self.transaction_cost_fixed),
            ("transaction_cost_percent", self.transaction_cost_percent),
            ("spread_cost_percent", self.spread_cost_percent),
            ("slippage_percent", self.slippage_percent),
            ("market_impact_percent", self.market_impact_percent),
            ("cost_penalty_factor", self.cost_penalty_factor),
        ] {
            if !value.is_finite() || value < 0.0 {
                errors.push(ValidationError::invalid(
                    format!("evaluation_context.{field}"),
                    format!("must be finite and non-negative, got {value}"),
                ));
            }
        }

        if let Some((key, value)) = self
            .price_adjustments
            .iter()
            .find(|(_, m)| !m.is_finite() || **m <= 0.0)
        {
            errors.push(ValidationError::invalid(
                "evaluation_context.price_adjustments",
                format!("multiplier for {key} must be positive, got {value}"),
            ));
        }

        if let Err(e) = self.portfolio_context.validate() {
            errors.push(e);
        }

        ValidationError::collect(errors)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Outcome class of one sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    /// Simulated and scored (infeasible sequences score 0)
    Scored,
    /// A fault in the sequence data prevented evaluation
    Failed,
    /// Skipped after cancellation or deadline
    Cancelled,
}

/// Lifecycle of a sequence inside an evaluation call.
///
/// `Generated -> Simulated -> {Feasible, Infeasible} -> Scored`. An
/// infeasible sequence goes straight to `Scored` with a zero score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStage {
    Generated,
    Simulated,
    Feasible,
    Infeasible,
    Scored,
}

impl SequenceStage {
    /// Next stage, or `None` when `self` is terminal.
    ///
    /// `feasible` only matters when leaving `Simulated`.
    pub fn advance(self, feasible: bool) -> Option<Self> {
        match self {
            Self::Generated => Some(Self::Simulated),
            Self::Simulated if feasible => Some(Self::Feasible),
            Self::Simulated => Some(Self::Infeasible),
            Self::Feasible | Self::Infeasible => Some(Self::Scored),
            Self::Scored => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Scored)
    }
}

/// Result of evaluating one sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceEvaluationResult {
    pub sequence: ActionSequence,
    pub end_portfolio: PortfolioContext,
    pub score: f64,
    pub end_cash: f64,
    pub transaction_costs: f64,
    pub feasible: bool,
    pub status: EvaluationStatus,
    /// Last lifecycle stage reached
    pub stage: SequenceStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SequenceEvaluationResult {
    /// Result for a sequence that could not be evaluated.
    pub fn failed(
        sequence: ActionSequence,
        ctx: &EvaluationContext,
        reason: impl Into<String>,
    ) -> Self {
        Self::unscored(sequence, ctx, EvaluationStatus::Failed, reason.into())
    }

    /// Result for a sequence skipped by cancellation.
    pub fn cancelled(sequence: ActionSequence, ctx: &EvaluationContext) -> Self {
        Self::unscored(
            sequence,
            ctx,
            EvaluationStatus::Cancelled,
            "evaluation cancelled".to_string(),
        )
    }

    fn unscored(
        sequence: ActionSequence,
        ctx: &EvaluationContext,
        status: EvaluationStatus,
        reason: String,
    ) -> Self {
        Self {
            sequence,
            end_portfolio: ctx.portfolio_context.clone(),
            score: 0.0,
            end_cash: ctx.available_cash,
            transaction_costs: 0.0,
            feasible: false,
            status,
            stage: SequenceStage::Generated,
            reason: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::portfolio::fixtures::context;

    #[test]
    fn test_defaults_from_json() {
        let ctx: EvaluationContext = serde_json::from_str(r#"{"available_cash": 1000.0}"#).unwrap();
        assert_eq!(ctx.transaction_cost_fixed, 2.0);
        assert_eq!(ctx.transaction_cost_percent, 0.002);
        assert_eq!(ctx.spread_cost_percent, 0.001);
        assert_eq!(ctx.slippage_percent, 0.0015);
        assert_eq!(ctx.market_impact_percent, 0.0);
        assert_eq!(ctx.cost_penalty_factor, 0.1);
        assert!(ctx.validate().is_ok());
    }

    #[test]
    fn test_negative_cost_rejected() {
        let mut ctx = EvaluationContext::new(context(&[]), 100.0);
        ctx.transaction_cost_percent = -0.01;
        let err = ctx.validate().unwrap_err();
        assert!(err.to_string().contains("transaction_cost_percent"));
    }

    #[test]
    fn test_non_finite_cost_rejected() {
        let mut ctx = EvaluationContext::new(context(&[]), 100.0);
        ctx.slippage_percent = f64::NAN;
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn test_price_multiplier_lookup() {
        let mut ctx = EvaluationContext::new(context(&[]), 0.0);
        ctx.price_adjustments.insert("AAPL".into(), 1.1);
        ctx.price_adjustments.insert("US0378331005".into(), 0.9);

        assert_eq!(ctx.price_multiplier("US0378331005", "AAPL"), 0.9);
        assert_eq!(ctx.price_multiplier("OTHER", "AAPL"), 1.1);
        assert_eq!(ctx.price_multiplier("OTHER", "MSFT"), 1.0);
    }

    #[test]
    fn test_security_shocks_compound() {
        let mut ctx = EvaluationContext::new(context(&[]), 0.0);
        ctx.price_adjustments.insert("AAPL".into(), 1.1);

        let shocked = ctx.with_security_shocks([("US0378331005", "AAPL", 0.5), ("B", "B", 2.0)]);
        assert!((shocked.price_multiplier("US0378331005", "AAPL") - 0.55).abs() < 1e-12);
        assert_eq!(shocked.price_multiplier("B", "B"), 2.0);
        assert_eq!(ctx.price_multiplier("US0378331005", "AAPL"), 1.1);
    }

    #[test]
    fn test_market_shocks_revalue_holdings() {
        let ctx = EvaluationContext::new(context(&[("HELD", 1000.0), ("OTHER", 500.0)]), 200.0);
        let shocked = ctx.with_market_shocks(&[("HELD", "HELD", 0.8), ("NEW", "NEW", 1.5)]);

        assert!((shocked.portfolio_context.positions["HELD"] - 800.0).abs() < 1e-9);
        assert_eq!(shocked.portfolio_context.positions["OTHER"], 500.0);
        assert!(!shocked.portfolio_context.positions.contains_key("NEW"));
        assert!((shocked.portfolio_context.total_value - 1300.0).abs() < 1e-9);
        assert!((shocked.total_portfolio_value - 1500.0).abs() < 1e-9);
        assert_eq!(shocked.price_multiplier("NEW", "NEW"), 1.5);
        assert_eq!(ctx.portfolio_context.positions["HELD"], 1000.0);
    }

    #[test]
    fn test_stage_lifecycle() {
        let stage = SequenceStage::Generated;
        let simulated = stage.advance(true).unwrap();
        assert_eq!(simulated, SequenceStage::Simulated);
        assert_eq!(simulated.advance(false), Some(SequenceStage::Infeasible));
        assert_eq!(simulated.advance(true), Some(SequenceStage::Feasible));
        assert_eq!(
            SequenceStage::Infeasible.advance(false),
            Some(SequenceStage::Scored)
        );
        assert!(SequenceStage::Scored.is_terminal());
        assert_eq!(SequenceStage::Scored.advance(true), None);
    }
}

//! Sequence simulation.
//!
//! Applies a sequence action by action to a private copy of the start
//! context, tracking cash, held quantities and transaction costs. The
//! caller's context is never mutated.
//!
//! An infeasible sequence (cash below zero at any step, or a SELL larger
//! than the holding) is a normal outcome, not an error. Errors are reserved
//! for malformed actions and securities the directory cannot resolve.

pub mod costs;

use serde::Serialize;
use std::collections::BTreeMap;

use crate::directory::SecurityDirectory;
use crate::domain::{
    ActionCandidate, ActionSequence, EvaluationContext, PortfolioContext, TradeSide,
    CASH_TOLERANCE,
};
use crate::error::SimulationError;

pub use costs::TransactionCostModel;

/// Quantities below this are treated as fully sold.
const QUANTITY_EPSILON: f64 = 1e-9;

/// Result of simulating one sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationOutcome {
    /// Portfolio after the sequence. Equal to the start context when infeasible.
    pub end_context: PortfolioContext,
    pub end_cash: f64,
    /// Cost of every action in the sequence
    pub transaction_cost: f64,
    pub feasible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Simulator bound to one evaluation context and directory.
///
/// Cheap to share across workers: all state is read-only.
pub struct Simulator<'a> {
    ctx: &'a EvaluationContext,
    directory: &'a dyn SecurityDirectory,
    costs: TransactionCostModel,
    /// Held quantity by ISIN (and by symbol for positions without an ISIN)
    quantities: BTreeMap<String, f64>,
}

impl<'a> Simulator<'a> {
    pub fn new(ctx: &'a EvaluationContext, directory: &'a dyn SecurityDirectory) -> Self {
        let mut quantities = BTreeMap::new();
        for position in &ctx.positions {
            let key = if position.isin.is_empty() {
                &position.symbol
            } else {
                &position.isin
            };
            *quantities.entry(key.clone()).or_insert(0.0) += position.quantity;
        }

        Self {
            ctx,
            directory,
            costs: TransactionCostModel::from_context(ctx),
            quantities,
        }
    }

    pub fn costs(&self) -> &TransactionCostModel {
        &self.costs
    }

    pub fn context(&self) -> &EvaluationContext {
        self.ctx
    }

    /// Simulate `sequence` from the evaluation context's portfolio.
    pub fn simulate(&self, sequence: &ActionSequence) -> Result<SimulationOutcome, SimulationError> {
        self.simulate_from(sequence, &self.ctx.portfolio_context)
    }

    /// Simulate `sequence` starting from `start`.
    pub fn simulate_from(
        &self,
        sequence: &ActionSequence,
        start: &PortfolioContext,
    ) -> Result<SimulationOutcome, SimulationError> {
        for (index, action) in sequence.actions.iter().enumerate() {
            check_action(index, action)?;
            if self.directory.resolve(&action.isin, &action.symbol).is_none() {
                return Err(SimulationError::UnknownSecurity {
                    isin: action.isin.clone(),
                    symbol: action.symbol.clone(),
                });
            }
        }

        let mut end = start.clone();
        let mut cash = self.ctx.available_cash;
        let mut quantities = self.quantities.clone();
        let mut total_cost = 0.0;
        let mut infeasible: Option<String> = None;

        for action in &sequence.actions {
            let multiplier = self.ctx.price_multiplier(&action.isin, &action.symbol);
            let value = action.value() * multiplier;
            let cost = self.costs.cost(value);
            total_cost += cost;

            if infeasible.is_some() {
                continue;
            }

            let outcome = match action.side {
                TradeSide::Sell => self.apply_sell(action, value, cost, &mut end, &mut quantities),
                TradeSide::Buy => {
                    self.apply_buy(action, value, &mut end, &mut quantities);
                    Ok(-(value + cost))
                }
            };

            match outcome {
                Ok(delta) => {
                    cash += delta;
                    if cash < -CASH_TOLERANCE {
                        infeasible = Some(format!(
                            "insufficient cash for {} {}: need {:.2}, available {:.2}",
                            action.side,
                            action.symbol,
                            value + cost,
                            cash + value + cost
                        ));
                    }
                }
                Err(reason) => infeasible = Some(reason),
            }

            if multiplier != 1.0 && action.price > 0.0 {
                end.current_prices
                    .insert(action.isin.clone(), action.price * multiplier);
            }
        }

        if let Some(reason) = infeasible {
            tracing::debug!(
                pattern = %sequence.pattern,
                actions = sequence.len(),
                reason = %reason,
                "Sequence infeasible"
            );
            return Ok(SimulationOutcome {
                end_context: start.clone(),
                end_cash: self.ctx.available_cash,
                transaction_cost: total_cost,
                feasible: false,
                reason: Some(reason),
            });
        }

        end.recompute_total();
        Ok(SimulationOutcome {
            end_context: end,
            end_cash: cash,
            transaction_cost: total_cost,
            feasible: true,
            reason: None,
        })
    }

    /// Apply a SELL; returns the cash credit or an infeasibility reason.
    fn apply_sell(
        &self,
        action: &ActionCandidate,
        value: f64,
        cost: f64,
        end: &mut PortfolioContext,
        quantities: &mut BTreeMap<String, f64>,
    ) -> Result<f64, String> {
        let position_value = end.positions.get(&action.isin).copied().unwrap_or(0.0);
        let held = quantities
            .get(&action.isin)
            .or_else(|| quantities.get(&action.symbol))
            .copied()
            .unwrap_or_else(|| {
                if action.price > 0.0 {
                    position_value / action.price
                } else {
                    0.0
                }
            });

        if held + QUANTITY_EPSILON < action.quantity {
            return Err(format!(
                "insufficient quantity to sell {}: hold {:.4}, requested {:.4}",
                action.symbol, held, action.quantity
            ));
        }

        let remaining = held - action.quantity;
        if remaining <= QUANTITY_EPSILON {
            end.positions.remove(&action.isin);
        } else if let Some(v) = end.positions.get_mut(&action.isin) {
            *v = position_value * remaining / held;
        }
        quantities.insert(action.isin.clone(), remaining.max(0.0));

        Ok(value - cost)
    }

    fn apply_buy(
        &self,
        action: &ActionCandidate,
        value: f64,
        end: &mut PortfolioContext,
        quantities: &mut BTreeMap<String, f64>,
    ) {
        *end.positions.entry(action.isin.clone()).or_insert(0.0) += value;

        let held = quantities.get(&action.isin).copied().unwrap_or(0.0);
        let new_quantity = held + action.quantity;
        if action.price > 0.0 && new_quantity > 0.0 {
            let previous_avg = end
                .position_avg_prices
                .get(&action.isin)
                .copied()
                .unwrap_or(action.price);
            let avg = (previous_avg * held + action.price * action.quantity) / new_quantity;
            end.position_avg_prices.insert(action.isin.clone(), avg);
        }
        quantities.insert(action.isin.clone(), new_quantity);

        if let Some(security) = self.directory.resolve(&action.isin, &action.symbol) {
            end.record_security(security);
        }
    }
}

fn check_action(index: usize, action: &ActionCandidate) -> Result<(), SimulationError> {
    if !action.quantity.is_finite() || action.quantity <= 0.0 {
        return Err(SimulationError::InvalidQuantity {
            index,
            isin: action.isin.clone(),
            quantity: action.quantity,
        });
    }
    if !action.price.is_finite() || action.price < 0.0 {
        return Err(SimulationError::InvalidPrice {
            index,
            isin: action.isin.clone(),
            price: action.price,
        });
    }
    let value = action.value();
    if !value.is_finite() || value < 0.0 || !action.value_in_base_currency.is_finite() {
        return Err(SimulationError::InvalidValue {
            index,
            isin: action.isin.clone(),
            value,
        });
    }
    Ok(())
}

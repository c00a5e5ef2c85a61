//! Batch result types and ranking helpers.

use serde::Serialize;

use crate::domain::{
    ActionSequence, EvaluationContext, EvaluationStatus, PortfolioContext,
    SequenceEvaluationResult,
};
use crate::simulation::SimulationOutcome;

/// Completion state of a multi-item call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Completed,
    /// Some items were skipped; they carry status `cancelled`
    Cancelled,
}

impl BatchStatus {
    pub fn from_cancelled(cancelled: usize) -> Self {
        if cancelled > 0 {
            Self::Cancelled
        } else {
            Self::Completed
        }
    }
}

/// Scored results of a batch, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub results: Vec<SequenceEvaluationResult>,
    /// One entry per failed sequence, prefixed with its index
    pub errors: Vec<String>,
    pub status: BatchStatus,
    pub cancelled: usize,
}

/// Simulation-only result of one sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationResult {
    pub sequence: ActionSequence,
    pub end_portfolio: PortfolioContext,
    pub end_cash: f64,
    pub transaction_costs: f64,
    pub feasible: bool,
    pub status: EvaluationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SimulationResult {
    pub fn simulated(sequence: ActionSequence, outcome: SimulationOutcome) -> Self {
        Self {
            sequence,
            end_portfolio: outcome.end_context,
            end_cash: outcome.end_cash,
            transaction_costs: outcome.transaction_cost,
            feasible: outcome.feasible,
            status: EvaluationStatus::Scored,
            reason: outcome.reason,
        }
    }

    pub fn unsimulated(
        sequence: ActionSequence,
        ctx: &EvaluationContext,
        status: EvaluationStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            sequence,
            end_portfolio: ctx.portfolio_context.clone(),
            end_cash: ctx.available_cash,
            transaction_costs: 0.0,
            feasible: false,
            status,
            reason: Some(reason.into()),
        }
    }
}

/// Simulation-only results of a batch, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationBatch {
    pub results: Vec<SimulationResult>,
    pub errors: Vec<String>,
    pub status: BatchStatus,
    pub cancelled: usize,
}

/// Summary of a set of scored alternatives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Comparison {
    pub count: usize,
    pub best_index: usize,
    pub worst_index: usize,
    pub best_score: f64,
    pub worst_score: f64,
    pub score_range: f64,
    pub all_feasible: bool,
}

/// Best/worst summary. `None` for an empty slice.
///
/// Ties resolve to the lowest index.
pub fn compare(results: &[SequenceEvaluationResult]) -> Option<Comparison> {
    let first = results.first()?;
    let (mut best_index, mut worst_index) = (0, 0);
    let (mut best_score, mut worst_score) = (first.score, first.score);

    for (idx, result) in results.iter().enumerate().skip(1) {
        if result.score > best_score {
            best_score = result.score;
            best_index = idx;
        }
        if result.score < worst_score {
            worst_score = result.score;
            worst_index = idx;
        }
    }

    Some(Comparison {
        count: results.len(),
        best_index,
        worst_index,
        best_score,
        worst_score,
        score_range: best_score - worst_score,
        all_feasible: results.iter().all(|r| r.feasible),
    })
}

/// Indices of `results` ordered best-first; ties keep input order.
pub fn rank(results: &[SequenceEvaluationResult]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..results.len()).collect();
    order.sort_by(|a, b| results[*b].score.total_cmp(&results[*a].score));
    order
}

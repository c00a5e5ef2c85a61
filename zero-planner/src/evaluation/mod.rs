//! Batch evaluation on a bounded worker pool.
//!
//! CPU-bound work runs on a rayon pool built once per service. Results are
//! reassembled in input order. A fault in one sequence (unknown security,
//! malformed action, panic) marks that sequence `failed` and never touches
//! its siblings.

pub mod batch;
pub mod cancel;
pub mod monte_carlo;
pub mod stochastic;

use rayon::prelude::*;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::directory::{SecurityDirectory, SecurityIndex};
use crate::domain::{
    ActionSequence, EvaluationContext, EvaluationStatus, SequenceEvaluationResult, SequenceStage,
};
use crate::error::{PlannerError, SimulationError};
use crate::scoring::score_end_state;
use crate::simulation::Simulator;

pub use batch::{
    compare, rank, BatchOutcome, BatchStatus, Comparison, SimulationBatch, SimulationResult,
};
pub use cancel::{CancellationToken, DeadlineTimer, DropGuard};
pub use monte_carlo::{MonteCarloRequest, MonteCarloResult};
pub use stochastic::{Scenario, ScenarioResult, StochasticRequest, StochasticResult};

/// Default number of evaluation workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Simulate and score one sequence.
///
/// Walks the sequence through its lifecycle: an infeasible sequence is
/// scored 0 without running the scoring engine.
pub fn evaluate_sequence(
    simulator: &Simulator<'_>,
    sequence: &ActionSequence,
) -> Result<SequenceEvaluationResult, SimulationError> {
    let ctx = simulator.context();
    let mut stage = SequenceStage::Generated;

    let outcome = simulator.simulate(sequence)?;
    stage = next_stage(stage, outcome.feasible);
    stage = next_stage(stage, outcome.feasible);

    let score = match stage {
        SequenceStage::Feasible => score_end_state(
            &ctx.portfolio_context,
            &outcome.end_context,
            outcome.transaction_cost,
            ctx.cost_penalty_factor,
        ),
        _ => 0.0,
    };
    stage = next_stage(stage, outcome.feasible);

    tracing::trace!(
        pattern = %sequence.pattern,
        actions = sequence.len(),
        feasible = outcome.feasible,
        cost = outcome.transaction_cost,
        score,
        "Sequence evaluated"
    );

    Ok(SequenceEvaluationResult {
        sequence: sequence.clone(),
        end_portfolio: outcome.end_context,
        score,
        end_cash: outcome.end_cash,
        transaction_costs: outcome.transaction_cost,
        feasible: outcome.feasible,
        status: EvaluationStatus::Scored,
        stage,
        reason: outcome.reason,
    })
}

fn next_stage(stage: SequenceStage, feasible: bool) -> SequenceStage {
    stage.advance(feasible).unwrap_or(stage)
}

/// Run `f`, turning both errors and panics into a message.
pub(crate) fn guarded<R>(f: impl FnOnce() -> Result<R, SimulationError>) -> Result<R, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("evaluation panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

fn warn_missing(directory: &dyn SecurityDirectory, sequences: &[ActionSequence]) {
    let (_, missing) = directory.resolve_sequences(sequences);
    if !missing.is_empty() {
        tracing::warn!(missing = ?missing, "Securities missing from directory");
    }
}

// ============================================================================
// Batch Evaluator
// ============================================================================

/// Evaluates sequences on a shared, bounded thread pool.
#[derive(Clone)]
pub struct BatchEvaluator {
    pool: Arc<rayon::ThreadPool>,
    workers: usize,
}

impl std::fmt::Debug for BatchEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEvaluator")
            .field("workers", &self.workers)
            .finish()
    }
}

impl BatchEvaluator {
    /// Build the worker pool.
    pub fn new(workers: usize) -> Result<Self, PlannerError> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("planner-eval-{i}"))
            .build()
            .map_err(|e| PlannerError::WorkerPool(e.to_string()))?;

        tracing::debug!(workers, "Evaluation pool started");
        Ok(Self {
            pool: Arc::new(pool),
            workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `f` over `items` on the pool, keeping input order.
    pub(crate) fn map_ordered<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(usize, &T) -> R + Sync + Send,
    {
        self.pool.install(|| {
            items
                .par_iter()
                .enumerate()
                .map(|(idx, item)| f(idx, item))
                .collect()
        })
    }

    /// Simulate and score every sequence against `ctx`.
    pub fn evaluate_batch(
        &self,
        sequences: &[ActionSequence],
        ctx: &EvaluationContext,
        token: &CancellationToken,
    ) -> BatchOutcome {
        let directory = SecurityIndex::new(ctx.securities.clone());
        warn_missing(&directory, sequences);
        let simulator = Simulator::new(ctx, &directory);

        let evaluated = self.map_ordered(sequences, |idx, sequence| {
            if token.is_cancelled() {
                return (SequenceEvaluationResult::cancelled(sequence.clone(), ctx), None);
            }
            match guarded(|| evaluate_sequence(&simulator, sequence)) {
                Ok(result) => (result, None),
                Err(reason) => {
                    tracing::warn!(sequence = idx, error = %reason, "Sequence evaluation failed");
                    let error = format!("sequence {idx}: {reason}");
                    (
                        SequenceEvaluationResult::failed(sequence.clone(), ctx, reason),
                        Some(error),
                    )
                }
            }
        });

        let mut results = Vec::with_capacity(evaluated.len());
        let mut errors = Vec::new();
        for (result, error) in evaluated {
            results.push(result);
            errors.extend(error);
        }
        let cancelled = results
            .iter()
            .filter(|r| r.status == EvaluationStatus::Cancelled)
            .count();

        BatchOutcome {
            results,
            errors,
            status: BatchStatus::from_cancelled(cancelled),
            cancelled,
        }
    }

    /// Simulate every sequence without scoring.
    pub fn simulate_batch(
        &self,
        sequences: &[ActionSequence],
        ctx: &EvaluationContext,
        token: &CancellationToken,
    ) -> SimulationBatch {
        let directory = SecurityIndex::new(ctx.securities.clone());
        warn_missing(&directory, sequences);
        let simulator = Simulator::new(ctx, &directory);

        let simulated = self.map_ordered(sequences, |idx, sequence| {
            if token.is_cancelled() {
                let result = SimulationResult::unsimulated(
                    sequence.clone(),
                    ctx,
                    EvaluationStatus::Cancelled,
                    "evaluation cancelled",
                );
                return (result, None);
            }
            match guarded(|| simulator.simulate(sequence)) {
                Ok(outcome) => (SimulationResult::simulated(sequence.clone(), outcome), None),
                Err(reason) => {
                    tracing::warn!(sequence = idx, error = %reason, "Sequence simulation failed");
                    let error = format!("sequence {idx}: {reason}");
                    let result = SimulationResult::unsimulated(
                        sequence.clone(),
                        ctx,
                        EvaluationStatus::Failed,
                        reason,
                    );
                    (result, Some(error))
                }
            }
        });

        let mut results = Vec::with_capacity(simulated.len());
        let mut errors = Vec::new();
        for (result, error) in simulated {
            results.push(result);
            errors.extend(error);
        }
        let cancelled = results
            .iter()
            .filter(|r| r.status == EvaluationStatus::Cancelled)
            .count();

        SimulationBatch {
            results,
            errors,
            status: BatchStatus::from_cancelled(cancelled),
            cancelled,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::domain::fixtures::{context, security};
    use crate::domain::{EvaluationContext, Security};

    /// Context over securities "A".."D", holding 500 of A, with 1000 cash.
    pub fn evaluation_context() -> EvaluationContext {
        let mut portfolio = context(&[("A", 500.0)]);
        portfolio.security_scores.insert("A".into(), 0.6);
        let mut ctx = EvaluationContext::new(portfolio, 1000.0);
        ctx.securities = ["A", "B", "C", "D"]
            .iter()
            .map(|isin| Security {
                quality_score: Some(0.7),
                ..security(isin, "Germany", "Technology")
            })
            .collect();
        ctx
    }
}

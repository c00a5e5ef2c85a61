//! Scenario-weighted evaluation under fixed price shifts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zero_common::{Validate, ValidationError, ValidationResult};

use super::{evaluate_sequence, guarded, BatchEvaluator, BatchStatus, CancellationToken};
use crate::directory::SecurityIndex;
use crate::domain::{ActionSequence, EvaluationContext, EvaluationStatus};
use crate::error::PlannerError;
use crate::simulation::Simulator;

/// Weight of the worst scenario in the conservative score.
pub const CONSERVATIVE_WORST_WEIGHT: f64 = 0.6;

/// A named price shift applied to every security of the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    /// Relative price change, e.g. -0.05 for a 5% drop
    pub shift: f64,
    pub probability: f64,
    /// ISIN or symbol -> shift overriding `shift` for that security
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub security_shifts: BTreeMap<String, f64>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, shift: f64, probability: f64) -> Self {
        Self {
            name: name.into(),
            shift,
            probability,
            security_shifts: BTreeMap::new(),
        }
    }

    /// -10%, -5%, base, +5%, +10% with a bell-shaped weighting.
    pub fn defaults() -> Vec<Scenario> {
        vec![
            Scenario::new("bear_10", -0.10, 0.1),
            Scenario::new("bear_5", -0.05, 0.2),
            Scenario::new("base", 0.0, 0.4),
            Scenario::new("bull_5", 0.05, 0.2),
            Scenario::new("bull_10", 0.10, 0.1),
        ]
    }

    fn shift_for(&self, isin: &str, symbol: &str) -> f64 {
        self.security_shifts
            .get(isin)
            .or_else(|| self.security_shifts.get(symbol))
            .copied()
            .unwrap_or(self.shift)
    }
}

/// Stochastic evaluation of one sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StochasticRequest {
    pub sequence: ActionSequence,
    pub evaluation_context: EvaluationContext,
    #[serde(default = "Scenario::defaults")]
    pub scenarios: Vec<Scenario>,
}

impl Validate for StochasticRequest {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.scenarios.is_empty() {
            errors.push(ValidationError::invalid("scenarios", "must not be empty"));
        }
        for scenario in &self.scenarios {
            let mut shifts =
                std::iter::once(&scenario.shift).chain(scenario.security_shifts.values());
            if shifts.any(|s| !s.is_finite() || *s <= -1.0) {
                errors.push(ValidationError::invalid(
                    format!("scenarios.{}", scenario.name),
                    "shifts must be finite and greater than -1",
                ));
            }
            if !scenario.probability.is_finite() || scenario.probability < 0.0 {
                errors.push(ValidationError::invalid(
                    format!("scenarios.{}.probability", scenario.name),
                    format!("must be non-negative, got {}", scenario.probability),
                ));
            }
        }
        let total: f64 = self.scenarios.iter().map(|s| s.probability).sum();
        if !self.scenarios.is_empty() && total <= 0.0 {
            errors.push(ValidationError::invalid(
                "scenarios",
                "probabilities must sum to a positive value",
            ));
        }
        if let Err(e) = self.evaluation_context.validate() {
            errors.push(e);
        }

        ValidationError::collect(errors)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioResult {
    pub name: String,
    pub shift: f64,
    /// Probability after renormalization
    pub probability: f64,
    pub score: f64,
    pub feasible: bool,
    pub status: EvaluationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StochasticResult {
    pub scenarios_evaluated: usize,
    pub base_score: f64,
    pub weighted_score: f64,
    pub worst_score: f64,
    pub best_score: f64,
    pub average_score: f64,
    /// 0.6 * worst + 0.4 * average
    pub conservative_score: f64,
    pub scenarios: Vec<ScenarioResult>,
    pub status: BatchStatus,
    pub errors: Vec<String>,
}

impl BatchEvaluator {
    /// Evaluate `request.sequence` once per scenario.
    ///
    /// Cancelled scenarios are excluded from every aggregate.
    pub fn evaluate_stochastic(
        &self,
        request: &StochasticRequest,
        token: &CancellationToken,
    ) -> Result<StochasticResult, PlannerError> {
        let ctx = &request.evaluation_context;
        let directory = SecurityIndex::new(ctx.securities.clone());
        let base = evaluate_sequence(&Simulator::new(ctx, &directory), &request.sequence)?;

        let total_probability: f64 = request.scenarios.iter().map(|s| s.probability).sum();
        let actions = &request.sequence.actions;

        let scenarios = self.map_ordered(&request.scenarios, |idx, scenario| {
            let probability = if total_probability > 0.0 {
                scenario.probability / total_probability
            } else {
                0.0
            };
            let mut result = ScenarioResult {
                name: scenario.name.clone(),
                shift: scenario.shift,
                probability,
                score: 0.0,
                feasible: false,
                status: EvaluationStatus::Cancelled,
                reason: None,
            };
            if token.is_cancelled() {
                return (result, None);
            }

            let shocked = ctx.with_security_shocks(actions.iter().map(|a| {
                (
                    a.isin.as_str(),
                    a.symbol.as_str(),
                    1.0 + scenario.shift_for(&a.isin, &a.symbol),
                )
            }));
            let simulator = Simulator::new(&shocked, &directory);

            match guarded(|| evaluate_sequence(&simulator, &request.sequence)) {
                Ok(evaluated) => {
                    result.score = evaluated.score;
                    result.feasible = evaluated.feasible;
                    result.status = EvaluationStatus::Scored;
                    result.reason = evaluated.reason;
                    (result, None)
                }
                Err(reason) => {
                    tracing::warn!(scenario = %scenario.name, error = %reason, "Scenario failed");
                    let error = format!("scenario {idx} ({}): {reason}", scenario.name);
                    result.status = EvaluationStatus::Failed;
                    result.reason = Some(reason);
                    (result, Some(error))
                }
            }
        });

        let mut results = Vec::with_capacity(scenarios.len());
        let mut errors = Vec::new();
        for (result, error) in scenarios {
            results.push(result);
            errors.extend(error);
        }

        let counted: Vec<&ScenarioResult> = results
            .iter()
            .filter(|r| r.status != EvaluationStatus::Cancelled)
            .collect();
        let cancelled = results.len() - counted.len();
        let n = counted.len();

        let counted_probability: f64 = counted.iter().map(|r| r.probability).sum();
        let weighted_score = if counted_probability > 0.0 {
            counted.iter().map(|r| r.score * r.probability).sum::<f64>() / counted_probability
        } else {
            0.0
        };
        let average_score = if n > 0 {
            counted.iter().map(|r| r.score).sum::<f64>() / n as f64
        } else {
            0.0
        };
        let worst_score = counted.iter().map(|r| r.score).reduce(f64::min).unwrap_or(0.0);
        let best_score = counted.iter().map(|r| r.score).reduce(f64::max).unwrap_or(0.0);

        Ok(StochasticResult {
            scenarios_evaluated: n,
            base_score: base.score,
            weighted_score,
            worst_score,
            best_score,
            average_score,
            conservative_score: CONSERVATIVE_WORST_WEIGHT * worst_score
                + (1.0 - CONSERVATIVE_WORST_WEIGHT) * average_score,
            scenarios: results,
            status: BatchStatus::from_cancelled(cancelled),
            errors,
        })
    }
}

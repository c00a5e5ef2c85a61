//! Monte-Carlo robustness evaluation.
//!
//! Each path draws one log-normal price multiplier per distinct ISIN that
//! is held or traded, marks the holdings to those prices and re-evaluates
//! the sequence. The summary
//! statistics favour the downside: a plan that only works in good paths
//! gets a low final score.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zero_common::{Validate, ValidationError, ValidationResult};

use super::{evaluate_sequence, guarded, BatchEvaluator, BatchStatus, CancellationToken};
use crate::directory::{SecurityDirectory, SecurityIndex};
use crate::domain::{ActionSequence, EvaluationContext};
use crate::error::PlannerError;
use crate::simulation::Simulator;

pub const DEFAULT_PATHS: usize = 100;
pub const DEFAULT_VOLATILITY: f64 = 0.2;
pub const MIN_VOLATILITY: f64 = 0.1;
pub const MAX_VOLATILITY: f64 = 1.0;
pub const MIN_MULTIPLIER: f64 = 0.5;
pub const MAX_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_CONSERVATIVE_WEIGHT: f64 = 0.4;
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

fn default_paths() -> usize {
    DEFAULT_PATHS
}

fn default_horizon_days() -> f64 {
    1.0
}

fn default_conservative_weight() -> f64 {
    DEFAULT_CONSERVATIVE_WEIGHT
}

/// Monte-Carlo evaluation of one sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloRequest {
    pub sequence: ActionSequence,
    pub evaluation_context: EvaluationContext,
    #[serde(default = "default_paths")]
    pub paths: usize,
    /// Annualized volatility by ISIN or symbol
    #[serde(default)]
    pub symbol_volatilities: BTreeMap<String, f64>,
    /// Log drift over the horizon by ISIN or symbol
    #[serde(default)]
    pub drift: BTreeMap<String, f64>,
    #[serde(default = "default_horizon_days")]
    pub horizon_days: f64,
    /// Path `i` draws from `seed + i`; random when absent
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_conservative_weight")]
    pub conservative_weight: f64,
}

impl Validate for MonteCarloRequest {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.sequence.is_empty() {
            errors.push(ValidationError::invalid("sequence", "No sequence provided"));
        }
        if self.paths == 0 {
            errors.push(ValidationError::invalid("paths", "must be at least 1"));
        }
        if !self.horizon_days.is_finite() || self.horizon_days <= 0.0 {
            errors.push(ValidationError::invalid(
                "horizon_days",
                format!("must be positive, got {}", self.horizon_days),
            ));
        }
        if !(0.0..=1.0).contains(&self.conservative_weight) {
            errors.push(ValidationError::invalid(
                "conservative_weight",
                format!("must be within [0, 1], got {}", self.conservative_weight),
            ));
        }
        if let Some((key, value)) = self
            .symbol_volatilities
            .iter()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            errors.push(ValidationError::invalid(
                "symbol_volatilities",
                format!("volatility for {key} must be finite and non-negative, got {value}"),
            ));
        }
        if let Some((key, value)) = self.drift.iter().find(|(_, v)| !v.is_finite()) {
            errors.push(ValidationError::invalid(
                "drift",
                format!("drift for {key} must be finite, got {value}"),
            ));
        }
        if let Err(e) = self.evaluation_context.validate() {
            errors.push(e);
        }

        ValidationError::collect(errors)
    }
}

/// Score distribution over all evaluated paths.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonteCarloResult {
    pub paths_requested: usize,
    pub paths_evaluated: usize,
    pub feasible_paths: usize,
    pub cancelled_paths: usize,
    /// Score at unshocked prices
    pub base_score: f64,
    pub best_score: f64,
    pub worst_score: f64,
    pub avg_score: f64,
    pub p10_score: f64,
    pub p50_score: f64,
    pub p90_score: f64,
    pub final_score: f64,
    pub conservative_weight: f64,
    pub seed: u64,
    pub status: BatchStatus,
    pub errors: Vec<String>,
}

/// Per-ISIN shock parameters.
#[derive(Debug, Clone)]
struct AssetDynamics {
    isin: String,
    symbol: String,
    sigma: f64,
    drift: f64,
}

enum PathOutcome {
    Scored { score: f64, feasible: bool },
    Failed(String),
    Cancelled,
}

impl MonteCarloRequest {
    /// Shock parameters for every traded or held security, by ISIN.
    fn dynamics(&self, directory: &dyn SecurityDirectory) -> Vec<AssetDynamics> {
        let portfolio = &self.evaluation_context.portfolio_context;
        let traded = self
            .sequence
            .actions
            .iter()
            .map(|a| (a.isin.as_str(), a.symbol.as_str()));
        let held = portfolio.positions.keys().map(|isin| {
            let symbol = directory
                .resolve(isin, isin)
                .map_or(isin.as_str(), |s| s.symbol.as_str());
            (isin.as_str(), symbol)
        });

        let mut assets: BTreeMap<&str, AssetDynamics> = BTreeMap::new();
        for (isin, symbol) in traded.chain(held) {
            if assets.contains_key(isin) {
                continue;
            }
            let lookup = |map: &BTreeMap<String, f64>| {
                map.get(isin).or_else(|| map.get(symbol)).copied()
            };
            let sigma = lookup(&self.symbol_volatilities)
                .or_else(|| directory.resolve(isin, symbol).and_then(|s| s.volatility))
                .or_else(|| portfolio.security_volatility.get(isin).copied())
                .unwrap_or_else(|| {
                    tracing::debug!(isin = %isin, "No volatility data, using default");
                    DEFAULT_VOLATILITY
                })
                .clamp(MIN_VOLATILITY, MAX_VOLATILITY);

            assets.insert(
                isin,
                AssetDynamics {
                    isin: isin.to_string(),
                    symbol: symbol.to_string(),
                    sigma,
                    drift: lookup(&self.drift).unwrap_or(0.0),
                },
            );
        }

        assets.into_values().collect()
    }

    /// Evaluation context of path `path`: one draw per asset, in ISIN order.
    fn path_context(&self, assets: &[AssetDynamics], seed: u64, path: u64) -> EvaluationContext {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(path));
        let shocks: Vec<(&str, &str, f64)> = assets
            .iter()
            .map(|asset| {
                let z: f64 = rng.sample(StandardNormal);
                let m = shock_multiplier(asset.drift, asset.sigma, self.horizon_days, z);
                (asset.isin.as_str(), asset.symbol.as_str(), m)
            })
            .collect();
        self.evaluation_context.with_market_shocks(&shocks)
    }
}

/// Price multiplier for one standard normal draw.
pub fn shock_multiplier(drift: f64, sigma: f64, horizon_days: f64, z: f64) -> f64 {
    let scale = (horizon_days / TRADING_DAYS_PER_YEAR).sqrt();
    (drift + sigma * scale * z)
        .exp()
        .clamp(MIN_MULTIPLIER, MAX_MULTIPLIER)
}

/// Value at quantile `q` of an ascending slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * q) as usize).min(sorted.len() - 1);
    sorted[idx]
}

impl BatchEvaluator {
    /// Evaluate `request.sequence` under `request.paths` random price paths.
    ///
    /// Fails only when the sequence cannot be evaluated at unshocked prices.
    pub fn evaluate_monte_carlo(
        &self,
        request: &MonteCarloRequest,
        token: &CancellationToken,
    ) -> Result<MonteCarloResult, PlannerError> {
        let ctx = &request.evaluation_context;
        let directory = SecurityIndex::new(ctx.securities.clone());
        let base = evaluate_sequence(&Simulator::new(ctx, &directory), &request.sequence)?;

        let assets = request.dynamics(&directory);
        let seed = request.seed.unwrap_or_else(rand::random);
        let path_indices: Vec<u64> = (0..request.paths as u64).collect();

        let outcomes = self.map_ordered(&path_indices, |_, path| {
            if token.is_cancelled() {
                return PathOutcome::Cancelled;
            }
            let shocked = request.path_context(&assets, seed, *path);
            let simulator = Simulator::new(&shocked, &directory);

            match guarded(|| evaluate_sequence(&simulator, &request.sequence)) {
                Ok(result) => PathOutcome::Scored {
                    score: result.score,
                    feasible: result.feasible,
                },
                Err(reason) => PathOutcome::Failed(format!("path {path}: {reason}")),
            }
        });

        let mut scores = Vec::with_capacity(outcomes.len());
        let mut feasible_paths = 0;
        let mut cancelled_paths = 0;
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome {
                PathOutcome::Scored { score, feasible } => {
                    scores.push(score);
                    feasible_paths += usize::from(feasible);
                }
                // A faulted path counts as a zero-score path
                PathOutcome::Failed(error) => {
                    tracing::warn!(error = %error, "Monte-Carlo path failed");
                    scores.push(0.0);
                    errors.push(error);
                }
                PathOutcome::Cancelled => cancelled_paths += 1,
            }
        }

        scores.sort_by(f64::total_cmp);
        let n = scores.len();
        let avg = if n > 0 {
            scores.iter().sum::<f64>() / n as f64
        } else {
            0.0
        };
        let worst = scores.first().copied().unwrap_or(0.0);
        let best = scores.last().copied().unwrap_or(0.0);
        let p10 = percentile(&scores, 0.10);
        let w = request.conservative_weight;
        let tail = (1.0 - w) / 2.0;

        Ok(MonteCarloResult {
            paths_requested: request.paths,
            paths_evaluated: n,
            feasible_paths,
            cancelled_paths,
            base_score: base.score,
            best_score: best,
            worst_score: worst,
            avg_score: avg,
            p10_score: p10,
            p50_score: percentile(&scores, 0.50),
            p90_score: percentile(&scores, 0.90),
            final_score: w * worst + tail * p10 + tail * avg,
            conservative_weight: w,
            seed,
            status: BatchStatus::from_cancelled(cancelled_paths),
            errors,
        })
    }
}

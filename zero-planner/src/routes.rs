//! HTTP routes for the planner service.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Query, Request, State},
    http::HeaderMap,
    response::Json,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use zero_common::logging::RequestContext;
use zero_common::{Validate, ValidationError};

use crate::directory::SecurityIndex;
use crate::domain::{
    ActionSequence, EvaluationContext, EvaluationStatus, PortfolioContext, Security,
    SequenceEvaluationResult, DEFAULT_COST_PENALTY_FACTOR, DEFAULT_SLIPPAGE_PERCENT, DEFAULT_SPREAD_COST_PERCENT,
    DEFAULT_TRANSACTION_COST_FIXED, DEFAULT_TRANSACTION_COST_PERCENT,
};
use crate::error::PlannerError;
use crate::evaluation::{
    compare, evaluate_sequence, rank, BatchOutcome, BatchStatus, CancellationToken, Comparison,
    DeadlineTimer, MonteCarloRequest, MonteCarloResult, SimulationBatch, SimulationResult,
    StochasticRequest, StochasticResult,
};
use crate::generator::{GenerationContext, GeneratorConfig, OpportunitiesByCategory, SequenceGenerator};
use crate::scoring::{components, regime_adaptive_weights, score_breakdown, weights, ScoreBreakdown};
use crate::simulation::Simulator;
use crate::{PlannerState, SERVICE_NAME};

// ============================================================================
// Extractor
// ============================================================================

/// JSON body extractor whose rejection is a `PlannerError`, so malformed
/// bodies get the same `{"error": ...}` shape as validation failures.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = PlannerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(reject(rejection)),
        }
    }
}

fn reject(rejection: JsonRejection) -> PlannerError {
    PlannerError::InvalidRequest(rejection.body_text())
}

// ============================================================================
// Envelope
// ============================================================================

/// Successful response body.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Serialize)]
pub struct ResponseMetadata {
    /// RFC 3339
    pub timestamp: String,
    pub elapsed_ms: u64,
    pub trace_id: String,
}

impl<T> ApiResponse<T> {
    fn new(data: T, ctx: &RequestContext, started: Instant) -> Json<Self> {
        Json(Self {
            data,
            metadata: ResponseMetadata {
                timestamp: chrono::Utc::now().to_rfc3339(),
                elapsed_ms: elapsed_ms(started),
                trace_id: ctx.trace_id.clone(),
            },
        })
    }
}

/// Milliseconds since `started`, saturating.
fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, PlannerError>;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
    pub workers: usize,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub opportunities: OpportunitiesByCategory,
    pub available_cash: f64,
    #[serde(default)]
    pub config: GeneratorConfig,
    /// Enables the adaptive and market-regime patterns
    #[serde(default)]
    pub portfolio_context: Option<PortfolioContext>,
    /// Reference data for the candidates' country and industry
    #[serde(default)]
    pub securities: Vec<Security>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub sequences: Vec<ActionSequence>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub sequences: Vec<ActionSequence>,
    pub evaluation_context: EvaluationContext,
    /// Deadline for the whole call
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct SingleRequest {
    pub sequence: ActionSequence,
    pub evaluation_context: EvaluationContext,
}

#[derive(Debug, Serialize)]
pub struct SingleResponse {
    pub result: SequenceEvaluationResult,
    /// Score components; absent when the sequence was not scored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<ScoreBreakdown>,
}

#[derive(Debug, Serialize)]
pub struct CompareResponse {
    pub results: Vec<SequenceEvaluationResult>,
    pub comparison: Option<Comparison>,
    /// Result indices, best first
    pub ranking: Vec<usize>,
    pub errors: Vec<String>,
    pub status: BatchStatus,
}

#[derive(Debug, Deserialize)]
pub struct MonteCarloBody {
    #[serde(flatten)]
    pub request: MonteCarloRequest,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct StochasticBody {
    #[serde(flatten)]
    pub request: StochasticRequest,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CustomPricesRequest {
    pub sequence: ActionSequence,
    /// ISIN or symbol -> absolute price
    pub custom_prices: BTreeMap<String, f64>,
    pub evaluation_context: EvaluationContext,
}

#[derive(Debug, Deserialize)]
pub struct CriteriaQuery {
    #[serde(default)]
    pub regime: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct CriteriaResponse {
    pub regime: f64,
    pub weights: BTreeMap<&'static str, f64>,
    pub base_weights: BTreeMap<&'static str, f64>,
    pub regime_thresholds: BTreeMap<&'static str, f64>,
    pub components: BTreeMap<&'static str, f64>,
    pub cost_defaults: BTreeMap<&'static str, f64>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Run CPU-bound work off the async runtime.
async fn run_blocking<F, R>(work: F) -> Result<R, PlannerError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PlannerError::Internal(format!("evaluation task failed: {e}")))
}

/// Run `work` with a token that expires after the request deadline and is
/// cancelled if this future is dropped.
async fn run_cancellable<F, R>(timeout_ms: Option<u64>, work: F) -> Result<R, PlannerError>
where
    F: FnOnce(CancellationToken) -> R + Send + 'static,
    R: Send + 'static,
{
    let token = CancellationToken::new();
    let timer = DeadlineTimer::from_timeout_ms(&token, timeout_ms);
    let guard = token.clone().drop_guard();
    let result = run_blocking(move || work(token)).await;
    drop(guard.disarm());
    timer.stop();
    result
}

/// Reject too few items as invalid and too many as over the configured ceiling.
fn check_count(field: &str, count: usize, min: usize, max: usize) -> Result<(), PlannerError> {
    if count < min {
        return Err(ValidationError::invalid(
            field,
            format!("at least {min} required, got {count}"),
        )
        .into());
    }
    if count > max {
        return Err(zero_common::Error::LimitExceeded(format!(
            "{field}: at most {max} allowed, got {count}"
        ))
        .into());
    }
    Ok(())
}

fn total_cost(results: &[SequenceEvaluationResult]) -> f64 {
    results.iter().map(|r| r.transaction_costs).sum()
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint
pub async fn health(
    State(state): State<Arc<PlannerState>>,
    headers: HeaderMap,
) -> Json<ApiResponse<HealthResponse>> {
    let ctx = RequestContext::from_headers(&headers, SERVICE_NAME);
    let started = Instant::now();

    let health = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: SERVICE_NAME.to_string(),
        workers: state.evaluator.workers(),
    };
    ApiResponse::new(health, &ctx, started)
}

/// Generate candidate sequences from categorized opportunities
pub async fn generate_sequences(
    headers: HeaderMap,
    JsonBody(request): JsonBody<GenerateRequest>,
) -> ApiResult<GenerateResponse> {
    let ctx = RequestContext::from_headers(&headers, SERVICE_NAME);
    let started = Instant::now();

    async {
        request.config.validate()?;
        request.config.check_limits()?;
        if !request.available_cash.is_finite() {
            return Err(ValidationError::invalid("available_cash", "must be a finite number").into());
        }
        if let Some(portfolio) = &request.portfolio_context {
            portfolio.validate()?;
        }

        let candidates = request.opportunities.len();
        let sequences = run_blocking(move || {
            let generator = SequenceGenerator::new(request.config);
            let portfolio = request.portfolio_context.map(|mut portfolio| {
                for security in &request.securities {
                    portfolio.record_security(security);
                }
                portfolio
            });
            let gen_ctx = match &portfolio {
                Some(portfolio) => GenerationContext::new(request.available_cash, portfolio),
                None => GenerationContext::cash_only(request.available_cash),
            };
            generator.generate(&request.opportunities, &gen_ctx)
        })
        .await?;

        tracing::info!(
            candidates,
            sequences = sequences.len(),
            elapsed_ms = elapsed_ms(started),
            "Sequences generated"
        );

        let count = sequences.len();
        Ok::<_, PlannerError>(ApiResponse::new(GenerateResponse { sequences, count }, &ctx, started))
    }
    .instrument(ctx.span("generate_sequences"))
    .await
}

/// Evaluate a batch of sequences
pub async fn evaluate_batch(
    State(state): State<Arc<PlannerState>>,
    headers: HeaderMap,
    JsonBody(request): JsonBody<BatchRequest>,
) -> ApiResult<BatchOutcome> {
    let ctx = RequestContext::from_headers(&headers, SERVICE_NAME);
    let started = Instant::now();

    async {
        let limits = &state.config.planner;
        check_count("sequences", request.sequences.len(), 1, limits.max_batch_sequences)?;
        request.evaluation_context.validate()?;

        let evaluator = state.evaluator.clone();
        let timeout = request.timeout_ms.or(limits.default_timeout_ms);
        let outcome = run_cancellable(timeout, move |token| {
            evaluator.evaluate_batch(&request.sequences, &request.evaluation_context, &token)
        })
        .await?;

        tracing::info!(
            sequences = outcome.results.len(),
            failed = outcome.errors.len(),
            cancelled = outcome.cancelled,
            total_cost = total_cost(&outcome.results),
            elapsed_ms = elapsed_ms(started),
            "Batch evaluated"
        );

        Ok::<_, PlannerError>(ApiResponse::new(outcome, &ctx, started))
    }
    .instrument(ctx.span("evaluate_batch"))
    .await
}

/// Evaluate one sequence with its score breakdown
pub async fn evaluate_single(
    headers: HeaderMap,
    JsonBody(request): JsonBody<SingleRequest>,
) -> ApiResult<SingleResponse> {
    let ctx = RequestContext::from_headers(&headers, SERVICE_NAME);
    let started = Instant::now();

    async {
        request.evaluation_context.validate()?;

        let response = run_blocking(move || -> Result<SingleResponse, PlannerError> {
            let eval_ctx = &request.evaluation_context;
            let directory = SecurityIndex::new(eval_ctx.securities.clone());
            let simulator = Simulator::new(eval_ctx, &directory);
            let result = evaluate_sequence(&simulator, &request.sequence)?;

            let breakdown = (result.feasible && result.status == EvaluationStatus::Scored).then(|| {
                score_breakdown(
                    &eval_ctx.portfolio_context,
                    &result.end_portfolio,
                    result.transaction_costs,
                    eval_ctx.cost_penalty_factor,
                )
            });
            Ok(SingleResponse { result, breakdown })
        })
        .await??;

        tracing::info!(
            actions = response.result.sequence.len(),
            feasible = response.result.feasible,
            score = response.result.score,
            cost = response.result.transaction_costs,
            elapsed_ms = elapsed_ms(started),
            "Sequence evaluated"
        );

        Ok::<_, PlannerError>(ApiResponse::new(response, &ctx, started))
    }
    .instrument(ctx.span("evaluate_single"))
    .await
}

/// Evaluate and rank alternative sequences
pub async fn evaluate_compare(
    State(state): State<Arc<PlannerState>>,
    headers: HeaderMap,
    JsonBody(request): JsonBody<BatchRequest>,
) -> ApiResult<CompareResponse> {
    let ctx = RequestContext::from_headers(&headers, SERVICE_NAME);
    let started = Instant::now();

    async {
        let limits = &state.config.planner;
        check_count("sequences", request.sequences.len(), 2, limits.max_compare_sequences)?;
        request.evaluation_context.validate()?;

        let evaluator = state.evaluator.clone();
        let timeout = request.timeout_ms.or(limits.default_timeout_ms);
        let outcome = run_cancellable(timeout, move |token| {
            evaluator.evaluate_batch(&request.sequences, &request.evaluation_context, &token)
        })
        .await?;

        let comparison = compare(&outcome.results);
        let ranking = rank(&outcome.results);
        tracing::info!(
            sequences = outcome.results.len(),
            best_index = comparison.map(|c| c.best_index),
            elapsed_ms = elapsed_ms(started),
            "Sequences compared"
        );

        let response = CompareResponse {
            results: outcome.results,
            comparison,
            ranking,
            errors: outcome.errors,
            status: outcome.status,
        };
        Ok::<_, PlannerError>(ApiResponse::new(response, &ctx, started))
    }
    .instrument(ctx.span("evaluate_compare"))
    .await
}

/// Monte-Carlo robustness evaluation
pub async fn evaluate_monte_carlo(
    State(state): State<Arc<PlannerState>>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<MonteCarloBody>,
) -> ApiResult<MonteCarloResult> {
    let ctx = RequestContext::from_headers(&headers, SERVICE_NAME);
    let started = Instant::now();

    async {
        let limits = &state.config.planner;
        check_count("paths", body.request.paths, 1, limits.max_monte_carlo_paths)?;
        body.request.validate()?;

        let evaluator = state.evaluator.clone();
        let timeout = body.timeout_ms.or(limits.default_timeout_ms);
        let request = body.request;
        let result = run_cancellable(timeout, move |token| {
            evaluator.evaluate_monte_carlo(&request, &token)
        })
        .await??;

        tracing::info!(
            paths = result.paths_evaluated,
            feasible_paths = result.feasible_paths,
            final_score = result.final_score,
            elapsed_ms = elapsed_ms(started),
            "Monte-Carlo evaluation finished"
        );

        Ok::<_, PlannerError>(ApiResponse::new(result, &ctx, started))
    }
    .instrument(ctx.span("evaluate_monte_carlo"))
    .await
}

/// Scenario-weighted evaluation
pub async fn evaluate_stochastic(
    State(state): State<Arc<PlannerState>>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<StochasticBody>,
) -> ApiResult<StochasticResult> {
    let ctx = RequestContext::from_headers(&headers, SERVICE_NAME);
    let started = Instant::now();

    async {
        body.request.validate()?;

        let evaluator = state.evaluator.clone();
        let timeout = body.timeout_ms.or(state.config.planner.default_timeout_ms);
        let request = body.request;
        let result = run_cancellable(timeout, move |token| {
            evaluator.evaluate_stochastic(&request, &token)
        })
        .await??;

        tracing::info!(
            scenarios = result.scenarios_evaluated,
            weighted_score = result.weighted_score,
            elapsed_ms = elapsed_ms(started),
            "Stochastic evaluation finished"
        );

        Ok::<_, PlannerError>(ApiResponse::new(result, &ctx, started))
    }
    .instrument(ctx.span("evaluate_stochastic"))
    .await
}

/// Simulate a batch without scoring
pub async fn simulate_batch(
    State(state): State<Arc<PlannerState>>,
    headers: HeaderMap,
    JsonBody(request): JsonBody<BatchRequest>,
) -> ApiResult<SimulationBatch> {
    let ctx = RequestContext::from_headers(&headers, SERVICE_NAME);
    let started = Instant::now();

    async {
        let limits = &state.config.planner;
        check_count("sequences", request.sequences.len(), 1, limits.max_batch_sequences)?;
        request.evaluation_context.validate()?;

        let evaluator = state.evaluator.clone();
        let timeout = request.timeout_ms.or(limits.default_timeout_ms);
        let batch = run_cancellable(timeout, move |token| {
            evaluator.simulate_batch(&request.sequences, &request.evaluation_context, &token)
        })
        .await?;

        tracing::info!(
            sequences = batch.results.len(),
            failed = batch.errors.len(),
            cancelled = batch.cancelled,
            elapsed_ms = elapsed_ms(started),
            "Batch simulated"
        );

        Ok::<_, PlannerError>(ApiResponse::new(batch, &ctx, started))
    }
    .instrument(ctx.span("simulate_batch"))
    .await
}

/// Simulate one sequence at caller-supplied prices
pub async fn simulate_custom_prices(
    headers: HeaderMap,
    JsonBody(request): JsonBody<CustomPricesRequest>,
) -> ApiResult<SimulationResult> {
    let ctx = RequestContext::from_headers(&headers, SERVICE_NAME);
    let started = Instant::now();

    async {
        request.evaluation_context.validate()?;
        let eval_ctx = apply_custom_prices(&request)?;

        let sequence = request.sequence;
        let result = run_blocking(move || -> Result<SimulationResult, PlannerError> {
            let directory = SecurityIndex::new(eval_ctx.securities.clone());
            let outcome = Simulator::new(&eval_ctx, &directory).simulate(&sequence)?;
            Ok(SimulationResult::simulated(sequence, outcome))
        })
        .await??;

        tracing::info!(
            feasible = result.feasible,
            cost = result.transaction_costs,
            elapsed_ms = elapsed_ms(started),
            "Sequence simulated at custom prices"
        );

        Ok::<_, PlannerError>(ApiResponse::new(result, &ctx, started))
    }
    .instrument(ctx.span("simulate_custom_prices"))
    .await
}

/// Evaluation context with custom prices turned into price multipliers.
///
/// A custom price replaces any adjustment already set for that security.
fn apply_custom_prices(request: &CustomPricesRequest) -> Result<EvaluationContext, PlannerError> {
    if request.custom_prices.is_empty() {
        return Err(ValidationError::invalid("custom_prices", "must not be empty").into());
    }
    if let Some((key, price)) = request
        .custom_prices
        .iter()
        .find(|(_, p)| !p.is_finite() || **p <= 0.0)
    {
        return Err(ValidationError::invalid(
            "custom_prices",
            format!("price for {key} must be positive, got {price}"),
        )
        .into());
    }

    let mut eval_ctx = request.evaluation_context.clone();
    for action in &request.sequence.actions {
        let custom = request
            .custom_prices
            .get(&action.isin)
            .or_else(|| request.custom_prices.get(&action.symbol));
        let Some(custom) = custom else {
            continue;
        };
        if !action.price.is_finite() || action.price <= 0.0 {
            return Err(PlannerError::InvalidRequest(format!(
                "cannot reprice {}: action price must be positive, got {}",
                action.symbol, action.price
            )));
        }
        eval_ctx
            .price_adjustments
            .insert(action.isin.clone(), custom / action.price);
    }
    Ok(eval_ctx)
}

/// Scoring weight configuration, optionally for a given regime
pub async fn evaluation_criteria(
    headers: HeaderMap,
    Query(query): Query<CriteriaQuery>,
) -> Json<ApiResponse<CriteriaResponse>> {
    let ctx = RequestContext::from_headers(&headers, SERVICE_NAME);
    let started = Instant::now();
    let regime = query.regime.unwrap_or(0.0);

    let criteria = CriteriaResponse {
        regime,
        weights: regime_adaptive_weights(regime).as_map(),
        base_weights: weights::ScoringWeights::BASE.as_map(),
        regime_thresholds: BTreeMap::from([
            ("bull", weights::BULL_THRESHOLD),
            ("bear", weights::BEAR_THRESHOLD),
        ]),
        components: BTreeMap::from([
            ("neutral_score", components::NEUTRAL_SCORE),
            ("quality_security_weight", components::SECURITY_QUALITY_WEIGHT),
            ("quality_dividend_weight", components::DIVIDEND_YIELD_WEIGHT),
            ("diversification_geographic_weight", components::GEO_WEIGHT),
            ("diversification_industry_weight", components::INDUSTRY_WEIGHT),
            ("diversification_optimizer_weight", components::OPTIMIZER_WEIGHT),
            ("deviation_scale", components::DEVIATION_SCALE),
        ]),
        cost_defaults: BTreeMap::from([
            ("transaction_cost_fixed", DEFAULT_TRANSACTION_COST_FIXED),
            ("transaction_cost_percent", DEFAULT_TRANSACTION_COST_PERCENT),
            ("spread_cost_percent", DEFAULT_SPREAD_COST_PERCENT),
            ("slippage_percent", DEFAULT_SLIPPAGE_PERCENT),
            ("cost_penalty_factor", DEFAULT_COST_PENALTY_FACTOR),
        ]),
    };
    ApiResponse::new(criteria, &ctx, started)
}

//! Zero Planner Library
//!
//! Decision engine for portfolio rebalancing. Given categorized trade
//! opportunities and a portfolio snapshot it generates candidate action
//! sequences, simulates each one against the portfolio and scores the
//! resulting end state with regime-adaptive weights.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    zero-planner (Rust Service)                      │
//! │                           :4440                                      │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐     │
//! │  │  Sequence       │  │  Portfolio      │  │  Regime-Adaptive│     │
//! │  │  Generator      │─▶│  Simulator      │─▶│  Scoring        │     │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────┘     │
//! │  ┌───────────────────────────────────────────────────────────┐     │
//! │  │  Batch Evaluator (bounded pool: batch / Monte-Carlo /     │     │
//! │  │  stochastic scenarios, cancellation, fault isolation)     │     │
//! │  └───────────────────────────────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Feasibility
//! - Actions run in order against a running cash balance
//! - A BUY that costs more than the cash on hand makes the sequence infeasible
//! - Infeasible sequences are reported with score 0, never dropped
//!
//! ## Regime
//! - `market_regime_score` in [-1, 1] shifts weight between quality,
//!   diversification, risk and improvement
//! - Weights always sum to 1

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod directory;
pub mod domain;
pub mod error;
pub mod evaluation;
pub mod generator;
pub mod routes;
pub mod scoring;
pub mod simulation;

use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use zero_common::config::Config;

pub use error::{PlannerError, SimulationError};
pub use evaluation::BatchEvaluator;

/// Service name used in logs and health responses.
pub const SERVICE_NAME: &str = "zero-planner";

/// Largest accepted request body. Batches of 10,000 sequences exceed the
/// axum default of 2 MiB.
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Shared state for the planner service.
pub struct PlannerState {
    /// Configuration
    pub config: Config,
    /// Worker pool shared by every request
    pub evaluator: BatchEvaluator,
}

impl PlannerState {
    /// Build the state, starting the evaluation pool.
    pub fn new(config: Config) -> std::result::Result<Self, PlannerError> {
        let evaluator = BatchEvaluator::new(config.planner.workers)?;
        Ok(Self { config, evaluator })
    }
}

/// Build the planner router.
pub fn build_router(state: Arc<PlannerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/v1/sequences/generate", post(routes::generate_sequences))
        // Evaluation
        .route("/api/v1/evaluate/batch", post(routes::evaluate_batch))
        .route("/api/v1/evaluate/single", post(routes::evaluate_single))
        .route("/api/v1/evaluate/compare", post(routes::evaluate_compare))
        .route("/api/v1/evaluate/monte-carlo", post(routes::evaluate_monte_carlo))
        .route("/api/v1/evaluate/stochastic", post(routes::evaluate_stochastic))
        // Simulation
        .route("/api/v1/simulate/batch", post(routes::simulate_batch))
        .route("/api/v1/simulate/custom-prices", post(routes::simulate_custom_prices))
        .route("/api/v1/evaluation/criteria", get(routes::evaluation_criteria))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
}

/// Planner HTTP service.
pub struct PlannerService {
    state: Arc<PlannerState>,
}

impl PlannerService {
    /// Create a new planner service.
    pub fn new(config: Config) -> Result<Self> {
        let state = PlannerState::new(config)?;
        Ok(Self {
            state: Arc::new(state),
        })
    }

    /// Shared state, for embedding the router elsewhere.
    pub fn state(&self) -> Arc<PlannerState> {
        self.state.clone()
    }

    /// Start the HTTP server.
    pub async fn start(self) -> Result<()> {
        let addr = self.state.config.planner_addr();
        let app = build_router(self.state.clone());

        tracing::info!(
            address = %addr,
            workers = self.state.evaluator.workers(),
            "Starting HTTP server"
        );

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

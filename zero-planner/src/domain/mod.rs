//! Domain model: securities, positions, portfolio snapshots, trade
//! candidates and evaluation results.

mod action;
mod evaluation;
mod portfolio;

pub use action::{ActionCandidate, ActionSequence, SequenceSignature, TradeSide, CASH_TOLERANCE};
pub use evaluation::{
    EvaluationContext, EvaluationStatus, SequenceEvaluationResult, SequenceStage,
    DEFAULT_COST_PENALTY_FACTOR, DEFAULT_SLIPPAGE_PERCENT, DEFAULT_SPREAD_COST_PERCENT,
    DEFAULT_TRANSACTION_COST_FIXED, DEFAULT_TRANSACTION_COST_PERCENT,
};
pub use portfolio::{PortfolioContext, Position, Security, UNKNOWN_GROUP, WEIGHT_SUM_TOLERANCE};

//! Candidate sequence generation.
//!
//! Turns categorized opportunities into a bounded list of distinct, cash-
//! feasible action sequences. Named patterns are emitted first, then a
//! combinatorial search over the highest-priority candidates fills the
//! remaining budget.

mod combinatorial;
mod patterns;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use zero_common::{Validate, ValidationError, ValidationResult};

use crate::domain::{ActionCandidate, ActionSequence, PortfolioContext, SequenceSignature};

pub use patterns::PatternKind;

/// Upper bound on `max_depth`.
pub const MAX_DEPTH_LIMIT: usize = 10;
/// Upper bound on `max_sequences`.
pub const MAX_SEQUENCES_LIMIT: usize = 10_000;
/// Upper bound on `max_candidates`.
pub const MAX_CANDIDATES_LIMIT: usize = 32;

// ============================================================================
// Inputs
// ============================================================================

/// Opportunities grouped by how they were identified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpportunitiesByCategory {
    pub profit_taking: Vec<ActionCandidate>,
    pub averaging_down: Vec<ActionCandidate>,
    pub rebalance_sells: Vec<ActionCandidate>,
    pub rebalance_buys: Vec<ActionCandidate>,
    pub opportunity_buys: Vec<ActionCandidate>,
}

impl OpportunitiesByCategory {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.profit_taking.len()
            + self.averaging_down.len()
            + self.rebalance_sells.len()
            + self.rebalance_buys.len()
            + self.opportunity_buys.len()
    }

    /// Every candidate, sells first.
    pub fn all(&self) -> impl Iterator<Item = &ActionCandidate> {
        self.profit_taking
            .iter()
            .chain(&self.rebalance_sells)
            .chain(&self.averaging_down)
            .chain(&self.rebalance_buys)
            .chain(&self.opportunity_buys)
    }

    /// Top `cap` candidates of each category.
    pub(crate) fn ranked(&self, cap: usize) -> RankedOpportunities {
        RankedOpportunities {
            profit_taking: top(&self.profit_taking, cap),
            averaging_down: top(&self.averaging_down, cap),
            rebalance_sells: top(&self.rebalance_sells, cap),
            rebalance_buys: top(&self.rebalance_buys, cap),
            opportunity_buys: top(&self.opportunity_buys, cap),
        }
    }
}

/// Per-category candidates after ranking and capping.
#[derive(Debug, Clone, Default)]
pub(crate) struct RankedOpportunities {
    pub profit_taking: Vec<ActionCandidate>,
    pub averaging_down: Vec<ActionCandidate>,
    pub rebalance_sells: Vec<ActionCandidate>,
    pub rebalance_buys: Vec<ActionCandidate>,
    pub opportunity_buys: Vec<ActionCandidate>,
}

/// Order by priority descending, ties by ISIN.
pub(crate) fn by_priority(a: &ActionCandidate, b: &ActionCandidate) -> std::cmp::Ordering {
    b.priority
        .total_cmp(&a.priority)
        .then_with(|| a.isin.cmp(&b.isin))
}

fn top(candidates: &[ActionCandidate], cap: usize) -> Vec<ActionCandidate> {
    let mut ranked = candidates.to_vec();
    ranked.sort_by(by_priority);
    ranked.truncate(cap);
    ranked
}

/// State the generated sequences start from.
#[derive(Debug, Clone, Copy)]
pub struct GenerationContext<'a> {
    pub available_cash: f64,
    /// Holdings, allocation targets and market regime. The adaptive and
    /// regime patterns do not apply without it.
    pub portfolio: Option<&'a PortfolioContext>,
}

impl<'a> GenerationContext<'a> {
    pub fn new(available_cash: f64, portfolio: &'a PortfolioContext) -> Self {
        Self {
            available_cash,
            portfolio: Some(portfolio),
        }
    }

    pub fn cash_only(available_cash: f64) -> Self {
        Self {
            available_cash,
            portfolio: None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Enable flag per named pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternToggles {
    pub direct_buy: bool,
    pub profit_taking: bool,
    pub rebalance: bool,
    pub averaging_down: bool,
    pub single_best: bool,
    pub multi_sell: bool,
    pub mixed_strategy: bool,
    pub opportunity_first: bool,
    pub deep_rebalance: bool,
    pub cash_generation: bool,
    pub cost_optimized: bool,
    pub adaptive: bool,
    pub market_regime: bool,
}

impl Default for PatternToggles {
    fn default() -> Self {
        Self::all(true)
    }
}

impl PatternToggles {
    pub fn all(enabled: bool) -> Self {
        Self {
            direct_buy: enabled,
            profit_taking: enabled,
            rebalance: enabled,
            averaging_down: enabled,
            single_best: enabled,
            multi_sell: enabled,
            mixed_strategy: enabled,
            opportunity_first: enabled,
            deep_rebalance: enabled,
            cash_generation: enabled,
            cost_optimized: enabled,
            adaptive: enabled,
            market_regime: enabled,
        }
    }

    pub fn is_enabled(&self, kind: PatternKind) -> bool {
        match kind {
            PatternKind::DirectBuy => self.direct_buy,
            PatternKind::ProfitTaking => self.profit_taking,
            PatternKind::Rebalance => self.rebalance,
            PatternKind::AveragingDown => self.averaging_down,
            PatternKind::SingleBest => self.single_best,
            PatternKind::MultiSell => self.multi_sell,
            PatternKind::MixedStrategy => self.mixed_strategy,
            PatternKind::OpportunityFirst => self.opportunity_first,
            PatternKind::DeepRebalance => self.deep_rebalance,
            PatternKind::CashGeneration => self.cash_generation,
            PatternKind::CostOptimized => self.cost_optimized,
            PatternKind::Adaptive => self.adaptive,
            PatternKind::MarketRegime => self.market_regime,
        }
    }
}

/// Sequence generator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Maximum actions per sequence
    pub max_depth: usize,
    /// Stop after this many distinct sequences
    pub max_sequences: usize,
    /// Candidates kept per category for the named patterns
    pub max_opportunities_per_category: usize,
    /// Candidates kept for the combinatorial search
    pub max_candidates: usize,
    /// Minimum priority for the combinatorial search
    pub priority_threshold: f64,
    /// BUYs below this value are never emitted
    pub min_trade_value: f64,
    pub enable_combinatorial: bool,
    pub patterns: PatternToggles,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_sequences: 1000,
            max_opportunities_per_category: 5,
            max_candidates: 12,
            priority_threshold: 0.3,
            min_trade_value: 0.0,
            enable_combinatorial: true,
            patterns: PatternToggles::default(),
        }
    }
}

impl Validate for GeneratorConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.max_depth == 0 || self.max_depth > MAX_DEPTH_LIMIT {
            errors.push(ValidationError::invalid(
                "config.max_depth",
                format!("must be within 1..={MAX_DEPTH_LIMIT}, got {}", self.max_depth),
            ));
        }
        if self.max_sequences == 0 {
            errors.push(ValidationError::invalid(
                "config.max_sequences",
                "must be at least 1",
            ));
        }
        if !self.priority_threshold.is_finite() {
            errors.push(ValidationError::invalid(
                "config.priority_threshold",
                "must be a finite number",
            ));
        }
        if !self.min_trade_value.is_finite() || self.min_trade_value < 0.0 {
            errors.push(ValidationError::invalid(
                "config.min_trade_value",
                format!("must be non-negative, got {}", self.min_trade_value),
            ));
        }

        ValidationError::collect(errors)
    }
}

impl GeneratorConfig {
    /// Reject search budgets above the hard ceilings.
    pub fn check_limits(&self) -> zero_common::Result<()> {
        for (field, value, max) in [
            ("config.max_sequences", self.max_sequences, MAX_SEQUENCES_LIMIT),
            ("config.max_candidates", self.max_candidates, MAX_CANDIDATES_LIMIT),
        ] {
            if value > max {
                return Err(zero_common::Error::LimitExceeded(format!(
                    "{field}: at most {max} allowed, got {value}"
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Generator
// ============================================================================

/// Collects distinct, cash-feasible sequences up to a limit.
struct SequenceSink {
    seen: HashSet<SequenceSignature>,
    sequences: Vec<ActionSequence>,
    limit: usize,
    available_cash: f64,
    min_trade_value: f64,
}

impl SequenceSink {
    fn new(config: &GeneratorConfig, ctx: &GenerationContext) -> Self {
        Self {
            seen: HashSet::new(),
            sequences: Vec::new(),
            limit: config.max_sequences,
            available_cash: ctx.available_cash,
            min_trade_value: config.min_trade_value,
        }
    }

    fn is_full(&self) -> bool {
        self.sequences.len() >= self.limit
    }

    /// Whether `actions` could be emitted, ignoring duplicates.
    fn admissible(&self, sequence: &ActionSequence) -> bool {
        !sequence.is_empty()
            && !sequence.repeats_isin()
            && sequence
                .actions
                .iter()
                .all(|a| a.side.is_sell() || a.value() >= self.min_trade_value)
            && sequence.fits_cash(self.available_cash)
    }

    /// Emit `sequence` unless it is inadmissible or already seen.
    fn offer(&mut self, sequence: ActionSequence) -> bool {
        if self.is_full() || !self.admissible(&sequence) {
            return false;
        }
        if !self.seen.insert(sequence.signature()) {
            return false;
        }
        self.sequences.push(sequence);
        true
    }
}

/// Generates candidate sequences from categorized opportunities.
#[derive(Debug, Clone, Default)]
pub struct SequenceGenerator {
    config: GeneratorConfig,
}

impl SequenceGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Distinct, cash-feasible sequences; named patterns first.
    ///
    /// Empty input yields an empty list.
    pub fn generate(
        &self,
        opportunities: &OpportunitiesByCategory,
        ctx: &GenerationContext,
    ) -> Vec<ActionSequence> {
        if opportunities.is_empty() {
            return Vec::new();
        }

        let config = &self.config;
        let mut sink = SequenceSink::new(config, ctx);
        let ranked = opportunities.ranked(config.max_opportunities_per_category);

        'depths: for depth in 1..=config.max_depth {
            for kind in PatternKind::ALL {
                if sink.is_full() {
                    break 'depths;
                }
                if !config.patterns.is_enabled(kind) {
                    continue;
                }
                if let Some(actions) = kind.build(&ranked, ctx, depth) {
                    let sequence = ActionSequence::new(kind.name(), actions)
                        .with_metadata("depth", serde_json::json!(depth));
                    sink.offer(sequence);
                }
            }
        }
        let from_patterns = sink.sequences.len();

        if config.enable_combinatorial && !sink.is_full() {
            combinatorial::enumerate(opportunities, config, &mut sink);
        }

        tracing::debug!(
            candidates = opportunities.len(),
            from_patterns,
            combinatorial = sink.sequences.len() - from_patterns,
            "Sequences generated"
        );

        sink.sequences
    }
}

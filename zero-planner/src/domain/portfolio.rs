//! Portfolio snapshot types.
//!
//! Scores and risk metrics are `Option<f64>`: `None` means the upstream
//! pipeline has not computed the value, which is different from a real `0.0`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zero_common::{Validate, ValidationError, ValidationResult};

/// Tolerance for weight maps summing to one.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Classification used when a security has no known country or industry.
pub const UNKNOWN_GROUP: &str = "OTHER";

// ============================================================================
// Security
// ============================================================================

/// Reference data for one security, read-only during an evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Security {
    pub isin: String,
    pub symbol: String,
    pub name: String,
    pub country: Option<String>,
    pub industry: Option<String>,
    pub currency: String,

    // Precomputed scores
    pub quality_score: Option<f64>,
    pub opportunity_score: Option<f64>,
    pub consistency_score: Option<f64>,
    pub cagr_score: Option<f64>,
    pub technical_score: Option<f64>,
    pub stability_score: Option<f64>,
    pub analyst_score: Option<f64>,
    pub sell_score: Option<f64>,
    pub total_score: Option<f64>,

    // Risk metrics
    pub volatility: Option<f64>,
    pub sharpe: Option<f64>,
    pub sortino: Option<f64>,
    pub max_drawdown: Option<f64>,
}

// ============================================================================
// Position
// ============================================================================

/// A held position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub isin: String,
    pub symbol: String,
    #[serde(default)]
    pub currency: String,
    pub quantity: f64,
    #[serde(default)]
    pub avg_price: f64,
    #[serde(default)]
    pub current_price: f64,
    /// Conversion rate to the base currency
    #[serde(default = "default_currency_rate")]
    pub currency_rate: f64,
    /// Market value in the base currency
    #[serde(default, alias = "market_value_eur")]
    pub market_value: f64,
}

fn default_currency_rate() -> f64 {
    1.0
}

// ============================================================================
// Portfolio Context
// ============================================================================

/// Snapshot of holdings, targets and per-security metrics.
///
/// Two instances exist per evaluation: the start context and the end context
/// produced by simulating a sequence. All maps are ordered so that scoring
/// sums are evaluated in a fixed order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioContext {
    /// ISIN -> position value in base currency
    pub positions: BTreeMap<String, f64>,
    pub total_value: f64,

    /// Country group -> target weight
    pub country_weights: BTreeMap<String, f64>,
    /// Industry group -> target weight
    pub industry_weights: BTreeMap<String, f64>,

    pub security_countries: BTreeMap<String, String>,
    pub security_industries: BTreeMap<String, String>,
    pub security_scores: BTreeMap<String, f64>,
    pub security_dividends: BTreeMap<String, f64>,
    pub security_cagrs: BTreeMap<String, f64>,
    pub security_volatility: BTreeMap<String, f64>,
    pub security_sharpe: BTreeMap<String, f64>,
    pub security_sortino: BTreeMap<String, f64>,
    pub security_max_drawdown: BTreeMap<String, f64>,

    /// e.g. "Germany" -> "EUROPE"
    pub country_to_group: BTreeMap<String, String>,
    pub industry_to_group: BTreeMap<String, String>,

    pub position_avg_prices: BTreeMap<String, f64>,
    pub current_prices: BTreeMap<String, f64>,

    /// Market regime in [-1, 1], bearish to bullish
    pub market_regime_score: f64,

    /// ISIN -> optimizer target weight
    pub optimizer_target_weights: BTreeMap<String, f64>,
}

impl PortfolioContext {
    /// Sum of position values.
    pub fn positions_value(&self) -> f64 {
        self.positions.values().sum()
    }

    /// Restore the `total_value` invariant after positions change.
    pub fn recompute_total(&mut self) {
        self.total_value = self.positions_value();
    }

    /// Position weights in (0, 1], keyed by ISIN. Empty when nothing is held.
    pub fn position_weights(&self) -> BTreeMap<&str, f64> {
        let total: f64 = self.positions.values().filter(|v| **v > 0.0).sum();
        if total <= 0.0 {
            return BTreeMap::new();
        }
        self.positions
            .iter()
            .filter(|(_, v)| **v > 0.0)
            .map(|(isin, v)| (isin.as_str(), v / total))
            .collect()
    }

    /// Country group of a held security.
    ///
    /// Falls back to the raw country when no group mapping exists, and to
    /// [`UNKNOWN_GROUP`] when the country itself is unknown.
    pub fn country_group(&self, isin: &str) -> String {
        classify(
            self.security_countries.get(isin),
            &self.country_to_group,
        )
    }

    /// Industry group of a held security, with the same fallbacks.
    pub fn industry_group(&self, isin: &str) -> String {
        classify(
            self.security_industries.get(isin),
            &self.industry_to_group,
        )
    }

    /// Copy the reference data of `security` into the per-ISIN maps that
    /// are still empty for it.
    pub fn record_security(&mut self, security: &Security) {
        let isin = &security.isin;
        if let Some(country) = &security.country {
            self.security_countries
                .entry(isin.clone())
                .or_insert_with(|| country.clone());
        }
        if let Some(industry) = &security.industry {
            self.security_industries
                .entry(isin.clone())
                .or_insert_with(|| industry.clone());
        }
        let metrics = [
            (&mut self.security_scores, security.quality_score),
            (&mut self.security_volatility, security.volatility),
            (&mut self.security_sharpe, security.sharpe),
            (&mut self.security_sortino, security.sortino),
            (&mut self.security_max_drawdown, security.max_drawdown),
        ];
        for (map, value) in metrics {
            if let Some(value) = value {
                map.entry(isin.clone()).or_insert(value);
            }
        }
    }
}

fn classify(raw: Option<&String>, groups: &BTreeMap<String, String>) -> String {
    match raw.map(|s| s.trim()).filter(|s| !s.is_empty()) {
        Some(name) => groups
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string()),
        None => UNKNOWN_GROUP.to_string(),
    }
}

fn check_weight_sum(
    field: &str,
    weights: &BTreeMap<String, f64>,
    errors: &mut Vec<ValidationError>,
) {
    if weights.is_empty() {
        return;
    }
    if weights.values().any(|w| !w.is_finite() || *w < 0.0) {
        errors.push(ValidationError::invalid(
            field,
            "weights must be finite and non-negative",
        ));
        return;
    }
    let sum: f64 = weights.values().sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        errors.push(ValidationError::invalid(
            field,
            format!("weights must sum to 1.0, got {sum:.6}"),
        ));
    }
}

impl Validate for PortfolioContext {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Some((isin, value)) = self
            .positions
            .iter()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            errors.push(ValidationError::invalid(
                "portfolio_context.positions",
                format!("position {isin} has invalid value {value}"),
            ));
        }

        let sum = self.positions_value();
        if !self.total_value.is_finite()
            || (self.total_value - sum).abs() > WEIGHT_SUM_TOLERANCE * sum.abs().max(1.0)
        {
            errors.push(ValidationError::invalid(
                "portfolio_context.total_value",
                format!(
                    "must equal the sum of positions ({sum:.2}), got {:.2}",
                    self.total_value
                ),
            ));
        }

        check_weight_sum(
            "portfolio_context.country_weights",
            &self.country_weights,
            &mut errors,
        );
        check_weight_sum(
            "portfolio_context.industry_weights",
            &self.industry_weights,
            &mut errors,
        );

        // Optimizer targets may leave a share in cash.
        let optimizer_sum: f64 = self.optimizer_target_weights.values().sum();
        if self
            .optimizer_target_weights
            .values()
            .any(|w| !w.is_finite() || *w < 0.0)
            || optimizer_sum > 1.0 + WEIGHT_SUM_TOLERANCE
        {
            errors.push(ValidationError::invalid(
                "portfolio_context.optimizer_target_weights",
                "weights must be non-negative and sum to at most 1.0",
            ));
        }

        if !(-1.0..=1.0).contains(&self.market_regime_score) {
            errors.push(ValidationError::invalid(
                "portfolio_context.market_regime_score",
                "must be within [-1, 1]",
            ));
        }

        ValidationError::collect(errors)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Context holding the given (ISIN, value) positions.
    pub fn context(positions: &[(&str, f64)]) -> PortfolioContext {
        let mut ctx = PortfolioContext {
            positions: positions
                .iter()
                .map(|(isin, value)| (isin.to_string(), *value))
                .collect(),
            ..Default::default()
        };
        ctx.recompute_total();
        ctx
    }

    pub fn security(isin: &str, country: &str, industry: &str) -> Security {
        Security {
            isin: isin.to_string(),
            symbol: isin.to_string(),
            name: format!("{isin} Corp"),
            country: Some(country.to_string()),
            industry: Some(industry.to_string()),
            currency: "EUR".to_string(),
            ..Default::default()
        }
    }
}

//! The four end-state score components. Each returns a value in [0, 1].
//!
//! Missing data never fails a score: a component without inputs returns
//! [`NEUTRAL_SCORE`].

use std::collections::BTreeMap;

use crate::domain::PortfolioContext;

/// Score used when a component has no data to work with.
pub const NEUTRAL_SCORE: f64 = 0.5;

// Portfolio quality
pub const SECURITY_QUALITY_WEIGHT: f64 = 0.6;
pub const DIVIDEND_YIELD_WEIGHT: f64 = 0.4;
/// Dividend yield that earns the full bonus (10%).
const DIVIDEND_YIELD_CAP: f64 = 0.10;

// Diversification
pub const GEO_WEIGHT: f64 = 0.40;
pub const INDUSTRY_WEIGHT: f64 = 0.30;
pub const OPTIMIZER_WEIGHT: f64 = 0.30;
/// Average absolute deviation that scores zero.
pub const DEVIATION_SCALE: f64 = 0.3;

/// Value-weighted average of `metric` over held positions that have it.
fn value_weighted(ctx: &PortfolioContext, metric: &BTreeMap<String, f64>) -> Option<f64> {
    let (weighted, covered) = ctx
        .position_weights()
        .into_iter()
        .filter_map(|(isin, weight)| metric.get(isin).map(|v| (v * weight, weight)))
        .filter(|(v, _)| v.is_finite())
        .fold((0.0, 0.0), |(sum, cov), (v, w)| (sum + v, cov + w));

    (covered > 0.0).then(|| weighted / covered)
}

// ============================================================================
// Portfolio Quality
// ============================================================================

/// Blend of value-weighted security quality and a dividend-yield bonus.
///
/// With only one kind of data the score is that term alone.
pub fn portfolio_quality(ctx: &PortfolioContext) -> f64 {
    let quality = value_weighted(ctx, &ctx.security_scores).map(|q| q.clamp(0.0, 1.0));
    let dividend = value_weighted(ctx, &ctx.security_dividends)
        .map(|d| (d.max(0.0) / DIVIDEND_YIELD_CAP).min(1.0));

    match (quality, dividend) {
        (Some(q), Some(d)) => q * SECURITY_QUALITY_WEIGHT + d * DIVIDEND_YIELD_WEIGHT,
        (Some(q), None) => q,
        (None, Some(d)) => d,
        (None, None) => {
            tracing::debug!(
                positions = ctx.positions.len(),
                "No quality or dividend data, using neutral quality"
            );
            NEUTRAL_SCORE
        }
    }
}

// ============================================================================
// Diversification & Allocation Alignment
// ============================================================================

/// `max(0, 1 - avg|actual - target| / DEVIATION_SCALE)` over target keys.
fn fit(actual: &BTreeMap<String, f64>, targets: &BTreeMap<String, f64>) -> f64 {
    if targets.is_empty() {
        return NEUTRAL_SCORE;
    }
    let total_deviation: f64 = targets
        .iter()
        .map(|(key, target)| (actual.get(key).copied().unwrap_or(0.0) - target).abs())
        .sum();
    let avg = total_deviation / targets.len() as f64;
    (1.0 - avg / DEVIATION_SCALE).max(0.0)
}

/// Current weight of each group, over positive positions.
pub(crate) fn group_weights(
    ctx: &PortfolioContext,
    group_of: impl Fn(&PortfolioContext, &str) -> String,
) -> BTreeMap<String, f64> {
    let mut groups = BTreeMap::new();
    for (isin, weight) in ctx.position_weights() {
        *groups.entry(group_of(ctx, isin)).or_insert(0.0) += weight;
    }
    groups
}

/// Country-group allocation fit.
pub fn geographic_fit(ctx: &PortfolioContext) -> f64 {
    if ctx.country_weights.is_empty() {
        tracing::debug!("No country targets, geographic fit neutral");
        return NEUTRAL_SCORE;
    }
    fit(
        &group_weights(ctx, PortfolioContext::country_group),
        &ctx.country_weights,
    )
}

/// Industry-group allocation fit.
pub fn industry_fit(ctx: &PortfolioContext) -> f64 {
    if ctx.industry_weights.is_empty() {
        tracing::debug!("No industry targets, industry fit neutral");
        return NEUTRAL_SCORE;
    }
    fit(
        &group_weights(ctx, PortfolioContext::industry_group),
        &ctx.industry_weights,
    )
}

/// Per-security fit against optimizer target weights.
pub fn optimizer_fit(ctx: &PortfolioContext) -> f64 {
    if ctx.optimizer_target_weights.is_empty() {
        return NEUTRAL_SCORE;
    }
    let actual: BTreeMap<String, f64> = ctx
        .position_weights()
        .into_iter()
        .map(|(isin, w)| (isin.to_string(), w))
        .collect();
    fit(&actual, &ctx.optimizer_target_weights)
}

pub fn diversification(ctx: &PortfolioContext) -> f64 {
    let score = geographic_fit(ctx) * GEO_WEIGHT
        + industry_fit(ctx) * INDUSTRY_WEIGHT
        + optimizer_fit(ctx) * OPTIMIZER_WEIGHT;
    score.clamp(0.0, 1.0)
}

// ============================================================================
// Risk-Adjusted Metrics
// ============================================================================

/// Piecewise-linear map of a Sharpe ratio into [0, 1].
///
/// ```text
///   sharpe   < 0    0 - 0.5    0.5 - 1    1 - 2     >= 2
///   score      0    0 - 0.4  0.4 - 0.7  0.7 - 1.0    1.0
/// ```
pub fn sharpe_to_score(sharpe: f64) -> f64 {
    if sharpe.is_nan() || sharpe < 0.0 {
        0.0
    } else if sharpe >= 2.0 {
        1.0
    } else if sharpe >= 1.0 {
        0.7 + (sharpe - 1.0) * 0.3
    } else if sharpe >= 0.5 {
        0.4 + (sharpe - 0.5) * 0.6
    } else {
        sharpe * 0.8
    }
}

/// Value-weighted Sharpe through [`sharpe_to_score`].
///
/// Only Sharpe feeds the score; Sortino, volatility and drawdown are
/// reported but never gate it.
pub fn risk_adjusted(ctx: &PortfolioContext) -> f64 {
    match value_weighted(ctx, &ctx.security_sharpe) {
        Some(sharpe) => sharpe_to_score(sharpe),
        None => {
            tracing::debug!(
                positions = ctx.positions.len(),
                "No Sharpe data for held securities, using neutral risk score"
            );
            NEUTRAL_SCORE
        }
    }
}

/// Value-weighted Sortino ratio, for reporting.
pub fn weighted_sortino(ctx: &PortfolioContext) -> Option<f64> {
    value_weighted(ctx, &ctx.security_sortino)
}

// ============================================================================
// End-State Improvement
// ============================================================================

/// `0.5 + 0.5 * (quality(end) - quality(start))`, clamped.
pub fn improvement(start: &PortfolioContext, end: &PortfolioContext) -> f64 {
    let delta = portfolio_quality(end) - portfolio_quality(start);
    (NEUTRAL_SCORE + 0.5 * delta).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::context;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn test_quality_blend() {
        let mut ctx = context(&[("A", 300.0), ("B", 100.0)]);
        ctx.security_scores.insert("A".into(), 0.8);
        ctx.security_scores.insert("B".into(), 0.4);
        assert_close(portfolio_quality(&ctx), 0.7);

        ctx.security_dividends.insert("A".into(), 0.04);
        ctx.security_dividends.insert("B".into(), 0.04);
        // 0.6 * 0.7 + 0.4 * min(1, 0.4)
        assert_close(portfolio_quality(&ctx), 0.58);
    }

    #[test]
    fn test_quality_dividend_only_and_neutral() {
        let mut ctx = context(&[("A", 100.0)]);
        assert_eq!(portfolio_quality(&ctx), NEUTRAL_SCORE);

        ctx.security_dividends.insert("A".into(), 0.25);
        assert_close(portfolio_quality(&ctx), 1.0);
    }

    #[test]
    fn test_quality_ignores_uncovered_positions() {
        let mut ctx = context(&[("A", 100.0), ("B", 900.0)]);
        ctx.security_scores.insert("A".into(), 0.9);
        assert_close(portfolio_quality(&ctx), 0.9);
    }

    #[test]
    fn test_geo_fit_perfect_alignment() {
        let mut ctx = context(&[("A", 600.0), ("B", 400.0)]);
        ctx.security_countries.insert("A".into(), "Germany".into());
        ctx.security_countries.insert("B".into(), "United States".into());
        ctx.country_to_group.insert("Germany".into(), "EU".into());
        ctx.country_to_group.insert("United States".into(), "US".into());
        ctx.country_weights.insert("EU".into(), 0.6);
        ctx.country_weights.insert("US".into(), 0.4);
        assert_close(geographic_fit(&ctx), 1.0);
    }

    #[test]
    fn test_geo_fit_deviation() {
        let mut ctx = context(&[("A", 1000.0)]);
        ctx.security_countries.insert("A".into(), "EU".into());
        ctx.country_weights.insert("EU".into(), 0.5);
        ctx.country_weights.insert("US".into(), 0.5);
        // avg deviation 0.5 > scale
        assert_eq!(geographic_fit(&ctx), 0.0);

        ctx.country_weights.insert("EU".into(), 0.9);
        ctx.country_weights.insert("US".into(), 0.1);
        // avg deviation 0.1 -> 1 - 0.1 / 0.3
        assert_close(geographic_fit(&ctx), 2.0 / 3.0);
    }

    #[test]
    fn test_unclassified_positions_count_as_other() {
        let mut ctx = context(&[("A", 500.0), ("B", 500.0)]);
        ctx.security_industries.insert("A".into(), "Banks".into());
        ctx.industry_weights.insert("Banks".into(), 0.5);
        ctx.industry_weights.insert("OTHER".into(), 0.5);
        assert_close(industry_fit(&ctx), 1.0);
    }

    #[test]
    fn test_diversification_neutral_without_targets() {
        let ctx = context(&[("A", 100.0)]);
        assert_close(diversification(&ctx), 0.5);
    }

    #[test]
    fn test_optimizer_fit() {
        let mut ctx = context(&[("A", 500.0), ("B", 500.0)]);
        ctx.optimizer_target_weights.insert("A".into(), 0.5);
        ctx.optimizer_target_weights.insert("B".into(), 0.5);
        assert_close(optimizer_fit(&ctx), 1.0);

        ctx.optimizer_target_weights.insert("A".into(), 0.35);
        ctx.optimizer_target_weights.insert("B".into(), 0.65);
        assert_close(optimizer_fit(&ctx), 0.5);
    }

    #[test]
    fn test_sharpe_mapping_breakpoints() {
        let cases = vec![
            (-1.0, 0.0),
            (0.0, 0.0),
            (0.25, 0.2),
            (0.5, 0.4),
            (0.75, 0.55),
            (1.0, 0.7),
            (1.5, 0.85),
            (2.0, 1.0),
            (3.5, 1.0),
        ];
        for (sharpe, expected) in cases {
            assert_close(sharpe_to_score(sharpe), expected);
        }
    }

    #[test]
    fn test_risk_neutral_without_sharpe() {
        let mut ctx = context(&[("A", 100.0)]);
        ctx.security_sortino.insert("A".into(), 3.0);
        assert_eq!(risk_adjusted(&ctx), NEUTRAL_SCORE);
        assert_eq!(weighted_sortino(&ctx), Some(3.0));
    }

    #[test]
    fn test_risk_weighted_sharpe() {
        let mut ctx = context(&[("A", 500.0), ("B", 500.0)]);
        ctx.security_sharpe.insert("A".into(), 2.0);
        ctx.security_sharpe.insert("B".into(), 1.0);
        assert_close(risk_adjusted(&ctx), 0.85);
    }

    #[test]
    fn test_improvement() {
        let mut start = context(&[("A", 100.0)]);
        start.security_scores.insert("A".into(), 0.4);
        let mut end = start.clone();
        end.security_scores.insert("A".into(), 0.8);

        assert_close(improvement(&start, &end), 0.7);
        assert_close(improvement(&end, &start), 0.3);
        assert_close(improvement(&start, &start), 0.5);
    }
}

//! Named sequence patterns.
//!
//! Each pattern is a greedy recipe over the ranked categories, capped at a
//! number of steps. Buys are only added while the running cash (including
//! proceeds of the sells already in the sequence) covers their value.
//!
//! The adaptive and market-regime patterns read the portfolio and do not
//! apply when the generation context has none.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{GenerationContext, RankedOpportunities};
use crate::domain::{ActionCandidate, PortfolioContext};
use crate::scoring::components::group_weights;
use crate::scoring::weights::{BEAR_THRESHOLD, BULL_THRESHOLD};

/// Minimum country-group shortfall the adaptive pattern acts on.
const MIN_COUNTRY_GAP: f64 = 0.02;
/// Minimum industry-group shortfall the adaptive pattern acts on.
const MIN_INDUSTRY_GAP: f64 = 0.01;
/// Profit-taking or rebalance sells used outside a bear market.
const REGIME_SELLS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Buys only, funded by available cash
    DirectBuy,
    /// Profit-taking sells, then reinvest
    ProfitTaking,
    /// Sell overweight, buy underweight
    Rebalance,
    /// Averaging-down buys, optionally funded by one profit-taking sell
    AveragingDown,
    /// The single highest-priority action
    SingleBest,
    /// All sells, then any buys
    MultiSell,
    /// Up to half the steps as sells, then buys
    MixedStrategy,
    /// Opportunity buys, then averaging/rebalance buys
    OpportunityFirst,
    /// Several rebalance sells into several rebalance buys
    DeepRebalance,
    /// Sells into strategic buys, opportunity buys first
    CashGeneration,
    /// Fewest trades: sells, then buys by priority
    CostOptimized,
    /// Buys into under-weight country and industry groups, largest gap first
    Adaptive,
    /// Raise cash in a bear market, reinvest profits in a bull market
    MarketRegime,
}

impl PatternKind {
    /// Emission order.
    pub const ALL: [PatternKind; 13] = [
        PatternKind::DirectBuy,
        PatternKind::ProfitTaking,
        PatternKind::Rebalance,
        PatternKind::AveragingDown,
        PatternKind::SingleBest,
        PatternKind::MultiSell,
        PatternKind::MixedStrategy,
        PatternKind::OpportunityFirst,
        PatternKind::DeepRebalance,
        PatternKind::CashGeneration,
        PatternKind::CostOptimized,
        PatternKind::Adaptive,
        PatternKind::MarketRegime,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::DirectBuy => "direct_buy",
            Self::ProfitTaking => "profit_taking",
            Self::Rebalance => "rebalance",
            Self::AveragingDown => "averaging_down",
            Self::SingleBest => "single_best",
            Self::MultiSell => "multi_sell",
            Self::MixedStrategy => "mixed_strategy",
            Self::OpportunityFirst => "opportunity_first",
            Self::DeepRebalance => "deep_rebalance",
            Self::CashGeneration => "cash_generation",
            Self::CostOptimized => "cost_optimized",
            Self::Adaptive => "adaptive",
            Self::MarketRegime => "market_regime",
        }
    }

    /// Actions of this pattern with at most `max_steps` steps, or `None`
    /// when the pattern does not apply.
    pub(crate) fn build(
        self,
        ranked: &RankedOpportunities,
        ctx: &GenerationContext,
        max_steps: usize,
    ) -> Option<Vec<ActionCandidate>> {
        if max_steps == 0 {
            return None;
        }
        let r = ranked;
        let cash = ctx.available_cash;
        let sells = all_sells(r);
        let buys = [&r.averaging_down, &r.rebalance_buys, &r.opportunity_buys];

        let actions = match self {
            Self::DirectBuy => direct_buy(r, cash, max_steps),
            Self::ProfitTaking if !r.profit_taking.is_empty() => sells_then_buys(
                &r.profit_taking,
                [&r.averaging_down, &r.rebalance_buys],
                cash,
                max_steps,
                max_steps,
            ),
            Self::Rebalance if !r.rebalance_sells.is_empty() => sells_then_buys(
                &r.rebalance_sells,
                [&r.rebalance_buys],
                cash,
                max_steps,
                max_steps,
            ),
            Self::AveragingDown => averaging_down(r, cash, max_steps),
            Self::SingleBest => single_best(r, cash),
            Self::MultiSell if !sells.is_empty() => {
                sells_then_buys(&sells, buys, cash, max_steps, max_steps)
            }
            Self::MixedStrategy => sells_then_buys(&sells, buys, cash, max_steps, half(max_steps)),
            Self::OpportunityFirst if !r.opportunity_buys.is_empty() => {
                let mut plan = Plan::new(cash, max_steps);
                plan.buy_from([&r.opportunity_buys, &r.averaging_down, &r.rebalance_buys]);
                plan.actions
            }
            Self::DeepRebalance if !r.rebalance_sells.is_empty() && !r.rebalance_buys.is_empty() => {
                sells_then_buys(
                    &r.rebalance_sells,
                    [&r.rebalance_buys],
                    cash,
                    max_steps,
                    half(max_steps),
                )
            }
            Self::CashGeneration if !sells.is_empty() => sells_then_buys(
                &sells,
                [&r.opportunity_buys, &r.averaging_down, &r.rebalance_buys],
                cash,
                max_steps,
                max_steps,
            ),
            Self::CostOptimized => cost_optimized(r, cash, max_steps),
            Self::Adaptive => match ctx.portfolio {
                Some(portfolio) => adaptive(r, portfolio, cash, max_steps),
                None => Vec::new(),
            },
            Self::MarketRegime => match ctx.portfolio {
                Some(portfolio) => market_regime(r, portfolio.market_regime_score, cash, max_steps),
                None => Vec::new(),
            },
            _ => Vec::new(),
        };

        if actions.is_empty() {
            None
        } else {
            Some(actions)
        }
    }
}

/// Sequence under construction with its running cash.
struct Plan {
    actions: Vec<ActionCandidate>,
    cash: f64,
    max_steps: usize,
}

impl Plan {
    fn new(cash: f64, max_steps: usize) -> Self {
        Self {
            actions: Vec::new(),
            cash,
            max_steps,
        }
    }

    fn has_room(&self) -> bool {
        self.actions.len() < self.max_steps
    }

    fn contains(&self, candidate: &ActionCandidate) -> bool {
        self.actions.iter().any(|a| a.key() == candidate.key())
    }

    fn sell(&mut self, candidate: &ActionCandidate) {
        self.cash += candidate.value();
        self.actions.push(candidate.clone());
    }

    /// Add `candidate` if there is room and cash for it.
    fn try_buy(&mut self, candidate: &ActionCandidate) -> bool {
        if !self.has_room() || candidate.value() > self.cash || self.contains(candidate) {
            return false;
        }
        self.cash -= candidate.value();
        self.actions.push(candidate.clone());
        true
    }

    fn buy_from<const N: usize>(&mut self, groups: [&Vec<ActionCandidate>; N]) {
        for candidate in groups.into_iter().flatten() {
            self.try_buy(candidate);
        }
    }
}

fn half(max_steps: usize) -> usize {
    (max_steps / 2).max(1)
}

fn all_sells(r: &RankedOpportunities) -> Vec<ActionCandidate> {
    r.profit_taking
        .iter()
        .chain(&r.rebalance_sells)
        .cloned()
        .collect()
}

/// Up to `max_sells` sells, then buys from `buy_groups` in order.
fn sells_then_buys<const N: usize>(
    sells: &[ActionCandidate],
    buy_groups: [&Vec<ActionCandidate>; N],
    cash: f64,
    max_steps: usize,
    max_sells: usize,
) -> Vec<ActionCandidate> {
    let mut plan = Plan::new(cash, max_steps);
    for candidate in sells.iter().take(max_sells.min(max_steps)) {
        plan.sell(candidate);
    }
    plan.buy_from(buy_groups);
    plan.actions
}

fn direct_buy(r: &RankedOpportunities, cash: f64, max_steps: usize) -> Vec<ActionCandidate> {
    if cash <= 0.0 {
        return Vec::new();
    }
    let mut plan = Plan::new(cash, max_steps);
    plan.buy_from([&r.averaging_down, &r.rebalance_buys, &r.opportunity_buys]);
    plan.actions
}

fn averaging_down(r: &RankedOpportunities, cash: f64, max_steps: usize) -> Vec<ActionCandidate> {
    let Some(first) = r.averaging_down.first() else {
        return Vec::new();
    };
    let mut plan = Plan::new(cash, max_steps);
    if cash < first.value() {
        if let Some(funding) = r.profit_taking.first() {
            plan.sell(funding);
        }
    }
    plan.buy_from([&r.averaging_down]);
    plan.actions
}

fn single_best(r: &RankedOpportunities, cash: f64) -> Vec<ActionCandidate> {
    let mut best: Option<&ActionCandidate> = None;
    for candidate in r
        .profit_taking
        .iter()
        .chain(&r.averaging_down)
        .chain(&r.rebalance_sells)
        .chain(&r.rebalance_buys)
        .chain(&r.opportunity_buys)
    {
        if best.map_or(true, |b| candidate.priority > b.priority) {
            best = Some(candidate);
        }
    }
    match best {
        Some(c) if c.side.is_sell() || c.value() <= cash => vec![c.clone()],
        _ => Vec::new(),
    }
}

fn cost_optimized(r: &RankedOpportunities, cash: f64, max_steps: usize) -> Vec<ActionCandidate> {
    let mut plan = Plan::new(cash, max_steps);
    for candidate in r.profit_taking.iter().chain(&r.rebalance_sells) {
        if !plan.has_room() {
            break;
        }
        if candidate.side.is_sell() {
            plan.sell(candidate);
        }
    }

    let mut buys: Vec<&ActionCandidate> = r
        .averaging_down
        .iter()
        .chain(&r.rebalance_buys)
        .chain(&r.opportunity_buys)
        .filter(|c| c.side.is_buy())
        .collect();
    buys.sort_by(|a, b| super::by_priority(a, b));
    for candidate in buys {
        if !plan.has_room() {
            break;
        }
        plan.try_buy(candidate);
    }
    plan.actions
}

/// Shortfall of each group below its target, keeping only those above
/// `min_gap`.
fn shortfalls(
    portfolio: &PortfolioContext,
    targets: &BTreeMap<String, f64>,
    group_of: fn(&PortfolioContext, &str) -> String,
    min_gap: f64,
) -> BTreeMap<String, f64> {
    let current = group_weights(portfolio, group_of);
    targets
        .iter()
        .map(|(group, target)| (group, target - current.get(group).copied().unwrap_or(0.0)))
        .filter(|(_, gap)| *gap > min_gap)
        .map(|(group, gap)| (group.clone(), gap))
        .collect()
}

fn adaptive(
    r: &RankedOpportunities,
    portfolio: &PortfolioContext,
    cash: f64,
    max_steps: usize,
) -> Vec<ActionCandidate> {
    if portfolio.total_value <= 0.0 {
        return Vec::new();
    }
    let country_gaps = shortfalls(
        portfolio,
        &portfolio.country_weights,
        PortfolioContext::country_group,
        MIN_COUNTRY_GAP,
    );
    let industry_gaps = shortfalls(
        portfolio,
        &portfolio.industry_weights,
        PortfolioContext::industry_group,
        MIN_INDUSTRY_GAP,
    );
    if country_gaps.is_empty() && industry_gaps.is_empty() {
        return Vec::new();
    }

    // Each buy is ranked by the largest gap it helps close
    let mut buys: Vec<(f64, &ActionCandidate)> = r
        .rebalance_buys
        .iter()
        .chain(&r.opportunity_buys)
        .filter(|c| c.side.is_buy())
        .filter_map(|c| {
            let country = country_gaps.get(&portfolio.country_group(&c.isin));
            let industry = industry_gaps.get(&portfolio.industry_group(&c.isin));
            let gap = country.into_iter().chain(industry).copied().fold(0.0, f64::max);
            (gap > 0.0).then_some((gap, c))
        })
        .collect();
    buys.sort_by(|(gap_a, a), (gap_b, b)| gap_b.total_cmp(gap_a).then_with(|| super::by_priority(a, b)));

    let mut plan = Plan::new(cash, max_steps);
    for (_, candidate) in buys {
        plan.try_buy(candidate);
    }
    plan.actions
}

fn market_regime(
    r: &RankedOpportunities,
    regime: f64,
    cash: f64,
    max_steps: usize,
) -> Vec<ActionCandidate> {
    let mut plan = Plan::new(cash, max_steps);
    let (sells, max_sells): (Vec<&ActionCandidate>, usize) = if regime < BEAR_THRESHOLD {
        (r.profit_taking.iter().chain(&r.rebalance_sells).collect(), half(max_steps))
    } else if regime > BULL_THRESHOLD {
        (r.profit_taking.iter().collect(), REGIME_SELLS)
    } else {
        (r.rebalance_sells.iter().collect(), REGIME_SELLS)
    };

    for candidate in sells {
        if plan.actions.len() >= max_sells.min(max_steps) {
            break;
        }
        if candidate.side.is_sell() && !plan.contains(candidate) {
            plan.sell(candidate);
        }
    }

    if regime < BEAR_THRESHOLD {
        plan.buy_from([&r.averaging_down]);
    } else if regime > BULL_THRESHOLD {
        plan.buy_from([&r.opportunity_buys, &r.rebalance_buys]);
    } else {
        plan.buy_from([&r.rebalance_buys, &r.opportunity_buys]);
    }
    plan.actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::candidate;
    use crate::domain::TradeSide;
    use crate::generator::tests::opportunities;

    fn ranked() -> RankedOpportunities {
        opportunities().ranked(5)
    }

    fn cash(available: f64) -> GenerationContext<'static> {
        GenerationContext::cash_only(available)
    }

    fn isins(actions: &[ActionCandidate]) -> Vec<&str> {
        actions.iter().map(|a| a.isin.as_str()).collect()
    }

    #[test]
    fn test_names_are_unique() {
        let names: std::collections::HashSet<_> = PatternKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(names.len(), PatternKind::ALL.len());
        assert_eq!(
            serde_json::to_value(PatternKind::CashGeneration).unwrap(),
            serde_json::json!("cash_generation")
        );
    }

    #[test]
    fn test_direct_buy_respects_cash() {
        let actions = PatternKind::DirectBuy.build(&ranked(), &cash(700.0), 5).unwrap();
        // DIP 300, UNDER 600 does not fit, GAP 200, NEW 250 does not fit
        assert_eq!(isins(&actions), vec!["DIP", "GAP"]);
        assert!(PatternKind::DirectBuy.build(&ranked(), &cash(0.0), 5).is_none());
    }

    #[test]
    fn test_profit_taking_reinvests_proceeds() {
        let actions = PatternKind::ProfitTaking.build(&ranked(), &cash(0.0), 5).unwrap();
        // WIN sold for 400 funds DIP 300
        assert_eq!(isins(&actions), vec!["WIN", "DIP"]);
    }

    #[test]
    fn test_rebalance_requires_sells() {
        let mut r = ranked();
        r.rebalance_sells.clear();
        assert!(PatternKind::Rebalance.build(&r, &cash(1000.0), 5).is_none());
        assert!(PatternKind::DeepRebalance.build(&r, &cash(1000.0), 5).is_none());
    }

    #[test]
    fn test_averaging_down_funds_with_profit_taking() {
        let actions = PatternKind::AveragingDown.build(&ranked(), &cash(100.0), 5).unwrap();
        assert_eq!(isins(&actions), vec!["WIN", "DIP"]);

        let actions = PatternKind::AveragingDown.build(&ranked(), &cash(1000.0), 5).unwrap();
        assert_eq!(isins(&actions), vec!["DIP"]);
    }

    #[test]
    fn test_single_best() {
        let actions = PatternKind::SingleBest.build(&ranked(), &cash(1000.0), 3).unwrap();
        assert_eq!(isins(&actions), vec!["NEW"]);
        // Best is a BUY that does not fit
        assert!(PatternKind::SingleBest.build(&ranked(), &cash(100.0), 3).is_none());
    }

    #[test]
    fn test_depth_caps_steps() {
        for kind in PatternKind::ALL {
            for depth in 1..=5 {
                if let Some(actions) = kind.build(&ranked(), &cash(1000.0), depth) {
                    assert!(actions.len() <= depth, "{} at depth {depth}", kind.name());
                }
            }
            assert!(kind.build(&ranked(), &cash(1000.0), 0).is_none());
        }
    }

    #[test]
    fn test_mixed_strategy_without_sells() {
        let r = RankedOpportunities {
            opportunity_buys: vec![candidate(TradeSide::Buy, "NEW", 100.0, 0.9)],
            ..Default::default()
        };
        let actions = PatternKind::MixedStrategy.build(&r, &cash(500.0), 4).unwrap();
        assert_eq!(isins(&actions), vec!["NEW"]);
        assert!(PatternKind::MultiSell.build(&r, &cash(500.0), 4).is_none());
    }

    #[test]
    fn test_mixed_strategy_limits_sells_to_half() {
        let actions = PatternKind::MixedStrategy.build(&ranked(), &cash(0.0), 2).unwrap();
        assert_eq!(actions.iter().filter(|a| a.side.is_sell()).count(), 1);
    }

    #[test]
    fn test_cost_optimized_orders_buys_by_priority() {
        let actions = PatternKind::CostOptimized.build(&ranked(), &cash(0.0), 4).unwrap();
        // Sells WIN and OVER free 900; NEW (0.9) and UNDER (0.65) use 850 of it
        assert_eq!(isins(&actions), vec!["WIN", "OVER", "NEW", "UNDER"]);
    }

    fn allocation_portfolio() -> PortfolioContext {
        let mut portfolio = crate::domain::fixtures::context(&[("HELD", 1000.0)]);
        for (isin, country) in [
            ("HELD", "Germany"),
            ("GAP", "Germany"),
            ("UNDER", "United States"),
            ("NEW", "Japan"),
        ] {
            portfolio.security_countries.insert(isin.into(), country.into());
        }
        for (country, group) in [("Germany", "EUROPE"), ("United States", "US"), ("Japan", "ASIA")] {
            portfolio.country_to_group.insert(country.into(), group.into());
        }
        portfolio.country_weights =
            BTreeMap::from([("EUROPE".into(), 0.4), ("US".into(), 0.4), ("ASIA".into(), 0.2)]);
        portfolio
    }

    #[test]
    fn test_adaptive_buys_into_largest_gap() {
        let portfolio = allocation_portfolio();
        let ctx = GenerationContext::new(1000.0, &portfolio);
        let actions = PatternKind::Adaptive.build(&ranked(), &ctx, 5).unwrap();
        // US short by 0.4, ASIA by 0.2, EUROPE over target
        assert_eq!(isins(&actions), vec!["UNDER", "NEW"]);

        let ctx = GenerationContext::new(700.0, &portfolio);
        let actions = PatternKind::Adaptive.build(&ranked(), &ctx, 5).unwrap();
        assert_eq!(isins(&actions), vec!["UNDER"]);

        assert!(PatternKind::Adaptive.build(&ranked(), &cash(1000.0), 5).is_none());
    }

    #[test]
    fn test_adaptive_industry_gaps() {
        let mut portfolio = crate::domain::fixtures::context(&[("HELD", 1000.0)]);
        portfolio.security_industries.insert("HELD".into(), "Software".into());
        portfolio.security_industries.insert("GAP".into(), "Banks".into());
        portfolio.industry_weights = BTreeMap::from([("Software".into(), 0.5), ("Banks".into(), 0.5)]);

        let ctx = GenerationContext::new(1000.0, &portfolio);
        let actions = PatternKind::Adaptive.build(&ranked(), &ctx, 5).unwrap();
        assert_eq!(isins(&actions), vec!["GAP"]);
    }

    #[test]
    fn test_adaptive_needs_targets_and_holdings() {
        let mut portfolio = allocation_portfolio();
        portfolio.country_weights.clear();
        let ctx = GenerationContext::new(1000.0, &portfolio);
        assert!(PatternKind::Adaptive.build(&ranked(), &ctx, 5).is_none());

        let mut empty = allocation_portfolio();
        empty.positions.clear();
        empty.recompute_total();
        let ctx = GenerationContext::new(1000.0, &empty);
        assert!(PatternKind::Adaptive.build(&ranked(), &ctx, 5).is_none());
    }

    #[test]
    fn test_market_regime_follows_score() {
        let mut portfolio = crate::domain::fixtures::context(&[("HELD", 1000.0)]);

        portfolio.market_regime_score = -0.5;
        let ctx = GenerationContext::new(0.0, &portfolio);
        let actions = PatternKind::MarketRegime.build(&ranked(), &ctx, 5).unwrap();
        // Sells capped at half the steps, proceeds into averaging down only
        assert_eq!(isins(&actions), vec!["WIN", "OVER", "DIP"]);

        portfolio.market_regime_score = 0.5;
        let ctx = GenerationContext::new(0.0, &portfolio);
        let actions = PatternKind::MarketRegime.build(&ranked(), &ctx, 5).unwrap();
        assert_eq!(isins(&actions), vec!["WIN", "NEW"]);

        portfolio.market_regime_score = 0.0;
        let ctx = GenerationContext::new(0.0, &portfolio);
        let actions = PatternKind::MarketRegime.build(&ranked(), &ctx, 5).unwrap();
        assert_eq!(isins(&actions), vec!["OVER", "GAP", "NEW"]);

        assert!(PatternKind::MarketRegime.build(&ranked(), &cash(1000.0), 5).is_none());
    }

    #[test]
    fn test_bear_market_raises_cash_without_buys() {
        let r = RankedOpportunities {
            profit_taking: vec![candidate(TradeSide::Sell, "WIN", 400.0, 0.8)],
            opportunity_buys: vec![candidate(TradeSide::Buy, "NEW", 100.0, 0.9)],
            ..Default::default()
        };
        let mut portfolio = crate::domain::fixtures::context(&[("WIN", 400.0)]);
        portfolio.market_regime_score = -1.0;
        let ctx = GenerationContext::new(1000.0, &portfolio);
        let actions = PatternKind::MarketRegime.build(&r, &ctx, 3).unwrap();
        assert_eq!(isins(&actions), vec!["WIN"]);
    }
}

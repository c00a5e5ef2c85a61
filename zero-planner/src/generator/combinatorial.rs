//! Level-by-level enumeration of candidate combinations.
//!
//! Candidates are ordered sells first, then buys, each by priority. Level
//! `k` holds index-increasing combinations of size `k`, so every emitted
//! sequence lists its sells before its buys. Only prefixes that pass the
//! fee-free cash check are extended.

use std::collections::BTreeMap;

use super::{by_priority, GeneratorConfig, OpportunitiesByCategory, SequenceSink};
use crate::domain::{ActionCandidate, ActionSequence, TradeSide};

pub const PATTERN_NAME: &str = "combinatorial";

/// Candidates eligible for the search, sells first.
///
/// Duplicates by (ISIN, side) keep the highest priority.
pub(crate) fn search_candidates(
    opportunities: &OpportunitiesByCategory,
    config: &GeneratorConfig,
) -> Vec<ActionCandidate> {
    let mut unique: BTreeMap<(String, TradeSide), &ActionCandidate> = BTreeMap::new();
    for candidate in opportunities.all() {
        if candidate.priority < config.priority_threshold {
            continue;
        }
        if candidate.side.is_buy() && candidate.value() < config.min_trade_value {
            continue;
        }
        unique
            .entry(candidate.key())
            .and_modify(|kept| {
                if candidate.priority > kept.priority {
                    *kept = candidate;
                }
            })
            .or_insert(candidate);
    }

    let mut ranked: Vec<ActionCandidate> = unique.into_values().cloned().collect();
    ranked.sort_by(by_priority);
    ranked.truncate(config.max_candidates);
    ranked.sort_by(|a, b| {
        b.side
            .is_sell()
            .cmp(&a.side.is_sell())
            .then_with(|| by_priority(a, b))
    });
    ranked
}

/// Emit combinations into `sink` until the depth or sequence limit is hit.
pub(super) fn enumerate(
    opportunities: &OpportunitiesByCategory,
    config: &GeneratorConfig,
    sink: &mut SequenceSink,
) {
    let candidates = search_candidates(opportunities, config);
    let mut frontier: Vec<Vec<usize>> = vec![Vec::new()];

    for depth in 1..=config.max_depth {
        let mut next = Vec::new();
        for prefix in &frontier {
            let start = prefix.last().map_or(0, |last| last + 1);
            for idx in start..candidates.len() {
                if sink.is_full() {
                    return;
                }
                let mut indices = prefix.clone();
                indices.push(idx);

                let actions = indices.iter().map(|&i| candidates[i].clone()).collect();
                let sequence = ActionSequence::new(PATTERN_NAME, actions)
                    .with_metadata("depth", serde_json::json!(depth));
                if !sink.admissible(&sequence) {
                    continue;
                }
                sink.offer(sequence);
                next.push(indices);
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::candidate;
    use crate::generator::tests::opportunities;
    use crate::generator::GenerationContext;

    #[test]
    fn test_candidates_sells_first_and_thresholded() {
        let candidates = search_candidates(&opportunities(), &GeneratorConfig::default());
        let isins: Vec<_> = candidates.iter().map(|c| c.isin.as_str()).collect();
        assert_eq!(isins, vec!["WIN", "OVER", "NEW", "UNDER", "DIP", "GAP"]);

        let config = GeneratorConfig {
            priority_threshold: 0.65,
            ..Default::default()
        };
        let candidates = search_candidates(&opportunities(), &config);
        assert!(candidates.iter().all(|c| c.priority >= 0.65));
        assert_eq!(candidates.len(), 4);
    }

    #[test]
    fn test_max_candidates_keeps_highest_priority() {
        let config = GeneratorConfig {
            max_candidates: 2,
            ..Default::default()
        };
        let candidates = search_candidates(&opportunities(), &config);
        let isins: Vec<_> = candidates.iter().map(|c| c.isin.as_str()).collect();
        assert_eq!(isins, vec!["WIN", "NEW"]);
    }

    #[test]
    fn test_duplicate_candidates_keep_highest_priority() {
        let opportunities = OpportunitiesByCategory {
            averaging_down: vec![candidate(TradeSide::Buy, "X", 100.0, 0.5)],
            opportunity_buys: vec![candidate(TradeSide::Buy, "X", 100.0, 0.8)],
            ..Default::default()
        };
        let candidates = search_candidates(&opportunities, &GeneratorConfig::default());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].priority, 0.8);
    }

    #[test]
    fn test_only_feasible_prefixes_are_extended() {
        let opportunities = OpportunitiesByCategory {
            opportunity_buys: vec![
                candidate(TradeSide::Buy, "A", 600.0, 0.9),
                candidate(TradeSide::Buy, "B", 600.0, 0.8),
                candidate(TradeSide::Buy, "C", 300.0, 0.7),
            ],
            ..Default::default()
        };
        let config = GeneratorConfig::default();
        let mut sink = SequenceSink::new(&config, &GenerationContext::cash_only(1000.0));
        enumerate(&opportunities, &config, &mut sink);

        let signatures: Vec<Vec<&str>> = sink
            .sequences
            .iter()
            .map(|s| s.actions.iter().map(|a| a.isin.as_str()).collect())
            .collect();
        assert_eq!(
            signatures,
            vec![vec!["A"], vec!["B"], vec!["C"], vec!["A", "C"], vec!["B", "C"]]
        );
        assert_eq!(sink.sequences[3].metadata["depth"], serde_json::json!(2));
    }

    #[test]
    fn test_sell_funds_later_buy() {
        let opportunities = OpportunitiesByCategory {
            rebalance_sells: vec![candidate(TradeSide::Sell, "S", 800.0, 0.5)],
            rebalance_buys: vec![candidate(TradeSide::Buy, "B", 900.0, 0.9)],
            ..Default::default()
        };
        let config = GeneratorConfig::default();
        let mut sink = SequenceSink::new(&config, &GenerationContext::cash_only(200.0));
        enumerate(&opportunities, &config, &mut sink);

        let patterns: Vec<Vec<&str>> = sink
            .sequences
            .iter()
            .map(|s| s.actions.iter().map(|a| a.isin.as_str()).collect())
            .collect();
        assert_eq!(patterns, vec![vec!["S"], vec!["S", "B"]]);
    }

    #[test]
    fn test_same_isin_both_sides_is_never_combined() {
        let opportunities = OpportunitiesByCategory {
            profit_taking: vec![candidate(TradeSide::Sell, "X", 100.0, 0.9)],
            averaging_down: vec![candidate(TradeSide::Buy, "X", 50.0, 0.9)],
            ..Default::default()
        };
        let config = GeneratorConfig::default();
        let mut sink = SequenceSink::new(&config, &GenerationContext::cash_only(100.0));
        enumerate(&opportunities, &config, &mut sink);
        assert_eq!(sink.sequences.len(), 2);
        assert!(sink.sequences.iter().all(|s| s.len() == 1));
    }
}

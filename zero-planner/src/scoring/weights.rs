//! Regime-adaptive component weights.
//!
//! ```text
//!   regime:  -1 ─────── -0.3 ────────── +0.3 ─────── +1
//!            │  bear ramp  │     base      │ bull ramp │
//!   risk     0.33 ◄──────  0.25  ────────  0.25 ──────► 0.22
//!   quality  0.30 ◄──────  0.35  ────────  0.35 ──────► 0.38
//! ```
//!
//! Bull ramp: quality +0.03·f, risk -0.03·f.
//! Bear ramp: risk +0.08·f, diversification +0.02·f, quality -0.05·f,
//! improvement -0.05·f. `f` runs from 0 at the threshold to 1 at the extreme.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Regime above which the bull ramp starts.
pub const BULL_THRESHOLD: f64 = 0.3;
/// Regime below which the bear ramp starts.
pub const BEAR_THRESHOLD: f64 = -0.3;

/// Blend weights of the four score components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub quality: f64,
    pub diversification: f64,
    pub risk: f64,
    pub improvement: f64,
}

impl ScoringWeights {
    /// Weights used in a neutral regime.
    pub const BASE: ScoringWeights = ScoringWeights {
        quality: 0.35,
        diversification: 0.30,
        risk: 0.25,
        improvement: 0.10,
    };

    pub fn sum(&self) -> f64 {
        self.quality + self.diversification + self.risk + self.improvement
    }

    /// Scale so the weights sum to one.
    pub fn normalized(self) -> Self {
        let total = self.sum();
        if total <= 0.0 || !total.is_finite() {
            return Self::BASE;
        }
        // Already normalized up to rounding; keep the exact values.
        if (total - 1.0).abs() <= 4.0 * f64::EPSILON {
            return self;
        }
        Self {
            quality: self.quality / total,
            diversification: self.diversification / total,
            risk: self.risk / total,
            improvement: self.improvement / total,
        }
    }

    /// Component name -> weight.
    pub fn as_map(&self) -> BTreeMap<&'static str, f64> {
        BTreeMap::from([
            ("quality", self.quality),
            ("diversification", self.diversification),
            ("risk", self.risk),
            ("improvement", self.improvement),
        ])
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self::BASE
    }
}

/// Component weights for a market regime score.
///
/// The regime is clamped to [-1, 1]; a NaN regime is treated as neutral.
pub fn regime_adaptive_weights(regime_score: f64) -> ScoringWeights {
    let score = if regime_score.is_nan() {
        0.0
    } else {
        regime_score.clamp(-1.0, 1.0)
    };
    let base = ScoringWeights::BASE;
    let mut weights = base;

    if score > BULL_THRESHOLD {
        let factor = (score - BULL_THRESHOLD) / (1.0 - BULL_THRESHOLD);
        weights.quality = base.quality + 0.03 * factor;
        weights.risk = base.risk - 0.03 * factor;
    } else if score < BEAR_THRESHOLD {
        let factor = (BEAR_THRESHOLD - score) / (BEAR_THRESHOLD + 1.0);
        weights.risk = base.risk + 0.08 * factor;
        weights.diversification = base.diversification + 0.02 * factor;
        weights.quality = base.quality - 0.05 * factor;
        weights.improvement = base.improvement - 0.05 * factor;
    }

    weights.normalized()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn test_neutral_regime_uses_base() {
        for regime in [-0.3, -0.1, 0.0, 0.2, 0.3] {
            assert_eq!(regime_adaptive_weights(regime), ScoringWeights::BASE);
        }
    }

    #[test]
    fn test_full_bull() {
        let w = regime_adaptive_weights(1.0);
        assert_close(w.quality, 0.38);
        assert_close(w.risk, 0.22);
        assert_close(w.diversification, 0.30);
        assert_close(w.improvement, 0.10);
    }

    #[test]
    fn test_full_bear() {
        let w = regime_adaptive_weights(-1.0);
        assert_close(w.risk, 0.33);
        assert_close(w.diversification, 0.32);
        assert_close(w.quality, 0.30);
        assert_close(w.improvement, 0.05);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        assert_eq!(regime_adaptive_weights(5.0), regime_adaptive_weights(1.0));
        assert_eq!(regime_adaptive_weights(-7.0), regime_adaptive_weights(-1.0));
        assert_eq!(regime_adaptive_weights(f64::NAN), ScoringWeights::BASE);
    }

    #[test]
    fn test_normalized_rescales() {
        let w = ScoringWeights {
            quality: 2.0,
            diversification: 1.0,
            risk: 1.0,
            improvement: 0.0,
        }
        .normalized();
        assert_close(w.quality, 0.5);
        assert_close(w.sum(), 1.0);
    }

    #[test]
    fn test_as_map_keys() {
        let map = regime_adaptive_weights(0.5).as_map();
        let keys: Vec<_> = map.keys().copied().collect();
        assert_eq!(keys, vec!["diversification", "improvement", "quality", "risk"]);
    }

    proptest! {
        #[test]
        fn prop_weights_sum_to_one(regime in -1.0f64..=1.0) {
            let w = regime_adaptive_weights(regime);
            prop_assert!((w.as_map().values().sum::<f64>() - 1.0).abs() < 1e-6);
            prop_assert!(w.as_map().values().all(|v| *v > 0.0));
        }

        #[test]
        fn prop_risk_weight_falls_as_regime_rises(a in -1.0f64..=1.0, b in -1.0f64..=1.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(regime_adaptive_weights(hi).risk <= regime_adaptive_weights(lo).risk + 1e-12);
        }
    }
}

//! Trade candidates and ordered action sequences.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn is_buy(self) -> bool {
        matches!(self, Self::Buy)
    }

    pub fn is_sell(self) -> bool {
        matches!(self, Self::Sell)
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// A single scored trade produced by opportunity identification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCandidate {
    pub side: TradeSide,
    pub isin: String,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub currency: String,
    pub quantity: f64,
    pub price: f64,
    /// Trade value in the base currency
    #[serde(default, alias = "value_eur")]
    pub value_in_base_currency: f64,
    /// Upstream priority in [0, 1]
    #[serde(default)]
    pub priority: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl ActionCandidate {
    /// Base-currency value, falling back to `quantity * price` when the
    /// upstream value is missing.
    pub fn value(&self) -> f64 {
        if self.value_in_base_currency > 0.0 {
            self.value_in_base_currency
        } else {
            self.quantity * self.price
        }
    }

    /// Signed cash effect ignoring fees: SELL adds, BUY subtracts.
    pub fn cash_delta(&self) -> f64 {
        match self.side {
            TradeSide::Sell => self.value(),
            TradeSide::Buy => -self.value(),
        }
    }

    /// Dedup key of this action.
    pub fn key(&self) -> (String, TradeSide) {
        (self.isin.clone(), self.side)
    }
}

/// Order-independent identity of a sequence: its sorted (ISIN, side) multiset.
pub type SequenceSignature = Vec<(String, TradeSide)>;

/// Ordered list of actions treated as one plan.
///
/// Deserializes from either a full object or a bare array of actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SequenceRepr")]
pub struct ActionSequence {
    pub actions: Vec<ActionCandidate>,
    /// Generation pattern that produced the sequence
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn default_pattern() -> String {
    "custom".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SequenceRepr {
    Actions(Vec<ActionCandidate>),
    Full {
        actions: Vec<ActionCandidate>,
        #[serde(default = "default_pattern")]
        pattern: String,
        #[serde(default)]
        metadata: BTreeMap<String, serde_json::Value>,
    },
}

impl From<SequenceRepr> for ActionSequence {
    fn from(repr: SequenceRepr) -> Self {
        match repr {
            SequenceRepr::Actions(actions) => Self::custom(actions),
            SequenceRepr::Full {
                actions,
                pattern,
                metadata,
            } => Self {
                actions,
                pattern,
                metadata,
            },
        }
    }
}

impl ActionSequence {
    pub fn new(pattern: impl Into<String>, actions: Vec<ActionCandidate>) -> Self {
        Self {
            actions,
            pattern: pattern.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Unlabelled sequence, as submitted by API callers.
    pub fn custom(actions: Vec<ActionCandidate>) -> Self {
        Self::new(default_pattern(), actions)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn signature(&self) -> SequenceSignature {
        let mut signature: SequenceSignature =
            self.actions.iter().map(ActionCandidate::key).collect();
        signature.sort();
        signature
    }

    /// Whether an ISIN appears in more than one action.
    pub fn repeats_isin(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.actions.len());
        !self.actions.iter().all(|a| seen.insert(a.isin.as_str()))
    }

    /// Distinct ISINs in first-appearance order.
    pub fn isins(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.actions
            .iter()
            .map(|a| a.isin.as_str())
            .filter(|isin| seen.insert(*isin))
            .collect()
    }

    /// Fee-free cash check: cumulative cash never drops below zero.
    pub fn fits_cash(&self, available_cash: f64) -> bool {
        let mut cash = available_cash;
        for action in &self.actions {
            cash += action.cash_delta();
            if cash < -CASH_TOLERANCE {
                return false;
            }
        }
        true
    }
}

/// Tolerance for cash comparisons against zero.
pub const CASH_TOLERANCE: f64 = 1e-9;

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn candidate(side: TradeSide, isin: &str, value: f64, priority: f64) -> ActionCandidate {
        ActionCandidate {
            side,
            isin: isin.to_string(),
            symbol: isin.to_string(),
            name: format!("{isin} Corp"),
            currency: "EUR".to_string(),
            quantity: value / 10.0,
            price: 10.0,
            value_in_base_currency: value,
            priority,
            reason: String::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn buy(isin: &str, value: f64) -> ActionCandidate {
        candidate(TradeSide::Buy, isin, value, 0.5)
    }

    pub fn sell(isin: &str, value: f64) -> ActionCandidate {
        candidate(TradeSide::Sell, isin, value, 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_side_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&TradeSide::Buy).unwrap(), "\"BUY\"");
        let side: TradeSide = serde_json::from_str("\"SELL\"").unwrap();
        assert_eq!(side, TradeSide::Sell);
    }

    #[test]
    fn test_value_eur_alias() {
        let json = r#"{
            "side": "BUY", "isin": "US0378331005", "symbol": "AAPL",
            "quantity": 2, "price": 250.0, "value_eur": 500.0
        }"#;
        let action: ActionCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(action.value(), 500.0);
        assert!(action.tags.is_empty());
    }

    #[test]
    fn test_value_falls_back_to_quantity_times_price() {
        let mut action = buy("A", 0.0);
        action.quantity = 3.0;
        action.price = 7.0;
        assert_eq!(action.value(), 21.0);
    }

    #[test]
    fn test_signature_is_order_independent() {
        let a = ActionSequence::custom(vec![sell("X", 100.0), buy("Y", 50.0)]);
        let b = ActionSequence::custom(vec![buy("Y", 50.0), sell("X", 100.0)]);
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn test_repeats_isin() {
        let seq = ActionSequence::custom(vec![sell("X", 100.0), buy("X", 50.0)]);
        assert!(seq.repeats_isin());
        let seq = ActionSequence::custom(vec![sell("X", 100.0), buy("Y", 50.0)]);
        assert!(!seq.repeats_isin());
    }

    #[test]
    fn test_fits_cash_depends_on_order() {
        let sell_first = ActionSequence::custom(vec![sell("X", 500.0), buy("Y", 800.0)]);
        let buy_first = ActionSequence::custom(vec![buy("Y", 800.0), sell("X", 500.0)]);
        assert!(sell_first.fits_cash(400.0));
        assert!(!buy_first.fits_cash(400.0));
    }

    #[test]
    fn test_metadata_round_trip_keeps_open_values() {
        let seq = ActionSequence::new("rebalance", vec![buy("A", 10.0)])
            .with_metadata("depth", serde_json::json!(1))
            .with_metadata("notes", serde_json::json!({"source": "scheduler"}));
        let json = serde_json::to_value(&seq).unwrap();
        assert_eq!(json["metadata"]["notes"]["source"], "scheduler");

        let back: ActionSequence = serde_json::from_value(json).unwrap();
        assert_eq!(back, seq);
    }

    #[test]
    fn test_bare_action_list_deserializes() {
        let json = serde_json::json!([
            {"side": "SELL", "isin": "X", "symbol": "X", "quantity": 1, "price": 10.0},
            {"side": "BUY", "isin": "Y", "symbol": "Y", "quantity": 2, "price": 5.0}
        ]);
        let seq: ActionSequence = serde_json::from_value(json).unwrap();
        assert_eq!(seq.pattern, "custom");
        assert_eq!(seq.len(), 2);
        assert!(seq.actions[0].side.is_sell());
    }
}

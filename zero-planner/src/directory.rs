//! Security directory: resolves ISINs and symbols to reference data.

use std::collections::{BTreeMap, HashMap};

use crate::domain::{ActionSequence, Security};

/// Read-only lookup of security reference data.
///
/// Implementations must be shareable across evaluation workers.
pub trait SecurityDirectory: Send + Sync {
    /// Look up a security by ISIN.
    fn by_isin(&self, isin: &str) -> Option<&Security>;

    /// Look up a security by ticker symbol.
    fn by_symbol(&self, symbol: &str) -> Option<&Security>;

    /// Resolve an action's security, preferring the ISIN.
    fn resolve(&self, isin: &str, symbol: &str) -> Option<&Security> {
        self.by_isin(isin).or_else(|| self.by_symbol(symbol))
    }

    /// Bulk resolution for every ISIN a set of sequences touches.
    ///
    /// Returns the resolved securities keyed by ISIN and the keys that could
    /// not be resolved.
    fn resolve_sequences<'a>(
        &'a self,
        sequences: &[ActionSequence],
    ) -> (BTreeMap<String, &'a Security>, Vec<String>) {
        let mut found = BTreeMap::new();
        let mut missing = Vec::new();
        for action in sequences.iter().flat_map(|s| &s.actions) {
            if found.contains_key(&action.isin) || missing.contains(&action.isin) {
                continue;
            }
            match self.resolve(&action.isin, &action.symbol) {
                Some(security) => {
                    found.insert(action.isin.clone(), security);
                }
                None => missing.push(action.isin.clone()),
            }
        }
        (found, missing)
    }
}

/// In-memory directory built from the slice supplied with a request.
#[derive(Debug, Clone, Default)]
pub struct SecurityIndex {
    securities: Vec<Security>,
    by_isin: HashMap<String, usize>,
    by_symbol: HashMap<String, usize>,
}

impl SecurityIndex {
    pub fn new(securities: Vec<Security>) -> Self {
        let mut by_isin = HashMap::with_capacity(securities.len());
        let mut by_symbol = HashMap::with_capacity(securities.len());
        for (idx, security) in securities.iter().enumerate() {
            if !security.isin.is_empty() {
                by_isin.entry(security.isin.clone()).or_insert(idx);
            }
            if !security.symbol.is_empty() {
                by_symbol.entry(security.symbol.clone()).or_insert(idx);
            }
        }
        Self {
            securities,
            by_isin,
            by_symbol,
        }
    }

    pub fn len(&self) -> usize {
        self.securities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.securities.is_empty()
    }
}

impl FromIterator<Security> for SecurityIndex {
    fn from_iter<I: IntoIterator<Item = Security>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl SecurityDirectory for SecurityIndex {
    fn by_isin(&self, isin: &str) -> Option<&Security> {
        self.by_isin.get(isin).map(|idx| &self.securities[*idx])
    }

    fn by_symbol(&self, symbol: &str) -> Option<&Security> {
        self.by_symbol.get(symbol).map(|idx| &self.securities[*idx])
    }
}

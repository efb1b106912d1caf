//! Configured trading pairs, looked up by symbol.

use ahash::AHashMap;
use atx_core::types::TradingPair;

#[derive(Debug, Clone, Default)]
pub struct PairRegistry {
    pairs: AHashMap<String, TradingPair>,
}

impl PairRegistry {
    pub fn new(pairs: impl IntoIterator<Item = TradingPair>) -> Self {
        Self {
            pairs: pairs.into_iter().map(|p| (p.symbol.clone(), p)).collect(),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&TradingPair> {
        self.pairs.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

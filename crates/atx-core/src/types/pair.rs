//! Trading pair definition and quantity/tick helpers.

use serde::{Deserialize, Serialize};

/// Relative tolerance when checking that a quantity sits on the tick grid.
const TICK_TOLERANCE: f64 = 1e-9;

/// A tradable pair with its sizing rules and fee schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingPair {
    /// Pair symbol used as the asset key everywhere (e.g. `"ETHUSDC"`).
    pub symbol: String,
    pub base: String,
    pub quote: String,
    /// Quantity increment. Every order quantity must be a multiple of it.
    pub tick_size: f64,
    pub min_order_size: f64,
    pub max_order_size: f64,
    /// Fee rate charged on resting (limit-style) fills, e.g. `0.001` = 0.1%.
    #[serde(default)]
    pub maker_fee: f64,
    /// Fee rate charged on aggressive (market-style) fills.
    #[serde(default)]
    pub taker_fee: f64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl TradingPair {
    /// Inactive placeholder for a symbol that is not configured. Only ever
    /// attached to rejected order records.
    pub fn unlisted(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            base: String::new(),
            quote: String::new(),
            tick_size: 0.0,
            min_order_size: 0.0,
            max_order_size: 0.0,
            maker_fee: 0.0,
            taker_fee: 0.0,
            active: false,
        }
    }

    /// Whether `quantity` is an integer multiple of the tick size.
    pub fn is_aligned(&self, quantity: f64) -> bool {
        let ratio = quantity / self.tick_size;
        (ratio - ratio.round()).abs() <= TICK_TOLERANCE * ratio.abs().max(1.0)
    }

    /// Number of whole ticks in `quantity` (rounded to the nearest tick).
    pub fn to_ticks(&self, quantity: f64) -> u64 {
        (quantity / self.tick_size).round().max(0.0) as u64
    }

    /// Quantity corresponding to `ticks` whole ticks.
    pub fn from_ticks(&self, ticks: u64) -> f64 {
        ticks as f64 * self.tick_size
    }

    /// Whether `quantity` lies within `[min_order_size, max_order_size]`.
    pub fn in_bounds(&self, quantity: f64) -> bool {
        quantity >= self.min_order_size && quantity <= self.max_order_size
    }
}

#[cfg(test)]
pub(crate) fn test_pair() -> TradingPair {
    TradingPair {
        symbol: "ETHUSDC".into(),
        base: "ETH".into(),
        quote: "USDC".into(),
        tick_size: 0.1,
        min_order_size: 0.1,
        max_order_size: 1000.0,
        maker_fee: 0.001,
        taker_fee: 0.002,
        active: true,
    }
}

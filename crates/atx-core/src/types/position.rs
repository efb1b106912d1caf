//! Aggregated exposure per user and asset.

use serde::{Deserialize, Serialize};

/// Net filled exposure of one user in one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub user_id: String,
    pub asset: String,
    /// Positive = long, negative = short.
    pub net_quantity: f64,
    /// Average entry price of the open quantity (0 when flat).
    pub average_entry_price: f64,
    /// Realized profit and loss, fees included.
    pub realized_pnl: f64,
    /// Mark-to-market P&L of the open quantity; 0 when no mark was supplied.
    pub unrealized_pnl: f64,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.net_quantity == 0.0
    }
}

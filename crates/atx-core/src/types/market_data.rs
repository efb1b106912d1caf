//! Market data snapshots as served by the market data gateway.
//!
//! A snapshot carries the spot price, a bounded window of recent prices and a
//! map of derived indicator values. Indicators scoped to a timeframe are keyed
//! as `"<name>@<timeframe>"` (e.g. `"rsi@1h"`); unscoped ones use the bare
//! name and are computed over the raw price history.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One observed price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Observation time (ms since epoch).
    pub ts: u64,
    pub price: f64,
}

/// Indicators the gateway may derive for a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IndicatorKind {
    Sma,
    Ema,
    Rsi,
    BollingerUpper,
    BollingerMiddle,
    BollingerLower,
    /// Trailing return in percent over the configured lookback.
    Momentum,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 7] = [
        Self::Sma,
        Self::Ema,
        Self::Rsi,
        Self::BollingerUpper,
        Self::BollingerMiddle,
        Self::BollingerLower,
        Self::Momentum,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Sma => "sma",
            Self::Ema => "ema",
            Self::Rsi => "rsi",
            Self::BollingerUpper => "bb_upper",
            Self::BollingerMiddle => "bb_middle",
            Self::BollingerLower => "bb_lower",
            Self::Momentum => "momentum",
        }
    }

    /// Map key for this indicator, optionally scoped to a timeframe.
    pub fn key(self, timeframe: Option<&str>) -> String {
        match timeframe {
            Some(tf) => format!("{}@{tf}", self.name()),
            None => self.name().to_string(),
        }
    }
}

/// Parse a timeframe label (`"30s"`, `"5m"`, `"1h"`, `"1d"`) into milliseconds.
///
/// Returns `None` for malformed labels or a zero length.
pub fn parse_timeframe(label: &str) -> Option<u64> {
    let label = label.trim();
    let split = label.find(|c: char| !c.is_ascii_digit())?;
    let (num, unit) = label.split_at(split);
    let n: u64 = num.parse().ok()?;
    let unit_ms = match unit {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 604_800_000,
        _ => return None,
    };
    if n == 0 { None } else { n.checked_mul(unit_ms) }
}

/// Point-in-time view of one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub asset: String,
    /// Latest price.
    pub price: f64,
    /// Recent prices, oldest first.
    pub history: Vec<PricePoint>,
    /// Derived indicator values keyed by [`IndicatorKind::key`].
    #[serde(default)]
    pub indicators: HashMap<String, f64>,
    /// When the snapshot was produced (ms since epoch).
    pub taken_at: u64,
}

impl MarketSnapshot {
    /// Snapshot with a price and no history or indicators.
    pub fn spot(asset: impl Into<String>, price: f64, taken_at: u64) -> Self {
        Self {
            asset: asset.into(),
            price,
            history: vec![PricePoint { ts: taken_at, price }],
            indicators: HashMap::new(),
            taken_at,
        }
    }

    /// History prices, oldest first.
    pub fn closes(&self) -> Vec<f64> {
        self.history.iter().map(|p| p.price).collect()
    }

    pub fn indicator(&self, kind: IndicatorKind, timeframe: Option<&str>) -> Option<f64> {
        self.indicators.get(&kind.key(timeframe)).copied()
    }
}

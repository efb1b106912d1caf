//! Trading algorithm requests, parameters and running state.
//!
//! [`AlgorithmParams`] is what a user submits. Once validated it becomes a
//! [`StrategyState`]: the same parameters plus the strategy's running values
//! (reference price, grid levels, slices left, ...). Only the scheduler and
//! the matching strategy executor ever replace a `StrategyState` or a
//! [`ScheduleState`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{AlgorithmStatus, AlgorithmType, Side};
use super::order::{OrderId, RiskParameters};
use super::pair::TradingPair;

pub type AlgorithmId = Uuid;

// ---------------------------------------------------------------------------
// Parameters (as submitted)
// ---------------------------------------------------------------------------

/// Dollar-cost averaging: fixed-size market orders at a fixed interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DcaParams {
    pub side: Side,
    pub interval_ms: u64,
    /// Quantity of every child order.
    pub amount: f64,
    pub max_orders: u32,
    /// Safety stop: complete without emitting once price moves more than this
    /// many percent away from the reference price.
    #[serde(default)]
    pub price_deviation: Option<f64>,
    /// Reference for `price_deviation`; defaults to the first observed price.
    #[serde(default)]
    pub reference_price: Option<f64>,
}

/// Grid: limit orders at evenly spaced levels around a base price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridParams {
    /// Total number of levels, split evenly below and above `base_price`.
    pub grid_levels: u32,
    /// Distance between adjacent levels in percent of `base_price`.
    pub grid_spacing: f64,
    pub base_price: f64,
    /// Quantity of every level order.
    pub quantity: f64,
}

/// Time-weighted slicing of a fixed total quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwapParams {
    pub side: Side,
    pub duration_ms: u64,
    pub slices: u32,
    pub total_quantity: f64,
}

/// Trend following on the trailing return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomentumParams {
    /// Number of history samples the return is measured over.
    pub lookback_period: usize,
    /// Minimum absolute return, in percent, that triggers an order.
    pub momentum_threshold: f64,
    pub quantity: f64,
    /// Minimum time between evaluations; `0` evaluates on every scheduler tick.
    #[serde(default)]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BollingerParams {
    pub period: usize,
    pub std_dev: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RsiParams {
    pub period: usize,
    pub oversold: f64,
    pub overbought: f64,
}

/// Mean reversion on Bollinger band touches confirmed by RSI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeanReversionParams {
    pub bollinger: BollingerParams,
    pub rsi: RsiParams,
    pub quantity: f64,
    #[serde(default)]
    pub interval_ms: u64,
}

/// Type-specific parameter bag, tagged by algorithm type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AlgorithmParams {
    Dca(DcaParams),
    Grid(GridParams),
    Twap(TwapParams),
    Momentum(MomentumParams),
    MeanReversion(MeanReversionParams),
}

impl AlgorithmParams {
    pub fn algorithm_type(&self) -> AlgorithmType {
        match self {
            Self::Dca(_) => AlgorithmType::Dca,
            Self::Grid(_) => AlgorithmType::Grid,
            Self::Twap(_) => AlgorithmType::Twap,
            Self::Momentum(_) => AlgorithmType::Momentum,
            Self::MeanReversion(_) => AlgorithmType::MeanReversion,
        }
    }
}

/// A request to start a trading algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmRequest {
    pub user_id: String,
    pub wallet_address: String,
    pub pair: String,
    pub params: AlgorithmParams,
    /// Copied into every child order's metadata.
    #[serde(default)]
    pub risk_parameters: Option<RiskParameters>,
}

// ---------------------------------------------------------------------------
// Running state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DcaState {
    pub params: DcaParams,
    pub reference_price: Option<f64>,
}

/// One precomputed grid level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridLevel {
    pub price: f64,
    /// Buy for levels below the base price, sell above.
    pub side: Side,
    /// Set once the grid has emitted this level's order.
    pub filled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridState {
    pub params: GridParams,
    /// Levels sorted by price, ascending.
    pub levels: Vec<GridLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwapState {
    pub params: TwapParams,
    /// Whole ticks per regular slice.
    pub slice_ticks: u64,
    /// Whole ticks still to emit across the remaining slices.
    pub remaining_ticks: u64,
    pub slices_remaining: u32,
}

impl TwapState {
    /// Milliseconds between slices.
    pub fn slice_interval_ms(&self) -> u64 {
        (self.params.duration_ms / u64::from(self.params.slices.max(1))).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomentumState {
    pub params: MomentumParams,
    /// Trailing return (percent) seen on the last evaluation.
    pub last_return: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeanReversionState {
    pub params: MeanReversionParams,
    pub last_rsi: Option<f64>,
}

/// Parameters plus running values for one algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StrategyState {
    Dca(DcaState),
    Grid(GridState),
    Twap(TwapState),
    Momentum(MomentumState),
    MeanReversion(MeanReversionState),
}

impl StrategyState {
    pub fn algorithm_type(&self) -> AlgorithmType {
        match self {
            Self::Dca(_) => AlgorithmType::Dca,
            Self::Grid(_) => AlgorithmType::Grid,
            Self::Twap(_) => AlgorithmType::Twap,
            Self::Momentum(_) => AlgorithmType::Momentum,
            Self::MeanReversion(_) => AlgorithmType::MeanReversion,
        }
    }
}

/// Scheduling bookkeeping for one algorithm.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleState {
    /// Earliest time the next tick may act (ms since epoch).
    pub next_tick_at: u64,
    pub emitted_count: u32,
    /// Bumped on every applied tick; a tick evaluated against an older
    /// revision is discarded.
    pub revision: u64,
    #[serde(default)]
    pub last_tick_at: Option<u64>,
    /// Last gateway or child-order failure, for observability.
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub consecutive_failures: u32,
}

/// An algorithm record owned by the algorithm store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Algorithm {
    pub id: AlgorithmId,
    pub user_id: String,
    pub wallet_address: String,
    pub pair: TradingPair,
    pub status: AlgorithmStatus,
    pub strategy: StrategyState,
    pub schedule: ScheduleState,
    /// Child orders emitted so far, in emission order.
    #[serde(default)]
    pub child_order_ids: Vec<OrderId>,
    #[serde(default)]
    pub risk_parameters: Option<RiskParameters>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Algorithm {
    pub fn algorithm_type(&self) -> AlgorithmType {
        self.strategy.algorithm_type()
    }

    pub fn asset(&self) -> &str {
        &self.pair.symbol
    }

    /// Whether the scheduler should tick this algorithm at `now`.
    pub fn is_due(&self, now: u64) -> bool {
        self.status == AlgorithmStatus::Active && now >= self.schedule.next_tick_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_are_tagged_by_type() {
        let params: AlgorithmParams = serde_json::from_str(
            r#"{"type":"dca","side":"buy","intervalMs":3600000,"amount":100,"maxOrders":5}"#,
        )
        .unwrap();
        assert_eq!(params.algorithm_type(), AlgorithmType::Dca);

        let params: AlgorithmParams = serde_json::from_str(
            r#"{"type":"meanReversion",
                "bollinger":{"period":20,"stdDev":2.0},
                "rsi":{"period":14,"oversold":30,"overbought":70},
                "quantity":1}"#,
        )
        .unwrap();
        match params {
            AlgorithmParams::MeanReversion(p) => {
                assert_eq!(p.bollinger.period, 20);
                assert_eq!(p.interval_ms, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn twap_slice_interval() {
        let mut state = TwapState {
            params: TwapParams {
                side: Side::Buy,
                duration_ms: 3_600_000,
                slices: 6,
                total_quantity: 60.0,
            },
            slice_ticks: 100,
            remaining_ticks: 600,
            slices_remaining: 6,
        };
        assert_eq!(state.slice_interval_ms(), 600_000);
        state.params.duration_ms = 5;
        state.params.slices = 10;
        assert_eq!(state.slice_interval_ms(), 1);
    }
}

//! Strategy executors.
//!
//! Each algorithm type keeps its parameters and running values in a state
//! struct (see [`atx_core::types::StrategyState`]). An executor turns the
//! current state plus one market snapshot into an [`Evaluation`]: the next
//! state, at most one child order, when to tick next, and whether the
//! algorithm is done. Evaluation is pure; the algorithm manager applies the
//! result under the algorithm's lock.

use atx_core::error::AlgorithmError;
use atx_core::types::{
    AlgorithmParams, DcaState, GridState, MarketSnapshot, MeanReversionState, MomentumState, Side,
    StrategyState, TradingPair, TwapState,
};

pub mod dca;
pub mod grid;
pub mod mean_reversion;
pub mod momentum;
pub mod twap;

/// Inputs for one tick.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    pub now: u64,
    pub snapshot: &'a MarketSnapshot,
    pub pair: &'a TradingPair,
    /// Child orders emitted before this tick.
    pub emitted_count: u32,
}

/// Child order an executor wants placed. A limit price makes it a limit
/// order; otherwise it goes out at market.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChildOrder {
    pub side: Side,
    pub quantity: f64,
    pub limit_price: Option<f64>,
}

impl ChildOrder {
    pub fn market(side: Side, quantity: f64) -> Self {
        Self {
            side,
            quantity,
            limit_price: None,
        }
    }
}

/// Result of evaluating one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation<S> {
    pub state: S,
    pub child: Option<ChildOrder>,
    pub next_tick_at: u64,
    pub completed: bool,
}

impl<S> Evaluation<S> {
    pub fn idle(state: S, next_tick_at: u64) -> Self {
        Self {
            state,
            child: None,
            next_tick_at,
            completed: false,
        }
    }

    fn map<T>(self, f: impl FnOnce(S) -> T) -> Evaluation<T> {
        Evaluation {
            state: f(self.state),
            child: self.child,
            next_tick_at: self.next_tick_at,
            completed: self.completed,
        }
    }
}

/// Behaviour shared by all algorithm types.
pub trait StrategyExecutor: Sized {
    type Params;

    /// Validate parameters against the pair and build the initial state.
    fn init(params: Self::Params, pair: &TradingPair) -> Result<Self, AlgorithmError>;

    fn evaluate(&self, ctx: &TickContext<'_>) -> Evaluation<Self>;
}

/// Validate `params` and build the initial state for its algorithm type.
pub fn initialize(params: AlgorithmParams, pair: &TradingPair) -> Result<StrategyState, AlgorithmError> {
    Ok(match params {
        AlgorithmParams::Dca(p) => StrategyState::Dca(DcaState::init(p, pair)?),
        AlgorithmParams::Grid(p) => StrategyState::Grid(GridState::init(p, pair)?),
        AlgorithmParams::Twap(p) => StrategyState::Twap(TwapState::init(p, pair)?),
        AlgorithmParams::Momentum(p) => StrategyState::Momentum(MomentumState::init(p, pair)?),
        AlgorithmParams::MeanReversion(p) => {
            StrategyState::MeanReversion(MeanReversionState::init(p, pair)?)
        }
    })
}

/// Evaluate one tick for whichever algorithm type `state` holds.
pub fn evaluate(state: &StrategyState, ctx: &TickContext<'_>) -> Evaluation<StrategyState> {
    match state {
        StrategyState::Dca(s) => s.evaluate(ctx).map(StrategyState::Dca),
        StrategyState::Grid(s) => s.evaluate(ctx).map(StrategyState::Grid),
        StrategyState::Twap(s) => s.evaluate(ctx).map(StrategyState::Twap),
        StrategyState::Momentum(s) => s.evaluate(ctx).map(StrategyState::Momentum),
        StrategyState::MeanReversion(s) => s.evaluate(ctx).map(StrategyState::MeanReversion),
    }
}

pub(crate) fn check_positive(field: &'static str, value: f64) -> Result<f64, AlgorithmError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(AlgorithmError::invalid(field, format!("must be positive, got {value}")))
    }
}

/// A per-order quantity must be a valid order size for the pair.
pub(crate) fn check_quantity(
    field: &'static str,
    quantity: f64,
    pair: &TradingPair,
) -> Result<f64, AlgorithmError> {
    check_positive(field, quantity)?;
    if !pair.in_bounds(quantity) {
        return Err(AlgorithmError::invalid(
            field,
            format!(
                "{quantity} is outside [{}, {}]",
                pair.min_order_size, pair.max_order_size
            ),
        ));
    }
    if !pair.is_aligned(quantity) {
        return Err(AlgorithmError::invalid(
            field,
            format!("{quantity} is not a multiple of tick size {}", pair.tick_size),
        ));
    }
    Ok(quantity)
}

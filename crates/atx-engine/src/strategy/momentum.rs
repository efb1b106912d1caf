//! Momentum: trade in the direction of a strong trailing move.
//!
//! Each tick compares spot with the close `lookback_period` samples back.
//! A move of at least `momentum_threshold` percent emits a market order,
//! buy on the way up and sell on the way down. Never completes on its own.

use atx_core::error::AlgorithmError;
use atx_core::indicators::trailing_return_pct;
use atx_core::types::{MomentumParams, MomentumState, Side, TradingPair};
use tracing::debug;

use super::{ChildOrder, Evaluation, StrategyExecutor, TickContext, check_positive, check_quantity};

impl StrategyExecutor for MomentumState {
    type Params = MomentumParams;

    fn init(params: MomentumParams, pair: &TradingPair) -> Result<Self, AlgorithmError> {
        if params.lookback_period == 0 {
            return Err(AlgorithmError::invalid("lookbackPeriod", "must be at least 1"));
        }
        check_positive("momentumThreshold", params.momentum_threshold)?;
        check_quantity("quantity", params.quantity, pair)?;
        Ok(Self {
            params,
            last_return: None,
        })
    }

    fn evaluate(&self, ctx: &TickContext<'_>) -> Evaluation<Self> {
        let closes = ctx.snapshot.closes();
        let ret = trailing_return_pct(&closes, ctx.snapshot.price, self.params.lookback_period);
        let next_tick_at = ctx.now + self.params.interval_ms;
        let state = Self {
            params: self.params.clone(),
            last_return: ret,
        };

        let Some(ret) = ret else {
            debug!(
                samples = closes.len(),
                lookback = self.params.lookback_period,
                "[momentum] not enough history"
            );
            return Evaluation::idle(state, next_tick_at);
        };
        if ret.abs() < self.params.momentum_threshold {
            return Evaluation::idle(state, next_tick_at);
        }

        let side = if ret > 0.0 { Side::Buy } else { Side::Sell };
        Evaluation {
            state,
            child: Some(ChildOrder::market(side, self.params.quantity)),
            next_tick_at,
            completed: false,
        }
    }
}

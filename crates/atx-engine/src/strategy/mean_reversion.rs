//! Mean reversion on Bollinger bands confirmed by RSI.
//!
//! Buys when spot is at or below the lower band and RSI is at or below
//! `oversold`; sells when spot is at or above the upper band and RSI is at
//! or above `overbought`. Never completes on its own.

use atx_core::error::AlgorithmError;
use atx_core::indicators::{bollinger, rsi};
use atx_core::types::{MeanReversionParams, MeanReversionState, Side, TradingPair};

use super::{ChildOrder, Evaluation, StrategyExecutor, TickContext, check_positive, check_quantity};

impl StrategyExecutor for MeanReversionState {
    type Params = MeanReversionParams;

    fn init(params: MeanReversionParams, pair: &TradingPair) -> Result<Self, AlgorithmError> {
        if params.bollinger.period < 2 {
            return Err(AlgorithmError::invalid("bollinger.period", "must be at least 2"));
        }
        check_positive("bollinger.stdDev", params.bollinger.std_dev)?;
        if params.rsi.period == 0 {
            return Err(AlgorithmError::invalid("rsi.period", "must be at least 1"));
        }
        let (oversold, overbought) = (params.rsi.oversold, params.rsi.overbought);
        if !(0.0..=100.0).contains(&oversold)
            || !(0.0..=100.0).contains(&overbought)
            || oversold >= overbought
        {
            return Err(AlgorithmError::invalid(
                "rsi",
                format!("need 0 ≤ oversold < overbought ≤ 100, got {oversold}/{overbought}"),
            ));
        }
        check_quantity("quantity", params.quantity, pair)?;
        Ok(Self {
            params,
            last_rsi: None,
        })
    }

    fn evaluate(&self, ctx: &TickContext<'_>) -> Evaluation<Self> {
        let p = &self.params;
        let closes = ctx.snapshot.closes();
        let price = ctx.snapshot.price;
        let bands = bollinger(&closes, p.bollinger.period, p.bollinger.std_dev);
        let strength = rsi(&closes, p.rsi.period);
        let next_tick_at = ctx.now + p.interval_ms;
        let state = Self {
            params: p.clone(),
            last_rsi: strength,
        };

        let side = match (bands, strength) {
            (Some(b), Some(r)) if price <= b.lower && r <= p.rsi.oversold => Some(Side::Buy),
            (Some(b), Some(r)) if price >= b.upper && r >= p.rsi.overbought => Some(Side::Sell),
            _ => None,
        };

        Evaluation {
            child: side.map(|side| ChildOrder::market(side, p.quantity)),
            state,
            next_tick_at,
            completed: false,
        }
    }
}

//! Time-weighted average price: `total_quantity` split into `slices` market
//! orders emitted `duration_ms / slices` apart.
//!
//! Slice sizes are counted in whole ticks of the pair so that every slice is
//! tick-aligned; the remainder of the integer division goes to the final
//! slice and the slices always add up to the total.

use atx_core::error::AlgorithmError;
use atx_core::types::{TradingPair, TwapParams, TwapState};

use super::{ChildOrder, Evaluation, StrategyExecutor, TickContext, check_quantity};

impl StrategyExecutor for TwapState {
    type Params = TwapParams;

    fn init(params: TwapParams, pair: &TradingPair) -> Result<Self, AlgorithmError> {
        if params.duration_ms == 0 {
            return Err(AlgorithmError::invalid("durationMs", "must be greater than zero"));
        }
        if params.slices == 0 {
            return Err(AlgorithmError::invalid("slices", "must be at least 1"));
        }
        let total = params.total_quantity;
        if !(total.is_finite() && total > 0.0) {
            return Err(AlgorithmError::invalid(
                "totalQuantity",
                format!("must be positive, got {total}"),
            ));
        }
        if !pair.is_aligned(total) {
            return Err(AlgorithmError::invalid(
                "totalQuantity",
                format!("{total} is not a multiple of tick size {}", pair.tick_size),
            ));
        }

        let total_ticks = pair.to_ticks(total);
        let slice_ticks = total_ticks / u64::from(params.slices);
        if slice_ticks == 0 {
            return Err(AlgorithmError::invalid(
                "slices",
                format!("{total} cannot be split into {} tick-sized slices", params.slices),
            ));
        }
        let last_ticks = total_ticks - slice_ticks * (u64::from(params.slices) - 1);
        check_quantity("totalQuantity", pair.from_ticks(slice_ticks), pair)?;
        check_quantity("totalQuantity", pair.from_ticks(last_ticks), pair)?;

        Ok(Self {
            slice_ticks,
            remaining_ticks: total_ticks,
            slices_remaining: params.slices,
            params,
        })
    }

    fn evaluate(&self, ctx: &TickContext<'_>) -> Evaluation<Self> {
        if self.slices_remaining == 0 {
            return Evaluation {
                state: self.clone(),
                child: None,
                next_tick_at: ctx.now,
                completed: true,
            };
        }

        let ticks = if self.slices_remaining == 1 {
            self.remaining_ticks
        } else {
            self.slice_ticks
        };
        let mut state = self.clone();
        state.remaining_ticks -= ticks;
        state.slices_remaining -= 1;
        let completed = state.slices_remaining == 0;

        Evaluation {
            child: Some(ChildOrder::market(self.params.side, ctx.pair.from_ticks(ticks))),
            next_tick_at: ctx.now + self.slice_interval_ms(),
            completed,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::tick;
    use crate::testutil::pair;
    use atx_core::types::Side;

    fn params(total: f64, slices: u32) -> TwapParams {
        TwapParams {
            side: Side::Sell,
            duration_ms: 3_600_000,
            slices,
            total_quantity: total,
        }
    }

    fn run(state: TwapState, pair: &TradingPair) -> (Vec<f64>, Vec<u64>) {
        let mut state = state;
        let mut quantities = Vec::new();
        let mut times = Vec::new();
        let mut now = 0;
        loop {
            let eval = tick(&state, pair, &[2000.0], now, quantities.len() as u32);
            if let Some(child) = eval.child {
                quantities.push(child.quantity);
                times.push(now);
            }
            if eval.completed {
                break;
            }
            now = eval.next_tick_at;
            state = eval.state;
        }
        (quantities, times)
    }

    #[test]
    fn six_slices_sum_to_total() {
        let pair = pair();
        let state = TwapState::init(params(60.0, 6), &pair).unwrap();
        let (quantities, times) = run(state, &pair);
        assert_eq!(quantities.len(), 6);
        assert!((quantities.iter().sum::<f64>() - 60.0).abs() < 1e-9);
        assert!(quantities.iter().all(|q| (q - 10.0).abs() < 1e-9));
        assert_eq!(times, vec![0, 600_000, 1_200_000, 1_800_000, 2_400_000, 3_000_000]);
    }

    #[test]
    fn remainder_goes_to_last_slice() {
        let mut pair = pair();
        pair.tick_size = 1.0;
        pair.min_order_size = 1.0;
        let state = TwapState::init(params(10.0, 3), &pair).unwrap();
        let (quantities, _) = run(state, &pair);
        assert_eq!(quantities, vec![3.0, 3.0, 4.0]);
        assert_eq!(quantities.iter().sum::<f64>(), 10.0);
    }

    #[test]
    fn too_many_slices_is_invalid() {
        let pair = pair();
        assert!(TwapState::init(params(0.3, 6), &pair).is_err());
        assert!(TwapState::init(params(60.0, 0), &pair).is_err());
    }
}

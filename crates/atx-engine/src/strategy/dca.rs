//! Dollar-cost averaging: a fixed-size market order every interval until
//! `max_orders` have been emitted.
//!
//! When `price_deviation` is set the reference price (given, or the first
//! price seen) acts as a safety stop: once spot has moved more than that
//! many percent away from it the algorithm completes without emitting.

use atx_core::error::AlgorithmError;
use atx_core::types::{DcaParams, DcaState, TradingPair};
use tracing::info;

use super::{ChildOrder, Evaluation, StrategyExecutor, TickContext, check_positive, check_quantity};

impl StrategyExecutor for DcaState {
    type Params = DcaParams;

    fn init(params: DcaParams, pair: &TradingPair) -> Result<Self, AlgorithmError> {
        if params.interval_ms == 0 {
            return Err(AlgorithmError::invalid("intervalMs", "must be greater than zero"));
        }
        if params.max_orders == 0 {
            return Err(AlgorithmError::invalid("maxOrders", "must be at least 1"));
        }
        check_quantity("amount", params.amount, pair)?;
        if let Some(dev) = params.price_deviation {
            check_positive("priceDeviation", dev)?;
        }
        if let Some(reference) = params.reference_price {
            check_positive("referencePrice", reference)?;
        }
        Ok(Self {
            reference_price: params.reference_price,
            params,
        })
    }

    fn evaluate(&self, ctx: &TickContext<'_>) -> Evaluation<Self> {
        let price = ctx.snapshot.price;
        let mut state = self.clone();
        let reference = *state.reference_price.get_or_insert(price);

        if ctx.emitted_count >= self.params.max_orders {
            return Evaluation {
                state,
                child: None,
                next_tick_at: ctx.now,
                completed: true,
            };
        }

        if let Some(limit) = self.params.price_deviation {
            let moved = (price - reference).abs() / reference * 100.0;
            if moved > limit {
                info!(
                    price,
                    reference,
                    moved_pct = moved,
                    "[dca] price deviation limit hit, completing"
                );
                return Evaluation {
                    state,
                    child: None,
                    next_tick_at: ctx.now,
                    completed: true,
                };
            }
        }

        Evaluation {
            state,
            child: Some(ChildOrder::market(self.params.side, self.params.amount)),
            next_tick_at: ctx.now + self.params.interval_ms,
            completed: ctx.emitted_count + 1 >= self.params.max_orders,
        }
    }
}

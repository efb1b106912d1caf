//! Grid trading.
//!
//! `grid_levels` price levels are laid out symmetrically around
//! `base_price`, `grid_spacing` percent of the base apart: with base 100,
//! spacing 5 and 4 levels the grid is {90, 95, 105, 110}. Levels below the
//! base are buy levels, levels above are sell levels. Each level fires at
//! most once, as a limit order at the level price; the algorithm completes
//! when every level has fired.

use atx_core::error::AlgorithmError;
use atx_core::types::{GridLevel, GridParams, GridState, Side, TradingPair};

use super::{ChildOrder, Evaluation, StrategyExecutor, TickContext, check_positive, check_quantity};

/// Grid levels for `params`, ascending by price.
pub fn build_levels(params: &GridParams) -> Vec<GridLevel> {
    let half = params.grid_levels / 2;
    let step = |k: u32| params.base_price * params.grid_spacing * f64::from(k) / 100.0;
    let below = (1..=half).rev().map(|k| GridLevel {
        price: params.base_price - step(k),
        side: Side::Buy,
        filled: false,
    });
    let above = (1..=half).map(|k| GridLevel {
        price: params.base_price + step(k),
        side: Side::Sell,
        filled: false,
    });
    below.chain(above).collect()
}

fn triggered(level: &GridLevel, price: f64) -> bool {
    !level.filled
        && match level.side {
            Side::Buy => price <= level.price,
            Side::Sell => price >= level.price,
        }
}

impl StrategyExecutor for GridState {
    type Params = GridParams;

    fn init(params: GridParams, pair: &TradingPair) -> Result<Self, AlgorithmError> {
        if params.grid_levels < 2 || params.grid_levels % 2 != 0 {
            return Err(AlgorithmError::invalid(
                "gridLevels",
                format!("must be an even number ≥ 2, got {}", params.grid_levels),
            ));
        }
        check_positive("gridSpacing", params.grid_spacing)?;
        check_positive("basePrice", params.base_price)?;
        check_quantity("quantity", params.quantity, pair)?;
        let lowest = f64::from(params.grid_levels / 2) * params.grid_spacing;
        if lowest >= 100.0 {
            return Err(AlgorithmError::invalid(
                "gridSpacing",
                "lowest grid level would be at or below zero",
            ));
        }
        Ok(Self {
            levels: build_levels(&params),
            params,
        })
    }

    fn evaluate(&self, ctx: &TickContext<'_>) -> Evaluation<Self> {
        let price = ctx.snapshot.price;
        let base = self.params.base_price;

        let pick = self
            .levels
            .iter()
            .enumerate()
            .filter(|(_, level)| triggered(level, price))
            .min_by(|(_, a), (_, b)| (a.price - base).abs().total_cmp(&(b.price - base).abs()))
            .map(|(i, _)| i);

        let Some(index) = pick else {
            return Evaluation::idle(self.clone(), ctx.now);
        };

        let mut state = self.clone();
        let level = &mut state.levels[index];
        level.filled = true;
        let child = ChildOrder {
            side: level.side,
            quantity: self.params.quantity,
            limit_price: Some(level.price),
        };
        let completed = state.levels.iter().all(|l| l.filled);
        Evaluation {
            state,
            child: Some(child),
            next_tick_at: ctx.now,
            completed,
        }
    }
}

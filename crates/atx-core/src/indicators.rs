//! Technical indicators over a price series.
//!
//! Thin wrappers around the `ta` crate that feed a whole series (oldest
//! first) and return the final value, or `None` while the series is shorter
//! than the indicator needs.
//!
//! Definitions:
//! - **Bollinger bands**: SMA of the last `period` closes ± `k` population
//!   standard deviations.
//! - **RSI**: `ta`'s relative strength index, i.e. `100 · EMA(up) / (EMA(up) + EMA(down))`
//!   with EMA smoothing over `period`. Needs `period + 1` closes.

use ta::Next;
use ta::indicators::{
    BollingerBands, ExponentialMovingAverage, RelativeStrengthIndex, SimpleMovingAverage,
};

/// Bollinger band values at the end of a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl Bands {
    /// Position of `price` relative to the bands: `0` at the middle, `±1` at
    /// the upper/lower band. `0` when the bands have collapsed.
    pub fn position(&self, price: f64) -> f64 {
        let half_width = self.upper - self.middle;
        if half_width <= f64::EPSILON {
            0.0
        } else {
            (price - self.middle) / half_width
        }
    }
}

/// Simple moving average of the last `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let mut ind = SimpleMovingAverage::new(period).ok()?;
    values[values.len() - period..]
        .iter()
        .fold(None, |_, &v| Some(ind.next(v)))
}

/// Exponential moving average over the whole series.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let mut ind = ExponentialMovingAverage::new(period).ok()?;
    values.iter().fold(None, |_, &v| Some(ind.next(v)))
}

/// Relative strength index over the whole series.
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() <= period {
        return None;
    }
    let mut ind = RelativeStrengthIndex::new(period).ok()?;
    values.iter().fold(None, |_, &v| Some(ind.next(v)))
}

/// Bollinger bands of the last `period` values with multiplier `std_dev`.
pub fn bollinger(values: &[f64], period: usize, std_dev: f64) -> Option<Bands> {
    if period == 0 || values.len() < period || !(std_dev > 0.0) {
        return None;
    }
    let mut ind = BollingerBands::new(period, std_dev).ok()?;
    values[values.len() - period..]
        .iter()
        .fold(None, |_, &v| Some(ind.next(v)))
        .map(|out| Bands {
            upper: out.upper,
            middle: out.average,
            lower: out.lower,
        })
}

/// Return in percent of `current` against the value `lookback` samples
/// before the last element of `values`.
///
/// `None` if the series is too short or the reference price is not positive.
pub fn trailing_return_pct(values: &[f64], current: f64, lookback: usize) -> Option<f64> {
    if lookback == 0 || values.len() <= lookback {
        return None;
    }
    let past = values[values.len() - 1 - lookback];
    if past <= 0.0 {
        return None;
    }
    Some((current - past) / past * 100.0)
}

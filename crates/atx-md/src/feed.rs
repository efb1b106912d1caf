//! In-memory market data feed.
//!
//! [`FeedGateway`] keeps a bounded ring of price observations per asset and
//! builds a [`MarketSnapshot`] on request. Indicators are derived at snapshot
//! time, once over the raw observations (unscoped keys such as `"rsi"`) and
//! once per configured timeframe over bars resampled to that timeframe
//! (scoped keys such as `"rsi@1h"`; a bar's value is the last price seen in
//! its bucket).
//!
//! ```text
//! push_price ──► VecDeque<PricePoint> per asset (≤ history_len)
//! snapshot   ──► price + history + indicators{raw, per timeframe}
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use atx_core::config::FeedConfig;
use atx_core::error::GatewayError;
use atx_core::indicators;
use atx_core::time_util::Clock;
use atx_core::types::{IndicatorKind, MarketSnapshot, PricePoint, parse_timeframe};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::MarketDataGateway;

/// Market data gateway backed by pushed price observations.
pub struct FeedGateway {
    config: FeedConfig,
    /// Parsed `(label, bucket_ms)` for every configured timeframe.
    timeframes: Vec<(String, u64)>,
    clock: Arc<dyn Clock>,
    series: RwLock<AHashMap<String, VecDeque<PricePoint>>>,
}

impl FeedGateway {
    /// Create an empty feed. Invalid timeframe labels are skipped with a
    /// warning (config validation normally rejects them earlier).
    pub fn new(config: FeedConfig, clock: Arc<dyn Clock>) -> Self {
        let timeframes = config
            .timeframes
            .iter()
            .filter_map(|tf| match parse_timeframe(tf) {
                Some(ms) => Some((tf.clone(), ms)),
                None => {
                    warn!("[feed] ignoring invalid timeframe `{tf}`");
                    None
                }
            })
            .collect();
        Self {
            config,
            timeframes,
            clock,
            series: RwLock::new(AHashMap::new()),
        }
    }

    /// Record a price observation.
    ///
    /// Returns `false` (and drops the observation) if the price is not a
    /// positive finite number or is older than the last observation.
    pub async fn push_price(&self, asset: &str, price: f64, ts: u64) -> bool {
        if !(price.is_finite() && price > 0.0) {
            warn!("[feed] dropping invalid price {price} for {asset}");
            return false;
        }
        let mut series = self.series.write().await;
        let ring = series.entry(asset.to_string()).or_default();
        if ring.back().is_some_and(|last| ts < last.ts) {
            debug!("[feed] dropping out-of-order observation for {asset} at {ts}");
            return false;
        }
        if ring.len() >= self.config.history_len {
            ring.pop_front();
        }
        ring.push_back(PricePoint { ts, price });
        true
    }

    /// Latest observed price, if any.
    pub async fn latest_price(&self, asset: &str) -> Option<f64> {
        self.series
            .read()
            .await
            .get(asset)
            .and_then(|ring| ring.back())
            .map(|p| p.price)
    }

    /// Assets with at least one observation.
    pub async fn assets(&self) -> Vec<String> {
        self.series.read().await.keys().cloned().collect()
    }

    fn derive(&self, closes: &[f64], price: f64, timeframe: Option<&str>, out: &mut HashMap<String, f64>) {
        let cfg = &self.config;
        let mut put = |kind: IndicatorKind, value: Option<f64>| {
            if let Some(v) = value.filter(|v| v.is_finite()) {
                out.insert(kind.key(timeframe), v);
            }
        };
        put(IndicatorKind::Sma, indicators::sma(closes, cfg.sma_period));
        put(IndicatorKind::Ema, indicators::ema(closes, cfg.ema_period));
        put(IndicatorKind::Rsi, indicators::rsi(closes, cfg.rsi_period));
        if let Some(bands) =
            indicators::bollinger(closes, cfg.bollinger_period, cfg.bollinger_std_dev)
        {
            put(IndicatorKind::BollingerUpper, Some(bands.upper));
            put(IndicatorKind::BollingerMiddle, Some(bands.middle));
            put(IndicatorKind::BollingerLower, Some(bands.lower));
        }
        put(
            IndicatorKind::Momentum,
            indicators::trailing_return_pct(closes, price, cfg.momentum_lookback),
        );
    }
}

/// Resample observations into bars of `bucket_ms`, keeping the last price of
/// each bucket.
fn resample(points: &[PricePoint], bucket_ms: u64) -> Vec<f64> {
    let mut bars: Vec<f64> = Vec::new();
    let mut current_bucket = None;
    for p in points {
        let bucket = p.ts / bucket_ms;
        if current_bucket == Some(bucket) {
            if let Some(last) = bars.last_mut() {
                *last = p.price;
            }
        } else {
            bars.push(p.price);
            current_bucket = Some(bucket);
        }
    }
    bars
}

#[async_trait]
impl MarketDataGateway for FeedGateway {
    async fn snapshot(&self, asset: &str) -> Result<MarketSnapshot, GatewayError> {
        let history: Vec<PricePoint> = {
            let series = self.series.read().await;
            let ring = series
                .get(asset)
                .ok_or_else(|| GatewayError::UnknownAsset(asset.to_string()))?;
            ring.iter().copied().collect()
        };
        let now = self.clock.now_ms();

        let Some(last) = history.last().copied() else {
            return Err(GatewayError::Transient {
                asset: asset.to_string(),
                reason: "no observations yet".into(),
            });
        };
        if self.config.stale_after_ms > 0 && now.saturating_sub(last.ts) > self.config.stale_after_ms {
            return Err(GatewayError::Transient {
                asset: asset.to_string(),
                reason: format!("feed stale for {}ms", now - last.ts),
            });
        }

        let mut indicators = HashMap::new();
        let closes: Vec<f64> = history.iter().map(|p| p.price).collect();
        self.derive(&closes, last.price, None, &mut indicators);
        for (label, bucket_ms) in &self.timeframes {
            let bars = resample(&history, *bucket_ms);
            self.derive(&bars, last.price, Some(label), &mut indicators);
        }

        Ok(MarketSnapshot {
            asset: asset.to_string(),
            price: last.price,
            history,
            indicators,
            taken_at: now,
        })
    }
}

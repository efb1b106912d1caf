//! Signal generator.
//!
//! Scores an asset from its snapshot history with three heuristics, each
//! mapped to `[-1, 1]` (positive is bullish):
//!
//! | source    | score                                             |
//! |-----------|---------------------------------------------------|
//! | momentum  | trailing return % / `momentum_scale_pct`, clamped |
//! | bollinger | minus the price's position within the bands       |
//! | rsi       | `(50 - RSI) / 50`                                 |
//! | composite | weighted 0.5 / 0.25 / 0.25 over available scores  |
//!
//! Results are cached per asset for `cache_ttl_ms`. Signals are advisory
//! and never feed the order or algorithm paths.

use std::sync::Arc;

use ahash::AHashMap;
use atx_core::config::SignalConfig;
use atx_core::error::GatewayError;
use atx_core::indicators::{bollinger, rsi, trailing_return_pct};
use atx_core::time_util::Clock;
use atx_core::types::{MarketSnapshot, Signal, SignalDirection, SignalSource};
use atx_md::MarketDataGateway;
use tokio::sync::RwLock;
use tracing::debug;

const MOMENTUM_WEIGHT: f64 = 0.5;
const BAND_WEIGHT: f64 = 0.25;
const RSI_WEIGHT: f64 = 0.25;

#[derive(Debug, Clone)]
struct CachedSignals {
    generated_at: u64,
    signals: Vec<Signal>,
}

pub struct SignalGenerator {
    config: SignalConfig,
    gateway: Arc<dyn MarketDataGateway>,
    clock: Arc<dyn Clock>,
    cache: RwLock<AHashMap<String, CachedSignals>>,
}

impl SignalGenerator {
    pub fn new(config: SignalConfig, gateway: Arc<dyn MarketDataGateway>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            gateway,
            clock,
            cache: RwLock::new(AHashMap::new()),
        }
    }

    /// Signals for `asset`, from cache while fresh.
    pub async fn signals(&self, asset: &str) -> Result<Vec<Signal>, GatewayError> {
        let now = self.clock.now_ms();
        if let Some(cached) = self.cache.read().await.get(asset) {
            if now.saturating_sub(cached.generated_at) < self.config.cache_ttl_ms {
                return Ok(cached.signals.clone());
            }
        }

        let snapshot = self.gateway.snapshot(asset).await?;
        let signals = compute_signals(&snapshot, &self.config, now);

        let mut cache = self.cache.write().await;
        cache.retain(|_, c| now.saturating_sub(c.generated_at) < self.config.cache_ttl_ms);
        if !cache.contains_key(asset) && cache.len() >= self.config.max_cached_assets {
            let oldest = cache
                .iter()
                .min_by_key(|(_, c)| c.generated_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!("[signals] cache full, evicting {oldest}");
                cache.remove(&oldest);
            }
        }
        if self.config.max_cached_assets > 0 {
            cache.insert(
                asset.to_string(),
                CachedSignals {
                    generated_at: now,
                    signals: signals.clone(),
                },
            );
        }
        Ok(signals)
    }

    pub async fn cached_assets(&self) -> usize {
        self.cache.read().await.len()
    }
}

fn direction(score: f64, neutral_band: f64) -> SignalDirection {
    if score.abs() < neutral_band {
        SignalDirection::Neutral
    } else if score > 0.0 {
        SignalDirection::Bullish
    } else {
        SignalDirection::Bearish
    }
}

/// Score `snapshot` with every heuristic that has enough history, plus the
/// composite. The composite is always present; with no usable heuristic it
/// is neutral with zero confidence.
pub fn compute_signals(snapshot: &MarketSnapshot, config: &SignalConfig, now: u64) -> Vec<Signal> {
    let closes = snapshot.closes();
    let price = snapshot.price;

    let momentum = trailing_return_pct(&closes, price, config.momentum_lookback)
        .map(|r| (r / config.momentum_scale_pct).clamp(-1.0, 1.0));
    let band = bollinger(&closes, config.bollinger_period, config.bollinger_std_dev)
        .map(|b| -b.position(price).clamp(-1.0, 1.0));
    let strength = rsi(&closes, config.rsi_period).map(|r| ((50.0 - r) / 50.0).clamp(-1.0, 1.0));

    let signal = |source, score: f64| Signal {
        asset: snapshot.asset.clone(),
        source,
        direction: direction(score, config.neutral_band),
        confidence: score.abs().clamp(0.0, 1.0),
        generated_at: now,
    };

    let parts = [
        (SignalSource::Momentum, MOMENTUM_WEIGHT, momentum),
        (SignalSource::Bollinger, BAND_WEIGHT, band),
        (SignalSource::Rsi, RSI_WEIGHT, strength),
    ];
    let mut out: Vec<Signal> = parts
        .iter()
        .filter_map(|&(source, _, score)| score.map(|s| signal(source, s)))
        .collect();

    let (weighted, weight) = parts
        .iter()
        .filter_map(|&(_, w, score)| score.map(|s| (w * s, w)))
        .fold((0.0, 0.0), |(acc, tw), (ws, w)| (acc + ws, tw + w));
    let composite = if weight > 0.0 { weighted / weight } else { 0.0 };
    out.push(signal(SignalSource::Composite, composite));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{StaticGateway, snapshot_from};
    use atx_core::time_util::ManualClock;

    fn config() -> SignalConfig {
        SignalConfig {
            momentum_lookback: 5,
            bollinger_period: 10,
            rsi_period: 5,
            ..SignalConfig::default()
        }
    }

    fn find(signals: &[Signal], source: SignalSource) -> &Signal {
        signals.iter().find(|s| s.source == source).unwrap()
    }

    #[test]
    fn rally_reads_bullish_momentum() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let signals = compute_signals(&snapshot_from("ETHUSDC", &closes), &config(), 7);
        assert_eq!(signals.len(), 4);
        let momentum = find(&signals, SignalSource::Momentum);
        assert_eq!(momentum.direction, SignalDirection::Bullish);
        assert_eq!(momentum.generated_at, 7);
        // overextended rally: bands and rsi lean the other way
        assert_eq!(find(&signals, SignalSource::Rsi).direction, SignalDirection::Bearish);
        assert_eq!(find(&signals, SignalSource::Bollinger).direction, SignalDirection::Bearish);
        assert!(signals.iter().all(|s| (0.0..=1.0).contains(&s.confidence)));
    }

    #[test]
    fn no_history_is_neutral_composite_only() {
        let signals = compute_signals(&MarketSnapshot::spot("ETHUSDC", 100.0, 0), &config(), 0);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].source, SignalSource::Composite);
        assert_eq!(signals[0].direction, SignalDirection::Neutral);
        assert_eq!(signals[0].confidence, 0.0);
    }

    #[tokio::test]
    async fn cache_respects_ttl_and_capacity() {
        let gateway = Arc::new(StaticGateway::new());
        gateway.set_price("ETHUSDC", 100.0);
        gateway.set_price("BTCUSDC", 100.0);
        let clock = Arc::new(ManualClock::new(0));
        let generator = SignalGenerator::new(
            SignalConfig {
                cache_ttl_ms: 1_000,
                max_cached_assets: 1,
                ..config()
            },
            gateway.clone(),
            clock.clone(),
        );

        generator.signals("ETHUSDC").await.unwrap();
        generator.signals("ETHUSDC").await.unwrap();
        assert_eq!(gateway.calls(), 1);

        generator.signals("BTCUSDC").await.unwrap();
        assert_eq!(generator.cached_assets().await, 1);

        clock.advance(1_000);
        generator.signals("BTCUSDC").await.unwrap();
        assert_eq!(gateway.calls(), 3);

        assert!(matches!(
            generator.signals("SOLUSDC").await,
            Err(GatewayError::UnknownAsset(_))
        ));
    }
}

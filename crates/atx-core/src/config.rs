//! Configuration for the trading engine.
//!
//! Everything is read from a single JSON file. Only `pairs` is required;
//! every tunable has a default.
//!
//! # Example config
//!
//! ```json
//! {
//!   "meta": { "module_name": "atx-engine", "log_path": "/tmp/atx" },
//!   "scheduler": { "tick_interval_ms": 1000, "retry_budget": 3 },
//!   "signals": { "cache_ttl_ms": 5000 },
//!   "feed": { "history_len": 500, "timeframes": ["1m", "1h"] },
//!   "pairs": [{
//!     "symbol": "ETHUSDC", "base": "ETH", "quote": "USDC",
//!     "tick_size": 0.001, "min_order_size": 0.01, "max_order_size": 500,
//!     "maker_fee": 0.001, "taker_fee": 0.002
//!   }]
//! }
//! ```

use std::collections::HashSet;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::market_data::parse_timeframe;
use crate::types::pair::TradingPair;

/// Top-level engine config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub meta: ModuleMeta,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub signals: SignalConfig,

    #[serde(default)]
    pub feed: FeedConfig,

    /// Tradable pairs. Orders and algorithms on other symbols are rejected.
    pub pairs: Vec<TradingPair>,
}

/// Module metadata block (name, log path).
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleMeta {
    #[serde(default = "default_module_name")]
    pub module_name: String,
    #[serde(default)]
    pub log_path: Option<String>,
    /// Emit console logs as JSON lines.
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ModuleMeta {
    fn default() -> Self {
        Self {
            module_name: default_module_name(),
            log_path: None,
            json_logs: false,
        }
    }
}

/// Algorithm scheduler cadence and market data retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Global tick cadence.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Upper bound for a single snapshot request.
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,

    /// Retries after the first failed attempt, per asset per cycle.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// How long finished orders and algorithms stay queryable after their
    /// last update. Unset keeps them for the life of the process.
    #[serde(default)]
    pub retention_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            snapshot_timeout_ms: default_snapshot_timeout_ms(),
            retry_budget: default_retry_budget(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            retention_ms: None,
        }
    }
}

/// Signal generator heuristics and cache.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    #[serde(default = "default_max_cached_assets")]
    pub max_cached_assets: usize,

    #[serde(default = "default_momentum_lookback")]
    pub momentum_lookback: usize,

    /// Return (percent) that maps to a full-strength momentum score.
    #[serde(default = "default_momentum_scale_pct")]
    pub momentum_scale_pct: f64,

    #[serde(default = "default_bollinger_period")]
    pub bollinger_period: usize,

    #[serde(default = "default_bollinger_std_dev")]
    pub bollinger_std_dev: f64,

    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,

    /// Scores with an absolute value below this are neutral.
    #[serde(default = "default_neutral_band")]
    pub neutral_band: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: default_cache_ttl_ms(),
            max_cached_assets: default_max_cached_assets(),
            momentum_lookback: default_momentum_lookback(),
            momentum_scale_pct: default_momentum_scale_pct(),
            bollinger_period: default_bollinger_period(),
            bollinger_std_dev: default_bollinger_std_dev(),
            rsi_period: default_rsi_period(),
            neutral_band: default_neutral_band(),
        }
    }
}

/// In-memory market data feed settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Price points kept per asset.
    #[serde(default = "default_history_len")]
    pub history_len: usize,

    /// Snapshots of assets not updated for this long fail as transient.
    /// `0` disables the staleness check.
    #[serde(default)]
    pub stale_after_ms: u64,

    /// Timeframes for which scoped indicators are derived (e.g. `["1h"]`).
    #[serde(default)]
    pub timeframes: Vec<String>,

    #[serde(default = "default_sma_period")]
    pub sma_period: usize,

    #[serde(default = "default_ema_period")]
    pub ema_period: usize,

    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,

    #[serde(default = "default_bollinger_period")]
    pub bollinger_period: usize,

    #[serde(default = "default_bollinger_std_dev")]
    pub bollinger_std_dev: f64,

    #[serde(default = "default_momentum_lookback")]
    pub momentum_lookback: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            history_len: default_history_len(),
            stale_after_ms: 0,
            timeframes: Vec::new(),
            sma_period: default_sma_period(),
            ema_period: default_ema_period(),
            rsi_period: default_rsi_period(),
            bollinger_period: default_bollinger_period(),
            bollinger_std_dev: default_bollinger_std_dev(),
            momentum_lookback: default_momentum_lookback(),
        }
    }
}

impl EngineConfig {
    /// Config with the given pairs and defaults everywhere else.
    pub fn with_pairs(pairs: Vec<TradingPair>) -> Self {
        Self {
            meta: ModuleMeta::default(),
            scheduler: SchedulerConfig::default(),
            signals: SignalConfig::default(),
            feed: FeedConfig::default(),
            pairs,
        }
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for pair in &self.pairs {
            let invalid = |reason: &str| ConfigError::InvalidPair {
                symbol: pair.symbol.clone(),
                reason: reason.to_string(),
            };
            if !seen.insert(pair.symbol.as_str()) {
                return Err(ConfigError::DuplicatePair(pair.symbol.clone()));
            }
            if !(pair.tick_size > 0.0) {
                return Err(invalid("tick_size must be positive"));
            }
            if !(pair.min_order_size > 0.0) || pair.min_order_size > pair.max_order_size {
                return Err(invalid("order size bounds must satisfy 0 < min <= max"));
            }
            if pair.maker_fee < 0.0 || pair.taker_fee < 0.0 {
                return Err(invalid("fees must not be negative"));
            }
        }

        let s = &self.scheduler;
        if s.tick_interval_ms == 0 {
            return Err(ConfigError::Scheduler("tick_interval_ms must be positive".into()));
        }
        if s.snapshot_timeout_ms == 0 {
            return Err(ConfigError::Scheduler("snapshot_timeout_ms must be positive".into()));
        }
        if s.initial_backoff_ms > s.max_backoff_ms {
            return Err(ConfigError::Scheduler(
                "initial_backoff_ms must not exceed max_backoff_ms".into(),
            ));
        }

        if self.signals.max_cached_assets == 0 {
            return Err(ConfigError::Signals("max_cached_assets must be positive".into()));
        }
        if !(self.signals.momentum_scale_pct > 0.0) {
            return Err(ConfigError::Signals("momentum_scale_pct must be positive".into()));
        }

        if self.feed.history_len < 2 {
            return Err(ConfigError::Feed("history_len must be at least 2".into()));
        }
        if let Some(tf) = self.feed.timeframes.iter().find(|tf| parse_timeframe(tf).is_none()) {
            return Err(ConfigError::Feed(format!("invalid timeframe `{tf}`")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Defaults (used by serde)
// ---------------------------------------------------------------------------

fn default_module_name() -> String {
    "atx-engine".into()
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_snapshot_timeout_ms() -> u64 {
    2_000
}

fn default_retry_budget() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

fn default_cache_ttl_ms() -> u64 {
    5_000
}

fn default_max_cached_assets() -> usize {
    256
}

fn default_momentum_lookback() -> usize {
    20
}

fn default_momentum_scale_pct() -> f64 {
    5.0
}

fn default_bollinger_period() -> usize {
    20
}

fn default_bollinger_std_dev() -> f64 {
    2.0
}

fn default_rsi_period() -> usize {
    14
}

fn default_neutral_band() -> f64 {
    0.2
}

fn default_history_len() -> usize {
    500
}

fn default_sma_period() -> usize {
    20
}

fn default_ema_period() -> usize {
    20
}

/// Load, parse and validate a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: EngineConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

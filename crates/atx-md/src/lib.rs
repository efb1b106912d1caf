//! # atx-md
//!
//! Market data side of the ATX trading engine.
//!
//! The engine never ingests market data itself; it asks a
//! [`MarketDataGateway`] for a [`MarketSnapshot`] of an asset whenever it
//! needs one. This crate defines that contract and ships [`FeedGateway`], an
//! in-memory implementation fed with price observations (from a replay file,
//! an upstream collector, or tests) that derives indicators on demand.
//!
//! ## Gateways
//!
//! | Gateway        | Source                       | Indicators                    |
//! |----------------|------------------------------|-------------------------------|
//! | `FeedGateway`  | pushed price observations    | SMA, EMA, RSI, Bollinger, momentum, per timeframe |

pub mod feed;
pub mod replay;

use async_trait::async_trait;
use atx_core::error::GatewayError;
use atx_core::types::MarketSnapshot;

pub use feed::FeedGateway;

/// Source of market snapshots.
///
/// Implementations may block or fail. Transient failures should be reported
/// as [`GatewayError::Transient`] so the scheduler retries them within its
/// budget; everything else is treated as final for the current cycle.
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Current price, recent history and derived indicators for `asset`.
    async fn snapshot(&self, asset: &str) -> Result<MarketSnapshot, GatewayError>;
}

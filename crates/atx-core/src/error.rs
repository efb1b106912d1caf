//! Typed error definitions for the ATX trading engine.
//!
//! Each failure class has its own enum so callers can match on the exact
//! reason instead of parsing strings:
//!
//! - [`RejectReason`], why an order was refused at acceptance time
//! - [`AlgorithmError`], why an algorithm request was refused
//! - [`ControlError`], outcome of cancel / pause / resume / stop on a missing or finished record
//! - [`GatewayError`], market data gateway failures, split into transient and permanent
//! - [`ExecutionError`], problems applying execution reports or talking to the venue
//! - [`ConfigError`], configuration validation failures

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::enums::{AlgorithmStatus, OrderKindTag, OrderStatus};

/// Specific reason an order was rejected.
///
/// Stored on the rejected order record and returned to the caller; never a
/// generic "invalid order".
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "camelCase")]
pub enum RejectReason {
    #[error("unknown trading pair `{symbol}`")]
    UnknownPair { symbol: String },

    #[error("trading pair `{symbol}` is not active")]
    PairInactive { symbol: String },

    #[error("quantity must be positive, got {quantity}")]
    QuantityNotPositive { quantity: f64 },

    #[error("quantity {quantity} is below the pair minimum {min}")]
    QuantityBelowMinimum { quantity: f64, min: f64 },

    #[error("quantity {quantity} is above the pair maximum {max}")]
    QuantityAboveMaximum { quantity: f64, max: f64 },

    #[error("quantity {quantity} is not a multiple of tick size {tick_size}")]
    QuantityNotAligned { quantity: f64, tick_size: f64 },

    #[error("`price` is required for {kind} orders")]
    MissingPrice { kind: OrderKindTag },

    #[error("`stopPrice` is required for {kind} orders")]
    MissingStopPrice { kind: OrderKindTag },

    #[error("`{field}` must be a positive finite number, got {value}")]
    InvalidPrice { field: String, value: f64 },

    #[error("trailing-stop orders need exactly one of `trailingAmount` or `trailingPercent`")]
    TrailingOffsetRequired,

    #[error("`expiresAt` is required for good-till-date orders")]
    MissingExpiry,

    #[error("`expiresAt` {expires_at} is not in the future (now {now})")]
    ExpiryInPast { expires_at: u64, now: u64 },

    #[error("conditional orders need at least one trigger condition")]
    MissingConditions,

    #[error("condition #{index} is invalid: {reason}")]
    InvalidCondition { index: usize, reason: String },

    #[error("projected position {projected} exceeds maxPositionSize {limit}")]
    PositionLimitExceeded { projected: f64, limit: f64 },

    #[error("realized loss today {loss} already exceeds maxDailyLoss {limit}")]
    DailyLossLimitExceeded { loss: f64, limit: f64 },

    #[error("parent algorithm {algorithm_id} is no longer active")]
    ParentAlgorithmInactive { algorithm_id: Uuid },

    #[error("execution venue rejected the order: {reason}")]
    Venue { reason: String },
}

/// Rejection of an order request, carrying the id under which the rejected
/// record was stored.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("order {order_id} rejected: {reason}")]
pub struct OrderRejected {
    pub order_id: Uuid,
    pub reason: RejectReason,
}

/// Algorithm request validation error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlgorithmError {
    #[error("unknown trading pair `{0}`")]
    UnknownPair(String),

    #[error("trading pair `{0}` is not active")]
    PairInactive(String),

    #[error("invalid parameter `{field}`: {reason}")]
    InvalidParameter { field: &'static str, reason: String },
}

impl AlgorithmError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field,
            reason: reason.into(),
        }
    }
}

/// Outcome of a control operation that could not be applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error("{0} not found")]
    NotFound(Uuid),

    #[error("order {id} is already {status}")]
    OrderTerminal { id: Uuid, status: OrderStatus },

    #[error("algorithm {id} is already {status}")]
    AlgorithmTerminal { id: Uuid, status: AlgorithmStatus },

    #[error("algorithm {id} cannot go from {from} to {to}")]
    InvalidAlgorithmTransition {
        id: Uuid,
        from: AlgorithmStatus,
        to: AlgorithmStatus,
    },
}

/// Market data gateway failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// Temporary failure (rate limit, stale feed, upstream hiccup). Retried.
    #[error("transient gateway failure for `{asset}`: {reason}")]
    Transient { asset: String, reason: String },

    /// A single attempt exceeded the snapshot timeout. Retried.
    #[error("snapshot request for `{asset}` timed out after {timeout_ms}ms")]
    Timeout { asset: String, timeout_ms: u64 },

    /// The gateway has never seen this asset.
    #[error("unknown asset `{0}`")]
    UnknownAsset(String),

    /// The gateway is down for good (or the retry budget is exhausted).
    #[error("gateway unavailable for `{asset}`: {reason}")]
    Unavailable { asset: String, reason: String },
}

impl GatewayError {
    /// Whether a retry inside the same scheduler cycle may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }
}

/// Errors from applying execution reports or calling the venue.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("order {0} not found")]
    NotFound(Uuid),

    #[error("order {id} cannot accept {event} while {status}")]
    InvalidState {
        id: Uuid,
        status: OrderStatus,
        event: &'static str,
    },

    #[error("fill of {fill} on order {id} would exceed quantity {quantity} (already filled {filled})")]
    OverFill {
        id: Uuid,
        fill: f64,
        filled: f64,
        quantity: f64,
    },

    #[error("fill-or-kill order {id} cannot be partially filled ({fill} of {quantity})")]
    FillOrKillPartial { id: Uuid, fill: f64, quantity: f64 },

    #[error("invalid fill for order {id}: quantity {quantity} at price {price}")]
    InvalidFill { id: Uuid, quantity: f64, price: f64 },

    #[error("venue error: {0}")]
    Venue(String),
}

/// Configuration validation error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("pair `{symbol}`: {reason}")]
    InvalidPair { symbol: String, reason: String },

    #[error("pair `{0}` is declared more than once")]
    DuplicatePair(String),

    #[error("scheduler: {0}")]
    Scheduler(String),

    #[error("signals: {0}")]
    Signals(String),

    #[error("feed: {0}")]
    Feed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let t = GatewayError::Transient {
            asset: "ETHUSDC".into(),
            reason: "rate limited".into(),
        };
        let to = GatewayError::Timeout {
            asset: "ETHUSDC".into(),
            timeout_ms: 100,
        };
        assert!(t.is_transient());
        assert!(to.is_transient());
        assert!(!GatewayError::UnknownAsset("X".into()).is_transient());
    }

    #[test]
    fn reject_reason_messages_are_specific() {
        let r = RejectReason::QuantityNotAligned {
            quantity: 0.15,
            tick_size: 0.1,
        };
        assert_eq!(r.to_string(), "quantity 0.15 is not a multiple of tick size 0.1");

        let r = RejectReason::MissingPrice {
            kind: OrderKindTag::StopLimit,
        };
        assert_eq!(r.to_string(), "`price` is required for stop-limit orders");
    }

    #[test]
    fn reject_reason_serializes_with_code() {
        let json = serde_json::to_value(RejectReason::MissingExpiry).unwrap();
        assert_eq!(json["code"], "missingExpiry");
    }
}

//! Order requests, validated order records and trigger conditions.
//!
//! Requests arrive flat (a kind tag plus optional price fields) from the web
//! API layer. The order state machine validates them into an [`Order`] whose
//! [`OrderKind`] and [`TimeInForce`] carry exactly the fields their variant
//! needs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ComparisonOperator, OrderKindTag, OrderStatus, Side, TimeInForceTag};
use super::market_data::IndicatorKind;
use super::pair::TradingPair;
use crate::error::RejectReason;

pub type OrderId = Uuid;

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// What a trigger condition compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionKind {
    /// The snapshot spot price.
    PriceThreshold,
    /// A derived indicator value, optionally scoped to the condition's timeframe.
    IndicatorThreshold(IndicatorKind),
}

/// A single trigger condition on a conditional order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub kind: ConditionKind,
    /// Asset whose snapshot the condition reads.
    pub asset: String,
    pub operator: ComparisonOperator,
    pub value: f64,
    /// Timeframe label for indicator conditions (e.g. `"1h"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
}

impl Condition {
    pub fn price(asset: impl Into<String>, operator: ComparisonOperator, value: f64) -> Self {
        Self {
            kind: ConditionKind::PriceThreshold,
            asset: asset.into(),
            operator,
            value,
            timeframe: None,
        }
    }

    pub fn indicator(
        asset: impl Into<String>,
        indicator: IndicatorKind,
        timeframe: Option<&str>,
        operator: ComparisonOperator,
        value: f64,
    ) -> Self {
        Self {
            kind: ConditionKind::IndicatorThreshold(indicator),
            asset: asset.into(),
            operator,
            value,
            timeframe: timeframe.map(str::to_string),
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Per-order risk limits checked at acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskParameters {
    /// Largest absolute net position allowed after this order fills.
    #[serde(default)]
    pub max_position_size: Option<f64>,
    /// Realized loss for the current UTC day above which orders are refused.
    #[serde(default)]
    pub max_daily_loss: Option<f64>,
}

/// Free-form order metadata with the two keys the engine understands.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_parameters: Option<RiskParameters>,
    /// Set on child orders emitted by an algorithm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm_id: Option<Uuid>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Request (flat, as received)
// ---------------------------------------------------------------------------

/// An order request as submitted by a user or emitted by an algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub user_id: String,
    pub wallet_address: String,
    /// Pair symbol, resolved against the configured pairs.
    pub pair: String,
    pub kind: OrderKindTag,
    pub side: Side,
    pub quantity: f64,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub stop_price: Option<f64>,
    #[serde(default)]
    pub limit_price: Option<f64>,
    #[serde(default)]
    pub trailing_amount: Option<f64>,
    #[serde(default)]
    pub trailing_percent: Option<f64>,
    #[serde(default)]
    pub time_in_force: TimeInForceTag,
    /// Deadline for good-till-date orders (ms since epoch).
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub metadata: OrderMetadata,
}

impl OrderRequest {
    fn base(
        user_id: impl Into<String>,
        wallet_address: impl Into<String>,
        pair: impl Into<String>,
        kind: OrderKindTag,
        side: Side,
        quantity: f64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            wallet_address: wallet_address.into(),
            pair: pair.into(),
            kind,
            side,
            quantity,
            price: None,
            stop_price: None,
            limit_price: None,
            trailing_amount: None,
            trailing_percent: None,
            time_in_force: TimeInForceTag::GoodTillCancel,
            expires_at: None,
            conditions: Vec::new(),
            metadata: OrderMetadata::default(),
        }
    }

    pub fn market(
        user_id: impl Into<String>,
        wallet_address: impl Into<String>,
        pair: impl Into<String>,
        side: Side,
        quantity: f64,
    ) -> Self {
        Self::base(user_id, wallet_address, pair, OrderKindTag::Market, side, quantity)
    }

    pub fn limit(
        user_id: impl Into<String>,
        wallet_address: impl Into<String>,
        pair: impl Into<String>,
        side: Side,
        quantity: f64,
        price: f64,
    ) -> Self {
        let mut req = Self::base(user_id, wallet_address, pair, OrderKindTag::Limit, side, quantity);
        req.price = Some(price);
        req
    }

    pub fn conditional(
        user_id: impl Into<String>,
        wallet_address: impl Into<String>,
        pair: impl Into<String>,
        side: Side,
        quantity: f64,
        conditions: Vec<Condition>,
    ) -> Self {
        let mut req =
            Self::base(user_id, wallet_address, pair, OrderKindTag::Conditional, side, quantity);
        req.conditions = conditions;
        req
    }
}

// ---------------------------------------------------------------------------
// Validated order
// ---------------------------------------------------------------------------

/// Trailing distance of a trailing-stop order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrailingOffset {
    Amount(f64),
    Percent(f64),
}

/// Order kind with its kind-specific prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OrderKind {
    Market,
    Limit {
        price: f64,
    },
    Stop {
        stop_price: f64,
    },
    StopLimit {
        stop_price: f64,
        limit_price: f64,
    },
    TrailingStop {
        offset: TrailingOffset,
    },
    /// Held back until its conditions hold; then a limit order at `price`
    /// if one is set, a market order otherwise.
    Conditional {
        price: Option<f64>,
    },
}

impl OrderKind {
    pub fn tag(&self) -> OrderKindTag {
        match self {
            Self::Market => OrderKindTag::Market,
            Self::Limit { .. } => OrderKindTag::Limit,
            Self::Stop { .. } => OrderKindTag::Stop,
            Self::StopLimit { .. } => OrderKindTag::StopLimit,
            Self::TrailingStop { .. } => OrderKindTag::TrailingStop,
            Self::Conditional { .. } => OrderKindTag::Conditional,
        }
    }

    /// Limit price the order rests at, if any.
    pub fn limit_price(&self) -> Option<f64> {
        match self {
            Self::Limit { price } => Some(*price),
            Self::StopLimit { limit_price, .. } => Some(*limit_price),
            Self::Conditional { price } => *price,
            Self::Market | Self::Stop { .. } | Self::TrailingStop { .. } => None,
        }
    }

    /// Whether fills are charged the maker fee (resting, priced orders).
    pub fn pays_maker_fee(&self) -> bool {
        self.limit_price().is_some()
    }
}

/// Validated time-in-force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum TimeInForce {
    GoodTillCancel,
    ImmediateOrCancel,
    FillOrKill,
    GoodTillDate { expires_at: u64 },
}

impl TimeInForce {
    pub fn expires_at(&self) -> Option<u64> {
        match self {
            Self::GoodTillDate { expires_at } => Some(*expires_at),
            _ => None,
        }
    }

    /// Whether the deadline (if any) has passed at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at().is_some_and(|t| now >= t)
    }
}

/// An order record owned by the order store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub user_id: String,
    pub wallet_address: String,
    pub pair: TradingPair,
    pub kind: OrderKind,
    pub side: Side,
    pub quantity: f64,
    pub time_in_force: TimeInForce,
    /// Trigger conditions, all of which must hold (conditional orders only).
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub status: OrderStatus,
    /// Cumulative filled quantity; never decreases, never exceeds `quantity`.
    pub filled_quantity: f64,
    /// Quantity-weighted mean fill price; `None` until the first fill.
    #[serde(default)]
    pub average_fill_price: Option<f64>,
    #[serde(default)]
    pub fees_paid: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<RejectReason>,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default)]
    pub metadata: OrderMetadata,
}

impl Order {
    pub fn asset(&self) -> &str {
        &self.pair.symbol
    }

    pub fn remaining(&self) -> f64 {
        (self.quantity - self.filled_quantity).max(0.0)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn algorithm_id(&self) -> Option<Uuid> {
        self.metadata.algorithm_id
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self.kind, OrderKind::Conditional { .. })
    }
}

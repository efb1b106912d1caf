//! Execution venue contract and the channels between engine and venue.
//!
//! The engine never blocks on a venue. Accepted orders are pushed onto the
//! [`VenueCommand`] channel and a dispatcher task forwards them to the
//! [`ExecutionVenue`]. The venue answers asynchronously with
//! [`ExecutionReport`]s on the report channel, which the engine applies to
//! the order state machine.
//!
//! ```text
//! OrderStateMachine ──VenueCommand──► dispatcher ──► ExecutionVenue
//!        ▲                                                │
//!        └──────────────── ExecutionReport ◄──────────────┘
//! ```

use async_trait::async_trait;
use atx_core::error::ExecutionError;
use atx_core::types::{Order, OrderId};
use serde::{Deserialize, Serialize};

/// What happened to an order at the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ExecutionEvent {
    /// A (possibly partial) fill.
    Fill { quantity: f64, price: f64 },
    /// The venue refused the order.
    Rejected { reason: String },
    /// The venue dropped the unfilled remainder (IOC/FOK leftovers).
    Expired,
    /// The venue cancelled the order on its own.
    Cancelled,
}

impl ExecutionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fill { .. } => "fill",
            Self::Rejected { .. } => "rejected",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A venue report for one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub order_id: OrderId,
    #[serde(flatten)]
    pub event: ExecutionEvent,
}

impl ExecutionReport {
    pub fn fill(order_id: OrderId, quantity: f64, price: f64) -> Self {
        Self {
            order_id,
            event: ExecutionEvent::Fill { quantity, price },
        }
    }

    pub fn rejected(order_id: OrderId, reason: impl Into<String>) -> Self {
        Self {
            order_id,
            event: ExecutionEvent::Rejected {
                reason: reason.into(),
            },
        }
    }

    pub fn expired(order_id: OrderId) -> Self {
        Self {
            order_id,
            event: ExecutionEvent::Expired,
        }
    }
}

/// Work for the venue dispatcher.
#[derive(Debug, Clone)]
pub enum VenueCommand {
    /// Route a newly active order.
    Submit(Order),
    /// Pull a working order the engine has cancelled or expired.
    Cancel(OrderId),
}

/// Sender half of the venue command channel.
pub type CommandSender = tokio::sync::mpsc::UnboundedSender<VenueCommand>;

/// Receiver half of the venue command channel.
pub type CommandReceiver = tokio::sync::mpsc::UnboundedReceiver<VenueCommand>;

/// Sender half of the execution report channel. Venues hold one.
pub type ReportSender = tokio::sync::mpsc::UnboundedSender<ExecutionReport>;

/// Receiver half of the execution report channel. The engine drains it.
pub type ReportReceiver = tokio::sync::mpsc::UnboundedReceiver<ExecutionReport>;

/// Create a connected report channel pair.
pub fn report_channel() -> (ReportSender, ReportReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// A venue orders are routed to.
///
/// `submit` only hands the order over; fills and other outcomes arrive later
/// as [`ExecutionReport`]s. An error from `submit` means the venue refused
/// the order outright and is turned into a rejection report by the engine.
#[async_trait]
pub trait ExecutionVenue: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    async fn submit(&self, order: &Order) -> Result<(), ExecutionError>;

    async fn cancel(&self, order_id: OrderId) -> Result<(), ExecutionError>;
}

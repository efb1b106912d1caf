//! Enumerations used throughout the trading engine.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Order enums
// ---------------------------------------------------------------------------

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// `+1.0` for buys, `-1.0` for sells. Multiplying a quantity by this gives
    /// its signed effect on a net position.
    pub fn sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order kind as it appears on an incoming request.
///
/// The validated order carries an [`OrderKind`](crate::types::order::OrderKind)
/// with the kind-specific prices attached instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderKindTag {
    Market,
    Limit,
    Stop,
    StopLimit,
    TrailingStop,
    Conditional,
}

impl std::fmt::Display for OrderKindTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Market => "market",
            Self::Limit => "limit",
            Self::Stop => "stop",
            Self::StopLimit => "stop-limit",
            Self::TrailingStop => "trailing-stop",
            Self::Conditional => "conditional",
        };
        f.write_str(s)
    }
}

/// Time-in-force as it appears on an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeInForceTag {
    #[default]
    GoodTillCancel,
    ImmediateOrCancel,
    FillOrKill,
    GoodTillDate,
}

/// Order lifecycle status.
///
/// ```text
/// pending          → active | cancelled | rejected | expired
/// active           → partially-filled | filled | cancelled | expired | rejected
/// partially-filled → partially-filled | filled | cancelled
/// ```
///
/// Filled, cancelled, rejected and expired are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus {
    Pending,
    Active,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Filled, cancelled, rejected and expired orders never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired
        )
    }

    /// Orders that are live at the execution venue.
    pub fn is_working(self) -> bool {
        matches!(self, Self::Active | Self::PartiallyFilled)
    }

    /// Whether the lifecycle graph allows moving from `self` to `target`.
    ///
    /// `PartiallyFilled → PartiallyFilled` is allowed so that successive
    /// partial fills are ordinary transitions.
    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        use OrderStatus::*;
        match self {
            Pending => matches!(target, Active | Cancelled | Rejected | Expired),
            Active => matches!(
                target,
                PartiallyFilled | Filled | Cancelled | Expired | Rejected
            ),
            PartiallyFilled => matches!(target, PartiallyFilled | Filled | Cancelled),
            Filled | Cancelled | Rejected | Expired => false,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::PartiallyFilled => "partially-filled",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Algorithm enums
// ---------------------------------------------------------------------------

/// Trading algorithm family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlgorithmType {
    Dca,
    Grid,
    Twap,
    Momentum,
    MeanReversion,
}

impl std::fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Dca => "dca",
            Self::Grid => "grid",
            Self::Twap => "twap",
            Self::Momentum => "momentum",
            Self::MeanReversion => "mean-reversion",
        };
        f.write_str(s)
    }
}

/// Algorithm lifecycle status. `Stopped` and `Completed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmStatus {
    Active,
    Paused,
    Stopped,
    Completed,
}

impl AlgorithmStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Completed)
    }
}

impl std::fmt::Display for AlgorithmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Comparison operator of a trigger condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=", alias = "≥")]
    Gte,
    #[serde(rename = "<=", alias = "≤")]
    Lte,
    #[serde(rename = "=", alias = "==")]
    Eq,
}

/// Relative tolerance used by [`ComparisonOperator::Eq`].
const EQ_TOLERANCE: f64 = 1e-9;

impl ComparisonOperator {
    /// Apply `lhs <op> rhs`.
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Lt => lhs < rhs,
            Self::Gte => lhs >= rhs,
            Self::Lte => lhs <= rhs,
            Self::Eq => (lhs - rhs).abs() <= EQ_TOLERANCE * lhs.abs().max(rhs.abs()).max(1.0),
        }
    }
}

impl std::fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Eq => "=",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalDirection {
    Bullish,
    Bearish,
    Neutral,
}

/// Which heuristic produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSource {
    Momentum,
    Bollinger,
    Rsi,
    Composite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_have_no_outgoing_edges() {
        let all = [
            OrderStatus::Pending,
            OrderStatus::Active,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn lifecycle_edges() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Active));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Rejected));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Filled));
        assert!(OrderStatus::Active.can_transition_to(OrderStatus::PartiallyFilled));
        assert!(OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Filled));
        assert!(!OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Active));
        assert!(!OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Rejected));
    }

    #[test]
    fn operators() {
        assert!(ComparisonOperator::Gt.apply(2.0, 1.0));
        assert!(!ComparisonOperator::Gt.apply(1.0, 1.0));
        assert!(ComparisonOperator::Gte.apply(1.0, 1.0));
        assert!(ComparisonOperator::Lt.apply(0.5, 1.0));
        assert!(ComparisonOperator::Lte.apply(1.0, 1.0));
        assert!(ComparisonOperator::Eq.apply(0.1 + 0.2, 0.3));
        assert!(!ComparisonOperator::Eq.apply(100.0, 100.01));
    }

    #[test]
    fn operator_serde_symbols() {
        let op: ComparisonOperator = serde_json::from_str("\">=\"").unwrap();
        assert_eq!(op, ComparisonOperator::Gte);
        let op: ComparisonOperator = serde_json::from_str("\"≤\"").unwrap();
        assert_eq!(op, ComparisonOperator::Lte);
        assert_eq!(serde_json::to_string(&ComparisonOperator::Eq).unwrap(), "\"=\"");
    }
}

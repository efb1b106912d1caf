//! Position and risk tracker.
//!
//! Keeps per-user, per-asset net positions built from fills, the open
//! (accepted but unfilled) quantity per side, and each user's realized PnL
//! for the current UTC day. Acceptance-time risk checks read from here; the
//! order state machine writes every fill here while it still holds the
//! order's lock, so a check never sees a fill half-applied.

use std::collections::HashMap;

use ahash::AHashMap;
use atx_core::error::RejectReason;
use atx_core::time_util::day_index;
use atx_core::types::{Position, RiskParameters, Side};
use tokio::sync::Mutex;
use tracing::debug;

/// Quantities closer to zero than this are treated as flat.
const FLAT_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, Default)]
struct Book {
    net_quantity: f64,
    average_entry_price: f64,
    realized_pnl: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct DailyPnl {
    day: u64,
    realized: f64,
}

/// Unfilled quantity of accepted orders, per side.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OpenExposure {
    pub buy: f64,
    pub sell: f64,
}

impl OpenExposure {
    fn side_mut(&mut self, side: Side) -> &mut f64 {
        match side {
            Side::Buy => &mut self.buy,
            Side::Sell => &mut self.sell,
        }
    }
}

#[derive(Default)]
struct TrackerState {
    books: AHashMap<(String, String), Book>,
    open: AHashMap<(String, String), OpenExposure>,
    daily: AHashMap<String, DailyPnl>,
}

impl TrackerState {
    fn net(&self, key: &(String, String)) -> f64 {
        self.books.get(key).map(|b| b.net_quantity).unwrap_or(0.0)
    }

    fn open(&self, key: &(String, String)) -> OpenExposure {
        self.open.get(key).copied().unwrap_or_default()
    }

    /// - `maxPositionSize`: the net position after this order and every open
    ///   order on the same side fill completely must stay within the limit.
    /// - `maxDailyLoss`: refused once today's realized loss is strictly
    ///   greater than the limit.
    fn check(
        &self,
        params: &RiskParameters,
        key: &(String, String),
        side: Side,
        quantity: f64,
        now: u64,
    ) -> Result<(), RejectReason> {
        if let Some(limit) = params.max_position_size {
            let open = self.open(key);
            let projected = match side {
                Side::Buy => self.net(key) + open.buy + quantity,
                Side::Sell => self.net(key) - open.sell - quantity,
            };
            if projected.abs() > limit + FLAT_EPS {
                return Err(RejectReason::PositionLimitExceeded { projected, limit });
            }
        }
        if let Some(limit) = params.max_daily_loss {
            let loss = -daily_for(self, &key.0, now);
            if loss > limit {
                return Err(RejectReason::DailyLossLimitExceeded { loss, limit });
            }
        }
        Ok(())
    }
}

/// A fill as seen by the tracker.
#[derive(Debug, Clone, Copy)]
pub struct FillEvent<'a> {
    pub user_id: &'a str,
    pub asset: &'a str,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub fee: f64,
    pub ts: u64,
}

#[derive(Default)]
pub struct PositionTracker {
    state: Mutex<TrackerState>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a fill and return the PnL it realized (after fee).
    pub async fn record_fill(&self, fill: FillEvent<'_>) -> f64 {
        let mut state = self.state.lock().await;
        let key = (fill.user_id.to_string(), fill.asset.to_string());
        let book = state.books.entry(key).or_default();
        let gross = apply_to_book(book, fill.side, fill.quantity, fill.price);
        let realized = gross - fill.fee;
        book.realized_pnl += realized;

        let day = day_index(fill.ts);
        let daily = state.daily.entry(fill.user_id.to_string()).or_default();
        if daily.day != day {
            *daily = DailyPnl { day, realized: 0.0 };
        }
        daily.realized += realized;

        debug!(
            user = fill.user_id,
            asset = fill.asset,
            side = %fill.side,
            quantity = fill.quantity,
            price = fill.price,
            realized,
            "[tracker] fill applied"
        );
        realized
    }

    /// Signed net quantity of `user_id` in `asset` (0 when unknown).
    pub async fn net_quantity(&self, user_id: &str, asset: &str) -> f64 {
        let state = self.state.lock().await;
        state.net(&(user_id.to_string(), asset.to_string()))
    }

    /// Realized PnL of `user_id` for the UTC day containing `now`.
    pub async fn daily_realized_pnl(&self, user_id: &str, now: u64) -> f64 {
        let state = self.state.lock().await;
        daily_for(&state, user_id, now)
    }

    /// Position of `user_id` in `asset`, marked at `mark` when given.
    pub async fn position(&self, user_id: &str, asset: &str, mark: Option<f64>) -> Option<Position> {
        let state = self.state.lock().await;
        state
            .books
            .get(&(user_id.to_string(), asset.to_string()))
            .map(|b| to_position(user_id, asset, b, mark))
    }

    /// Every position of `user_id`, sorted by asset. Assets missing from
    /// `marks` report zero unrealized PnL.
    pub async fn positions(&self, user_id: &str, marks: &HashMap<String, f64>) -> Vec<Position> {
        let state = self.state.lock().await;
        let mut out: Vec<Position> = state
            .books
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .map(|((_, asset), b)| to_position(user_id, asset, b, marks.get(asset).copied()))
            .collect();
        out.sort_by(|a, b| a.asset.cmp(&b.asset));
        out
    }

    /// Assets in which `user_id` holds a non-flat position.
    pub async fn open_assets(&self, user_id: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let mut out: Vec<String> = state
            .books
            .iter()
            .filter(|((user, _), b)| user == user_id && b.net_quantity.abs() > FLAT_EPS)
            .map(|((_, asset), _)| asset.clone())
            .collect();
        out.sort();
        out
    }

    /// Check an order against `params` without reserving anything.
    pub async fn check(
        &self,
        params: &RiskParameters,
        user_id: &str,
        asset: &str,
        side: Side,
        quantity: f64,
        now: u64,
    ) -> Result<(), RejectReason> {
        let state = self.state.lock().await;
        state.check(params, &(user_id.to_string(), asset.to_string()), side, quantity, now)
    }

    /// Check an order against `params` (when given) and, if it passes,
    /// count its quantity as open exposure. Both happen under one lock so
    /// concurrent orders cannot pass the same headroom twice.
    pub async fn admit(
        &self,
        params: Option<&RiskParameters>,
        user_id: &str,
        asset: &str,
        side: Side,
        quantity: f64,
        now: u64,
    ) -> Result<(), RejectReason> {
        let mut state = self.state.lock().await;
        let key = (user_id.to_string(), asset.to_string());
        if let Some(params) = params {
            state.check(params, &key, side, quantity, now)?;
        }
        *state.open.entry(key).or_default().side_mut(side) += quantity;
        Ok(())
    }

    /// Count `quantity` as open exposure without a check (state restore).
    pub async fn reserve(&self, user_id: &str, asset: &str, side: Side, quantity: f64) {
        let mut state = self.state.lock().await;
        let key = (user_id.to_string(), asset.to_string());
        *state.open.entry(key).or_default().side_mut(side) += quantity;
    }

    /// Release open exposure that was filled or will never fill.
    pub async fn release(&self, user_id: &str, asset: &str, side: Side, quantity: f64) {
        let mut state = self.state.lock().await;
        let key = (user_id.to_string(), asset.to_string());
        let Some(open) = state.open.get_mut(&key) else {
            return;
        };
        let slot = open.side_mut(side);
        *slot = (*slot - quantity).max(0.0);
        if open.buy <= FLAT_EPS && open.sell <= FLAT_EPS {
            state.open.remove(&key);
        }
    }

    /// Open exposure of `user_id` in `asset`.
    pub async fn open_exposure(&self, user_id: &str, asset: &str) -> OpenExposure {
        let state = self.state.lock().await;
        state.open(&(user_id.to_string(), asset.to_string()))
    }

    /// Drop everything (used before a state restore).
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.books.clear();
        state.open.clear();
        state.daily.clear();
    }
}

fn daily_for(state: &TrackerState, user_id: &str, now: u64) -> f64 {
    state
        .daily
        .get(user_id)
        .filter(|d| d.day == day_index(now))
        .map(|d| d.realized)
        .unwrap_or(0.0)
}

/// Fold a fill into `book`; returns gross realized PnL.
fn apply_to_book(book: &mut Book, side: Side, quantity: f64, price: f64) -> f64 {
    let signed = side.sign() * quantity;
    let net = book.net_quantity;

    if net.abs() <= FLAT_EPS || net.signum() == signed.signum() {
        let new_net = net + signed;
        book.average_entry_price =
            (book.average_entry_price * net.abs() + price * quantity) / new_net.abs();
        book.net_quantity = new_net;
        return 0.0;
    }

    let closing = quantity.min(net.abs());
    let pnl = (price - book.average_entry_price) * closing * net.signum();
    let new_net = net + signed;
    if new_net.abs() <= FLAT_EPS {
        book.net_quantity = 0.0;
        book.average_entry_price = 0.0;
    } else if new_net.signum() != net.signum() {
        // flipped through zero: the remainder opens at the fill price
        book.net_quantity = new_net;
        book.average_entry_price = price;
    } else {
        book.net_quantity = new_net;
    }
    pnl
}

fn to_position(user_id: &str, asset: &str, book: &Book, mark: Option<f64>) -> Position {
    let unrealized = match mark {
        Some(mark) if book.net_quantity.abs() > FLAT_EPS => {
            (mark - book.average_entry_price) * book.net_quantity
        }
        _ => 0.0,
    };
    Position {
        user_id: user_id.to_string(),
        asset: asset.to_string(),
        net_quantity: book.net_quantity,
        average_entry_price: book.average_entry_price,
        realized_pnl: book.realized_pnl,
        unrealized_pnl: unrealized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atx_core::time_util::DAY_MS;

    fn fill(side: Side, quantity: f64, price: f64, fee: f64, ts: u64) -> FillEvent<'static> {
        FillEvent {
            user_id: "alice",
            asset: "ETHUSDC",
            side,
            quantity,
            price,
            fee,
            ts,
        }
    }

    #[tokio::test]
    async fn averages_entries_and_realizes_on_close() {
        let t = PositionTracker::new();
        t.record_fill(fill(Side::Buy, 1.0, 100.0, 0.0, 0)).await;
        t.record_fill(fill(Side::Buy, 1.0, 110.0, 0.0, 0)).await;
        let p = t.position("alice", "ETHUSDC", Some(120.0)).await.unwrap();
        assert_eq!(p.net_quantity, 2.0);
        assert!((p.average_entry_price - 105.0).abs() < 1e-9);
        assert!((p.unrealized_pnl - 30.0).abs() < 1e-9);

        let realized = t.record_fill(fill(Side::Sell, 1.0, 115.0, 0.5, 0)).await;
        assert!((realized - 9.5).abs() < 1e-9);
        let p = t.position("alice", "ETHUSDC", None).await.unwrap();
        assert_eq!(p.net_quantity, 1.0);
        assert!((p.average_entry_price - 105.0).abs() < 1e-9);
        assert!((p.realized_pnl - 9.5).abs() < 1e-9);
        assert_eq!(p.unrealized_pnl, 0.0);
    }

    #[tokio::test]
    async fn flips_through_zero() {
        let t = PositionTracker::new();
        t.record_fill(fill(Side::Buy, 1.0, 100.0, 0.0, 0)).await;
        let realized = t.record_fill(fill(Side::Sell, 3.0, 90.0, 0.0, 0)).await;
        assert!((realized + 10.0).abs() < 1e-9);
        let p = t.position("alice", "ETHUSDC", Some(80.0)).await.unwrap();
        assert_eq!(p.net_quantity, -2.0);
        assert_eq!(p.average_entry_price, 90.0);
        assert!((p.unrealized_pnl - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn position_limit_uses_projected_net() {
        let t = PositionTracker::new();
        t.record_fill(fill(Side::Buy, 4.0, 100.0, 0.0, 0)).await;
        let params = RiskParameters {
            max_position_size: Some(5.0),
            max_daily_loss: None,
        };
        assert!(t.check(&params, "alice", "ETHUSDC", Side::Buy, 1.0, 0).await.is_ok());
        assert!(matches!(
            t.check(&params, "alice", "ETHUSDC", Side::Buy, 1.5, 0).await,
            Err(RejectReason::PositionLimitExceeded { .. })
        ));
        // reducing is always fine
        assert!(t.check(&params, "alice", "ETHUSDC", Side::Sell, 9.0, 0).await.is_ok());
    }

    #[tokio::test]
    async fn open_orders_count_towards_position_limit() {
        async fn admit(t: &PositionTracker, side: Side, qty: f64) -> Result<(), RejectReason> {
            let params = RiskParameters {
                max_position_size: Some(5.0),
                max_daily_loss: None,
            };
            t.admit(Some(&params), "alice", "ETHUSDC", side, qty, 0).await
        }

        let t = PositionTracker::new();
        assert!(admit(&t, Side::Buy, 3.0).await.is_ok());
        assert!(matches!(
            admit(&t, Side::Buy, 3.0).await,
            Err(RejectReason::PositionLimitExceeded { projected, .. }) if projected == 6.0
        ));
        // open buys do not offset a sell
        assert!(admit(&t, Side::Sell, 5.0).await.is_ok());
        assert!(admit(&t, Side::Sell, 0.5).await.is_err());
        assert_eq!(
            t.open_exposure("alice", "ETHUSDC").await,
            OpenExposure { buy: 3.0, sell: 5.0 }
        );

        // the first buy fills: exposure moves from open to net
        t.release("alice", "ETHUSDC", Side::Buy, 3.0).await;
        t.record_fill(fill(Side::Buy, 3.0, 100.0, 0.0, 0)).await;
        assert!(admit(&t, Side::Buy, 3.0).await.is_err());
        assert!(admit(&t, Side::Buy, 2.0).await.is_ok());

        t.release("alice", "ETHUSDC", Side::Buy, 2.0).await;
        t.release("alice", "ETHUSDC", Side::Sell, 5.0).await;
        assert_eq!(t.open_exposure("alice", "ETHUSDC").await, OpenExposure::default());
    }

    #[tokio::test]
    async fn daily_loss_is_strict_and_resets_per_day() {
        let t = PositionTracker::new();
        t.record_fill(fill(Side::Buy, 1.0, 100.0, 0.0, 10)).await;
        t.record_fill(fill(Side::Sell, 1.0, 50.0, 0.0, 20)).await;
        assert_eq!(t.daily_realized_pnl("alice", 30).await, -50.0);

        let at_limit = RiskParameters {
            max_position_size: None,
            max_daily_loss: Some(50.0),
        };
        assert!(t.check(&at_limit, "alice", "ETHUSDC", Side::Buy, 1.0, 30).await.is_ok());

        let below = RiskParameters {
            max_position_size: None,
            max_daily_loss: Some(49.0),
        };
        assert!(matches!(
            t.check(&below, "alice", "ETHUSDC", Side::Buy, 1.0, 30).await,
            Err(RejectReason::DailyLossLimitExceeded { .. })
        ));
        assert!(t.check(&below, "alice", "ETHUSDC", Side::Buy, 1.0, DAY_MS + 1).await.is_ok());
        assert_eq!(t.daily_realized_pnl("alice", DAY_MS + 1).await, 0.0);
    }

    #[tokio::test]
    async fn positions_are_per_user() {
        let t = PositionTracker::new();
        t.record_fill(fill(Side::Buy, 1.0, 100.0, 0.0, 0)).await;
        t.record_fill(FillEvent {
            user_id: "bob",
            ..fill(Side::Sell, 2.0, 100.0, 0.0, 0)
        })
        .await;
        let marks = HashMap::new();
        assert_eq!(t.positions("alice", &marks).await.len(), 1);
        assert_eq!(t.net_quantity("bob", "ETHUSDC").await, -2.0);
        assert_eq!(t.open_assets("alice").await, vec!["ETHUSDC".to_string()]);
    }
}

//! Paper execution venue.
//!
//! Fills orders against the market data gateway's spot price instead of a
//! real exchange. Marketable orders fill in full at submit time; everything
//! else rests until [`PaperVenue::match_resting`] finds its trigger or limit
//! crossed. Immediate-or-cancel and fill-or-kill orders that cannot fill at
//! submit time are expired straight away.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use async_trait::async_trait;
use atx_core::error::ExecutionError;
use atx_core::types::{Order, OrderId, OrderKind, Side, TimeInForce, TrailingOffset};
use atx_md::MarketDataGateway;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::execution::{ExecutionReport, ExecutionVenue, ReportSender};

#[derive(Debug, Clone)]
struct RestingOrder {
    asset: String,
    side: Side,
    remaining: f64,
    kind: OrderKind,
    /// Stop-limit: the stop has been hit and the order now works as a limit.
    triggered: bool,
    /// Trailing stop: current stop level.
    trail_stop: Option<f64>,
}

impl RestingOrder {
    fn new(order: &Order, price: f64) -> Self {
        let trail_stop = match order.kind {
            OrderKind::TrailingStop { offset } => {
                let distance = trail_distance(offset, price);
                Some(match order.side {
                    Side::Sell => price - distance,
                    Side::Buy => price + distance,
                })
            }
            _ => None,
        };
        Self {
            asset: order.asset().to_string(),
            side: order.side,
            remaining: order.remaining(),
            kind: order.kind,
            triggered: false,
            trail_stop,
        }
    }

    /// Fill price at market `price`, if the order executes now.
    fn execution_price(&mut self, price: f64) -> Option<f64> {
        match self.kind {
            OrderKind::Market | OrderKind::Conditional { price: None } => Some(price),
            OrderKind::Limit { price: limit } | OrderKind::Conditional { price: Some(limit) } => {
                crosses(self.side, limit, price).then_some(price)
            }
            OrderKind::Stop { stop_price } => stop_hit(self.side, stop_price, price).then_some(price),
            OrderKind::StopLimit {
                stop_price,
                limit_price,
            } => {
                if !self.triggered && stop_hit(self.side, stop_price, price) {
                    self.triggered = true;
                }
                (self.triggered && crosses(self.side, limit_price, price)).then_some(price)
            }
            OrderKind::TrailingStop { offset } => {
                let distance = trail_distance(offset, price);
                let stop = match (self.side, self.trail_stop) {
                    (Side::Sell, Some(s)) => s.max(price - distance),
                    (Side::Buy, Some(s)) => s.min(price + distance),
                    (Side::Sell, None) => price - distance,
                    (Side::Buy, None) => price + distance,
                };
                self.trail_stop = Some(stop);
                stop_hit(self.side, stop, price).then_some(price)
            }
        }
    }
}

fn trail_distance(offset: TrailingOffset, price: f64) -> f64 {
    match offset {
        TrailingOffset::Amount(a) => a,
        TrailingOffset::Percent(p) => price * p / 100.0,
    }
}

/// A buy limit executes at or below its price, a sell at or above.
fn crosses(side: Side, limit: f64, price: f64) -> bool {
    match side {
        Side::Buy => price <= limit,
        Side::Sell => price >= limit,
    }
}

/// A buy stop triggers at or above its price, a sell stop at or below.
fn stop_hit(side: Side, stop: f64, price: f64) -> bool {
    match side {
        Side::Buy => price >= stop,
        Side::Sell => price <= stop,
    }
}

pub struct PaperVenue {
    gateway: Arc<dyn MarketDataGateway>,
    reports: ReportSender,
    resting: Mutex<AHashMap<OrderId, RestingOrder>>,
}

impl PaperVenue {
    pub fn new(gateway: Arc<dyn MarketDataGateway>, reports: ReportSender) -> Self {
        Self {
            gateway,
            reports,
            resting: Mutex::new(AHashMap::new()),
        }
    }

    async fn spot(&self, asset: &str) -> Result<f64, ExecutionError> {
        self.gateway
            .snapshot(asset)
            .await
            .map(|s| s.price)
            .map_err(|e| ExecutionError::Venue(e.to_string()))
    }

    fn report(&self, report: ExecutionReport) {
        if self.reports.send(report).is_err() {
            warn!("[paper] report channel closed, dropping report");
        }
    }

    /// Number of orders currently resting.
    pub async fn resting_count(&self) -> usize {
        self.resting.lock().await.len()
    }

    /// Re-price every resting order and fill those whose trigger or limit
    /// is crossed. Returns the number of fills sent.
    pub async fn match_resting(&self) -> usize {
        let assets: Vec<String> = {
            let resting = self.resting.lock().await;
            let mut assets: Vec<String> = resting.values().map(|r| r.asset.clone()).collect();
            assets.sort();
            assets.dedup();
            assets
        };

        let mut prices = AHashMap::new();
        for asset in assets {
            match self.spot(&asset).await {
                Ok(price) => {
                    prices.insert(asset, price);
                }
                Err(e) => debug!("[paper] no price for {asset}: {e}"),
            }
        }

        let mut fills = Vec::new();
        {
            let mut resting = self.resting.lock().await;
            resting.retain(|id, order| {
                let Some(&price) = prices.get(&order.asset) else {
                    return true;
                };
                match order.execution_price(price) {
                    Some(px) => {
                        fills.push(ExecutionReport::fill(*id, order.remaining, px));
                        false
                    }
                    None => true,
                }
            });
        }

        let count = fills.len();
        for fill in fills {
            debug!(order_id = %fill.order_id, "[paper] resting order filled");
            self.report(fill);
        }
        count
    }

    /// Run [`match_resting`](Self::match_resting) every `every` until
    /// shutdown is signalled.
    pub async fn run_matching(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.match_resting().await;
                }
                _ = shutdown.changed() => {
                    info!("[paper] matching loop stopped");
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl ExecutionVenue for PaperVenue {
    fn name(&self) -> &str {
        "paper"
    }

    async fn submit(&self, order: &Order) -> Result<(), ExecutionError> {
        let price = self.spot(order.asset()).await?;
        let mut resting = RestingOrder::new(order, price);

        if let Some(px) = resting.execution_price(price) {
            debug!(order_id = %order.id, price = px, "[paper] filled on submit");
            self.report(ExecutionReport::fill(order.id, resting.remaining, px));
            return Ok(());
        }

        match order.time_in_force {
            TimeInForce::ImmediateOrCancel | TimeInForce::FillOrKill => {
                debug!(order_id = %order.id, "[paper] not marketable, expiring");
                self.report(ExecutionReport::expired(order.id));
            }
            TimeInForce::GoodTillCancel | TimeInForce::GoodTillDate { .. } => {
                debug!(order_id = %order.id, kind = %order.kind.tag(), "[paper] resting");
                self.resting.lock().await.insert(order.id, resting);
            }
        }
        Ok(())
    }

    async fn cancel(&self, order_id: OrderId) -> Result<(), ExecutionError> {
        match self.resting.lock().await.remove(&order_id) {
            Some(_) => Ok(()),
            None => Err(ExecutionError::NotFound(order_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ExecutionEvent, report_channel};
    use crate::testutil::{StaticGateway, order_with_kind};
    use atx_core::types::OrderStatus;

    fn venue(price: f64) -> (Arc<StaticGateway>, PaperVenue, crate::execution::ReportReceiver) {
        let gateway = Arc::new(StaticGateway::new());
        gateway.set_price("ETHUSDC", price);
        let (tx, rx) = report_channel();
        let venue = PaperVenue::new(gateway.clone(), tx);
        (gateway, venue, rx)
    }

    fn active(kind: OrderKind, side: Side, tif: TimeInForce) -> Order {
        let mut order = order_with_kind(kind, side, 2.0);
        order.status = OrderStatus::Active;
        order.time_in_force = tif;
        order
    }

    #[tokio::test]
    async fn market_fills_on_submit() {
        let (_, venue, mut rx) = venue(2000.0);
        let order = active(OrderKind::Market, Side::Buy, TimeInForce::GoodTillCancel);
        venue.submit(&order).await.unwrap();
        let report = rx.recv().await.unwrap();
        assert_eq!(
            report.event,
            ExecutionEvent::Fill {
                quantity: 2.0,
                price: 2000.0
            }
        );
        assert_eq!(venue.resting_count().await, 0);
    }

    #[tokio::test]
    async fn limit_rests_until_crossed() {
        let (gateway, venue, mut rx) = venue(2000.0);
        let order = active(
            OrderKind::Limit { price: 1900.0 },
            Side::Buy,
            TimeInForce::GoodTillCancel,
        );
        venue.submit(&order).await.unwrap();
        assert_eq!(venue.resting_count().await, 1);
        assert_eq!(venue.match_resting().await, 0);

        gateway.set_price("ETHUSDC", 1890.0);
        assert_eq!(venue.match_resting().await, 1);
        let report = rx.recv().await.unwrap();
        assert_eq!(report.order_id, order.id);
        assert!(matches!(report.event, ExecutionEvent::Fill { price, .. } if price == 1890.0));
    }

    #[tokio::test]
    async fn ioc_not_marketable_expires() {
        let (_, venue, mut rx) = venue(2000.0);
        let order = active(
            OrderKind::Limit { price: 1900.0 },
            Side::Buy,
            TimeInForce::ImmediateOrCancel,
        );
        venue.submit(&order).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().event, ExecutionEvent::Expired);
        assert_eq!(venue.resting_count().await, 0);
    }

    #[tokio::test]
    async fn trailing_stop_follows_price() {
        let (gateway, venue, _rx) = venue(100.0);
        let order = active(
            OrderKind::TrailingStop {
                offset: TrailingOffset::Amount(5.0),
            },
            Side::Sell,
            TimeInForce::GoodTillCancel,
        );
        venue.submit(&order).await.unwrap();
        gateway.set_price("ETHUSDC", 120.0);
        assert_eq!(venue.match_resting().await, 0);
        // stop trailed up to 115
        gateway.set_price("ETHUSDC", 116.0);
        assert_eq!(venue.match_resting().await, 0);
        gateway.set_price("ETHUSDC", 114.0);
        assert_eq!(venue.match_resting().await, 1);
    }

    #[tokio::test]
    async fn stop_limit_needs_trigger_then_limit() {
        let (gateway, venue, _rx) = venue(100.0);
        let order = active(
            OrderKind::StopLimit {
                stop_price: 90.0,
                limit_price: 92.0,
            },
            Side::Sell,
            TimeInForce::GoodTillCancel,
        );
        venue.submit(&order).await.unwrap();
        gateway.set_price("ETHUSDC", 95.0);
        assert_eq!(venue.match_resting().await, 0);
        gateway.set_price("ETHUSDC", 89.0);
        // triggered, but 89 is below the sell limit
        assert_eq!(venue.match_resting().await, 0);
        gateway.set_price("ETHUSDC", 93.0);
        assert_eq!(venue.match_resting().await, 1);
    }

    #[tokio::test]
    async fn cancel_unknown_is_not_found() {
        let (_, venue, _rx) = venue(100.0);
        let id = uuid::Uuid::new_v4();
        assert_eq!(venue.cancel(id).await, Err(ExecutionError::NotFound(id)));
    }
}

//! Shared fixtures for engine tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use atx_core::error::GatewayError;
use atx_core::types::{
    MarketSnapshot, Order, OrderKind, OrderMetadata, OrderStatus, PricePoint, Side, TimeInForce,
    TradingPair,
};
use atx_md::MarketDataGateway;
use uuid::Uuid;

pub fn pair() -> TradingPair {
    TradingPair {
        symbol: "ETHUSDC".into(),
        base: "ETH".into(),
        quote: "USDC".into(),
        tick_size: 0.1,
        min_order_size: 0.1,
        max_order_size: 1000.0,
        maker_fee: 0.001,
        taker_fee: 0.002,
        active: true,
    }
}

/// A pending market buy of 1.0 owned by `user`.
pub fn order_for(user: &str, created_at: u64, pair: &TradingPair) -> Order {
    Order {
        id: Uuid::new_v4(),
        user_id: user.into(),
        wallet_address: "0xwallet".into(),
        pair: pair.clone(),
        kind: OrderKind::Market,
        side: Side::Buy,
        quantity: 1.0,
        time_in_force: TimeInForce::GoodTillCancel,
        conditions: Vec::new(),
        status: OrderStatus::Pending,
        filled_quantity: 0.0,
        average_fill_price: None,
        fees_paid: 0.0,
        reject_reason: None,
        created_at,
        updated_at: created_at,
        metadata: OrderMetadata::default(),
    }
}

pub fn order_with_kind(kind: OrderKind, side: Side, quantity: f64) -> Order {
    let mut order = order_for("alice", 0, &pair());
    order.kind = kind;
    order.side = side;
    order.quantity = quantity;
    order
}

/// Snapshot whose history is `closes` and whose price is the last close.
pub fn snapshot_from(asset: &str, closes: &[f64]) -> MarketSnapshot {
    let price = closes.last().copied().unwrap_or(0.0);
    let mut snap = MarketSnapshot::spot(asset, price, 0);
    snap.history = closes
        .iter()
        .enumerate()
        .map(|(i, &p)| PricePoint {
            ts: i as u64 * 1000,
            price: p,
        })
        .collect();
    snap
}

/// Gateway serving fixed snapshots, with scripted failures.
#[derive(Default)]
pub struct StaticGateway {
    snapshots: Mutex<HashMap<String, MarketSnapshot>>,
    failures: Mutex<HashMap<String, VecDeque<GatewayError>>>,
    stalled: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl StaticGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the spot price, appending it to the snapshot history.
    pub fn set_price(&self, asset: &str, price: f64) {
        let mut snapshots = self.snapshots.lock().unwrap();
        let snap = snapshots
            .entry(asset.to_string())
            .or_insert_with(|| MarketSnapshot::spot(asset, price, 0));
        let ts = snap.history.len() as u64 * 1000;
        snap.price = price;
        snap.history.push(PricePoint { ts, price });
    }

    pub fn set_snapshot(&self, snapshot: MarketSnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(snapshot.asset.clone(), snapshot);
    }

    /// Make the next call for `asset` fail with `error`.
    pub fn fail_next(&self, asset: &str, error: GatewayError) {
        self.failures
            .lock()
            .unwrap()
            .entry(asset.to_string())
            .or_default()
            .push_back(error);
    }

    /// Make every call for `asset` hang for an hour.
    pub fn stall(&self, asset: &str) {
        self.stalled.lock().unwrap().insert(asset.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataGateway for StaticGateway {
    async fn snapshot(&self, asset: &str) -> Result<MarketSnapshot, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stalled = self.stalled.lock().unwrap().contains(asset);
        if stalled {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some(err) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(asset)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        self.snapshots
            .lock()
            .unwrap()
            .get(asset)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownAsset(asset.to_string()))
    }
}

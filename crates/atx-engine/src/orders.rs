//! Order state machine.
//!
//! Owns validation, acceptance-time risk checks, lifecycle transitions and
//! fill accounting for every order. Transitions follow
//! [`OrderStatus::can_transition_to`]; anything else is refused and logged.
//!
//! Conditional orders are stored `pending` and put on a watch list that the
//! scheduler evaluates each cycle. Every other accepted order goes straight
//! to `active` and is queued for the venue dispatcher.

use std::sync::Arc;

use ahash::AHashSet;
use atx_core::error::{ControlError, ExecutionError, OrderRejected, RejectReason};
use atx_core::time_util::Clock;
use atx_core::types::{
    Order, OrderId, OrderKind, OrderKindTag, OrderRequest, OrderStatus, TimeInForce,
    TimeInForceTag, TradingPair, TrailingOffset, parse_timeframe,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::execution::{CommandSender, ExecutionEvent, ExecutionReport, VenueCommand};
use crate::pairs::PairRegistry;
use crate::risk::{FillEvent, PositionTracker};
use crate::store::OrderStore;

/// Relative tolerance when comparing filled quantity against order quantity.
const QTY_EPS: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// The typed parts of a request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    pub pair: TradingPair,
    pub kind: OrderKind,
    pub time_in_force: TimeInForce,
}

/// Validate a flat request against the configured pairs.
///
/// Checks run in a fixed order and the first failure wins: pair, quantity,
/// kind-specific prices, time-in-force, then trigger conditions.
pub fn validate_request(
    req: &OrderRequest,
    pairs: &PairRegistry,
    now: u64,
) -> Result<Accepted, RejectReason> {
    let pair = pairs.get(&req.pair).ok_or_else(|| RejectReason::UnknownPair {
        symbol: req.pair.clone(),
    })?;
    if !pair.active {
        return Err(RejectReason::PairInactive {
            symbol: pair.symbol.clone(),
        });
    }

    let quantity = req.quantity;
    if !(quantity.is_finite() && quantity > 0.0) {
        return Err(RejectReason::QuantityNotPositive { quantity });
    }
    if quantity < pair.min_order_size * (1.0 - QTY_EPS) {
        return Err(RejectReason::QuantityBelowMinimum {
            quantity,
            min: pair.min_order_size,
        });
    }
    if quantity > pair.max_order_size * (1.0 + QTY_EPS) {
        return Err(RejectReason::QuantityAboveMaximum {
            quantity,
            max: pair.max_order_size,
        });
    }
    if !pair.is_aligned(quantity) {
        return Err(RejectReason::QuantityNotAligned {
            quantity,
            tick_size: pair.tick_size,
        });
    }

    let kind = resolve_kind(req)?;
    let time_in_force = resolve_time_in_force(req, now)?;
    validate_conditions(req)?;

    Ok(Accepted {
        pair: pair.clone(),
        kind,
        time_in_force,
    })
}

fn positive(field: &str, value: f64) -> Result<f64, RejectReason> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(RejectReason::InvalidPrice {
            field: field.to_string(),
            value,
        })
    }
}

fn resolve_kind(req: &OrderRequest) -> Result<OrderKind, RejectReason> {
    let kind = req.kind;
    let price = || req.price.ok_or(RejectReason::MissingPrice { kind });
    let stop = || req.stop_price.ok_or(RejectReason::MissingStopPrice { kind });

    Ok(match kind {
        OrderKindTag::Market => OrderKind::Market,
        OrderKindTag::Limit => OrderKind::Limit {
            price: positive("price", price()?)?,
        },
        OrderKindTag::Stop => OrderKind::Stop {
            stop_price: positive("stopPrice", stop()?)?,
        },
        OrderKindTag::StopLimit => {
            let stop_price = positive("stopPrice", stop()?)?;
            let limit = req.limit_price.or(req.price).ok_or(RejectReason::MissingPrice { kind })?;
            OrderKind::StopLimit {
                stop_price,
                limit_price: positive("limitPrice", limit)?,
            }
        }
        OrderKindTag::TrailingStop => {
            let offset = match (req.trailing_amount, req.trailing_percent) {
                (Some(amount), None) => TrailingOffset::Amount(positive("trailingAmount", amount)?),
                (None, Some(pct)) if pct < 100.0 => {
                    TrailingOffset::Percent(positive("trailingPercent", pct)?)
                }
                (None, Some(pct)) => {
                    return Err(RejectReason::InvalidPrice {
                        field: "trailingPercent".into(),
                        value: pct,
                    });
                }
                _ => return Err(RejectReason::TrailingOffsetRequired),
            };
            OrderKind::TrailingStop { offset }
        }
        OrderKindTag::Conditional => OrderKind::Conditional {
            price: req.price.map(|p| positive("price", p)).transpose()?,
        },
    })
}

fn resolve_time_in_force(req: &OrderRequest, now: u64) -> Result<TimeInForce, RejectReason> {
    Ok(match req.time_in_force {
        TimeInForceTag::GoodTillCancel => TimeInForce::GoodTillCancel,
        TimeInForceTag::ImmediateOrCancel => TimeInForce::ImmediateOrCancel,
        TimeInForceTag::FillOrKill => TimeInForce::FillOrKill,
        TimeInForceTag::GoodTillDate => {
            let expires_at = req.expires_at.ok_or(RejectReason::MissingExpiry)?;
            if expires_at <= now {
                return Err(RejectReason::ExpiryInPast { expires_at, now });
            }
            TimeInForce::GoodTillDate { expires_at }
        }
    })
}

fn validate_conditions(req: &OrderRequest) -> Result<(), RejectReason> {
    if req.kind != OrderKindTag::Conditional {
        if req.conditions.is_empty() {
            return Ok(());
        }
        return Err(RejectReason::InvalidCondition {
            index: 0,
            reason: format!("{} orders cannot carry trigger conditions", req.kind),
        });
    }
    if req.conditions.is_empty() {
        return Err(RejectReason::MissingConditions);
    }
    for (index, condition) in req.conditions.iter().enumerate() {
        let invalid = |reason: &str| RejectReason::InvalidCondition {
            index,
            reason: reason.to_string(),
        };
        if condition.asset.trim().is_empty() {
            return Err(invalid("asset is empty"));
        }
        if !condition.value.is_finite() {
            return Err(invalid("value is not a finite number"));
        }
        if let Some(tf) = &condition.timeframe {
            if parse_timeframe(tf).is_none() {
                return Err(invalid(&format!("unknown timeframe `{tf}`")));
            }
        }
    }
    Ok(())
}

/// Best-effort typed kind for a request that failed validation.
fn lossy_kind(req: &OrderRequest) -> OrderKind {
    match req.kind {
        OrderKindTag::Market => OrderKind::Market,
        OrderKindTag::Limit => OrderKind::Limit {
            price: req.price.unwrap_or_default(),
        },
        OrderKindTag::Stop => OrderKind::Stop {
            stop_price: req.stop_price.unwrap_or_default(),
        },
        OrderKindTag::StopLimit => OrderKind::StopLimit {
            stop_price: req.stop_price.unwrap_or_default(),
            limit_price: req.limit_price.or(req.price).unwrap_or_default(),
        },
        OrderKindTag::TrailingStop => OrderKind::TrailingStop {
            offset: match req.trailing_percent {
                Some(p) => TrailingOffset::Percent(p),
                None => TrailingOffset::Amount(req.trailing_amount.unwrap_or_default()),
            },
        },
        OrderKindTag::Conditional => OrderKind::Conditional { price: req.price },
    }
}

fn lossy_time_in_force(req: &OrderRequest) -> TimeInForce {
    match req.time_in_force {
        TimeInForceTag::GoodTillCancel => TimeInForce::GoodTillCancel,
        TimeInForceTag::ImmediateOrCancel => TimeInForce::ImmediateOrCancel,
        TimeInForceTag::FillOrKill => TimeInForce::FillOrKill,
        TimeInForceTag::GoodTillDate => TimeInForce::GoodTillDate {
            expires_at: req.expires_at.unwrap_or_default(),
        },
    }
}

/// Move `order` to `to` if the lifecycle allows it.
fn transition(order: &mut Order, to: OrderStatus, now: u64) -> bool {
    if !order.status.can_transition_to(to) {
        warn!(
            order_id = %order.id,
            from = %order.status,
            to = %to,
            "[orders] refused transition"
        );
        return false;
    }
    debug!(order_id = %order.id, from = %order.status, to = %to, "[orders] transition");
    order.status = to;
    order.updated_at = now;
    true
}

fn finish(order: &mut Order, to: OrderStatus, now: u64, event: &'static str) -> Result<(), ExecutionError> {
    if transition(order, to, now) {
        Ok(())
    } else {
        Err(ExecutionError::InvalidState {
            id: order.id,
            status: order.status,
            event,
        })
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

pub struct OrderStateMachine {
    pairs: Arc<PairRegistry>,
    store: OrderStore,
    tracker: Arc<PositionTracker>,
    /// Pending conditional orders awaiting their conditions.
    watched: Mutex<AHashSet<OrderId>>,
    commands: CommandSender,
    clock: Arc<dyn Clock>,
}

impl OrderStateMachine {
    pub fn new(
        pairs: Arc<PairRegistry>,
        tracker: Arc<PositionTracker>,
        commands: CommandSender,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pairs,
            store: OrderStore::new(),
            tracker,
            watched: Mutex::new(AHashSet::new()),
            commands,
            clock,
        }
    }

    pub fn store(&self) -> &OrderStore {
        &self.store
    }

    /// Release whatever `order` will no longer fill from the tracker's open
    /// exposure. Called once an accepted order leaves the working set
    /// without filling completely.
    async fn release_open(&self, order: &Order) {
        let remaining = order.remaining();
        if remaining > 0.0 {
            self.tracker
                .release(&order.user_id, &order.pair.symbol, order.side, remaining)
                .await;
        }
    }

    fn dispatch(&self, command: VenueCommand) {
        if self.commands.send(command).is_err() {
            warn!("[orders] venue dispatcher is gone, command dropped");
        }
    }

    /// Validate, risk-check and accept an order request.
    ///
    /// A refused request is still stored, as a `rejected` record carrying
    /// the reason, and the returned error names that record.
    pub async fn submit(&self, req: OrderRequest) -> Result<Order, OrderRejected> {
        let now = self.clock.now_ms();
        let id = Uuid::new_v4();

        let accepted = match validate_request(&req, &self.pairs, now) {
            Ok(accepted) => accepted,
            Err(reason) => return Err(self.store_rejected(id, req, reason, now).await),
        };
        let admitted = self
            .tracker
            .admit(
                req.metadata.risk_parameters.as_ref(),
                &req.user_id,
                &accepted.pair.symbol,
                req.side,
                req.quantity,
                now,
            )
            .await;
        if let Err(reason) = admitted {
            return Err(self.store_rejected(id, req, reason, now).await);
        }

        let mut order = Order {
            id,
            user_id: req.user_id,
            wallet_address: req.wallet_address,
            pair: accepted.pair,
            kind: accepted.kind,
            side: req.side,
            quantity: req.quantity,
            time_in_force: accepted.time_in_force,
            conditions: req.conditions,
            status: OrderStatus::Pending,
            filled_quantity: 0.0,
            average_fill_price: None,
            fees_paid: 0.0,
            reject_reason: None,
            created_at: now,
            updated_at: now,
            metadata: req.metadata,
        };

        if order.is_conditional() {
            self.store.insert(order.clone()).await;
            self.watched.lock().await.insert(id);
            info!(
                order_id = %id,
                user = %order.user_id,
                pair = %order.pair.symbol,
                conditions = order.conditions.len(),
                "[orders] conditional order pending"
            );
            return Ok(order);
        }

        transition(&mut order, OrderStatus::Active, now);
        self.store.insert(order.clone()).await;
        info!(
            order_id = %id,
            user = %order.user_id,
            pair = %order.pair.symbol,
            kind = %order.kind.tag(),
            side = %order.side,
            quantity = order.quantity,
            "[orders] order accepted"
        );
        self.dispatch(VenueCommand::Submit(order.clone()));
        Ok(order)
    }

    async fn store_rejected(
        &self,
        id: OrderId,
        req: OrderRequest,
        reason: RejectReason,
        now: u64,
    ) -> OrderRejected {
        let pair = self
            .pairs
            .get(&req.pair)
            .cloned()
            .unwrap_or_else(|| TradingPair::unlisted(&req.pair));
        let order = Order {
            id,
            kind: lossy_kind(&req),
            time_in_force: lossy_time_in_force(&req),
            user_id: req.user_id,
            wallet_address: req.wallet_address,
            pair,
            side: req.side,
            quantity: req.quantity,
            conditions: req.conditions,
            status: OrderStatus::Rejected,
            filled_quantity: 0.0,
            average_fill_price: None,
            fees_paid: 0.0,
            reject_reason: Some(reason.clone()),
            created_at: now,
            updated_at: now,
            metadata: req.metadata,
        };
        info!(order_id = %id, user = %order.user_id, "[orders] rejected: {reason}");
        self.store.insert(order).await;
        OrderRejected {
            order_id: id,
            reason,
        }
    }

    pub async fn get(&self, id: OrderId) -> Option<Order> {
        self.store.snapshot(id).await
    }

    /// Cancel a non-terminal order. Working orders are also pulled from the
    /// venue.
    pub async fn cancel(&self, id: OrderId) -> Result<Order, ControlError> {
        let handle = self.store.get(id).await.ok_or(ControlError::NotFound(id))?;
        let mut order = handle.lock().await;
        if order.is_terminal() {
            return Err(ControlError::OrderTerminal {
                id,
                status: order.status,
            });
        }
        let was_working = order.status.is_working();
        transition(&mut order, OrderStatus::Cancelled, self.clock.now_ms());
        self.release_open(&order).await;
        self.watched.lock().await.remove(&id);
        if was_working {
            self.dispatch(VenueCommand::Cancel(id));
        }
        info!(order_id = %id, "[orders] cancelled");
        Ok(order.clone())
    }

    /// Cancel the orders among `ids` that are still `pending`; returns how
    /// many were cancelled. Working and terminal orders are left alone.
    pub async fn cancel_pending(&self, ids: &[OrderId], now: u64) -> usize {
        let mut cancelled = 0;
        for &id in ids {
            let Some(handle) = self.store.get(id).await else {
                continue;
            };
            let mut order = handle.lock().await;
            if order.status != OrderStatus::Pending {
                continue;
            }
            if transition(&mut order, OrderStatus::Cancelled, now) {
                self.release_open(&order).await;
                self.watched.lock().await.remove(&id);
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Pending conditional orders on the watch list. Orders that left
    /// `pending` are dropped from the list on the way.
    pub async fn watched_orders(&self) -> Vec<Order> {
        let ids: Vec<OrderId> = self.watched.lock().await.iter().copied().collect();
        let mut out = Vec::with_capacity(ids.len());
        let mut stale = Vec::new();
        for id in ids {
            match self.store.snapshot(id).await {
                Some(order) if order.status == OrderStatus::Pending => out.push(order),
                _ => stale.push(id),
            }
        }
        if !stale.is_empty() {
            let mut watched = self.watched.lock().await;
            for id in stale {
                watched.remove(&id);
            }
        }
        out.sort_by_key(|o| o.created_at);
        out
    }

    /// Activate a pending conditional order whose conditions hold.
    /// Returns `None` if the order is gone or no longer pending.
    pub async fn activate(&self, id: OrderId, now: u64) -> Option<Order> {
        let handle = self.store.get(id).await?;
        let mut order = handle.lock().await;
        self.watched.lock().await.remove(&id);
        if order.status != OrderStatus::Pending {
            return None;
        }
        transition(&mut order, OrderStatus::Active, now);
        info!(order_id = %id, "[orders] conditions met, order activated");
        self.dispatch(VenueCommand::Submit(order.clone()));
        Some(order.clone())
    }

    /// Reject a pending order that can no longer activate.
    pub async fn reject_pending(&self, id: OrderId, reason: RejectReason, now: u64) -> Option<Order> {
        let handle = self.store.get(id).await?;
        let mut order = handle.lock().await;
        self.watched.lock().await.remove(&id);
        if order.status != OrderStatus::Pending {
            return None;
        }
        transition(&mut order, OrderStatus::Rejected, now);
        self.release_open(&order).await;
        info!(order_id = %id, "[orders] pending order rejected: {reason}");
        order.reject_reason = Some(reason);
        Some(order.clone())
    }

    /// Expire every good-till-date order whose deadline has passed. A
    /// partially filled order has its remainder cancelled instead.
    pub async fn expire_due(&self, now: u64) -> Vec<OrderId> {
        let mut expired = Vec::new();
        for handle in self.store.handles().await {
            let mut order = handle.lock().await;
            if order.is_terminal() || !order.time_in_force.is_expired(now) {
                continue;
            }
            let target = if order.status == OrderStatus::PartiallyFilled {
                OrderStatus::Cancelled
            } else {
                OrderStatus::Expired
            };
            let was_working = order.status.is_working();
            if !transition(&mut order, target, now) {
                continue;
            }
            self.release_open(&order).await;
            if was_working {
                self.dispatch(VenueCommand::Cancel(order.id));
            } else {
                self.watched.lock().await.remove(&order.id);
            }
            info!(order_id = %order.id, status = %order.status, "[orders] good-till-date deadline passed");
            expired.push(order.id);
        }
        expired
    }

    /// Apply a venue report.
    pub async fn apply_report(&self, report: ExecutionReport) -> Result<Order, ExecutionError> {
        let id = report.order_id;
        let handle = self.store.get(id).await.ok_or(ExecutionError::NotFound(id))?;
        let mut order = handle.lock().await;
        let now = self.clock.now_ms();

        match report.event {
            ExecutionEvent::Fill { quantity, price } => {
                self.apply_fill(&mut order, quantity, price, now).await?;
            }
            ExecutionEvent::Rejected { reason } => {
                if order.status == OrderStatus::PartiallyFilled {
                    finish(&mut order, OrderStatus::Cancelled, now, "rejected")?;
                } else {
                    finish(&mut order, OrderStatus::Rejected, now, "rejected")?;
                    order.reject_reason = Some(RejectReason::Venue { reason });
                }
                info!(order_id = %id, status = %order.status, "[orders] venue refused order");
            }
            ExecutionEvent::Expired => {
                let target = if order.status == OrderStatus::PartiallyFilled {
                    OrderStatus::Cancelled
                } else {
                    OrderStatus::Expired
                };
                finish(&mut order, target, now, "expired")?;
                info!(order_id = %id, status = %order.status, "[orders] venue expired order");
            }
            ExecutionEvent::Cancelled => {
                finish(&mut order, OrderStatus::Cancelled, now, "cancelled")?;
                info!(order_id = %id, "[orders] venue cancelled order");
            }
        }
        if order.is_terminal() {
            self.release_open(&order).await;
        }
        Ok(order.clone())
    }

    async fn apply_fill(
        &self,
        order: &mut Order,
        quantity: f64,
        price: f64,
        now: u64,
    ) -> Result<(), ExecutionError> {
        let id = order.id;
        if !order.status.is_working() {
            return Err(ExecutionError::InvalidState {
                id,
                status: order.status,
                event: "fill",
            });
        }
        if !(quantity.is_finite() && quantity > 0.0 && price.is_finite() && price > 0.0) {
            return Err(ExecutionError::InvalidFill { id, quantity, price });
        }

        let tolerance = order.quantity * QTY_EPS;
        let mut filled = order.filled_quantity + quantity;
        if filled > order.quantity + tolerance {
            return Err(ExecutionError::OverFill {
                id,
                fill: quantity,
                filled: order.filled_quantity,
                quantity: order.quantity,
            });
        }
        if order.time_in_force == TimeInForce::FillOrKill && filled < order.quantity - tolerance {
            return Err(ExecutionError::FillOrKillPartial {
                id,
                fill: quantity,
                quantity: order.quantity,
            });
        }
        if (order.quantity - filled).abs() <= tolerance {
            filled = order.quantity;
        }

        let prior_notional = order.average_fill_price.unwrap_or(0.0) * order.filled_quantity;
        order.average_fill_price = Some((prior_notional + price * quantity) / filled);
        let rate = if order.kind.pays_maker_fee() {
            order.pair.maker_fee
        } else {
            order.pair.taker_fee
        };
        let fee = quantity * price * rate;
        order.fees_paid += fee;
        order.filled_quantity = filled;

        let target = if filled >= order.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        transition(order, target, now);

        self.tracker
            .release(&order.user_id, &order.pair.symbol, order.side, quantity)
            .await;
        self.tracker
            .record_fill(FillEvent {
                user_id: &order.user_id,
                asset: &order.pair.symbol,
                side: order.side,
                quantity,
                price,
                fee,
                ts: now,
            })
            .await;

        info!(
            order_id = %id,
            quantity,
            price,
            filled = order.filled_quantity,
            status = %order.status,
            "[orders] fill"
        );
        Ok(())
    }

    /// Drop terminal orders last updated before `before`, except those in
    /// `keep`. Returns how many were dropped.
    pub async fn prune_finished(&self, before: u64, keep: &AHashSet<OrderId>) -> usize {
        let pruned = self
            .store
            .prune(|o| o.is_terminal() && o.updated_at < before && !keep.contains(&o.id))
            .await;
        if !pruned.is_empty() {
            debug!("[orders] pruned {} finished orders", pruned.len());
        }
        pruned.len()
    }

    /// Load previously exported orders. Pending conditional orders go back
    /// on the watch list and every live order's unfilled remainder is
    /// counted as open exposure again.
    pub async fn restore(&self, orders: Vec<Order>) {
        let mut watched = Vec::new();
        for order in orders {
            if order.status == OrderStatus::Pending && order.is_conditional() {
                watched.push(order.id);
            }
            if !order.is_terminal() && order.remaining() > 0.0 {
                self.tracker
                    .reserve(&order.user_id, &order.pair.symbol, order.side, order.remaining())
                    .await;
            }
            self.store.insert(order).await;
        }
        self.watched.lock().await.extend(watched);
    }
}

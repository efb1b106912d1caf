//! Algorithm store and control plane.
//!
//! Creates algorithms from validated requests, applies user control actions
//! (pause, resume, stop) and applies scheduler tick results. Every mutation
//! happens under the algorithm's record lock; a tick result is applied only
//! if the algorithm is still `active` and its schedule revision is the one
//! the tick was evaluated against, so a tick racing a `stop` is discarded.

use std::sync::Arc;

use atx_core::error::{AlgorithmError, ControlError};
use atx_core::time_util::Clock;
use atx_core::types::{
    Algorithm, AlgorithmId, AlgorithmRequest, AlgorithmStatus, OrderId, OrderRequest,
    ScheduleState, StrategyState,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::orders::OrderStateMachine;
use crate::pairs::PairRegistry;
use crate::store::AlgorithmStore;
use crate::strategy::{self, ChildOrder, Evaluation};

/// What happened to a tick result.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Applied {
        /// Child order emitted by this tick (possibly rejected).
        child_order_id: Option<OrderId>,
        completed: bool,
    },
    /// The algorithm changed while the tick was being evaluated.
    Discarded,
    /// No snapshot could be obtained; only the error marker was updated.
    Failed,
}

pub struct AlgorithmManager {
    pairs: Arc<PairRegistry>,
    store: AlgorithmStore,
    orders: Arc<OrderStateMachine>,
    clock: Arc<dyn Clock>,
}

impl AlgorithmManager {
    pub fn new(pairs: Arc<PairRegistry>, orders: Arc<OrderStateMachine>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pairs,
            store: AlgorithmStore::new(),
            orders,
            clock,
        }
    }

    pub fn store(&self) -> &AlgorithmStore {
        &self.store
    }

    /// Validate a request and register the algorithm as `active`, due on
    /// the next scheduler cycle.
    pub async fn create(&self, req: AlgorithmRequest) -> Result<Algorithm, AlgorithmError> {
        let pair = self
            .pairs
            .get(&req.pair)
            .ok_or_else(|| AlgorithmError::UnknownPair(req.pair.clone()))?;
        if !pair.active {
            return Err(AlgorithmError::PairInactive(pair.symbol.clone()));
        }
        let strategy = strategy::initialize(req.params, pair)?;

        let now = self.clock.now_ms();
        let algorithm = Algorithm {
            id: Uuid::new_v4(),
            user_id: req.user_id,
            wallet_address: req.wallet_address,
            pair: pair.clone(),
            status: AlgorithmStatus::Active,
            strategy,
            schedule: ScheduleState {
                next_tick_at: now,
                ..ScheduleState::default()
            },
            child_order_ids: Vec::new(),
            risk_parameters: req.risk_parameters,
            created_at: now,
            updated_at: now,
        };
        info!(
            algorithm_id = %algorithm.id,
            user = %algorithm.user_id,
            kind = %algorithm.algorithm_type(),
            pair = %algorithm.pair.symbol,
            "[algo] created"
        );
        self.store.insert(algorithm.clone()).await;
        Ok(algorithm)
    }

    pub async fn get(&self, id: AlgorithmId) -> Option<Algorithm> {
        self.store.snapshot(id).await
    }

    /// Whether the algorithm exists and is `active`.
    pub async fn is_active(&self, id: AlgorithmId) -> bool {
        match self.store.get(id).await {
            Some(handle) => handle.lock().await.status == AlgorithmStatus::Active,
            None => false,
        }
    }

    async fn control(
        &self,
        id: AlgorithmId,
        from: AlgorithmStatus,
        to: AlgorithmStatus,
    ) -> Result<Algorithm, ControlError> {
        let handle = self.store.get(id).await.ok_or(ControlError::NotFound(id))?;
        let mut algo = handle.lock().await;
        if algo.status.is_terminal() {
            return Err(ControlError::AlgorithmTerminal {
                id,
                status: algo.status,
            });
        }
        if algo.status != from {
            return Err(ControlError::InvalidAlgorithmTransition {
                id,
                from: algo.status,
                to,
            });
        }
        algo.status = to;
        algo.schedule.revision += 1;
        algo.updated_at = self.clock.now_ms();
        info!(algorithm_id = %id, status = %to, "[algo] {from} -> {to}");
        Ok(algo.clone())
    }

    /// Suspend ticking. Schedule state is kept as is; ticks that come due
    /// while paused are skipped, not queued.
    pub async fn pause(&self, id: AlgorithmId) -> Result<Algorithm, ControlError> {
        self.control(id, AlgorithmStatus::Active, AlgorithmStatus::Paused)
            .await
    }

    /// Resume a paused algorithm with its accumulated progress.
    pub async fn resume(&self, id: AlgorithmId) -> Result<Algorithm, ControlError> {
        self.control(id, AlgorithmStatus::Paused, AlgorithmStatus::Active)
            .await
    }

    /// Stop for good. Child orders still `pending` are cancelled.
    pub async fn stop(&self, id: AlgorithmId) -> Result<Algorithm, ControlError> {
        let handle = self.store.get(id).await.ok_or(ControlError::NotFound(id))?;
        let mut algo = handle.lock().await;
        if algo.status.is_terminal() {
            return Err(ControlError::AlgorithmTerminal {
                id,
                status: algo.status,
            });
        }
        let now = self.clock.now_ms();
        algo.status = AlgorithmStatus::Stopped;
        algo.schedule.revision += 1;
        algo.updated_at = now;
        let cancelled = self.orders.cancel_pending(&algo.child_order_ids, now).await;
        info!(algorithm_id = %id, cancelled_children = cancelled, "[algo] stopped");
        Ok(algo.clone())
    }

    /// Active algorithms whose next tick is due at `now`.
    pub async fn due(&self, now: u64) -> Vec<Algorithm> {
        let mut out = Vec::new();
        for handle in self.store.handles().await {
            let algo = handle.lock().await;
            if algo.is_due(now) {
                out.push(algo.clone());
            }
        }
        out.sort_by_key(|a| a.created_at);
        out
    }

    /// Record a failed tick. The schedule is left untouched apart from the
    /// error marker, so the next cycle retries the same tick.
    pub async fn record_failure(&self, id: AlgorithmId, observed_revision: u64, error: String) -> TickOutcome {
        let Some(handle) = self.store.get(id).await else {
            return TickOutcome::Discarded;
        };
        let mut algo = handle.lock().await;
        if algo.status != AlgorithmStatus::Active || algo.schedule.revision != observed_revision {
            return TickOutcome::Discarded;
        }
        algo.schedule.consecutive_failures += 1;
        warn!(
            algorithm_id = %id,
            failures = algo.schedule.consecutive_failures,
            "[algo] tick failed: {error}"
        );
        algo.schedule.last_error = Some(error);
        TickOutcome::Failed
    }

    /// Apply an evaluated tick, emitting its child order if any.
    pub async fn apply_tick(
        &self,
        id: AlgorithmId,
        observed_revision: u64,
        eval: Evaluation<StrategyState>,
        now: u64,
    ) -> TickOutcome {
        let Some(handle) = self.store.get(id).await else {
            return TickOutcome::Discarded;
        };
        let mut algo = handle.lock().await;
        if algo.status != AlgorithmStatus::Active {
            debug!(algorithm_id = %id, status = %algo.status, "[algo] tick discarded, no longer active");
            return TickOutcome::Discarded;
        }
        if algo.schedule.revision != observed_revision {
            debug!(algorithm_id = %id, "[algo] tick discarded, schedule moved on");
            return TickOutcome::Discarded;
        }

        algo.strategy = eval.state;
        algo.schedule.next_tick_at = eval.next_tick_at;
        algo.schedule.last_tick_at = Some(now);
        algo.schedule.revision += 1;
        algo.schedule.consecutive_failures = 0;
        algo.schedule.last_error = None;
        algo.updated_at = now;

        let mut child_order_id = None;
        if let Some(child) = eval.child {
            let req = child_request(&algo, &child);
            let order_id = match self.orders.submit(req).await {
                Ok(order) => {
                    info!(
                        algorithm_id = %id,
                        order_id = %order.id,
                        side = %child.side,
                        quantity = child.quantity,
                        "[algo] child order emitted"
                    );
                    order.id
                }
                Err(rejected) => {
                    warn!(algorithm_id = %id, "[algo] child order refused: {rejected}");
                    algo.schedule.last_error = Some(rejected.to_string());
                    rejected.order_id
                }
            };
            algo.child_order_ids.push(order_id);
            algo.schedule.emitted_count += 1;
            child_order_id = Some(order_id);
        }

        if eval.completed {
            algo.status = AlgorithmStatus::Completed;
            info!(
                algorithm_id = %id,
                emitted = algo.schedule.emitted_count,
                "[algo] completed"
            );
        }

        TickOutcome::Applied {
            child_order_id,
            completed: eval.completed,
        }
    }

    /// Drop terminal algorithms last updated before `before`. Returns how
    /// many were dropped.
    pub async fn prune_finished(&self, before: u64) -> usize {
        let pruned = self
            .store
            .prune(|a| a.status.is_terminal() && a.updated_at < before)
            .await;
        if !pruned.is_empty() {
            debug!("[algo] pruned {} finished algorithms", pruned.len());
        }
        pruned.len()
    }

    /// Load previously exported algorithms.
    pub async fn restore(&self, algorithms: Vec<Algorithm>) {
        for algo in algorithms {
            self.store.insert(algo).await;
        }
    }
}

/// Order request for a child order of `algo`.
fn child_request(algo: &Algorithm, child: &ChildOrder) -> OrderRequest {
    let mut req = match child.limit_price {
        Some(price) => OrderRequest::limit(
            &algo.user_id,
            &algo.wallet_address,
            &algo.pair.symbol,
            child.side,
            child.quantity,
            price,
        ),
        None => OrderRequest::market(
            &algo.user_id,
            &algo.wallet_address,
            &algo.pair.symbol,
            child.side,
            child.quantity,
        ),
    };
    req.metadata.algorithm_id = Some(algo.id);
    req.metadata.risk_parameters = algo.risk_parameters;
    req
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::PositionTracker;
    use crate::strategy::TickContext;
    use crate::testutil::{pair, snapshot_from};
    use atx_core::time_util::ManualClock;
    use atx_core::types::{
        AlgorithmParams, DcaParams, GridParams, OrderKind, OrderStatus, RiskParameters, Side,
    };
    use tokio::sync::mpsc;

    fn manager() -> (AlgorithmManager, Arc<OrderStateMachine>) {
        let clock = Arc::new(ManualClock::new(0));
        let pairs = Arc::new(PairRegistry::new([pair()]));
        let (tx, _) = mpsc::unbounded_channel();
        let orders = Arc::new(OrderStateMachine::new(
            pairs.clone(),
            Arc::new(PositionTracker::new()),
            tx,
            clock.clone(),
        ));
        (AlgorithmManager::new(pairs, orders.clone(), clock), orders)
    }

    fn dca_request() -> AlgorithmRequest {
        AlgorithmRequest {
            user_id: "alice".into(),
            wallet_address: "0xw".into(),
            pair: "ETHUSDC".into(),
            params: AlgorithmParams::Dca(DcaParams {
                side: Side::Buy,
                interval_ms: 1_000,
                amount: 1.0,
                max_orders: 3,
                price_deviation: None,
                reference_price: None,
            }),
            risk_parameters: None,
        }
    }

    async fn tick_once(mgr: &AlgorithmManager, id: AlgorithmId, now: u64) -> TickOutcome {
        let algo = mgr.get(id).await.unwrap();
        let snapshot = snapshot_from("ETHUSDC", &[2000.0]);
        let eval = strategy::evaluate(
            &algo.strategy,
            &TickContext {
                now,
                snapshot: &snapshot,
                pair: &algo.pair,
                emitted_count: algo.schedule.emitted_count,
            },
        );
        mgr.apply_tick(id, algo.schedule.revision, eval, now).await
    }

    #[tokio::test]
    async fn create_validates_pair_and_params() {
        let (mgr, _) = manager();
        let mut req = dca_request();
        req.pair = "BTCUSDC".into();
        assert_eq!(
            mgr.create(req).await.unwrap_err(),
            AlgorithmError::UnknownPair("BTCUSDC".into())
        );

        let mut req = dca_request();
        req.params = AlgorithmParams::Grid(GridParams {
            grid_levels: 3,
            grid_spacing: 5.0,
            base_price: 100.0,
            quantity: 1.0,
        });
        assert!(matches!(
            mgr.create(req).await.unwrap_err(),
            AlgorithmError::InvalidParameter {
                field: "gridLevels",
                ..
            }
        ));

        let algo = mgr.create(dca_request()).await.unwrap();
        assert_eq!(algo.status, AlgorithmStatus::Active);
        assert!(algo.is_due(0));
    }

    #[tokio::test]
    async fn child_orders_carry_algorithm_metadata() {
        let (mgr, orders) = manager();
        let mut req = dca_request();
        req.risk_parameters = Some(RiskParameters {
            max_position_size: Some(10.0),
            max_daily_loss: None,
        });
        let algo = mgr.create(req).await.unwrap();
        let TickOutcome::Applied {
            child_order_id: Some(child),
            ..
        } = tick_once(&mgr, algo.id, 0).await
        else {
            panic!("expected a child order");
        };
        let order = orders.get(child).await.unwrap();
        assert_eq!(order.algorithm_id(), Some(algo.id));
        assert_eq!(order.kind, OrderKind::Market);
        assert_eq!(order.metadata.risk_parameters.unwrap().max_position_size, Some(10.0));
        assert_eq!(mgr.get(algo.id).await.unwrap().child_order_ids, vec![child]);
    }

    #[tokio::test]
    async fn pause_resume_preserves_progress() {
        let (mgr, _) = manager();
        let algo = mgr.create(dca_request()).await.unwrap();
        tick_once(&mgr, algo.id, 0).await;

        mgr.pause(algo.id).await.unwrap();
        assert!(mgr.due(10_000).await.is_empty());
        assert!(matches!(
            mgr.pause(algo.id).await.unwrap_err(),
            ControlError::InvalidAlgorithmTransition { .. }
        ));

        let resumed = mgr.resume(algo.id).await.unwrap();
        assert_eq!(resumed.schedule.emitted_count, 1);
        assert_eq!(resumed.child_order_ids.len(), 1);

        tick_once(&mgr, algo.id, 10_000).await;
        tick_once(&mgr, algo.id, 20_000).await;
        let done = mgr.get(algo.id).await.unwrap();
        assert_eq!(done.schedule.emitted_count, 3);
        assert_eq!(done.status, AlgorithmStatus::Completed);
    }

    #[tokio::test]
    async fn stop_discards_in_flight_tick() {
        let (mgr, _) = manager();
        let algo = mgr.create(dca_request()).await.unwrap();

        // evaluate, then stop before applying
        let observed = mgr.get(algo.id).await.unwrap();
        let snapshot = snapshot_from("ETHUSDC", &[2000.0]);
        let eval = strategy::evaluate(
            &observed.strategy,
            &TickContext {
                now: 0,
                snapshot: &snapshot,
                pair: &observed.pair,
                emitted_count: 0,
            },
        );
        mgr.stop(algo.id).await.unwrap();
        assert_eq!(
            mgr.apply_tick(algo.id, observed.schedule.revision, eval, 0).await,
            TickOutcome::Discarded
        );
        let stopped = mgr.get(algo.id).await.unwrap();
        assert_eq!(stopped.schedule.emitted_count, 0);
        assert!(stopped.child_order_ids.is_empty());

        assert!(matches!(
            mgr.stop(algo.id).await.unwrap_err(),
            ControlError::AlgorithmTerminal {
                status: AlgorithmStatus::Stopped,
                ..
            }
        ));
        let missing = Uuid::new_v4();
        assert_eq!(mgr.stop(missing).await.unwrap_err(), ControlError::NotFound(missing));
    }

    #[tokio::test]
    async fn failure_keeps_schedule() {
        let (mgr, _) = manager();
        let algo = mgr.create(dca_request()).await.unwrap();
        let outcome = mgr.record_failure(algo.id, 0, "gateway down".into()).await;
        assert_eq!(outcome, TickOutcome::Failed);
        let after = mgr.get(algo.id).await.unwrap();
        assert_eq!(after.status, AlgorithmStatus::Active);
        assert_eq!(after.schedule.next_tick_at, algo.schedule.next_tick_at);
        assert_eq!(after.schedule.revision, algo.schedule.revision);
        assert_eq!(after.schedule.last_error.as_deref(), Some("gateway down"));
        assert_eq!(after.schedule.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn rejected_child_still_advances_schedule() {
        let (mgr, orders) = manager();
        let mut req = dca_request();
        req.risk_parameters = Some(RiskParameters {
            max_position_size: Some(0.5),
            max_daily_loss: None,
        });
        let algo = mgr.create(req).await.unwrap();
        let TickOutcome::Applied {
            child_order_id: Some(child),
            ..
        } = tick_once(&mgr, algo.id, 0).await
        else {
            panic!("expected a child order");
        };
        assert_eq!(orders.get(child).await.unwrap().status, OrderStatus::Rejected);
        let after = mgr.get(algo.id).await.unwrap();
        assert_eq!(after.schedule.emitted_count, 1);
        assert_eq!(after.schedule.next_tick_at, 1_000);
        assert!(after.schedule.last_error.is_some());
    }
}

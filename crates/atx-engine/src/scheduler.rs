//! Scheduler cycle.
//!
//! One cycle, at time `now`:
//!
//! 1. expire good-till-date orders whose deadline has passed;
//! 2. start one snapshot request per distinct asset needed by watched
//!    conditional orders and due algorithms, each with its own retry;
//! 3. as soon as an order's assets are in, activate it if its conditions
//!    all hold;
//! 4. as soon as an algorithm's asset is in, evaluate it and apply the
//!    result under the algorithm's lock.
//!
//! Orders and algorithms run concurrently and wait only on their own
//! assets. A snapshot failure only affects the algorithms and orders on that
//! asset: their schedule is left as is (apart from the error marker) and the
//! next cycle tries again.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use atx_core::config::SchedulerConfig;
use atx_core::error::{GatewayError, RejectReason};
use atx_core::time_util::Clock;
use ahash::AHashSet;
use atx_core::types::{Algorithm, AlgorithmStatus, MarketSnapshot, Order, OrderId};
use atx_md::MarketDataGateway;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared, join_all};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::algorithm::{AlgorithmManager, TickOutcome};
use crate::condition;
use crate::orders::OrderStateMachine;
use crate::strategy::{self, TickContext};

/// One snapshot request per asset per cycle, awaited by every order and
/// algorithm on that asset.
type SnapshotFetch<'a> = Shared<BoxFuture<'a, Result<MarketSnapshot, GatewayError>>>;

/// Counters for one cycle, for logs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub expired: usize,
    pub activated: usize,
    pub ticked: usize,
    pub emitted: usize,
    pub completed: usize,
    pub discarded: usize,
    pub failed: usize,
}

pub struct Scheduler {
    config: SchedulerConfig,
    gateway: Arc<dyn MarketDataGateway>,
    orders: Arc<OrderStateMachine>,
    algorithms: Arc<AlgorithmManager>,
    clock: Arc<dyn Clock>,
    /// Watched orders already warned about for reading an indicator the
    /// feed does not publish.
    unresolved: Mutex<AHashSet<OrderId>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        gateway: Arc<dyn MarketDataGateway>,
        orders: Arc<OrderStateMachine>,
        algorithms: Arc<AlgorithmManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            gateway,
            orders,
            algorithms,
            clock,
            unresolved: Mutex::new(AHashSet::new()),
        }
    }

    /// Run one scheduler cycle at `now`.
    pub async fn run_cycle(&self, now: u64) -> CycleReport {
        let mut report = CycleReport {
            expired: self.orders.expire_due(now).await.len(),
            ..CycleReport::default()
        };

        let watched = self.orders.watched_orders().await;
        self.unresolved
            .lock()
            .await
            .retain(|id| watched.iter().any(|o| o.id == *id));
        let due = self.algorithms.due(now).await;
        if watched.is_empty() && due.is_empty() {
            return report;
        }

        let assets: BTreeSet<String> = watched
            .iter()
            .flat_map(|o| o.conditions.iter().map(|c| c.asset.clone()))
            .chain(due.iter().map(|a| a.asset().to_string()))
            .collect();
        let fetches: HashMap<String, SnapshotFetch<'_>> = assets
            .into_iter()
            .map(|asset| {
                let fetch = {
                    let asset = asset.clone();
                    async move { self.fetch_with_retry(&asset).await }
                        .boxed()
                        .shared()
                };
                (asset, fetch)
            })
            .collect();

        // Each order and algorithm waits only on its own assets, so a slow
        // asset never holds back work on the others.
        let conditionals = join_all(
            watched
                .iter()
                .map(|order| self.check_conditional(order, &fetches, now)),
        );
        let ticks = join_all(
            due.into_iter()
                .map(|algo| self.tick_algorithm(algo, &fetches, now)),
        );
        let (activated, outcomes) = tokio::join!(conditionals, ticks);

        report.activated = activated.into_iter().filter(|&a| a).count();
        for outcome in outcomes {
            match outcome {
                TickOutcome::Applied {
                    child_order_id,
                    completed,
                } => {
                    report.ticked += 1;
                    report.emitted += usize::from(child_order_id.is_some());
                    report.completed += usize::from(completed);
                }
                TickOutcome::Discarded => report.discarded += 1,
                TickOutcome::Failed => report.failed += 1,
            }
        }

        if report != CycleReport::default() {
            debug!(?report, "[scheduler] cycle done");
        }
        report
    }

    /// Activate `order` if its conditions hold; returns whether it was.
    async fn check_conditional(
        &self,
        order: &Order,
        fetches: &HashMap<String, SnapshotFetch<'_>>,
        now: u64,
    ) -> bool {
        if let Some(parent) = order.algorithm_id() {
            match self.algorithms.get(parent).await.map(|a| a.status) {
                Some(AlgorithmStatus::Active) => {}
                Some(AlgorithmStatus::Paused) => return false,
                _ => {
                    self.orders
                        .reject_pending(
                            order.id,
                            RejectReason::ParentAlgorithmInactive {
                                algorithm_id: parent,
                            },
                            now,
                        )
                        .await;
                    return false;
                }
            }
        }

        let mut snapshots = HashMap::new();
        for condition in &order.conditions {
            if snapshots.contains_key(&condition.asset) {
                continue;
            }
            let Some(fetch) = fetches.get(&condition.asset) else {
                return false;
            };
            match fetch.clone().await {
                Ok(snapshot) => {
                    snapshots.insert(condition.asset.clone(), snapshot);
                }
                Err(e) => {
                    debug!(order_id = %order.id, "[scheduler] conditions not checked: {e}");
                    return false;
                }
            }
        }
        self.note_missing_indicators(order, &snapshots).await;
        if !condition::all_met(&order.conditions, &snapshots) {
            return false;
        }
        self.orders.activate(order.id, now).await.is_some()
    }

    /// Warn once per order about indicators its snapshots never carry.
    async fn note_missing_indicators(&self, order: &Order, snapshots: &HashMap<String, MarketSnapshot>) {
        let missing = condition::missing_indicators(&order.conditions, snapshots);
        let mut unresolved = self.unresolved.lock().await;
        if missing.is_empty() {
            unresolved.remove(&order.id);
        } else if unresolved.insert(order.id) {
            warn!(
                order_id = %order.id,
                ?missing,
                "[scheduler] conditions read indicators the feed does not publish"
            );
        }
    }

    async fn tick_algorithm(
        &self,
        algo: Algorithm,
        fetches: &HashMap<String, SnapshotFetch<'_>>,
        now: u64,
    ) -> TickOutcome {
        let revision = algo.schedule.revision;
        let fetched = match fetches.get(algo.asset()) {
            Some(fetch) => fetch.clone().await,
            None => Err(GatewayError::UnknownAsset(algo.asset().to_string())),
        };
        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return self.algorithms.record_failure(algo.id, revision, e.to_string()).await;
            }
        };

        let eval = strategy::evaluate(
            &algo.strategy,
            &TickContext {
                now,
                snapshot: &snapshot,
                pair: &algo.pair,
                emitted_count: algo.schedule.emitted_count,
            },
        );
        self.algorithms.apply_tick(algo.id, revision, eval, now).await
    }

    /// Fetch a snapshot, retrying transient failures with exponential
    /// backoff up to the retry budget. Each attempt is bounded by the
    /// snapshot timeout.
    pub async fn fetch_with_retry(&self, asset: &str) -> Result<MarketSnapshot, GatewayError> {
        let timeout = Duration::from_millis(self.config.snapshot_timeout_ms);
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        let max_backoff = Duration::from_millis(self.config.max_backoff_ms);
        let mut retries = 0;

        loop {
            let result = match tokio::time::timeout(timeout, self.gateway.snapshot(asset)).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout {
                    asset: asset.to_string(),
                    timeout_ms: self.config.snapshot_timeout_ms,
                }),
            };
            match result {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) if e.is_transient() && retries < self.config.retry_budget => {
                    retries += 1;
                    warn!(
                        "[scheduler] snapshot {asset} failed (retry {retries}/{}): {e}, retrying in {backoff:?}",
                        self.config.retry_budget
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(e) if e.is_transient() => {
                    error!("[scheduler] snapshot {asset} failed, retry budget exhausted: {e}");
                    return Err(GatewayError::Unavailable {
                        asset: asset.to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!("[scheduler] snapshot {asset} failed: {e}");
                    return Err(e);
                }
            }
        }
    }

    /// Run cycles every `tick_interval_ms` until shutdown is signalled.
    /// Drop finished algorithms, then finished orders, last updated before
    /// `before`. Child orders of algorithms still in the store are kept.
    /// Returns `(orders, algorithms)` dropped.
    pub async fn prune_finished(&self, before: u64) -> (usize, usize) {
        let algorithms = self.algorithms.prune_finished(before).await;
        let children: AHashSet<OrderId> = self
            .algorithms
            .store()
            .all()
            .await
            .into_iter()
            .flat_map(|a| a.child_order_ids)
            .collect();
        let orders = self.orders.prune_finished(before, &children).await;
        if orders + algorithms > 0 {
            info!("[scheduler] pruned {orders} orders and {algorithms} algorithms finished before {before}");
        }
        (orders, algorithms)
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "[scheduler] started, tick every {}ms",
            self.config.tick_interval_ms
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = self.clock.now_ms();
                    self.run_cycle(now).await;
                    if let Some(retention) = self.config.retention_ms {
                        self.prune_finished(now.saturating_sub(retention)).await;
                    }
                }
                _ = shutdown.changed() => {
                    info!("[scheduler] shutdown signal received");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::CommandReceiver;
    use crate::pairs::PairRegistry;
    use crate::risk::PositionTracker;
    use crate::testutil::{StaticGateway, pair};
    use atx_core::time_util::ManualClock;
    use atx_core::types::{
        AlgorithmParams, AlgorithmRequest, ComparisonOperator, Condition, DcaParams,
        IndicatorKind, OrderRequest, OrderStatus, Side, TimeInForceTag,
    };
    use tokio::sync::mpsc;

    struct Harness {
        scheduler: Scheduler,
        gateway: Arc<StaticGateway>,
        orders: Arc<OrderStateMachine>,
        algorithms: Arc<AlgorithmManager>,
        _commands: CommandReceiver,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(0));
        let gateway = Arc::new(StaticGateway::new());
        gateway.set_price("ETHUSDC", 2000.0);
        let pairs = Arc::new(PairRegistry::new([pair()]));
        let (tx, rx) = mpsc::unbounded_channel();
        let orders = Arc::new(OrderStateMachine::new(
            pairs.clone(),
            Arc::new(PositionTracker::new()),
            tx,
            clock.clone(),
        ));
        let algorithms = Arc::new(AlgorithmManager::new(pairs, orders.clone(), clock.clone()));
        let config = SchedulerConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            retry_budget: 2,
            ..SchedulerConfig::default()
        };
        Harness {
            scheduler: Scheduler::new(config, gateway.clone(), orders.clone(), algorithms.clone(), clock),
            gateway,
            orders,
            algorithms,
            _commands: rx,
        }
    }

    fn dca(max_orders: u32) -> AlgorithmRequest {
        AlgorithmRequest {
            user_id: "alice".into(),
            wallet_address: "0xw".into(),
            pair: "ETHUSDC".into(),
            params: AlgorithmParams::Dca(DcaParams {
                side: Side::Buy,
                interval_ms: 3_600_000,
                amount: 100.0,
                max_orders,
                price_deviation: None,
                reference_price: None,
            }),
            risk_parameters: None,
        }
    }

    #[tokio::test]
    async fn dca_runs_to_completion_on_schedule() {
        let h = harness();
        let algo = h.algorithms.create(dca(5)).await.unwrap();

        let mut now = 0;
        for _ in 0..5 {
            let report = h.scheduler.run_cycle(now).await;
            assert_eq!(report.emitted, 1);
            // nothing due until the interval has elapsed
            assert_eq!(h.scheduler.run_cycle(now + 1).await.emitted, 0);
            now += 3_600_000;
        }
        let done = h.algorithms.get(algo.id).await.unwrap();
        assert_eq!(done.status, AlgorithmStatus::Completed);
        assert_eq!(done.child_order_ids.len(), 5);
        for id in &done.child_order_ids {
            assert_eq!(h.orders.get(*id).await.unwrap().quantity, 100.0);
        }
        assert_eq!(h.scheduler.run_cycle(now).await, CycleReport::default());
    }

    #[tokio::test]
    async fn transient_failures_are_retried_within_budget() {
        let h = harness();
        h.algorithms.create(dca(5)).await.unwrap();
        for _ in 0..2 {
            h.gateway.fail_next(
                "ETHUSDC",
                GatewayError::Transient {
                    asset: "ETHUSDC".into(),
                    reason: "rate limited".into(),
                },
            );
        }
        let report = h.scheduler.run_cycle(0).await;
        assert_eq!(report.emitted, 1);
        assert_eq!(h.gateway.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_budget_marks_error_and_retries_next_cycle() {
        let h = harness();
        let algo = h.algorithms.create(dca(5)).await.unwrap();
        for _ in 0..3 {
            h.gateway.fail_next(
                "ETHUSDC",
                GatewayError::Transient {
                    asset: "ETHUSDC".into(),
                    reason: "upstream 503".into(),
                },
            );
        }
        let report = h.scheduler.run_cycle(0).await;
        assert_eq!(report.failed, 1);
        let after = h.algorithms.get(algo.id).await.unwrap();
        assert_eq!(after.status, AlgorithmStatus::Active);
        assert_eq!(after.schedule.emitted_count, 0);
        assert!(after.schedule.last_error.is_some());

        let report = h.scheduler.run_cycle(1).await;
        assert_eq!(report.emitted, 1);
        let after = h.algorithms.get(algo.id).await.unwrap();
        assert!(after.schedule.last_error.is_none());
        assert_eq!(after.schedule.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn conditional_activates_only_when_all_conditions_hold() {
        let h = harness();
        let order = h
            .orders
            .submit(OrderRequest::conditional(
                "alice",
                "0xw",
                "ETHUSDC",
                Side::Buy,
                1.0,
                vec![
                    Condition::price("ETHUSDC", ComparisonOperator::Gt, 2100.0),
                    Condition::indicator(
                        "ETHUSDC",
                        IndicatorKind::Rsi,
                        None,
                        ComparisonOperator::Lt,
                        30.0,
                    ),
                ],
            ))
            .await
            .unwrap();

        let mut snap = MarketSnapshot::spot("ETHUSDC", 2200.0, 0);
        snap.indicators.insert("rsi".into(), 45.0);
        h.gateway.set_snapshot(snap.clone());
        assert_eq!(h.scheduler.run_cycle(0).await.activated, 0);

        snap.price = 2000.0;
        snap.indicators.insert("rsi".into(), 20.0);
        h.gateway.set_snapshot(snap.clone());
        assert_eq!(h.scheduler.run_cycle(1).await.activated, 0);
        assert_eq!(h.orders.get(order.id).await.unwrap().status, OrderStatus::Pending);

        snap.price = 2200.0;
        h.gateway.set_snapshot(snap);
        assert_eq!(h.scheduler.run_cycle(2).await.activated, 1);
        assert_eq!(h.orders.get(order.id).await.unwrap().status, OrderStatus::Active);
        assert_eq!(h.scheduler.run_cycle(3).await.activated, 0);
    }

    #[tokio::test]
    async fn pending_conditional_expires_by_deadline() {
        let h = harness();
        let mut req = OrderRequest::conditional(
            "alice",
            "0xw",
            "ETHUSDC",
            Side::Buy,
            1.0,
            vec![Condition::price("ETHUSDC", ComparisonOperator::Gt, 5000.0)],
        );
        req.time_in_force = TimeInForceTag::GoodTillDate;
        req.expires_at = Some(10_000);
        let order = h.orders.submit(req).await.unwrap();

        assert_eq!(h.scheduler.run_cycle(9_999).await.expired, 0);
        assert_eq!(h.scheduler.run_cycle(10_000).await.expired, 1);
        assert_eq!(h.orders.get(order.id).await.unwrap().status, OrderStatus::Expired);
        assert!(h.orders.watched_orders().await.is_empty());
    }

    #[tokio::test]
    async fn paused_algorithm_is_skipped() {
        let h = harness();
        let algo = h.algorithms.create(dca(5)).await.unwrap();
        h.scheduler.run_cycle(0).await;
        h.algorithms.pause(algo.id).await.unwrap();
        for now in [3_600_000, 7_200_000] {
            assert_eq!(h.scheduler.run_cycle(now).await.emitted, 0);
        }
        h.algorithms.resume(algo.id).await.unwrap();
        assert_eq!(h.scheduler.run_cycle(7_200_001).await.emitted, 1);
        assert_eq!(h.algorithms.get(algo.id).await.unwrap().schedule.emitted_count, 2);
    }

    #[tokio::test]
    async fn stalled_asset_does_not_hold_back_other_assets() {
        let h = harness();
        h.gateway.stall("SLOW");
        let algo = h.algorithms.create(dca(5)).await.unwrap();
        h.orders
            .submit(OrderRequest::conditional(
                "alice",
                "0xw",
                "ETHUSDC",
                Side::Buy,
                1.0,
                vec![Condition::price("SLOW", ComparisonOperator::Gt, 1.0)],
            ))
            .await
            .unwrap();

        let cycle = h.scheduler.run_cycle(0);
        tokio::pin!(cycle);
        let healthy_ticked = async {
            loop {
                if h.algorithms.get(algo.id).await.unwrap().schedule.emitted_count == 1 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::select! {
            _ = &mut cycle => panic!("cycle finished while an asset was stalled"),
            ticked = tokio::time::timeout(Duration::from_secs(5), healthy_ticked) => {
                assert!(ticked.is_ok(), "healthy algorithm waited on the stalled asset");
            }
        }
    }

    #[tokio::test]
    async fn unpublished_timeframe_is_flagged_until_it_appears() {
        let h = harness();
        let order = h
            .orders
            .submit(OrderRequest::conditional(
                "alice",
                "0xw",
                "ETHUSDC",
                Side::Buy,
                1.0,
                vec![Condition::indicator(
                    "ETHUSDC",
                    IndicatorKind::Rsi,
                    Some("4h"),
                    ComparisonOperator::Lt,
                    30.0,
                )],
            ))
            .await
            .unwrap();

        let mut snap = MarketSnapshot::spot("ETHUSDC", 2000.0, 0);
        snap.indicators.insert("rsi".into(), 20.0);
        h.gateway.set_snapshot(snap.clone());
        assert_eq!(h.scheduler.run_cycle(0).await.activated, 0);
        assert!(h.scheduler.unresolved.lock().await.contains(&order.id));

        snap.indicators.insert("rsi@4h".into(), 40.0);
        h.gateway.set_snapshot(snap);
        assert_eq!(h.scheduler.run_cycle(1).await.activated, 0);
        assert!(h.scheduler.unresolved.lock().await.is_empty());
    }

    #[tokio::test]
    async fn prune_finished_keeps_live_records_and_their_children() {
        let h = harness();
        let market = || OrderRequest::market("alice", "0xw", "ETHUSDC", Side::Buy, 1.0);
        let lone = h.orders.submit(market()).await.unwrap();
        h.orders.cancel(lone.id).await.unwrap();
        let open = h.orders.submit(market()).await.unwrap();
        let algo = h.algorithms.create(dca(5)).await.unwrap();
        h.scheduler.run_cycle(0).await;
        let child = h.algorithms.get(algo.id).await.unwrap().child_order_ids[0];
        h.orders.cancel(child).await.unwrap();

        assert_eq!(h.scheduler.prune_finished(1).await, (1, 0));
        assert!(h.orders.get(lone.id).await.is_none());
        assert!(h.orders.get(open.id).await.is_some());
        assert!(h.orders.get(child).await.is_some());

        h.algorithms.stop(algo.id).await.unwrap();
        assert_eq!(h.scheduler.prune_finished(0).await, (0, 0));
        assert_eq!(h.scheduler.prune_finished(1).await, (1, 1));
        assert!(h.algorithms.get(algo.id).await.is_none());
        assert!(h.orders.get(child).await.is_none());
        assert_eq!(h.orders.store().len().await, 1);
    }
}

//! Engine facade.
//!
//! Wires the stores, the order state machine, the algorithm manager, the
//! scheduler and the signal generator together and exposes the control
//! surface used by the API layer. Control calls validate and return
//! immediately; venue traffic and scheduling happen on the background tasks
//! started by [`Engine::start`].
//!
//! ```text
//! Engine::start
//!   ├─ scheduler loop      (every tick_interval_ms: expire, trigger, tick)
//!   ├─ venue dispatcher    (VenueCommand → ExecutionVenue)
//!   └─ report consumer     (ExecutionReport → OrderStateMachine)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use atx_core::config::EngineConfig;
use atx_core::error::{AlgorithmError, ControlError, ExecutionError, GatewayError, OrderRejected};
use atx_core::time_util::Clock;
use atx_core::types::{
    Algorithm, AlgorithmId, AlgorithmRequest, AlgorithmStatus, Order, OrderId, OrderRequest,
    OrderStatus, Position, Signal,
};
use atx_md::MarketDataGateway;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::algorithm::AlgorithmManager;
use crate::execution::{
    CommandReceiver, ExecutionReport, ExecutionVenue, ReportReceiver, VenueCommand,
};
use crate::orders::OrderStateMachine;
use crate::pairs::PairRegistry;
use crate::risk::{FillEvent, PositionTracker};
use crate::scheduler::{CycleReport, Scheduler};
use crate::signal::SignalGenerator;

/// Serializable engine contents: everything needed to rebuild the stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub orders: Vec<Order>,
    pub algorithms: Vec<Algorithm>,
}

pub struct Engine {
    orders: Arc<OrderStateMachine>,
    algorithms: Arc<AlgorithmManager>,
    scheduler: Arc<Scheduler>,
    signals: SignalGenerator,
    tracker: Arc<PositionTracker>,
    gateway: Arc<dyn MarketDataGateway>,
    /// Taken by [`Engine::start`].
    commands: Mutex<Option<CommandReceiver>>,
}

impl Engine {
    pub fn new(config: &EngineConfig, gateway: Arc<dyn MarketDataGateway>, clock: Arc<dyn Clock>) -> Self {
        let pairs = Arc::new(PairRegistry::new(config.pairs.iter().cloned()));
        let tracker = Arc::new(PositionTracker::new());
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let orders = Arc::new(OrderStateMachine::new(
            pairs.clone(),
            tracker.clone(),
            command_tx,
            clock.clone(),
        ));
        let algorithms = Arc::new(AlgorithmManager::new(pairs.clone(), orders.clone(), clock.clone()));
        let scheduler = Arc::new(Scheduler::new(
            config.scheduler.clone(),
            gateway.clone(),
            orders.clone(),
            algorithms.clone(),
            clock.clone(),
        ));
        let signals = SignalGenerator::new(config.signals.clone(), gateway.clone(), clock);

        info!("[engine] initialized with {} pairs", pairs.len());
        Self {
            orders,
            algorithms,
            scheduler,
            signals,
            tracker,
            gateway,
            commands: Mutex::new(Some(command_rx)),
        }
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Accept an order, or return why it was rejected.
    pub async fn create_order(&self, req: OrderRequest) -> Result<Order, OrderRejected> {
        self.orders.submit(req).await
    }

    pub async fn cancel_order(&self, id: OrderId) -> Result<Order, ControlError> {
        self.orders.cancel(id).await
    }

    pub async fn order(&self, id: OrderId) -> Option<Order> {
        self.orders.get(id).await
    }

    /// A user's orders, oldest first, optionally filtered by status.
    pub async fn orders_for_user(&self, user_id: &str, status: Option<OrderStatus>) -> Vec<Order> {
        self.orders
            .store()
            .for_user(user_id, |o| status.is_none_or(|s| o.status == s))
            .await
    }

    /// Apply a venue report directly (the report consumer does this for
    /// reports arriving on the channel).
    pub async fn apply_report(&self, report: ExecutionReport) -> Result<Order, ExecutionError> {
        self.orders.apply_report(report).await
    }

    // -----------------------------------------------------------------------
    // Algorithms
    // -----------------------------------------------------------------------

    pub async fn create_algorithm(&self, req: AlgorithmRequest) -> Result<Algorithm, AlgorithmError> {
        self.algorithms.create(req).await
    }

    pub async fn pause_algorithm(&self, id: AlgorithmId) -> Result<Algorithm, ControlError> {
        self.algorithms.pause(id).await
    }

    pub async fn resume_algorithm(&self, id: AlgorithmId) -> Result<Algorithm, ControlError> {
        self.algorithms.resume(id).await
    }

    pub async fn stop_algorithm(&self, id: AlgorithmId) -> Result<Algorithm, ControlError> {
        self.algorithms.stop(id).await
    }

    pub async fn algorithm(&self, id: AlgorithmId) -> Option<Algorithm> {
        self.algorithms.get(id).await
    }

    /// A user's algorithms, oldest first, optionally filtered by status.
    pub async fn algorithms_for_user(
        &self,
        user_id: &str,
        status: Option<AlgorithmStatus>,
    ) -> Vec<Algorithm> {
        self.algorithms
            .store()
            .for_user(user_id, |a| status.is_none_or(|s| a.status == s))
            .await
    }

    // -----------------------------------------------------------------------
    // Signals and positions
    // -----------------------------------------------------------------------

    pub async fn signals(&self, asset: &str) -> Result<Vec<Signal>, GatewayError> {
        self.signals.signals(asset).await
    }

    /// A user's positions, marked at the current spot where available.
    pub async fn positions(&self, user_id: &str) -> Vec<Position> {
        let mut marks = HashMap::new();
        for asset in self.tracker.open_assets(user_id).await {
            match self.gateway.snapshot(&asset).await {
                Ok(snapshot) => {
                    marks.insert(asset, snapshot.price);
                }
                Err(e) => debug!("[engine] no mark for {asset}: {e}"),
            }
        }
        self.tracker.positions(user_id, &marks).await
    }

    /// Today's realized PnL for `user_id`.
    pub async fn daily_realized_pnl(&self, user_id: &str, now: u64) -> f64 {
        self.tracker.daily_realized_pnl(user_id, now).await
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Run one scheduler cycle at `now` (the background loop does this on
    /// its own cadence).
    pub async fn run_cycle(&self, now: u64) -> CycleReport {
        self.scheduler.run_cycle(now).await
    }

    /// Drop finished orders and algorithms last updated before `before`.
    /// The scheduler loop does this itself when `retention_ms` is set.
    pub async fn prune_finished(&self, before: u64) -> (usize, usize) {
        self.scheduler.prune_finished(before).await
    }

    /// Start the scheduler loop, the venue dispatcher and the report
    /// consumer. Fails if the engine was already started.
    pub async fn start(
        self: &Arc<Self>,
        venue: Arc<dyn ExecutionVenue>,
        reports: ReportReceiver,
    ) -> anyhow::Result<EngineHandle> {
        let commands = self
            .commands
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("engine already started"))?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = tokio::spawn(self.scheduler.clone().run(shutdown_rx.clone()));
        let dispatcher = tokio::spawn(dispatch_loop(
            self.clone(),
            venue.clone(),
            commands,
            shutdown_rx.clone(),
        ));
        let consumer = tokio::spawn(report_loop(self.clone(), reports, shutdown_rx));

        info!("[engine] started with venue `{}`", venue.name());
        Ok(EngineHandle {
            shutdown_tx,
            tasks: vec![scheduler, dispatcher, consumer],
        })
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub async fn export_state(&self) -> EngineState {
        EngineState {
            orders: self.orders.store().all().await,
            algorithms: self.algorithms.store().all().await,
        }
    }

    /// Load exported state into the stores. Pending conditional orders are
    /// watched again and positions are rebuilt by replaying each order's
    /// filled quantity at its average price, in update order.
    pub async fn restore(&self, state: EngineState) {
        let mut fills: Vec<&Order> = state
            .orders
            .iter()
            .filter(|o| o.filled_quantity > 0.0 && o.average_fill_price.is_some())
            .collect();
        fills.sort_by_key(|o| o.updated_at);

        self.tracker.clear().await;
        for order in fills {
            let price = order.average_fill_price.unwrap_or_default();
            self.tracker
                .record_fill(FillEvent {
                    user_id: &order.user_id,
                    asset: &order.pair.symbol,
                    side: order.side,
                    quantity: order.filled_quantity,
                    price,
                    fee: order.fees_paid,
                    ts: order.updated_at,
                })
                .await;
        }

        let (orders, algorithms) = (state.orders.len(), state.algorithms.len());
        self.orders.restore(state.orders).await;
        self.algorithms.restore(state.algorithms).await;
        info!("[engine] restored {orders} orders and {algorithms} algorithms");
    }
}

/// Handle to the engine's background tasks.
pub struct EngineHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Signal shutdown and wait for every task to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("[engine] task ended abnormally: {e}");
            }
        }
        info!("[engine] stopped");
    }
}

async fn dispatch_loop(
    engine: Arc<Engine>,
    venue: Arc<dyn ExecutionVenue>,
    mut commands: CommandReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let command = tokio::select! {
            command = commands.recv() => command,
            _ = shutdown.changed() => None,
        };
        let Some(command) = command else {
            debug!("[engine] dispatcher exiting");
            return;
        };
        match command {
            VenueCommand::Submit(order) => {
                if let Err(e) = venue.submit(&order).await {
                    warn!(order_id = %order.id, "[engine] venue refused submit: {e}");
                    let report = ExecutionReport::rejected(order.id, e.to_string());
                    if let Err(e) = engine.apply_report(report).await {
                        warn!(order_id = %order.id, "[engine] could not record rejection: {e}");
                    }
                }
            }
            VenueCommand::Cancel(id) => {
                if let Err(e) = venue.cancel(id).await {
                    debug!(order_id = %id, "[engine] venue cancel: {e}");
                }
            }
        }
    }
}

async fn report_loop(
    engine: Arc<Engine>,
    mut reports: ReportReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let report = tokio::select! {
            report = reports.recv() => report,
            _ = shutdown.changed() => None,
        };
        let Some(report) = report else {
            debug!("[engine] report consumer exiting");
            return;
        };
        let (id, event) = (report.order_id, report.event.name());
        if let Err(e) = engine.apply_report(report).await {
            warn!(order_id = %id, event, "[engine] report not applied: {e}");
        }
    }
}

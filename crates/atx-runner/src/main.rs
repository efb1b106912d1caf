//! # atx-runner
//!
//! Main entry point for the ATX trading engine.
//!
//! Loads a JSON configuration file, builds the in-memory market data feed
//! (optionally seeded from a price replay file), starts the engine against
//! the paper venue and runs until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! atx-runner config.json --log-level info --prices prices.jsonl \
//!     --bootstrap bootstrap.json --state-file state.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use atx_core::time_util::{Clock, SystemClock};
use atx_core::types::{AlgorithmRequest, OrderRequest};
use atx_engine::{Engine, EngineState, PaperVenue, report_channel};
use atx_md::FeedGateway;
use clap::Parser;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// ATX Trading Engine Runner.
#[derive(Parser)]
#[command(name = "atx-runner", about = "ATX Trading Engine Runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,

    /// JSON-lines price file replayed into the feed at start.
    #[arg(long)]
    prices: Option<PathBuf>,

    /// Orders and algorithms submitted at start.
    #[arg(long)]
    bootstrap: Option<PathBuf>,

    /// Engine state restored at start (if present) and written on shutdown.
    #[arg(long)]
    state_file: Option<PathBuf>,
}

/// Requests submitted once the engine is up.
#[derive(Debug, Default, Deserialize)]
struct Bootstrap {
    #[serde(default)]
    orders: Vec<OrderRequest>,
    #[serde(default)]
    algorithms: Vec<AlgorithmRequest>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

async fn submit_bootstrap(engine: &Engine, bootstrap: Bootstrap) {
    for req in bootstrap.orders {
        match engine.create_order(req).await {
            Ok(order) => info!("bootstrap order {} accepted ({})", order.id, order.status),
            Err(e) => warn!("bootstrap order rejected: {e}"),
        }
    }
    for req in bootstrap.algorithms {
        let kind = req.params.algorithm_type();
        match engine.create_algorithm(req).await {
            Ok(algo) => info!("bootstrap {kind} algorithm {} started", algo.id),
            Err(e) => warn!("bootstrap {kind} algorithm refused: {e}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = atx_core::config::load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // 2. Initialize logging
    let log_dir = cli.log_dir.as_deref().or(config.meta.log_path.as_deref());
    atx_core::logging::init_logging(
        &cli.log_level,
        log_dir,
        &config.meta.module_name,
        config.meta.json_logs,
    )?;
    info!(
        "atx-runner starting, config={}, log_level={}, {} pair(s)",
        cli.config.display(),
        cli.log_level,
        config.pairs.len()
    );

    // 3. Market data
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let feed = Arc::new(FeedGateway::new(config.feed.clone(), clock.clone()));
    if let Some(path) = &cli.prices {
        let ticks = atx_md::replay::load_ticks(path)?;
        let applied = atx_md::replay::replay(&feed, &ticks, None).await;
        info!("replayed {applied}/{} price observations", ticks.len());
    }

    // 4. Engine and paper venue
    let engine = Arc::new(Engine::new(&config, feed.clone(), clock));
    if let Some(path) = cli.state_file.as_deref().filter(|p| p.exists()) {
        let state: EngineState = read_json(path)?;
        engine.restore(state).await;
    }

    let (report_tx, report_rx) = report_channel();
    let venue = Arc::new(PaperVenue::new(feed, report_tx));
    let (matching_tx, matching_rx) = watch::channel(false);
    let matching = tokio::spawn(venue.clone().run_matching(
        Duration::from_millis(config.scheduler.tick_interval_ms),
        matching_rx,
    ));
    let handle = engine.start(venue, report_rx).await?;

    if let Some(path) = &cli.bootstrap {
        let bootstrap: Bootstrap = read_json(path)?;
        submit_bootstrap(&engine, bootstrap).await;
    }

    info!("engine running, press Ctrl+C to stop");

    // 5. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // 6. Stop background tasks and persist
    handle.stop().await;
    let _ = matching_tx.send(true);
    if let Err(e) = matching.await {
        error!("paper matching task failed: {e}");
    }

    if let Some(path) = &cli.state_file {
        let state = engine.export_state().await;
        let json = serde_json::to_string_pretty(&state)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!(
            "state written to {} ({} orders, {} algorithms)",
            path.display(),
            state.orders.len(),
            state.algorithms.len()
        );
    }

    info!("atx-runner stopped");
    Ok(())
}

//! Price replay files.
//!
//! A replay file is JSON lines, one observation per line:
//!
//! ```text
//! {"asset":"ETHUSDC","price":1850.25,"ts":1700000000000}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::feed::FeedGateway;

/// One recorded observation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceTick {
    pub asset: String,
    pub price: f64,
    pub ts: u64,
}

/// Parse JSON-lines replay content.
pub fn parse_ticks(content: &str) -> Result<Vec<PriceTick>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| format!("replay line {}", idx + 1))
        })
        .collect()
}

/// Load a replay file from disk.
pub fn load_ticks(path: &Path) -> Result<Vec<PriceTick>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading replay file {}", path.display()))?;
    parse_ticks(&content)
}

/// Push `ticks` into `feed`, sleeping `pace` between observations.
///
/// Returns the number of observations the feed accepted.
pub async fn replay(feed: &FeedGateway, ticks: &[PriceTick], pace: Option<Duration>) -> usize {
    let mut accepted = 0;
    for tick in ticks {
        if feed.push_price(&tick.asset, tick.price, tick.ts).await {
            accepted += 1;
        }
        if let Some(pace) = pace {
            tokio::time::sleep(pace).await;
        }
    }
    info!("[replay] pushed {accepted}/{} observations", ticks.len());
    accepted
}

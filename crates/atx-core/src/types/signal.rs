//! Directional signals produced by the signal generator.

use serde::{Deserialize, Serialize};

use super::enums::{SignalDirection, SignalSource};

/// A directional view on one asset. Ephemeral; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub asset: String,
    pub source: SignalSource,
    pub direction: SignalDirection,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub generated_at: u64,
}

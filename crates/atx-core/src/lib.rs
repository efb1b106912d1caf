//! # atx-core
//!
//! Core crate for the ATX trading engine, providing:
//!
//! - **Types** (`types`): orders, algorithms, conditions, market snapshots, signals, positions
//! - **Configuration** (`config`): JSON config deserialization and validation
//! - **Error types** (`error`): rejection reasons and control/gateway/execution errors via thiserror
//! - **Indicators** (`indicators`): SMA/EMA/RSI/Bollinger helpers over price series
//! - **Time utilities** (`time_util`): millisecond timestamps and an injectable [`Clock`](time_util::Clock)
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod error;
pub mod indicators;
pub mod logging;
pub mod time_util;
pub mod types;

// Re-export types at crate root for convenience.
pub use types::*;

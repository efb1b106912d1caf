//! # atx-engine
//!
//! The trading engine proper:
//!
//! - **Orders** (`orders`): validation, risk checks and the order state machine
//! - **Conditions** (`condition`): AND-evaluation of trigger conditions against snapshots
//! - **Algorithms** (`algorithm`, `strategy`): algorithm lifecycle and the five strategy executors
//! - **Scheduler** (`scheduler`): periodic expiry, conditional triggering and algorithm ticks
//! - **Signals** (`signal`): heuristic signals with a TTL cache
//! - **Positions** (`risk`): per-user positions, realized/unrealized P&L and risk limits
//! - **Execution** (`execution`, `paper`): venue contract and an in-process paper venue
//! - **Facade** (`engine`): the control surface and background tasks

pub mod algorithm;
pub mod condition;
pub mod engine;
pub mod execution;
pub mod orders;
pub mod pairs;
pub mod paper;
pub mod risk;
pub mod scheduler;
pub mod signal;
pub mod store;
pub mod strategy;

#[cfg(test)]
mod testutil;

pub use engine::{Engine, EngineHandle, EngineState};
pub use execution::{ExecutionEvent, ExecutionReport, ExecutionVenue, VenueCommand, report_channel};
pub use paper::PaperVenue;
pub use scheduler::CycleReport;

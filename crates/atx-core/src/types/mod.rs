//! Core data types shared by the market data gateway and the engine.
//!
//! Everything here is plain data with serde derives so the engine state can
//! be exported and restored as JSON.

pub mod algorithm;
pub mod enums;
pub mod market_data;
pub mod order;
pub mod pair;
pub mod position;
pub mod signal;

pub use algorithm::*;
pub use enums::*;
pub use market_data::*;
pub use order::*;
pub use pair::*;
pub use position::*;
pub use signal::*;

//! Infrastructure implementations.
//!
//! Port traits for the outside world and the adapters behind them.

pub mod clock;
pub mod environment;
pub mod ports;
pub mod schedule_store;
pub mod settings;

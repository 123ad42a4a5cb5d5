//! Asynchronous jobs

pub mod executor;
pub mod fsm;
pub mod manager;
pub mod progress;

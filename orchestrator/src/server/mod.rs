//! HTTP API

pub mod error;
pub mod handlers;
pub mod identity;
pub mod serve;
pub mod state;

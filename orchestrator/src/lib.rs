//! ddorch library
//!
//! Job and deployment orchestration for a fleet of container hosts: tracked
//! asynchronous jobs, bounded fan-out, live progress streams, layered
//! auto-apply policy and transient secret staging.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod jobs;
pub mod logs;
pub mod models;
pub mod policy;
pub mod runners;
pub mod server;
pub mod storage;
pub mod store;
pub mod stream;
pub mod utils;
pub mod workers;

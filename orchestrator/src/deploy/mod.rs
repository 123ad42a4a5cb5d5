//! Deployment module

pub mod compose;
pub mod deployer;
pub mod drift;
pub mod secrets;
pub mod stager;

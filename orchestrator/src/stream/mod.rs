//! Live job progress for observers

pub mod progress;
pub mod registry;

//! Domain models

pub mod inventory;
pub mod job;
pub mod outcome;
pub mod preview;
pub mod stamp;

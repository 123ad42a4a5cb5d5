//! Background workers

pub mod auto_deploy;

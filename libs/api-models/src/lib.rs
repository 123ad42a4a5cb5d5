//! Request and response models for the ddorch HTTP API

pub mod models;

pub use models::*;

//! Deployment policy

pub mod auto_apply;

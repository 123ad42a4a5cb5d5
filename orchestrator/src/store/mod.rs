//! Relational store

pub mod catalog;
pub mod db;
pub mod jobs;
pub mod overrides;
pub mod stamps;

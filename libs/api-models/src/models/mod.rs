//! Orchestrator API models

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,

    /// Jobs still executing in this process
    pub jobs_in_flight: usize,

    /// Open progress streams
    pub open_streams: usize,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error body for every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

/// Body of a cleanup request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupRequest {
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub force: bool,

    /// Required unless `dry_run` is set
    #[serde(default)]
    pub confirmation_token: Option<String>,

    #[serde(default)]
    pub exclude_filters: HashMap<String, Vec<String>>,
}

/// Query of a deploy trigger. Values are truthy strings (`1`, `true`, `yes`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployQuery {
    #[serde(default)]
    pub auto: Option<String>,

    #[serde(default)]
    pub force: Option<String>,

    #[serde(default)]
    pub dry_run: Option<String>,
}

/// Deploy no-op check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployCheckResponse {
    pub stack_id: i64,
    pub would_be_noop: bool,
}

/// PATCH body for an auto-deploy override; `null` clears it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoDeployPatch {
    #[serde(default)]
    pub auto_deploy: Option<bool>,
}

/// Auto-deploy override at one scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoDeployView {
    pub scope: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub auto_deploy: Option<bool>,
}

/// Global auto-deploy setting with the environment default it overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalAutoDeployView {
    pub auto_deploy: Option<bool>,
    pub env_default: bool,
    pub effective: bool,
}

/// Resolved auto-apply policy for a stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectivePolicyView {
    pub stack_id: i64,
    pub enabled: bool,
    pub source: String,
}

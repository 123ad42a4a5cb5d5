//! Typed per-target outcomes, flattened into a job's `results` map only at
//! serialisation.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::errors::OrchError;

fn is_false(v: &bool) -> bool {
    !*v
}

/// What a cleanup runner reports for one host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub space_reclaimed: String,
    pub items_removed: BTreeMap<String, u64>,
    pub errors: Vec<String>,
}

impl PruneReport {
    pub fn dry_run() -> Self {
        Self {
            space_reclaimed: "0B (dry run)".to_string(),
            ..Default::default()
        }
    }
}

/// What a deployment reports for its stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    pub stack_id: i64,
    pub stack_name: String,
    pub deployment_hash: String,
    pub config_unchanged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stamp_id: Option<i64>,
    pub compose_files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutcomeReport {
    Prune(PruneReport),
    Deploy(DeployReport),
}

/// Why a target was not acted on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipInfo {
    pub reason: String,
    #[serde(skip_serializing_if = "is_false")]
    pub config_unchanged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureInfo {
    pub error: String,
    #[serde(skip_serializing_if = "is_false")]
    pub timeout: bool,
}

/// Result for one target of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    Completed(OutcomeReport),
    DryRun(OutcomeReport),
    Skipped(SkipInfo),
    Failed(FailureInfo),
}

impl TargetOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        TargetOutcome::Skipped(SkipInfo {
            reason: reason.into(),
            config_unchanged: false,
            policy_source: None,
        })
    }

    pub fn failed(error: impl Into<String>) -> Self {
        TargetOutcome::Failed(FailureInfo {
            error: error.into(),
            timeout: false,
        })
    }

    pub fn timed_out(after: Duration) -> Self {
        TargetOutcome::Failed(FailureInfo {
            error: format!("timed out after {}s", after.as_secs()),
            timeout: true,
        })
    }

    pub fn from_error(err: &OrchError) -> Self {
        match err {
            OrchError::Timeout(msg) => TargetOutcome::Failed(FailureInfo {
                error: msg.clone(),
                timeout: true,
            }),
            other => TargetOutcome::failed(other.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TargetOutcome::Failed(_))
    }

    /// Flatten into the schema-less results map
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "status": "failed", "error": format!("unserialisable outcome: {}", e) })
        })
    }
}

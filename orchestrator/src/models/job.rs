//! Job model

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::OrchError;

/// Schema-less map used for job progress and results
pub type Payload = Map<String, Value>;

/// Target name used for fleet-wide jobs
pub const ALL_HOSTS: &str = "all";

/// The operation a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Deploy,
    SystemPrune,
    ImagePrune,
    ContainerPrune,
    VolumePrune,
    NetworkPrune,
    BuildCachePrune,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Deploy => "deploy",
            JobKind::SystemPrune => "system_prune",
            JobKind::ImagePrune => "image_prune",
            JobKind::ContainerPrune => "container_prune",
            JobKind::VolumePrune => "volume_prune",
            JobKind::NetworkPrune => "network_prune",
            JobKind::BuildCachePrune => "build_cache_prune",
        }
    }

    /// Prune operations delete data on the host
    pub fn is_prune(&self) -> bool {
        !matches!(self, JobKind::Deploy)
    }

    /// Parse the operation segment of a cleanup route
    /// (`system`, `images`, `build-cache`, ...)
    pub fn from_route(segment: &str) -> Result<Self, OrchError> {
        match segment {
            "system" => Ok(JobKind::SystemPrune),
            "images" | "image" => Ok(JobKind::ImagePrune),
            "containers" | "container" => Ok(JobKind::ContainerPrune),
            "volumes" | "volume" => Ok(JobKind::VolumePrune),
            "networks" | "network" => Ok(JobKind::NetworkPrune),
            "build-cache" | "build_cache" => Ok(JobKind::BuildCachePrune),
            other => other.parse::<JobKind>().and_then(|kind| {
                if kind.is_prune() {
                    Ok(kind)
                } else {
                    Err(OrchError::InvalidInput(format!(
                        "unknown cleanup operation: {}",
                        other
                    )))
                }
            }),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = OrchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deploy" => Ok(JobKind::Deploy),
            "system_prune" => Ok(JobKind::SystemPrune),
            "image_prune" => Ok(JobKind::ImagePrune),
            "container_prune" => Ok(JobKind::ContainerPrune),
            "volume_prune" => Ok(JobKind::VolumePrune),
            "network_prune" => Ok(JobKind::NetworkPrune),
            "build_cache_prune" => Ok(JobKind::BuildCachePrune),
            _ => Err(OrchError::InvalidInput(format!("unknown operation: {}", s))),
        }
    }
}

/// Whether a job addresses one host or the whole fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobScope {
    SingleHost,
    AllHosts,
}

impl JobScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobScope::SingleHost => "single_host",
            JobScope::AllHosts => "all_hosts",
        }
    }
}

impl FromStr for JobScope {
    type Err = OrchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single_host" => Ok(JobScope::SingleHost),
            "all_hosts" => Ok(JobScope::AllHosts),
            _ => Err(OrchError::InvalidInput(format!("unknown scope: {}", s))),
        }
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = OrchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(OrchError::InvalidInput(format!("unknown status: {}", s))),
        }
    }
}

/// Caller-supplied options for an operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub force: bool,

    /// Required for destructive operations that are not dry runs
    #[serde(default)]
    pub confirmation_token: Option<String>,

    /// Resource filters passed through to the runner
    #[serde(default)]
    pub exclude_filters: HashMap<String, Vec<String>>,
}

impl JobOptions {
    /// Reject destructive requests that were not confirmed
    pub fn validate(&self, kind: JobKind) -> Result<(), OrchError> {
        if self.exclude_filters.keys().any(|k| k.trim().is_empty()) {
            return Err(OrchError::InvalidInput(
                "exclude_filters keys must not be empty".to_string(),
            ));
        }
        if !kind.is_prune() || self.dry_run {
            return Ok(());
        }
        let confirmed = self
            .confirmation_token
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false);
        if !confirmed {
            return Err(OrchError::InvalidInput(format!(
                "confirmation_token is required for {} unless dry_run is set",
                kind
            )));
        }
        Ok(())
    }
}

/// A tracked unit of asynchronous work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "operation")]
    pub kind: JobKind,
    pub scope: JobScope,
    pub target: String,
    pub status: JobStatus,
    pub dry_run: bool,
    pub force: bool,
    #[serde(default)]
    pub exclude_filters: HashMap<String, Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: Payload,
    pub results: Payload,
    pub owner: String,
}

impl Job {
    /// A fresh `queued` job
    pub fn new(
        kind: JobKind,
        scope: JobScope,
        target: impl Into<String>,
        owner: impl Into<String>,
        options: &JobOptions,
    ) -> Self {
        Self {
            id: crate::utils::generate_uuid(),
            kind,
            scope,
            target: target.into(),
            status: JobStatus::Queued,
            dry_run: options.dry_run,
            force: options.force,
            exclude_filters: options.exclude_filters.clone(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: Payload::new(),
            results: Payload::new(),
            owner: owner.into(),
        }
    }
}

//! Deployment stamp model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record of a successful deployment. Append-only; the newest stamp for a
/// stack is the reference for drift detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStamp {
    pub id: i64,
    pub stack_id: i64,
    pub deployment_hash: String,
    pub created_at: DateTime<Utc>,
    pub triggered_by: String,
    pub manual: bool,
}

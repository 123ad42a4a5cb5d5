//! Drift detection between staged compose content and the last deployment

use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::errors::OrchError;
use crate::filesys::file::File;
use crate::models::stamp::DeploymentStamp;
use crate::store::stamps::StampStore;
use crate::utils::hex;

/// Content hash of a set of compose files.
///
/// Files are read in path order and each is followed by a newline, so the
/// hash is independent of the order callers list them in.
pub async fn content_hash(paths: &[PathBuf]) -> Result<String, OrchError> {
    let mut sorted: Vec<&PathBuf> = paths.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for path in sorted {
        let bytes = File::new(path).read_bytes().await?;
        hasher.update(&bytes);
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Outcome of a drift check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftCheck {
    pub current_hash: String,
    pub last_stamp: Option<DeploymentStamp>,
}

impl DriftCheck {
    /// True when the latest stamp carries the same hash
    pub fn unchanged(&self) -> bool {
        self.last_stamp
            .as_ref()
            .map(|s| s.deployment_hash == self.current_hash)
            .unwrap_or(false)
    }
}

/// Compares staged content against the latest deployment stamp
#[derive(Clone)]
pub struct DriftComparator {
    stamps: StampStore,
}

impl DriftComparator {
    pub fn new(stamps: StampStore) -> Self {
        Self { stamps }
    }

    pub async fn check(&self, stack_id: i64, staged: &[PathBuf]) -> Result<DriftCheck, OrchError> {
        let current_hash = content_hash(staged).await?;
        let last_stamp = self.stamps.latest(stack_id).await?;
        Ok(DriftCheck {
            current_hash,
            last_stamp,
        })
    }

    /// Whether the staged files match what was last deployed. A stack that
    /// was never deployed is always changed.
    pub async fn is_unchanged(&self, stack_id: i64, staged: &[PathBuf]) -> Result<bool, OrchError> {
        Ok(self.check(stack_id, staged).await?.unchanged())
    }
}

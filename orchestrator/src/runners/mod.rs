//! Operation runners

pub mod preview;
pub mod prune;
pub mod transport;

use async_trait::async_trait;

use crate::errors::OrchError;
use crate::models::inventory::Host;
use crate::models::job::{JobKind, JobOptions};
use crate::models::outcome::TargetOutcome;

/// Executes one operation against one host
#[async_trait]
pub trait OperationRunner: Send + Sync {
    fn kind(&self) -> JobKind;

    async fn run(&self, host: &Host, options: &JobOptions) -> Result<TargetOutcome, OrchError>;
}

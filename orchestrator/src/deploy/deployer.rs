//! Stack deployments: policy gate, staging, drift check, compose up, stamp

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::deploy::compose::{ComposeCli, ComposeInvocation, OutputLine};
use crate::deploy::drift::DriftComparator;
use crate::deploy::stager::{StagedStack, Stager};
use crate::errors::OrchError;
use crate::jobs::progress::ProgressSink;
use crate::models::inventory::{ScopeKind, Stack};
use crate::models::outcome::{DeployReport, OutcomeReport, SkipInfo, TargetOutcome};
use crate::policy::auto_apply::AutoApplyResolver;
use crate::runners::transport::{resolve_access, HostAccess};
use crate::storage::settings::TransportSettings;
use crate::store::catalog::{Inventory, StackCatalog};
use crate::store::stamps::StampStore;

/// One deployment request for a stack
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub stack_id: i64,

    /// Triggered by automation rather than a person
    pub auto: bool,

    /// Deploy even when the staged content matches the last stamp
    pub force: bool,

    /// Stage and hash only
    pub dry_run: bool,

    pub triggered_by: String,
}

impl DeployRequest {
    pub fn manual(stack_id: i64, triggered_by: impl Into<String>) -> Self {
        Self {
            stack_id,
            auto: false,
            force: false,
            dry_run: false,
            triggered_by: triggered_by.into(),
        }
    }
}

/// At most one deployment per stack at a time
#[derive(Default)]
pub struct StackLocks {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl StackLocks {
    pub async fn acquire(&self, stack_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(stack_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Runs deployments for stacks in the catalog
pub struct Deployer {
    catalog: Arc<dyn StackCatalog>,
    inventory: Arc<dyn Inventory>,
    stager: Stager,
    drift: DriftComparator,
    stamps: StampStore,
    resolver: Arc<AutoApplyResolver>,
    compose: Arc<dyn ComposeCli>,
    transport: TransportSettings,
    locks: StackLocks,
}

impl Deployer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<dyn StackCatalog>,
        inventory: Arc<dyn Inventory>,
        stager: Stager,
        stamps: StampStore,
        resolver: Arc<AutoApplyResolver>,
        compose: Arc<dyn ComposeCli>,
        transport: TransportSettings,
    ) -> Self {
        Self {
            catalog,
            inventory,
            stager,
            drift: DriftComparator::new(stamps.clone()),
            stamps,
            resolver,
            compose,
            transport,
            locks: StackLocks::default(),
        }
    }

    pub async fn resolve(&self, stack_id: i64) -> Result<Stack, OrchError> {
        self.catalog.resolve(stack_id).await
    }

    /// Deploy one stack. Skips are outcomes, not errors; a failed staging
    /// or CLI run is an error and leaves no stamp behind.
    pub async fn deploy(
        &self,
        request: &DeployRequest,
        progress: &dyn ProgressSink,
    ) -> Result<TargetOutcome, OrchError> {
        let stack = self.catalog.resolve(request.stack_id).await?;
        let _guard = self.locks.acquire(stack.id).await;
        info!(
            "Deploying stack {} ({}:{}) auto={} force={} dry_run={}",
            stack.name, stack.scope_kind, stack.scope_name, request.auto, request.force, request.dry_run
        );

        if request.auto {
            let policy = self.resolver.effective_for(&stack).await?;
            if !policy.enabled {
                info!(
                    "Auto-apply disabled for stack {} by {}",
                    stack.name, policy.source
                );
                return Ok(TargetOutcome::Skipped(SkipInfo {
                    reason: "auto_apply_disabled".to_string(),
                    config_unchanged: false,
                    policy_source: Some(policy.source.as_str().to_string()),
                }));
            }
        }

        progress.phase("staging", "staging stack files").await;
        let staged = self.stager.stage_stack(&stack).await?;
        let outcome = self.deploy_staged(&stack, &staged, request, progress).await;
        staged.remove().await;
        outcome
    }

    async fn deploy_staged(
        &self,
        stack: &Stack,
        staged: &StagedStack,
        request: &DeployRequest,
        progress: &dyn ProgressSink,
    ) -> Result<TargetOutcome, OrchError> {
        if staged.compose_files().is_empty() {
            return Ok(TargetOutcome::skipped("no_compose_files"));
        }

        progress.phase("comparing", "comparing against last deployment").await;
        let check = self.drift.check(stack.id, staged.compose_files()).await?;
        let unchanged = check.unchanged();
        debug!(
            "Stack {} hash {} unchanged={}",
            stack.name, check.current_hash, unchanged
        );

        let mut report = DeployReport {
            stack_id: stack.id,
            stack_name: stack.name.clone(),
            deployment_hash: check.current_hash.clone(),
            config_unchanged: unchanged,
            stamp_id: None,
            compose_files: staged.compose_files().len(),
        };

        if request.dry_run {
            return Ok(TargetOutcome::DryRun(OutcomeReport::Deploy(report)));
        }

        if unchanged && !request.force {
            info!("Stack {} unchanged since last deployment, skipping", stack.name);
            return Ok(TargetOutcome::Skipped(SkipInfo {
                reason: "config_unchanged".to_string(),
                config_unchanged: true,
                policy_source: None,
            }));
        }

        let docker_host = match self.target_access(stack).await? {
            Some(HostAccess::Forbidden { reason }) => {
                warn!("Not deploying stack {}: {}", stack.name, reason);
                return Ok(TargetOutcome::skipped(reason));
            }
            Some(access) => access.docker_host(),
            None => None,
        };

        progress.phase("deploying", "running compose up").await;
        let invocation = ComposeInvocation {
            project: project_name(stack),
            compose_files: staged.compose_files().to_vec(),
            work_dir: staged.work_dir().to_path_buf(),
            docker_host,
        };
        let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
        let forward = async {
            while let Some(line) = rx.recv().await {
                progress.output(&line).await;
            }
        };
        let (result, _) = tokio::join!(self.compose.up(&invocation, tx), forward);
        result?;

        progress.phase("recording", "recording deployment stamp").await;
        let stamp = self
            .stamps
            .record(
                stack.id,
                &check.current_hash,
                &request.triggered_by,
                !request.auto,
            )
            .await?;
        info!("Deployed stack {} (stamp {})", stack.name, stamp.id);

        report.stamp_id = Some(stamp.id);
        Ok(TargetOutcome::Completed(OutcomeReport::Deploy(report)))
    }

    /// Host access for host-scoped stacks; group stacks use the local CLI
    async fn target_access(&self, stack: &Stack) -> Result<Option<HostAccess>, OrchError> {
        match stack.scope_kind {
            ScopeKind::Host => {
                let host = self.inventory.get_host(&stack.scope_name).await?;
                Ok(Some(resolve_access(&host, &self.transport)))
            }
            ScopeKind::Group => Ok(None),
        }
    }

    /// Whether a non-forced deployment would be skipped as unchanged
    pub async fn would_be_noop(&self, stack_id: i64) -> Result<bool, OrchError> {
        let stack = self.catalog.resolve(stack_id).await?;
        let staged = self.stager.stage_stack(&stack).await?;
        let result = if staged.compose_files().is_empty() {
            Ok(true)
        } else {
            self.drift.is_unchanged(stack.id, staged.compose_files()).await
        };
        staged.remove().await;
        result
    }

    /// Progress fields identifying the stack
    pub fn progress_fields(stack: &Stack) -> serde_json::Value {
        json!({ "stack_id": stack.id, "stack_name": stack.name })
    }
}

/// Compose project name: lowercase alphanumerics, `-` and `_`
pub fn project_name(stack: &Stack) -> String {
    let name: String = stack
        .name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let name = name.trim_matches('-');
    if name.is_empty() {
        format!("stack-{}", stack.id)
    } else {
        name.to_string()
    }
}

//! Periodic automatic deployments of drifted stacks

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::errors::OrchError;
use crate::jobs::manager::{DeployFlags, JobManager};
use crate::policy::auto_apply::AutoApplyResolver;
use crate::store::catalog::StackCatalog;

/// Owner recorded on jobs and stamps created by this worker
pub const AUTO_DEPLOY_OWNER: &str = "auto-deployer";

/// Auto-deploy worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between sweeps
    pub interval: Duration,

    /// Initial delay before the first sweep
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            initial_delay: Duration::from_secs(30),
        }
    }
}

/// Submit an automatic deployment for every stack whose policy allows it
/// and whose content drifted. Returns the number of jobs submitted.
pub async fn sweep(
    catalog: &dyn StackCatalog,
    resolver: &AutoApplyResolver,
    manager: &JobManager,
) -> Result<usize, OrchError> {
    let stacks = catalog.list_stacks().await?;
    let mut submitted = 0;

    for stack in stacks {
        let policy = match resolver.effective_for(&stack).await {
            Ok(policy) => policy,
            Err(e) => {
                warn!("Failed to resolve auto-apply policy for stack {}: {}", stack.name, e);
                continue;
            }
        };
        if !policy.enabled {
            debug!("Auto-apply off for stack {} ({})", stack.name, policy.source);
            continue;
        }

        match manager.deploy_check(stack.id).await {
            Ok(true) => {
                debug!("Stack {} unchanged", stack.name);
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Drift check failed for stack {}: {}", stack.name, e);
                continue;
            }
        }

        let flags = DeployFlags {
            auto: true,
            ..Default::default()
        };
        match manager.submit_deploy(stack.id, flags, AUTO_DEPLOY_OWNER).await {
            Ok(submission) => {
                info!(
                    "Submitted automatic deployment {} for stack {}",
                    submission.job.id, stack.name
                );
                submitted += 1;
            }
            Err(e) => error!("Failed to submit deployment for stack {}: {}", stack.name, e),
        }
    }

    Ok(submitted)
}

/// Run the auto-deploy worker
pub async fn run<S, F>(
    options: &Options,
    catalog: &dyn StackCatalog,
    resolver: &AutoApplyResolver,
    manager: &JobManager,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Auto-deploy worker starting...");

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Auto-deploy worker shutting down...");
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    loop {
        match sweep(catalog, resolver, manager).await {
            Ok(0) => debug!("Auto-deploy sweep found nothing to do"),
            Ok(n) => info!("Auto-deploy sweep submitted {} deployment(s)", n),
            Err(e) => error!("Auto-deploy sweep failed: {}", e),
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Auto-deploy worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}

//! Job submission: validate, persist, hand over to the executor

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::deploy::deployer::{DeployRequest, Deployer};
use crate::errors::OrchError;
use crate::jobs::executor::{verdict, JobExecutor, JobWork};
use crate::jobs::fsm::{JobEvent, JobFsm};
use crate::models::job::{Job, JobKind, JobOptions, JobScope, Payload, ALL_HOSTS};
use crate::models::preview::{FleetPreview, SpacePreview};
use crate::runners::preview::PreviewRunner;
use crate::runners::prune::PruneRunner;
use crate::runners::transport::CommandTransport;
use crate::runners::OperationRunner;
use crate::storage::settings::TransportSettings;
use crate::store::catalog::Inventory;
use crate::store::jobs::JobStore;

/// A submitted job. `tracked` is false when the store was unavailable and
/// the operation ran synchronously without a durable record.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    #[serde(flatten)]
    pub job: Job,
    pub tracked: bool,
}

/// Options for a deployment trigger
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployFlags {
    pub auto: bool,
    pub force: bool,
    pub dry_run: bool,
}

pub struct JobManager {
    store: Arc<dyn JobStore>,
    inventory: Arc<dyn Inventory>,
    executor: Arc<JobExecutor>,
    deployer: Arc<Deployer>,
    transport: Arc<dyn CommandTransport>,
    transport_settings: TransportSettings,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        inventory: Arc<dyn Inventory>,
        executor: Arc<JobExecutor>,
        deployer: Arc<Deployer>,
        transport: Arc<dyn CommandTransport>,
        transport_settings: TransportSettings,
    ) -> Self {
        Self {
            store,
            inventory,
            executor,
            deployer,
            transport,
            transport_settings,
        }
    }

    pub fn executor(&self) -> &Arc<JobExecutor> {
        &self.executor
    }

    fn prune_runner(&self, kind: JobKind) -> Result<Arc<dyn OperationRunner>, OrchError> {
        let runner = PruneRunner::new(
            kind,
            self.transport.clone(),
            self.transport_settings.clone(),
        )?;
        Ok(Arc::new(runner))
    }

    fn preview_runner(&self, kind: JobKind) -> Result<PreviewRunner, OrchError> {
        PreviewRunner::new(
            kind,
            self.transport.clone(),
            self.transport_settings.clone(),
            self.executor.options().host_timeout,
        )
    }

    /// Estimate what a cleanup operation would reclaim on one host
    pub async fn preview_host(
        &self,
        kind: JobKind,
        host_name: &str,
    ) -> Result<SpacePreview, OrchError> {
        let runner = self.preview_runner(kind)?;
        let host = self.inventory.get_host(host_name).await?;
        Ok(runner.preview(&host).await)
    }

    /// Estimate what a cleanup operation would reclaim across the inventory
    pub async fn preview_fleet(&self, kind: JobKind) -> Result<FleetPreview, OrchError> {
        let runner = self.preview_runner(kind)?;
        let hosts = self.inventory.list_hosts().await?;
        Ok(runner
            .preview_fleet(hosts, self.executor.options().fanout_workers)
            .await)
    }

    /// Run a cleanup operation on one host
    pub async fn submit_host_job(
        &self,
        kind: JobKind,
        host_name: &str,
        owner: &str,
        options: JobOptions,
    ) -> Result<Submission, OrchError> {
        let runner = self.prune_runner(kind)?;
        options.validate(kind)?;
        let host = self.inventory.get_host(host_name).await?;

        match self
            .store
            .create(kind, JobScope::SingleHost, &host.name, owner, &options)
            .await
        {
            Ok(job) => {
                info!("Submitted job {} ({} on {}) for {}", job.id, kind, host.name, owner);
                self.executor.spawn(
                    job.clone(),
                    JobWork::Host {
                        runner,
                        host,
                        options,
                    },
                );
                Ok(Submission { job, tracked: true })
            }
            Err(OrchError::StoreUnavailable(reason)) => {
                warn!(
                    "Job store unavailable ({}), running {} on {} untracked",
                    reason, kind, host.name
                );
                let mut job = Job::new(kind, JobScope::SingleHost, &host.name, owner, &options);
                let mut fsm = JobFsm::from_status(job.status);
                job.status = fsm.process(JobEvent::Start).map_err(OrchError::Internal)?;
                job.started_at = Some(Utc::now());

                let outcome = self
                    .executor
                    .execute_untracked(runner, &host, &options)
                    .await;
                job.status = fsm
                    .process(verdict(&host.name, &outcome))
                    .map_err(OrchError::Internal)?;
                job.completed_at = Some(Utc::now());
                job.results = Payload::new();
                job.results.insert(host.name.clone(), outcome.to_value());
                Ok(Submission {
                    job,
                    tracked: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Run a cleanup operation on every host in the inventory
    pub async fn submit_fleet_job(
        &self,
        kind: JobKind,
        owner: &str,
        options: JobOptions,
    ) -> Result<Submission, OrchError> {
        let runner = self.prune_runner(kind)?;
        let job = self
            .store
            .create(kind, JobScope::AllHosts, ALL_HOSTS, owner, &options)
            .await?;
        info!("Submitted fleet job {} ({}) for {}", job.id, kind, owner);
        self.executor
            .spawn(job.clone(), JobWork::Fleet { runner, options });
        Ok(Submission { job, tracked: true })
    }

    /// Trigger a deployment for a stack. Deployments always need a job
    /// record; a store outage is returned to the caller.
    pub async fn submit_deploy(
        &self,
        stack_id: i64,
        flags: DeployFlags,
        owner: &str,
    ) -> Result<Submission, OrchError> {
        let stack = self.deployer.resolve(stack_id).await?;
        let options = JobOptions {
            dry_run: flags.dry_run,
            force: flags.force,
            ..Default::default()
        };
        let job = self
            .store
            .create(
                JobKind::Deploy,
                JobScope::SingleHost,
                &stack.scope_name,
                owner,
                &options,
            )
            .await?;
        info!(
            "Submitted deploy job {} for stack {} (auto={}) by {}",
            job.id, stack.name, flags.auto, owner
        );

        let request = DeployRequest {
            stack_id: stack.id,
            auto: flags.auto,
            force: flags.force,
            dry_run: flags.dry_run,
            triggered_by: owner.to_string(),
        };
        self.executor
            .spawn(job.clone(), JobWork::Deploy { request });
        Ok(Submission { job, tracked: true })
    }

    pub async fn get(&self, id: &str) -> Result<Job, OrchError> {
        self.store.get(id).await
    }

    /// Whether deploying the stack now would be skipped as unchanged
    pub async fn deploy_check(&self, stack_id: i64) -> Result<bool, OrchError> {
        self.deployer.would_be_noop(stack_id).await
    }
}

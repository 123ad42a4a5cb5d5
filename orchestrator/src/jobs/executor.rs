//! Job executor.
//!
//! Drives a job from `running` to a terminal status. Single-host jobs call one
//! runner; fleet jobs fan out over a fixed number of workers that pull hosts
//! from a shared queue; deploy jobs hand over to the [`Deployer`]. Every
//! runner call is wrapped in its own timeout and panic guard.

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::deploy::deployer::{DeployRequest, Deployer};
use crate::errors::OrchError;
use crate::jobs::fsm::{JobEvent, JobFsm};
use crate::jobs::progress::JobProgress;
use crate::models::inventory::Host;
use crate::models::job::{Job, JobOptions, JobStatus, Payload};
use crate::models::outcome::TargetOutcome;
use crate::runners::OperationRunner;
use crate::storage::settings::ExecutorSettings;
use crate::store::catalog::Inventory;
use crate::store::jobs::JobStore;

/// Executor tuning
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub fanout_workers: usize,
    pub host_timeout: Duration,
    pub deploy_timeout: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from(&ExecutorSettings::default())
    }
}

impl From<&ExecutorSettings> for ExecutorOptions {
    fn from(settings: &ExecutorSettings) -> Self {
        Self {
            fanout_workers: settings.fanout_workers.max(1),
            host_timeout: Duration::from_secs(settings.host_timeout_secs),
            deploy_timeout: Duration::from_secs(settings.deploy_timeout_secs),
        }
    }
}

/// What a job has to do
pub enum JobWork {
    /// One runner against one resolved host
    Host {
        runner: Arc<dyn OperationRunner>,
        host: Host,
        options: JobOptions,
    },

    /// One runner against every host in the inventory
    Fleet {
        runner: Arc<dyn OperationRunner>,
        options: JobOptions,
    },

    Deploy { request: DeployRequest },
}

/// Shared fan-out bookkeeping, guarded by one lock
struct FanoutState {
    results: Payload,
    completed: usize,
}

pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    inventory: Arc<dyn Inventory>,
    deployer: Arc<Deployer>,
    options: ExecutorOptions,
    tasks: std::sync::Mutex<JoinSet<()>>,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        inventory: Arc<dyn Inventory>,
        deployer: Arc<Deployer>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            store,
            inventory,
            deployer,
            options,
            tasks: std::sync::Mutex::new(JoinSet::new()),
        }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run a job in a detached task; the caller returns immediately
    pub fn spawn(self: &Arc<Self>, job: Job, work: JobWork) {
        let executor = Arc::clone(self);
        let mut tasks = self.tasks();
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                error!("Job task ended abnormally: {}", e);
            }
        }
        tasks.spawn(async move {
            executor.run(&job, work).await;
        });
    }

    /// Number of job tasks that have not been reaped yet
    pub fn in_flight(&self) -> usize {
        self.tasks().len()
    }

    /// Wait for running jobs, aborting whatever is left after `timeout`
    pub async fn drain(&self, timeout: Duration) {
        let mut tasks = std::mem::take(&mut *self.tasks());
        if tasks.is_empty() {
            return;
        }
        info!("Waiting for {} job(s) to finish", tasks.len());
        let wait = async { while tasks.join_next().await.is_some() {} };
        if tokio::time::timeout(timeout, wait).await.is_err() {
            warn!("Aborting {} job(s) still running after {:?}", tasks.len(), timeout);
            tasks.abort_all();
        }
    }

    /// Execute a job to its terminal status
    pub async fn run(&self, job: &Job, work: JobWork) -> JobStatus {
        let mut fsm = JobFsm::from_status(job.status);
        let running = match fsm.process(JobEvent::Start) {
            Ok(status) => status,
            Err(e) => {
                error!("Refusing to run job {}: {}", job.id, e);
                return job.status;
            }
        };
        if let Err(e) = self.store.set_status(&job.id, running).await {
            error!("Failed to start job {}: {}", job.id, e);
            return job.status;
        }
        info!("Job {} running ({} on {})", job.id, job.kind, job.target);

        let progress = JobProgress::new(self.store.clone(), job.id.clone());
        let (results, event) = match work {
            JobWork::Host {
                runner,
                host,
                options,
            } => self.run_single(job, runner, host, options, &progress).await,
            JobWork::Fleet { runner, options } => {
                self.run_fleet(job, runner, options, &progress).await
            }
            JobWork::Deploy { request } => self.run_deploy(job, request, &progress).await,
        };

        // Results land before the terminal status so observers see them
        // together with `complete`.
        if let Err(e) = self.store.set_results(&job.id, &results).await {
            error!("Failed to write results for job {}: {}", job.id, e);
        }
        let status = match fsm.process(event) {
            Ok(status) => status,
            Err(e) => {
                error!("Job {}: {}", job.id, e);
                JobStatus::Failed
            }
        };
        if let Err(e) = self.store.set_status(&job.id, status).await {
            error!("Failed to finish job {}: {}", job.id, e);
        }
        match fsm.error() {
            Some(reason) => info!("Job {} {}: {}", job.id, status, reason),
            None => info!("Job {} {}", job.id, status),
        }
        status
    }

    async fn run_single(
        &self,
        job: &Job,
        runner: Arc<dyn OperationRunner>,
        host: Host,
        options: JobOptions,
        progress: &JobProgress,
    ) -> (Payload, JobEvent) {
        progress
            .update(|p| {
                p.insert("phase".to_string(), json!("running"));
                p.insert("current_host".to_string(), json!(host.name));
            })
            .await;

        let outcome = guarded(
            self.options.host_timeout,
            runner.run(&host, &options),
        )
        .await;

        let event = verdict(&job.target, &outcome);
        progress
            .update(|p| {
                p.insert("phase".to_string(), json!("done"));
            })
            .await;

        let mut results = Payload::new();
        results.insert(job.target.clone(), outcome.to_value());
        (results, event)
    }

    async fn run_fleet(
        &self,
        job: &Job,
        runner: Arc<dyn OperationRunner>,
        options: JobOptions,
        progress: &JobProgress,
    ) -> (Payload, JobEvent) {
        let hosts = match self.inventory.list_hosts().await {
            Ok(hosts) => hosts,
            Err(e) => {
                error!("Job {}: failed to enumerate hosts: {}", job.id, e);
                let mut results = Payload::new();
                results.insert("error".to_string(), json!(e.to_string()));
                return (results, JobEvent::Fail(format!("host enumeration failed: {}", e)));
            }
        };

        let total = hosts.len();
        let workers = self.options.fanout_workers.min(total).max(1);
        debug!("Job {} fanning out over {} hosts with {} workers", job.id, total, workers);
        progress
            .update(|p| {
                p.insert("phase".to_string(), json!("running"));
                p.insert("total_hosts".to_string(), json!(total));
                p.insert("completed_hosts".to_string(), json!(0));
                p.insert("current_host".to_string(), Value::Null);
            })
            .await;

        let queue = Mutex::new(hosts.into_iter().collect::<VecDeque<Host>>());
        let state = Mutex::new(FanoutState {
            results: Payload::new(),
            completed: 0,
        });

        let worker = |index: usize| {
            let runner = runner.clone();
            let queue = &queue;
            let state = &state;
            let options = &options;
            async move {
                loop {
                    let host = match queue.lock().await.pop_front() {
                        Some(host) => host,
                        None => break,
                    };
                    debug!("Job {} worker {} took {}", job.id, index, host.name);
                    progress
                        .set("current_host", json!(host.name))
                        .await;

                    let outcome =
                        guarded(self.options.host_timeout, runner.run(&host, options)).await;
                    if outcome.is_failure() {
                        warn!("Job {}: host {} failed", job.id, host.name);
                    }

                    let mut state = state.lock().await;
                    state.results.insert(host.name.clone(), outcome.to_value());
                    state.completed += 1;
                    let completed = state.completed;
                    progress
                        .update(|p| {
                            p.insert("completed_hosts".to_string(), json!(completed));
                            p.insert("current_host".to_string(), json!(host.name));
                        })
                        .await;
                    if let Err(e) = self.store.set_results(&job.id, &state.results).await {
                        warn!("Failed to write partial results for job {}: {}", job.id, e);
                    }
                }
            }
        };

        futures::future::join_all((0..workers).map(worker)).await;

        progress
            .update(|p| {
                p.insert("phase".to_string(), json!("done"));
                p.insert("current_host".to_string(), Value::Null);
            })
            .await;

        let state = state.into_inner();
        (state.results, JobEvent::Finish)
    }

    async fn run_deploy(
        &self,
        job: &Job,
        request: DeployRequest,
        progress: &JobProgress,
    ) -> (Payload, JobEvent) {
        match self.deployer.resolve(request.stack_id).await {
            Ok(stack) => {
                let fields = Deployer::progress_fields(&stack);
                progress
                    .update(|p| {
                        if let Value::Object(fields) = fields {
                            p.extend(fields);
                        }
                    })
                    .await;
            }
            Err(e) => {
                let mut results = Payload::new();
                results.insert(
                    job.target.clone(),
                    TargetOutcome::from_error(&e).to_value(),
                );
                return (results, JobEvent::Fail(e.to_string()));
            }
        }

        let outcome = guarded(
            self.options.deploy_timeout,
            self.deployer.deploy(&request, progress),
        )
        .await;
        progress.set("phase", json!("done")).await;

        let event = verdict(&job.target, &outcome);
        let mut results = Payload::new();
        results.insert(job.target.clone(), outcome.to_value());
        (results, event)
    }

    /// Run a single-host operation without a job record
    pub async fn execute_untracked(
        &self,
        runner: Arc<dyn OperationRunner>,
        host: &Host,
        options: &JobOptions,
    ) -> TargetOutcome {
        guarded(self.options.host_timeout, runner.run(host, options)).await
    }
}

/// How a single-target outcome ends its job
pub fn verdict(target: &str, outcome: &TargetOutcome) -> JobEvent {
    match outcome {
        TargetOutcome::Failed(failure) => JobEvent::Fail(format!("{}: {}", target, failure.error)),
        _ => JobEvent::Finish,
    }
}

/// Await a runner call under a timeout, turning errors, timeouts and
/// panics into a failed outcome for that target.
pub async fn guarded<F>(limit: Duration, fut: F) -> TargetOutcome
where
    F: Future<Output = Result<TargetOutcome, OrchError>>,
{
    match tokio::time::timeout(limit, AssertUnwindSafe(fut).catch_unwind()).await {
        Err(_) => TargetOutcome::timed_out(limit),
        Ok(Err(panic)) => {
            let err = OrchError::RunnerFailure(format!("runner panicked: {}", panic_message(&*panic)));
            error!("{}", err);
            TargetOutcome::from_error(&err)
        }
        Ok(Ok(Err(e))) => TargetOutcome::from_error(&e),
        Ok(Ok(Ok(outcome))) => outcome,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Cleanup job execution tests

use std::sync::Arc;

use async_trait::async_trait;

use ddorch::errors::OrchError;
use ddorch::jobs::executor::{JobExecutor, JobWork};
use ddorch::jobs::manager::JobManager;
use ddorch::models::job::{Job, JobKind, JobOptions, JobScope, JobStatus, Payload};
use ddorch::runners::prune::PruneRunner;
use ddorch::runners::transport::HostAccess;
use ddorch::store::catalog::Inventory;
use ddorch::store::jobs::JobStore;

use crate::common::{harness, host_with_vars};

fn confirmed() -> JobOptions {
    JobOptions {
        confirmation_token: Some("confirm".to_string()),
        ..Default::default()
    }
}

fn dry_run() -> JobOptions {
    JobOptions {
        dry_run: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_single_host_dry_run() {
    let h = harness().build().await;
    h.add_hosts(&["web1"]).await;

    let submission = h
        .state
        .manager
        .submit_host_job(JobKind::SystemPrune, "web1", "alice", dry_run())
        .await
        .unwrap();
    assert!(submission.tracked);
    assert_eq!(submission.job.status, JobStatus::Queued);
    assert_eq!(submission.job.target, "web1");

    let job = h.wait_terminal(&submission.job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert_eq!(job.owner, "alice");
    assert_eq!(job.results["web1"]["status"], "dry_run");
    assert_eq!(job.results["web1"]["space_reclaimed"], "0B (dry run)");

    // Dry runs never reach the host
    assert!(h.transport.calls().is_empty());
}

#[tokio::test]
async fn test_exclude_filters_reach_the_host_and_the_record() {
    let h = harness().build().await;
    h.add_hosts(&["web1", "web2"]).await;

    let mut options = confirmed();
    options
        .exclude_filters
        .insert("label".to_string(), vec!["keep=true".to_string()]);

    let submission = h
        .state
        .manager
        .submit_fleet_job(JobKind::ImagePrune, "alice", options)
        .await
        .unwrap();
    let job = h.wait_terminal(&submission.job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.exclude_filters["label"], vec!["keep=true".to_string()]);

    let calls = h.transport.calls();
    assert_eq!(calls.len(), 2);
    for (_, command) in calls {
        assert_eq!(command, "docker image prune -af --filter label=keep=true");
    }
}

#[tokio::test]
async fn test_single_host_prune() {
    let h = harness().build().await;
    h.add_hosts(&["web1"]).await;

    let submission = h
        .state
        .manager
        .submit_host_job(JobKind::SystemPrune, "web1", "alice", confirmed())
        .await
        .unwrap();
    let job = h.wait_terminal(&submission.job.id).await;

    assert_eq!(job.status, JobStatus::Completed);
    let result = &job.results["web1"];
    assert_eq!(result["status"], "completed");
    assert_eq!(result["space_reclaimed"], "1.5GB");
    assert_eq!(result["items_removed"]["images"], 1);

    let calls = h.transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].0,
        HostAccess::Ssh {
            destination: "root@web1".to_string()
        }
    );
    assert!(calls[0].1.starts_with("docker system prune"));
}

#[tokio::test]
async fn test_single_host_failure_fails_job() {
    let h = harness().fail("web1").build().await;
    h.add_hosts(&["web1"]).await;

    let submission = h
        .state
        .manager
        .submit_host_job(JobKind::ImagePrune, "web1", "alice", confirmed())
        .await
        .unwrap();
    let job = h.wait_terminal(&submission.job.id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.results["web1"]["status"], "failed");
    assert!(job.results["web1"]["error"]
        .as_str()
        .unwrap()
        .contains("Cannot connect"));
}

#[tokio::test]
async fn test_forbidden_local_socket_is_skipped() {
    let h = harness().build().await;
    h.add_host(host_with_vars("edge1", &[("docker_host", "unix:///var/run/docker.sock")]))
        .await;

    let submission = h
        .state
        .manager
        .submit_host_job(JobKind::ContainerPrune, "edge1", "alice", confirmed())
        .await
        .unwrap();
    let job = h.wait_terminal(&submission.job.id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.results["edge1"]["status"], "skipped");
    assert!(h.transport.calls().is_empty());
}

#[tokio::test]
async fn test_submission_errors() {
    let h = harness().build().await;
    h.add_hosts(&["web1"]).await;

    let err = h
        .state
        .manager
        .submit_host_job(JobKind::SystemPrune, "nope", "alice", dry_run())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchError::NotFound(_)));

    let err = h
        .state
        .manager
        .submit_host_job(JobKind::VolumePrune, "web1", "alice", JobOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchError::InvalidInput(_)));

    let err = h
        .state
        .manager
        .submit_host_job(JobKind::Deploy, "web1", "alice", dry_run())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchError::InvalidInput(_)));
}

#[tokio::test]
async fn test_fleet_job_isolates_hanging_host() {
    let h = harness().hang("slow").build().await;
    h.add_hosts(&["web1", "web2", "slow", "db1", "db2"]).await;

    let submission = h
        .state
        .manager
        .submit_fleet_job(JobKind::ImagePrune, "ops", confirmed())
        .await
        .unwrap();
    assert_eq!(submission.job.target, "all");

    let job = h.wait_terminal(&submission.job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.results.len(), 5);

    assert_eq!(job.results["slow"]["status"], "failed");
    assert_eq!(job.results["slow"]["timeout"], true);
    for host in ["web1", "web2", "db1", "db2"] {
        assert_eq!(job.results[host]["status"], "completed", "host {}", host);
    }

    assert_eq!(job.progress["total_hosts"], 5);
    assert_eq!(job.progress["completed_hosts"], 5);
    assert_eq!(h.transport.calls().len(), 5);
}

#[tokio::test]
async fn test_fleet_job_with_failures_still_completes() {
    let h = harness().fail("db1").build().await;
    h.add_hosts(&["web1", "db1"]).await;

    let submission = h
        .state
        .manager
        .submit_fleet_job(JobKind::BuildCachePrune, "ops", confirmed())
        .await
        .unwrap();
    let job = h.wait_terminal(&submission.job.id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.results["db1"]["status"], "failed");
    assert_eq!(job.results["web1"]["status"], "completed");
}

#[tokio::test]
async fn test_fleet_job_over_empty_inventory() {
    let h = harness().build().await;

    let submission = h
        .state
        .manager
        .submit_fleet_job(JobKind::NetworkPrune, "ops", dry_run())
        .await
        .unwrap();
    let job = h.wait_terminal(&submission.job.id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.results.is_empty());
    assert_eq!(job.progress["total_hosts"], 0);
}

#[tokio::test]
async fn test_drain_waits_for_running_jobs() {
    let h = harness().build().await;
    h.add_hosts(&["web1", "web2"]).await;

    let submission = h
        .state
        .manager
        .submit_fleet_job(JobKind::ImagePrune, "ops", confirmed())
        .await
        .unwrap();
    h.state
        .executor
        .drain(std::time::Duration::from_secs(5))
        .await;

    let job = h.state.jobs.get(&submission.job.id).await.unwrap();
    assert!(job.status.is_terminal());
    assert_eq!(h.state.executor.in_flight(), 0);
}

/// Store whose writes always fail as unavailable
struct UnavailableStore;

#[async_trait]
impl JobStore for UnavailableStore {
    async fn insert(&self, _job: &Job) -> Result<(), OrchError> {
        Err(OrchError::StoreUnavailable("database is locked".to_string()))
    }

    async fn set_status(&self, _id: &str, _status: JobStatus) -> Result<(), OrchError> {
        Err(OrchError::StoreUnavailable("database is locked".to_string()))
    }

    async fn set_progress(&self, _id: &str, _progress: &Payload) -> Result<(), OrchError> {
        Err(OrchError::StoreUnavailable("database is locked".to_string()))
    }

    async fn set_results(&self, _id: &str, _results: &Payload) -> Result<(), OrchError> {
        Err(OrchError::StoreUnavailable("database is locked".to_string()))
    }

    async fn get(&self, _id: &str) -> Result<Job, OrchError> {
        Err(OrchError::StoreUnavailable("database is locked".to_string()))
    }
}

#[tokio::test]
async fn test_unavailable_store_runs_untracked() {
    let h = harness().build().await;
    h.add_hosts(&["web1"]).await;

    let store: Arc<dyn JobStore> = Arc::new(UnavailableStore);
    let inventory = h.state.catalog.clone();
    let executor = Arc::new(JobExecutor::new(
        store.clone(),
        inventory.clone(),
        h.state.deployer.clone(),
        h.options.executor.clone(),
    ));
    let manager = JobManager::new(
        store,
        inventory,
        executor,
        h.state.deployer.clone(),
        h.transport.clone(),
        h.options.transport.clone(),
    );

    let submission = manager
        .submit_host_job(JobKind::ImagePrune, "web1", "alice", confirmed())
        .await
        .unwrap();
    assert!(!submission.tracked);
    assert_eq!(submission.job.status, JobStatus::Completed);
    assert!(submission.job.completed_at.is_some());
    assert_eq!(submission.job.results["web1"]["status"], "completed");
    assert_eq!(h.transport.calls().len(), 1);

    let value = serde_json::to_value(&submission).unwrap();
    assert_eq!(value["tracked"], false);
    assert_eq!(value["operation"], "image_prune");

    // Fleet jobs need a record
    let err = manager
        .submit_fleet_job(JobKind::ImagePrune, "alice", confirmed())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_finished_job_is_not_run_again() {
    let h = harness().build().await;
    h.add_hosts(&["web1"]).await;
    let host = h.state.catalog.get_host("web1").await.unwrap();

    let mut job = Job::new(JobKind::ImagePrune, JobScope::SingleHost, "web1", "alice", &confirmed());
    job.status = JobStatus::Completed;

    let runner = Arc::new(
        PruneRunner::new(JobKind::ImagePrune, h.transport.clone(), h.options.transport.clone())
            .unwrap(),
    );
    let status = h
        .state
        .manager
        .executor()
        .run(
            &job,
            JobWork::Host {
                runner,
                host,
                options: confirmed(),
            },
        )
        .await;

    assert_eq!(status, JobStatus::Completed);
    assert!(h.transport.calls().is_empty());
}

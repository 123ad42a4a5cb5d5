//! Deployment tests: staging, drift detection and stamps

use ddorch::errors::OrchError;
use ddorch::jobs::manager::DeployFlags;
use ddorch::models::job::{JobKind, JobStatus};
use ddorch::store::overrides::OverrideScope;
use ddorch::store::stamps::StampStore;

use crate::common::{files_under, harness};

fn manual() -> DeployFlags {
    DeployFlags::default()
}

#[tokio::test]
async fn test_deploy_records_stamp_then_skips_unchanged() {
    let h = harness().build().await;
    h.add_hosts(&["web1"]).await;
    let stack_id = h.add_stack("web1", "app", None).await;
    let stamps = StampStore::new(&h.state.db);

    let first = h
        .state
        .manager
        .submit_deploy(stack_id, manual(), "alice")
        .await
        .unwrap();
    assert_eq!(first.job.kind, JobKind::Deploy);
    assert_eq!(first.job.target, "web1");

    let job = h.wait_terminal(&first.job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    let result = &job.results["web1"];
    assert_eq!(result["status"], "completed");
    assert_eq!(result["config_unchanged"], false);
    assert_eq!(result["stack_name"], "app");

    let stamp = stamps.latest(stack_id).await.unwrap().unwrap();
    assert_eq!(result["deployment_hash"], stamp.deployment_hash.as_str());
    assert_eq!(result["stamp_id"], stamp.id);
    assert_eq!(stamp.triggered_by, "alice");
    assert!(stamp.manual);
    assert_eq!(h.compose.calls(), 1);

    let invocation = h.compose.invocations.lock().unwrap()[0].clone();
    assert_eq!(invocation.project, "app");
    assert_eq!(invocation.compose_files.len(), 1);
    assert_eq!(invocation.docker_host.as_deref(), Some("ssh://root@web1"));

    // Same content again: nothing to do
    let second = h
        .state
        .manager
        .submit_deploy(stack_id, manual(), "alice")
        .await
        .unwrap();
    let job = h.wait_terminal(&second.job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.results["web1"]["status"], "skipped");
    assert_eq!(job.results["web1"]["config_unchanged"], true);
    assert_eq!(h.compose.calls(), 1);
    assert_eq!(stamps.count(stack_id).await.unwrap(), 1);
    assert!(h.state.manager.deploy_check(stack_id).await.unwrap());
}

#[tokio::test]
async fn test_changed_content_and_force_redeploy() {
    let h = harness().build().await;
    h.add_hosts(&["web1"]).await;
    let stack_id = h.add_stack("web1", "app", None).await;
    let stamps = StampStore::new(&h.state.db);

    assert!(!h.state.manager.deploy_check(stack_id).await.unwrap());
    let job = h
        .state
        .manager
        .submit_deploy(stack_id, manual(), "alice")
        .await
        .unwrap();
    h.wait_terminal(&job.job.id).await;

    h.edit_compose("web1", "app", "services:\n  app:\n    image: nginx:1.27\n");
    assert!(!h.state.manager.deploy_check(stack_id).await.unwrap());
    let job = h
        .state
        .manager
        .submit_deploy(stack_id, manual(), "alice")
        .await
        .unwrap();
    let job = h.wait_terminal(&job.job.id).await;
    assert_eq!(job.results["web1"]["status"], "completed");

    let forced = DeployFlags {
        force: true,
        ..Default::default()
    };
    let job = h
        .state
        .manager
        .submit_deploy(stack_id, forced, "alice")
        .await
        .unwrap();
    assert!(job.job.force);
    let job = h.wait_terminal(&job.job.id).await;
    assert_eq!(job.results["web1"]["status"], "completed");
    assert_eq!(job.results["web1"]["config_unchanged"], true);

    assert_eq!(h.compose.calls(), 3);
    assert_eq!(stamps.count(stack_id).await.unwrap(), 3);
}

#[tokio::test]
async fn test_dry_run_deploy_touches_nothing() {
    let h = harness().build().await;
    h.add_hosts(&["web1"]).await;
    let stack_id = h.add_stack("web1", "app", None).await;

    let flags = DeployFlags {
        dry_run: true,
        ..Default::default()
    };
    let job = h
        .state
        .manager
        .submit_deploy(stack_id, flags, "alice")
        .await
        .unwrap();
    let job = h.wait_terminal(&job.job.id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.results["web1"]["status"], "dry_run");
    assert!(job.results["web1"]["deployment_hash"].is_string());
    assert_eq!(h.compose.calls(), 0);
    assert!(StampStore::new(&h.state.db).latest(stack_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_auto_deploy_respects_policy() {
    let h = harness().build().await;
    h.add_hosts(&["web1"]).await;
    let stack_id = h.add_stack("web1", "app", None).await;
    let auto = DeployFlags {
        auto: true,
        ..Default::default()
    };

    let job = h
        .state
        .manager
        .submit_deploy(stack_id, auto, "auto-deployer")
        .await
        .unwrap();
    let job = h.wait_terminal(&job.job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.results["web1"]["status"], "skipped");
    assert_eq!(job.results["web1"]["reason"], "auto_apply_disabled");
    assert_eq!(job.results["web1"]["policy_source"], "env-default");
    assert_eq!(h.compose.calls(), 0);

    h.state
        .overrides
        .set(&OverrideScope::Stack(stack_id), Some(true))
        .await
        .unwrap();
    let job = h
        .state
        .manager
        .submit_deploy(stack_id, auto, "auto-deployer")
        .await
        .unwrap();
    let job = h.wait_terminal(&job.job.id).await;
    assert_eq!(job.results["web1"]["status"], "completed");

    let stamp = StampStore::new(&h.state.db)
        .latest(stack_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!stamp.manual);
    assert_eq!(stamp.triggered_by, "auto-deployer");
}

#[tokio::test]
async fn test_staged_secrets_are_decrypted_and_cleaned_up() {
    let h = harness().build().await;
    h.add_hosts(&["web1"]).await;
    let stack_id = h
        .add_stack(
            "web1",
            "app",
            Some("DB_PASSWORD=ENC[AES256_GCM,data:abc]\nsops_version=3.8.1\n"),
        )
        .await;

    let job = h
        .state
        .manager
        .submit_deploy(stack_id, manual(), "alice")
        .await
        .unwrap();
    let job = h.wait_terminal(&job.job.id).await;
    assert_eq!(job.status, JobStatus::Completed);

    assert_eq!(h.decryptor.calls(), 1);
    let env_seen = h.compose.env_seen.lock().unwrap().clone();
    assert_eq!(env_seen, vec![Some("DB_PASSWORD=hunter2\n".to_string())]);

    // Nothing survives the deployment
    assert!(files_under(&h.staging_dir()).is_empty());
}

#[tokio::test]
async fn test_staging_failure_fails_job_without_stamp() {
    let h = harness().failing_decryptor().build().await;
    h.add_hosts(&["web1"]).await;
    let stack_id = h
        .add_stack("web1", "app", Some("TOKEN=ENC[AES256_GCM,data:x]\nsops_mac=ENC[x]\n"))
        .await;

    let job = h
        .state
        .manager
        .submit_deploy(stack_id, manual(), "alice")
        .await
        .unwrap();
    let job = h.wait_terminal(&job.job.id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.results["web1"]["status"], "failed");
    assert_eq!(h.compose.calls(), 0);
    assert!(StampStore::new(&h.state.db).latest(stack_id).await.unwrap().is_none());
    assert!(files_under(&h.staging_dir()).is_empty());
}

#[tokio::test]
async fn test_compose_failure_records_no_stamp() {
    let h = harness().failing_compose().build().await;
    h.add_hosts(&["web1"]).await;
    let stack_id = h.add_stack("web1", "app", None).await;

    let job = h
        .state
        .manager
        .submit_deploy(stack_id, manual(), "alice")
        .await
        .unwrap();
    let job = h.wait_terminal(&job.job.id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(h.compose.calls(), 1);
    assert_eq!(StampStore::new(&h.state.db).count(stack_id).await.unwrap(), 0);
    assert!(files_under(&h.staging_dir()).is_empty());

    // Compose output reached the job's progress
    assert_eq!(job.progress["line_count"], 2);
    let output = job.progress["output"].as_array().unwrap();
    assert_eq!(output[1]["stream"], "stderr");
    assert_eq!(output[1]["line"], "pull access denied");
}

#[tokio::test]
async fn test_unknown_stack() {
    let h = harness().build().await;
    let err = h
        .state
        .manager
        .submit_deploy(404, manual(), "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchError::NotFound(_)));
    assert!(matches!(
        h.state.manager.deploy_check(404).await,
        Err(OrchError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_deploy_check_leaves_no_attempt_directory() {
    let h = harness().build().await;
    h.add_hosts(&["web1"]).await;
    let stack_id = h.add_stack("web1", "app", Some("DB_HOST=db\n")).await;

    assert!(!h.state.manager.deploy_check(stack_id).await.unwrap());
    let job = h
        .state
        .manager
        .submit_deploy(stack_id, manual(), "alice")
        .await
        .unwrap();
    h.wait_terminal(&job.job.id).await;
    assert!(h.state.manager.deploy_check(stack_id).await.unwrap());

    let attempts = h.staging_dir().join("host").join("web1").join("app");
    let left: Vec<_> = std::fs::read_dir(&attempts)
        .map(|entries| entries.flatten().map(|e| e.path()).collect())
        .unwrap_or_default();
    assert!(left.is_empty(), "attempt dirs left behind: {:?}", left);
    assert!(files_under(&h.staging_dir()).is_empty());
}

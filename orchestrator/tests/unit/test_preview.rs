//! Space preview tests

use std::time::{Duration, Instant};

use ddorch::errors::OrchError;
use ddorch::models::job::JobKind;
use ddorch::models::preview::PreviewStatus;

use crate::common::{harness, host_with_vars};

#[tokio::test]
async fn test_host_preview_per_operation() {
    let h = harness().build().await;
    h.add_hosts(&["web1"]).await;

    let cases = [
        ("images", 200_000_000, "unused_images", 2),
        ("containers", 2_000_000, "stopped_containers", 2),
        ("volumes", 200_000_000, "unused_volumes", 2),
        ("networks", 0, "unused_networks", 1),
        ("build-cache", 1_500_000_000, "build_cache_items", 12),
        ("system", 202_000_000, "images", 2),
    ];
    for (route, bytes, item, count) in cases {
        let kind = JobKind::from_route(route).unwrap();
        let preview = h.state.manager.preview_host(kind, "web1").await.unwrap();
        assert_eq!(preview.status, PreviewStatus::Success, "{}", route);
        assert_eq!(preview.operation, kind);
        assert_eq!(preview.estimated_bytes, bytes, "{}", route);
        assert_eq!(preview.item_count[item], count, "{}", route);
        assert!(!preview.details.is_empty(), "{}", route);
    }

    // Listing only; nothing was pruned and no job was recorded
    let calls = h.transport.calls();
    assert_eq!(calls.len(), cases.len());
    assert!(calls.iter().all(|(_, command)| !command.contains("prune")));
    let jobs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
        .fetch_one(h.state.db.pool())
        .await
        .unwrap();
    assert_eq!(jobs, 0);
}

#[tokio::test]
async fn test_fleet_preview_reports_each_host() {
    let h = harness().fail("web2").hang("web3").build().await;
    h.add_hosts(&["web1", "web2", "web3"]).await;
    h.add_host(host_with_vars(
        "lab",
        &[("docker_host", "unix:///var/run/docker.sock")],
    ))
    .await;

    let started = Instant::now();
    let fleet = h
        .state
        .manager
        .preview_fleet(JobKind::ImagePrune)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(fleet.host_previews.len(), 4);
    assert_eq!(fleet.host_previews["web1"].status, PreviewStatus::Success);

    let web2 = &fleet.host_previews["web2"];
    assert_eq!(web2.status, PreviewStatus::Error);
    assert!(web2.error.as_deref().unwrap().contains("Cannot connect"));

    let web3 = &fleet.host_previews["web3"];
    assert_eq!(web3.status, PreviewStatus::Error);
    assert!(web3.error.as_deref().unwrap().contains("timed out"));

    assert_eq!(fleet.host_previews["lab"].status, PreviewStatus::Skipped);

    // Totals only count hosts that answered
    assert_eq!(fleet.total_bytes, 200_000_000);
    assert_eq!(fleet.total_size, "200.0MB");
    assert_eq!(fleet.total_item_count["unused_images"], 2);

    // The forbidden host was never contacted
    assert_eq!(h.transport.calls().len(), 3);
}

#[tokio::test]
async fn test_preview_rejects_unknown_targets() {
    let h = harness().build().await;
    h.add_hosts(&["web1"]).await;

    let err = h
        .state
        .manager
        .preview_host(JobKind::ImagePrune, "ghost")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchError::NotFound(_)));

    let err = h
        .state
        .manager
        .preview_host(JobKind::Deploy, "web1")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchError::InvalidInput(_)));
    assert!(h.transport.calls().is_empty());
}

//! HTTP API tests

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use ddorch::server::serve::router;

use crate::common::{harness, wait_terminal, Harness};

fn app(h: &Harness) -> Router {
    router(Arc::new(h.state.server_state(&h.options)))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn call(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let (status, bytes) = send(app, builder.body(body).unwrap()).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let h = harness().build().await;
    let (status, body) = call(app(&h), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "ddorch");
    assert_eq!(body["open_streams"], 0);
}

#[tokio::test]
async fn test_cleanup_requires_confirmation() {
    let h = harness().build().await;
    h.add_hosts(&["web1"]).await;

    let (status, body) = call(
        app(&h),
        Method::POST,
        "/api/cleanup/hosts/web1/system",
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_input");

    let (status, _) = call(
        app(&h),
        Method::POST,
        "/api/cleanup/hosts/web1/everything",
        Some(json!({"dry_run": true})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        app(&h),
        Method::POST,
        "/api/cleanup/hosts/ghost/images",
        Some(json!({"dry_run": true})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn test_cleanup_job_round_trip() {
    let h = harness().build().await;
    h.add_hosts(&["web1"]).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/cleanup/hosts/web1/images")
        .header("content-type", "application/json")
        .header("x-forwarded-user", "bob")
        .body(Body::from(json!({"dry_run": true}).to_string()))
        .unwrap();
    let (status, bytes) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["tracked"], true);
    assert_eq!(body["owner"], "bob");
    assert_eq!(body["operation"], "image_prune");
    assert_eq!(body["status"], "queued");

    let id = body["id"].as_str().unwrap().to_string();
    wait_terminal(&h.state, &id).await;

    let (status, body) = call(app(&h), Method::GET, &format!("/api/jobs/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["results"]["web1"]["status"], "dry_run");

    let (status, body) = call(app(&h), Method::GET, "/api/jobs/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn test_global_cleanup() {
    let h = harness().build().await;
    h.add_hosts(&["web1", "web2"]).await;

    let (status, body) = call(
        app(&h),
        Method::POST,
        "/api/cleanup/global/networks",
        Some(json!({"confirmation_token": "ok"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["scope"], "all_hosts");
    assert_eq!(body["owner"], "anonymous");

    let job = wait_terminal(&h.state, body["id"].as_str().unwrap()).await;
    assert_eq!(job.results.len(), 2);
}

#[tokio::test]
async fn test_stream_endpoint() {
    let h = harness().build().await;

    let request = Request::builder()
        .uri("/api/jobs/unknown/stream")
        .body(Body::empty())
        .unwrap();
    let (status, bytes) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("event: error\n"), "{}", text);
    assert!(text.contains("not found"));

    h.add_hosts(&["web1"]).await;
    let submission = h
        .state
        .manager
        .submit_host_job(
            ddorch::models::job::JobKind::ImagePrune,
            "web1",
            "alice",
            ddorch::models::job::JobOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    wait_terminal(&h.state, &submission.job.id).await;

    let request = Request::builder()
        .uri(format!("/api/jobs/{}/stream", submission.job.id))
        .body(Body::empty())
        .unwrap();
    let (_, bytes) = send(app(&h), request).await;
    let text = String::from_utf8(bytes).unwrap();
    let connected = text.find("event: connected").unwrap();
    let progress = text.find("event: progress").unwrap();
    let complete = text.find("event: complete").unwrap();
    assert!(connected < progress && progress < complete, "{}", text);
}

#[tokio::test]
async fn test_deploy_endpoints() {
    let h = harness().build().await;
    h.add_hosts(&["web1"]).await;
    let stack_id = h.add_stack("web1", "app", None).await;

    let (status, body) = call(
        app(&h),
        Method::GET,
        &format!("/api/stacks/{}/deploy-check", stack_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["would_be_noop"], false);

    let (status, _) = call(
        app(&h),
        Method::POST,
        &format!("/api/stacks/{}/deploy?force=maybe", stack_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        app(&h),
        Method::POST,
        &format!("/api/stacks/{}/deploy?dry_run=true", stack_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["operation"], "deploy");
    assert_eq!(body["dry_run"], true);
    wait_terminal(&h.state, body["id"].as_str().unwrap()).await;
    assert_eq!(h.compose.calls(), 0);

    let (status, _) = call(app(&h), Method::POST, "/api/stacks/999/deploy", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_auto_deploy_overrides() {
    let h = harness().build().await;
    h.add_hosts(&["web1"]).await;
    let stack_id = h.add_stack("web1", "app", None).await;

    let (status, body) = call(app(&h), Method::GET, "/api/devops/global", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["auto_deploy"], Value::Null);
    assert_eq!(body["env_default"], false);
    assert_eq!(body["effective"], false);

    let (_, body) = call(
        app(&h),
        Method::PATCH,
        "/api/devops/global",
        Some(json!({"auto_deploy": true})),
    )
    .await;
    assert_eq!(body["effective"], true);

    let effective = format!("/api/devops/stacks/{}/effective", stack_id);
    let (_, body) = call(app(&h), Method::GET, &effective, None).await;
    assert_eq!(body["enabled"], true);
    assert_eq!(body["source"], "global-db");

    let (status, body) = call(
        app(&h),
        Method::PATCH,
        "/api/devops/hosts/web1",
        Some(json!({"auto_deploy": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scope"], "host");
    assert_eq!(body["auto_deploy"], false);

    let (_, body) = call(app(&h), Method::GET, &effective, None).await;
    assert_eq!(body["enabled"], false);
    assert_eq!(body["source"], "host");

    // Clearing the host override
    call(
        app(&h),
        Method::PATCH,
        "/api/devops/hosts/web1",
        Some(json!({"auto_deploy": null})),
    )
    .await;
    let (_, body) = call(app(&h), Method::GET, "/api/devops/hosts/web1", None).await;
    assert_eq!(body["auto_deploy"], Value::Null);

    let (status, _) = call(
        app(&h),
        Method::PATCH,
        "/api/devops/hosts/ghost",
        Some(json!({"auto_deploy": true})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(app(&h), Method::GET, "/api/devops/stacks/999/effective", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_preview_endpoints() {
    let h = harness().build().await;
    h.add_hosts(&["web1", "web2"]).await;

    let (status, body) = call(
        app(&h),
        Method::GET,
        "/api/cleanup/preview/hosts/web1/images",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["operation"], "image_prune");
    assert_eq!(body["status"], "success");
    assert_eq!(body["estimated_bytes"], 200_000_000);
    assert_eq!(body["estimated_size"], "200.0MB");
    assert_eq!(body["item_count"]["unused_images"], 2);
    assert!(body.get("error").is_none());

    let (status, body) = call(
        app(&h),
        Method::GET,
        "/api/cleanup/preview/global/volumes",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_bytes"], 400_000_000);
    assert_eq!(body["total_item_count"]["unused_volumes"], 4);
    assert_eq!(body["host_previews"]["web2"]["status"], "success");

    let (status, body) = call(
        app(&h),
        Method::GET,
        "/api/cleanup/preview/hosts/ghost/system",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    let (status, _) = call(
        app(&h),
        Method::GET,
        "/api/cleanup/preview/global/everything",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

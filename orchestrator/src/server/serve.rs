//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::OrchError;
use crate::server::handlers::{
    deploy_check_handler, deploy_handler, effective_policy_handler, get_global_handler,
    get_group_override_handler, get_host_override_handler, get_job_handler,
    get_stack_override_handler, global_cleanup_handler, global_preview_handler, health_handler,
    host_cleanup_handler, host_preview_handler, patch_global_handler,
    patch_group_override_handler, patch_host_override_handler, patch_stack_override_handler,
    stream_job_handler, version_handler,
};
use crate::server::state::ServerState;

/// All routes with their state
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Cleanup
        .route(
            "/api/cleanup/hosts/{host}/{operation}",
            post(host_cleanup_handler),
        )
        .route("/api/cleanup/global/{operation}", post(global_cleanup_handler))
        .route(
            "/api/cleanup/preview/hosts/{host}/{operation}",
            get(host_preview_handler),
        )
        .route(
            "/api/cleanup/preview/global/{operation}",
            get(global_preview_handler),
        )
        // Jobs
        .route("/api/jobs/{id}", get(get_job_handler))
        .route("/api/jobs/{id}/stream", get(stream_job_handler))
        // Deployments
        .route("/api/stacks/{id}/deploy", post(deploy_handler))
        .route("/api/stacks/{id}/deploy-check", get(deploy_check_handler))
        // Auto-deploy policy
        .route(
            "/api/devops/global",
            get(get_global_handler).patch(patch_global_handler),
        )
        .route(
            "/api/devops/hosts/{name}",
            get(get_host_override_handler).patch(patch_host_override_handler),
        )
        .route(
            "/api/devops/groups/{name}",
            get(get_group_override_handler).patch(patch_group_override_handler),
        )
        .route(
            "/api/devops/stacks/{id}",
            get(get_stack_override_handler).patch(patch_stack_override_handler),
        )
        .route(
            "/api/devops/stacks/{id}/effective",
            get(effective_policy_handler),
        )
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), OrchError>>, OrchError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| OrchError::ServerError(e.to_string()))
    });

    Ok(handle)
}

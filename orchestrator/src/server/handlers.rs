//! HTTP request handlers

use std::convert::Infallible;
use std::sync::Arc;

use api_models::{
    AutoDeployPatch, AutoDeployView, CleanupRequest, DeployCheckResponse, DeployQuery,
    EffectivePolicyView, GlobalAutoDeployView, HealthResponse, VersionResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    Json,
};
use futures::stream::{Stream, StreamExt};
use serde_json::json;
use tracing::info;

use crate::errors::OrchError;
use crate::jobs::manager::{DeployFlags, Submission};
use crate::models::job::{JobKind, JobOptions};
use crate::server::identity::Actor;
use crate::server::state::ServerState;
use crate::store::overrides::OverrideScope;
use crate::stream::progress::{job_events, StreamEvent};
use crate::utils::{parse_truthy, version_info};

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "ddorch".to_string(),
        version: version.version,
        jobs_in_flight: state.manager.executor().in_flight(),
        open_streams: state.observers.total(),
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

fn accepted(submission: Submission) -> (StatusCode, Json<Submission>) {
    let status = if submission.tracked {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    (status, Json(submission))
}

fn job_options(request: CleanupRequest) -> JobOptions {
    JobOptions {
        dry_run: request.dry_run,
        force: request.force,
        confirmation_token: request.confirmation_token,
        exclude_filters: request.exclude_filters,
    }
}

/// Cleanup on one host
pub async fn host_cleanup_handler(
    State(state): State<Arc<ServerState>>,
    actor: Actor,
    Path((host, operation)): Path<(String, String)>,
    Json(request): Json<CleanupRequest>,
) -> Result<impl IntoResponse, OrchError> {
    let kind = JobKind::from_route(&operation)?;
    let submission = state
        .manager
        .submit_host_job(kind, &host, actor.as_str(), job_options(request))
        .await?;
    Ok(accepted(submission))
}

/// Cleanup on every host
pub async fn global_cleanup_handler(
    State(state): State<Arc<ServerState>>,
    actor: Actor,
    Path(operation): Path<String>,
    Json(request): Json<CleanupRequest>,
) -> Result<impl IntoResponse, OrchError> {
    let kind = JobKind::from_route(&operation)?;
    let submission = state
        .manager
        .submit_fleet_job(kind, actor.as_str(), job_options(request))
        .await?;
    Ok(accepted(submission))
}

/// Space preview for one host
pub async fn host_preview_handler(
    State(state): State<Arc<ServerState>>,
    Path((host, operation)): Path<(String, String)>,
) -> Result<impl IntoResponse, OrchError> {
    let kind = JobKind::from_route(&operation)?;
    Ok(Json(state.manager.preview_host(kind, &host).await?))
}

/// Space preview for every host
pub async fn global_preview_handler(
    State(state): State<Arc<ServerState>>,
    Path(operation): Path<String>,
) -> Result<impl IntoResponse, OrchError> {
    let kind = JobKind::from_route(&operation)?;
    Ok(Json(state.manager.preview_fleet(kind).await?))
}

pub async fn get_job_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, OrchError> {
    Ok(Json(state.manager.get(&id).await?))
}

fn sse_event(event: StreamEvent) -> Event {
    let frame = match event.name() {
        Some(name) => Event::default().event(name),
        None => Event::default(),
    };
    match event {
        StreamEvent::Connected { job_id } => frame.data(json!({ "job_id": job_id }).to_string()),
        StreamEvent::Progress(job) | StreamEvent::Complete(job) => {
            match serde_json::to_string(&job) {
                Ok(data) => frame.data(data),
                Err(e) => frame.data(json!({ "error": e.to_string() }).to_string()),
            }
        }
        StreamEvent::Error { message } => frame.data(json!({ "error": message }).to_string()),
        StreamEvent::Heartbeat => frame.comment("heartbeat"),
    }
}

/// Live progress of one job as server-sent events
pub async fn stream_job_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = job_events(
        state.jobs.clone(),
        state.observers.clone(),
        id,
        state.stream_options.clone(),
    );
    Sse::new(events.map(|event| Ok(sse_event(event))))
}

fn query_flag(name: &str, value: Option<&str>) -> Result<bool, OrchError> {
    match value {
        None | Some("") => Ok(false),
        Some(raw) => parse_truthy(raw)
            .ok_or_else(|| OrchError::InvalidInput(format!("invalid value for {}: {}", name, raw))),
    }
}

/// Trigger a deployment
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    actor: Actor,
    Path(stack_id): Path<i64>,
    Query(query): Query<DeployQuery>,
) -> Result<impl IntoResponse, OrchError> {
    let flags = DeployFlags {
        auto: query_flag("auto", query.auto.as_deref())?,
        force: query_flag("force", query.force.as_deref())?,
        dry_run: query_flag("dry_run", query.dry_run.as_deref())?,
    };
    let submission = state
        .manager
        .submit_deploy(stack_id, flags, actor.as_str())
        .await?;
    Ok(accepted(submission))
}

pub async fn deploy_check_handler(
    State(state): State<Arc<ServerState>>,
    Path(stack_id): Path<i64>,
) -> Result<impl IntoResponse, OrchError> {
    let would_be_noop = state.manager.deploy_check(stack_id).await?;
    Ok(Json(DeployCheckResponse {
        stack_id,
        would_be_noop,
    }))
}

async fn global_view(state: &ServerState) -> Result<GlobalAutoDeployView, OrchError> {
    let auto_deploy = state.overrides.get(&OverrideScope::Global).await?;
    let env_default = state.resolver.env_default();
    Ok(GlobalAutoDeployView {
        auto_deploy,
        env_default,
        effective: auto_deploy.unwrap_or(env_default),
    })
}

pub async fn get_global_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, OrchError> {
    Ok(Json(global_view(&state).await?))
}

pub async fn patch_global_handler(
    State(state): State<Arc<ServerState>>,
    actor: Actor,
    Json(patch): Json<AutoDeployPatch>,
) -> Result<impl IntoResponse, OrchError> {
    state
        .overrides
        .set(&OverrideScope::Global, patch.auto_deploy)
        .await?;
    info!("{} set global auto-deploy to {:?}", actor.as_str(), patch.auto_deploy);
    Ok(Json(global_view(&state).await?))
}

fn scope_view(scope: &OverrideScope, auto_deploy: Option<bool>) -> AutoDeployView {
    let (label, name) = match scope {
        OverrideScope::Global => ("global", None),
        OverrideScope::Group(name) => ("group", Some(name.clone())),
        OverrideScope::Host(name) => ("host", Some(name.clone())),
        OverrideScope::Stack(id) => ("stack", Some(id.to_string())),
    };
    AutoDeployView {
        scope: label.to_string(),
        name,
        auto_deploy,
    }
}

async fn read_override(
    state: &ServerState,
    scope: OverrideScope,
) -> Result<Json<AutoDeployView>, OrchError> {
    let value = state.overrides.get(&scope).await?;
    Ok(Json(scope_view(&scope, value)))
}

async fn write_override(
    state: &ServerState,
    actor: &Actor,
    scope: OverrideScope,
    patch: AutoDeployPatch,
) -> Result<Json<AutoDeployView>, OrchError> {
    state.overrides.set(&scope, patch.auto_deploy).await?;
    info!("{} set auto-deploy for {} to {:?}", actor.as_str(), scope, patch.auto_deploy);
    Ok(Json(scope_view(&scope, patch.auto_deploy)))
}

pub async fn get_host_override_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, OrchError> {
    let host = state.inventory.get_host(&name).await?;
    read_override(&state, OverrideScope::Host(host.name)).await
}

pub async fn patch_host_override_handler(
    State(state): State<Arc<ServerState>>,
    actor: Actor,
    Path(name): Path<String>,
    Json(patch): Json<AutoDeployPatch>,
) -> Result<impl IntoResponse, OrchError> {
    let host = state.inventory.get_host(&name).await?;
    write_override(&state, &actor, OverrideScope::Host(host.name), patch).await
}

pub async fn get_group_override_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, OrchError> {
    read_override(&state, OverrideScope::Group(name)).await
}

pub async fn patch_group_override_handler(
    State(state): State<Arc<ServerState>>,
    actor: Actor,
    Path(name): Path<String>,
    Json(patch): Json<AutoDeployPatch>,
) -> Result<impl IntoResponse, OrchError> {
    if name.trim().is_empty() {
        return Err(OrchError::InvalidInput("group name must not be empty".to_string()));
    }
    write_override(&state, &actor, OverrideScope::Group(name), patch).await
}

pub async fn get_stack_override_handler(
    State(state): State<Arc<ServerState>>,
    Path(stack_id): Path<i64>,
) -> Result<impl IntoResponse, OrchError> {
    let stack = state.catalog.resolve(stack_id).await?;
    read_override(&state, OverrideScope::Stack(stack.id)).await
}

pub async fn patch_stack_override_handler(
    State(state): State<Arc<ServerState>>,
    actor: Actor,
    Path(stack_id): Path<i64>,
    Json(patch): Json<AutoDeployPatch>,
) -> Result<impl IntoResponse, OrchError> {
    let stack = state.catalog.resolve(stack_id).await?;
    write_override(&state, &actor, OverrideScope::Stack(stack.id), patch).await
}

pub async fn effective_policy_handler(
    State(state): State<Arc<ServerState>>,
    Path(stack_id): Path<i64>,
) -> Result<impl IntoResponse, OrchError> {
    let policy = state.resolver.effective(stack_id).await?;
    Ok(Json(EffectivePolicyView {
        stack_id,
        enabled: policy.enabled,
        source: policy.source.as_str().to_string(),
    }))
}

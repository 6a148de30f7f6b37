//! Project REST handlers.

use {
    axum::{
        Json,
        extract::{Path, Query, State},
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    kennel_orchestrator::{CreateProject, UpdateRequest, UpdateTier},
    serde::Deserialize,
    serde_json::json,
    tracing::info,
};

use crate::{
    error::{ApiError, ApiResult},
    state::{AppState, Owner},
};

const DEFAULT_LOG_TAIL: usize = 200;
const MAX_LOG_TAIL: usize = 5000;
const DEFAULT_SAMPLE_LIMIT: usize = 500;

// ── Lifecycle ────────────────────────────────────────────────────────────────

pub async fn list_projects(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ApiResult<Response> {
    let projects = state.service.list(&owner).await?;
    Ok(Json(json!({ "projects": projects })).into_response())
}

pub async fn create_project(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(req): Json<CreateProject>,
) -> ApiResult<Response> {
    let launched = state.service.create(&owner, req).await?;
    info!(project_id = %launched.project.id, owner = %owner, "project accepted");
    Ok((StatusCode::ACCEPTED, Json(launched.project)).into_response())
}

pub async fn get_project(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    Ok(Json(state.service.get(&owner, &id).await?).into_response())
}

pub async fn delete_project(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.service.delete(&owner, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start_project(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let launched = state.service.start(&owner, &id).await?;
    Ok((StatusCode::ACCEPTED, Json(launched.project)).into_response())
}

pub async fn restart_project(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let launched = state.service.restart(&owner, &id).await?;
    Ok((StatusCode::ACCEPTED, Json(launched.project)).into_response())
}

pub async fn stop_project(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    Ok(Json(state.service.stop(&owner, &id).await?).into_response())
}

// ── Configuration ────────────────────────────────────────────────────────────

pub async fn read_config(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    Ok(Json(state.service.read_config(&owner, &id).await?).into_response())
}

pub async fn update_config(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(req): Json<UpdateRequest>,
) -> ApiResult<Response> {
    let outcome = state.service.update_config(&owner, &id, req).await?;
    // A recreate finishes in the background.
    let status = match outcome.tier {
        UpdateTier::Recreate => StatusCode::ACCEPTED,
        UpdateTier::Live | UpdateTier::FileRestart => StatusCode::OK,
    };
    Ok((
        status,
        Json(json!({ "tier": outcome.tier, "project": outcome.project })),
    )
        .into_response())
}

// ── Agent passthrough ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CommandBody {
    pub args: Vec<String>,
}

pub async fn run_command(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(body): Json<CommandBody>,
) -> ApiResult<Response> {
    Ok(Json(state.service.run_command(&owner, &id, body.args).await?).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthBody {
    pub provider: String,
    #[serde(default)]
    pub callback_url: Option<String>,
}

pub async fn auth_login(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(body): Json<AuthBody>,
) -> ApiResult<Response> {
    Ok(Json(state.service.auth_login(&owner, &id, &body.provider).await?).into_response())
}

pub async fn auth_callback(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(body): Json<AuthBody>,
) -> ApiResult<Response> {
    let Some(url) = body.callback_url else {
        return Err(ApiError::BadRequest("callbackUrl is required".into()));
    };
    let value = state
        .service
        .auth_callback(&owner, &id, &body.provider, &url)
        .await?;
    Ok(Json(value).into_response())
}

// ── Observability ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<usize>,
}

pub async fn logs(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Query(q): Query<LogsQuery>,
) -> ApiResult<Response> {
    let tail = q.tail.unwrap_or(DEFAULT_LOG_TAIL).min(MAX_LOG_TAIL);
    let logs = state.service.logs(&owner, &id, tail).await?;
    Ok(Json(json!({ "logs": logs })).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct MetricsQuery {
    pub since: Option<u64>,
    pub limit: Option<usize>,
}

pub async fn metrics(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Query(q): Query<MetricsQuery>,
) -> ApiResult<Response> {
    let samples = state
        .service
        .metrics(
            &owner,
            &id,
            q.since.unwrap_or(0),
            q.limit.unwrap_or(DEFAULT_SAMPLE_LIMIT),
        )
        .await?;
    Ok(Json(json!({ "samples": samples })).into_response())
}

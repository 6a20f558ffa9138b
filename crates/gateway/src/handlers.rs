//! Project and sandbox request handlers.
//!
//! Every handler runs behind the bearer middleware. A sandbox or project that
//! belongs to another user is reported as not found.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use code_play_core::types::{FileNode, Identity, ProjectRecord, Sandbox, SandboxId};
use code_play_core::Error;
use code_play_governance::track_exec_exit;

use crate::error::{ApiError, ApiResponse};
use crate::server::AppState;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub name: String,
    pub template_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaffoldRequest {
    pub template_id: String,
}

#[derive(Debug, Serialize)]
pub struct ScaffoldResponse {
    pub files: Vec<FileNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSandboxRequest {
    pub project_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteCommandRequest {
    pub command: String,
    #[serde(default)]
    pub cwd: Option<String>,
}

/// Output of a one-shot command, decoded as UTF-8 (lossy).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCommandResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

// =============================================================================
// Ownership
// =============================================================================

async fn owned_project(
    state: &AppState,
    project_id: &str,
    identity: &Identity,
) -> Result<ProjectRecord, ApiError> {
    match state.records.get_project(project_id).await? {
        Some(project) if project.owner_id == identity.user_id => Ok(project),
        _ => Err(Error::not_found(format!("project {}", project_id)).into()),
    }
}

/// Check the caller owns sandbox `id` through its project.
///
/// Goes to the record store directly so a sandbox whose registry entry has
/// expired can still be deleted by its owner.
async fn check_sandbox_owner(
    state: &AppState,
    id: &SandboxId,
    identity: &Identity,
) -> Result<(), ApiError> {
    let not_found = || ApiError(Error::not_found(format!("sandbox {}", id)));
    let sandbox = state
        .records
        .get_sandbox(id)
        .await?
        .ok_or_else(not_found)?;
    owned_project(state, &sandbox.project_id, identity)
        .await
        .map(|_| ())
        .map_err(|_| not_found())
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn create_project(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state
        .projects
        .create_project(&identity.user_id, &req.name, &req.template_id)
        .await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(created)))
}

pub async fn scaffold_project(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScaffoldRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let files = state
        .projects
        .scaffolder()
        .scaffold(&req.template_id)
        .await?;
    Ok(ApiResponse::ok(ScaffoldResponse { files }))
}

pub async fn create_sandbox(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateSandboxRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let project = owned_project(&state, &req.project_id, &identity).await?;
    let sandbox: Sandbox = state.orchestrator.create(&project.id).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(sandbox)))
}

pub async fn get_sandbox(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = SandboxId(id);
    check_sandbox_owner(&state, &id, &identity).await?;
    Ok(ApiResponse::ok(state.orchestrator.get(&id).await?))
}

pub async fn execute_command(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(req): Json<ExecuteCommandRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = SandboxId(id);
    check_sandbox_owner(&state, &id, &identity).await?;

    let result = state
        .orchestrator
        .execute(&id, &req.command, req.cwd.as_deref())
        .await?;
    track_exec_exit(result.exit_code);

    Ok(ApiResponse::ok(ExecuteCommandResponse {
        stdout: result.stdout_lossy(),
        stderr: result.stderr_lossy(),
        exit_code: result.exit_code,
    }))
}

pub async fn stop_sandbox(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = SandboxId(id);
    check_sandbox_owner(&state, &id, &identity).await?;
    Ok(ApiResponse::ok(state.orchestrator.stop(&id).await?))
}

pub async fn delete_sandbox(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = SandboxId(id);
    check_sandbox_owner(&state, &id, &identity).await?;
    state.orchestrator.delete(&id).await?;
    Ok(ApiResponse::done())
}

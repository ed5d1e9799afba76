use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::{AppError, Result};
use crate::services::installer::is_safe_name;
use crate::services::{InstallId, InstallTarget, InstallationRecord, PackageSummary, UpdateTarget};
use crate::state::AppState;

/// Create app installation routes
pub fn apps_routes(state: AppState) -> Router {
    Router::new()
        .route("/install", post(install_package))
        .route("/install/git", post(install_repository))
        .route("/install/status", get(get_install_status))
        .route("/install/logs", get(get_install_logs))
        .route("/update", post(update_package))
        .route("/uninstall", post(uninstall_app))
        .route("/resources", get(list_resources))
        .route("/resources/clear", post(clear_resources))
        .with_state(state)
}

// ============================================================================
// Request/Response Types
// ============================================================================

fn validate_app_name(name: &str) -> std::result::Result<(), ValidationError> {
    if is_safe_name(name) {
        Ok(())
    } else {
        Err(ValidationError::new("app_name")
            .with_message("must contain only letters, digits, '-', '_' or '.'".into()))
    }
}

fn validate_repository_url(url: &str) -> std::result::Result<(), ValidationError> {
    const SCHEMES: [&str; 6] = ["https://", "http://", "ssh://", "git://", "file://", "git@"];
    let valid = !url.chars().any(char::is_whitespace)
        && SCHEMES
            .iter()
            .any(|scheme| url.starts_with(scheme) && url.len() > scheme.len());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("repository_url")
            .with_message("must be a git remote URL".into()))
    }
}

fn validate_branch(branch: &str) -> std::result::Result<(), ValidationError> {
    let valid = !branch.starts_with('-')
        && !branch.contains("..")
        && branch
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("branch").with_message("invalid branch name".into()))
    }
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct PackageInstallRequest {
    #[validate(custom(function = "validate_app_name"))]
    pub name: String,
    #[validate(length(min = 1, max = 256))]
    pub channel: String,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub label: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub version: Option<String>,
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct RepositoryInstallRequest {
    #[validate(custom(function = "validate_repository_url"))]
    pub url: String,
    #[validate(length(min = 1, max = 255), custom(function = "validate_branch"))]
    pub branch: String,
    #[serde(default)]
    pub develop: bool,
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct UpdateRequest {
    #[validate(custom(function = "validate_app_name"))]
    pub name: String,
    #[validate(length(min = 1, max = 256))]
    pub channel: String,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub label: String,
    #[validate(length(min = 1, max = 64))]
    pub version: String,
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct UninstallRequest {
    #[validate(custom(function = "validate_app_name"))]
    pub name: String,
}

/// Returned as soon as a workflow has been scheduled
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct WorkflowAccepted {
    pub status: String,
    #[serde(rename = "installID")]
    #[schema(value_type = String)]
    pub install_id: InstallId,
}

impl WorkflowAccepted {
    fn new(status: &str, install_id: InstallId) -> Self {
        Self {
            status: status.to_string(),
            install_id,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct InstallQuery {
    #[serde(rename = "installID")]
    pub install_id: Option<String>,
}

impl InstallQuery {
    fn install_id(&self) -> Result<InstallId> {
        let raw = self
            .install_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::BadRequest("installID is required".to_string()))?;
        InstallId::parse(raw)
    }
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

/// Start a package-manager install
#[utoipa::path(
    post,
    path = "/api/install",
    tag = "Install",
    request_body = PackageInstallRequest,
    responses(
        (status = 200, body = WorkflowAccepted),
        (status = 400, description = "Invalid request")
    )
)]
pub(crate) async fn install_package(
    State(state): State<AppState>,
    Json(request): Json<PackageInstallRequest>,
) -> Result<Json<WorkflowAccepted>> {
    request.validate()?;

    let target = InstallTarget::Package {
        name: request.name,
        channel: request.channel,
        label: request.label,
        version: request.version,
    };
    let (install_id, _) = state.installer.begin_install(target, false)?;
    Ok(Json(WorkflowAccepted::new("InstallRunning", install_id)))
}

/// Start an install from a git repository
#[utoipa::path(
    post,
    path = "/api/install/git",
    tag = "Install",
    request_body = RepositoryInstallRequest,
    responses(
        (status = 200, body = WorkflowAccepted),
        (status = 400, description = "Invalid request")
    )
)]
pub(crate) async fn install_repository(
    State(state): State<AppState>,
    Json(request): Json<RepositoryInstallRequest>,
) -> Result<Json<WorkflowAccepted>> {
    request.validate()?;

    let target = InstallTarget::Repository {
        url: request.url,
        branch: request.branch,
    };
    let (install_id, _) = state.installer.begin_install(target, request.develop)?;
    Ok(Json(WorkflowAccepted::new("InstallRunning", install_id)))
}

/// Current ledger record of an install
#[utoipa::path(
    get,
    path = "/api/install/status",
    tag = "Install",
    params(InstallQuery),
    responses(
        (status = 200, description = "Installation record"),
        (status = 400, description = "installID missing or malformed"),
        (status = 404, description = "Unknown installID")
    )
)]
pub(crate) async fn get_install_status(
    State(state): State<AppState>,
    Query(query): Query<InstallQuery>,
) -> Result<Json<InstallationRecord>> {
    let install_id = query.install_id()?;
    Ok(Json(state.ledger().read(&install_id)?))
}

/// Raw log of an install, update or uninstall
#[utoipa::path(
    get,
    path = "/api/install/logs",
    tag = "Install",
    params(InstallQuery),
    responses(
        (status = 200, description = "Log text", content_type = "text/plain"),
        (status = 400, description = "installID missing or malformed"),
        (status = 404, description = "Unknown installID")
    )
)]
pub(crate) async fn get_install_logs(
    State(state): State<AppState>,
    Query(query): Query<InstallQuery>,
) -> Result<Response> {
    let install_id = query.install_id()?;
    let logs = state.ledger().read_log(&install_id)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], logs).into_response())
}

/// Move an installed package to another version
#[utoipa::path(
    post,
    path = "/api/update",
    tag = "Install",
    request_body = UpdateRequest,
    responses(
        (status = 200, body = WorkflowAccepted),
        (status = 400, description = "Invalid request")
    )
)]
pub(crate) async fn update_package(
    State(state): State<AppState>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<WorkflowAccepted>> {
    request.validate()?;

    let (install_id, _) = state.installer.begin_update(UpdateTarget {
        name: request.name,
        channel: request.channel,
        label: request.label,
        version: request.version,
    })?;
    Ok(Json(WorkflowAccepted::new("UpdateRunning", install_id)))
}

/// Remove an installed app
#[utoipa::path(
    post,
    path = "/api/uninstall",
    tag = "Install",
    request_body = UninstallRequest,
    responses(
        (status = 200, body = WorkflowAccepted),
        (status = 400, description = "Invalid request")
    )
)]
pub(crate) async fn uninstall_app(
    State(state): State<AppState>,
    Json(request): Json<UninstallRequest>,
) -> Result<Json<WorkflowAccepted>> {
    request.validate()?;

    let (install_id, _) = state.installer.begin_uninstall(&request.name)?;
    Ok(Json(WorkflowAccepted::new("UninstallRunning", install_id)))
}

/// Installed packages, served from the cache
#[utoipa::path(
    get,
    path = "/api/resources",
    tag = "Resources",
    responses(
        (status = 200, body = Vec<PackageSummary>)
    )
)]
pub(crate) async fn list_resources(State(state): State<AppState>) -> Result<Json<Vec<PackageSummary>>> {
    Ok(Json(state.cache.get().await?))
}

/// Drop the installed-package cache
#[utoipa::path(
    post,
    path = "/api/resources/clear",
    tag = "Resources",
    responses(
        (status = 200, description = "Cache cleared")
    )
)]
pub(crate) async fn clear_resources(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.cache.clear().await;
    Json(serde_json::json!({ "status": "cleared" }))
}

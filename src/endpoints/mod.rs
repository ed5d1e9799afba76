pub mod apps;
pub mod notifications;

use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

use crate::config::CONFIG;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        apps::install_package,
        apps::install_repository,
        apps::get_install_status,
        apps::get_install_logs,
        apps::update_package,
        apps::uninstall_app,
        apps::list_resources,
        apps::clear_resources,
    ),
    components(schemas(
        apps::PackageInstallRequest,
        apps::RepositoryInstallRequest,
        apps::UpdateRequest,
        apps::UninstallRequest,
        apps::WorkflowAccepted,
        crate::services::catalog::PackageSummary,
        crate::services::catalog::PackageSource,
    )),
    tags(
        (name = "Install", description = "Install, update and uninstall workflows"),
        (name = "Resources", description = "Installed packages")
    )
)]
pub struct ApiDoc;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/system/version", get(get_version))
        .route("/api/openapi.json", get(openapi_spec))
        .nest("/api", api_routes(state))
}

/// API routes under /api/*
fn api_routes(state: AppState) -> Router {
    Router::new()
        .merge(apps::apps_routes(state.clone()))
        .nest("/notifications", notifications::notifications_routes(state))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Version info endpoint
async fn get_version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": CONFIG.version,
        "commit_hash": CONFIG.commit_hash,
        "backend": "rust"
    }))
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

//! Application bootstrapper
//!
//! Handles all initialization and setup for the app store backend.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::CONFIG;
use crate::endpoints;
use crate::services::{InstallerSettings, ProcessRunner, RecoveryScanner, ServiceRestarter, WorkspaceRegistry};
use crate::state::AppState;

/// Bootstrap and run the application
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting app store backend v{}", CONFIG.version);

    let state = init_services()?;

    // Resume installs interrupted by the previous shutdown. Candidates are
    // taken here, before the server accepts new installs.
    RecoveryScanner::new(state.installer.clone(), state.settings().recovery_delay).spawn();
    tracing::info!(
        delay_secs = state.settings().recovery_delay.as_secs(),
        "Install recovery scheduled"
    );

    let app = create_app(state);

    serve(app).await
}

/// Initialize tracing/logging
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("appstore={},tower_http=info", CONFIG.log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if CONFIG.log_format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_ansi(false))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_ansi(false))
            .init();
    }
}

/// Initialize all application services
fn init_services() -> anyhow::Result<AppState> {
    let settings = InstallerSettings::from_config(&CONFIG);
    settings.ensure_directories()?;
    tracing::info!(root = %settings.workspace_root.display(), "Workspace ready");

    let host = Arc::new(ServiceRestarter::new(settings.tools.clone(), ProcessRunner::new()));
    let registry = Arc::new(WorkspaceRegistry::new(&settings.apps_dir, &settings.git_dir));

    let state = AppState::new(settings, host, registry, CONFIG.notifications.capacity);
    state.ledger().ensure_layout()?;
    tracing::info!("Install ledger ready");

    Ok(state)
}

/// Create the main application router
pub fn create_app(state: AppState) -> Router {
    endpoints::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&CONFIG.server.allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Start the HTTP server
async fn serve(app: Router) -> anyhow::Result<()> {
    let addr = CONFIG.server.bind_addr();
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub mod notifications;
pub mod server;
pub mod tools;
pub mod workspace;

use once_cell::sync::Lazy;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub server: server::ServerConfig,
    pub workspace: workspace::WorkspaceConfig,
    pub tools: tools::ToolsConfig,
    pub notifications: notifications::NotificationConfig,

    // Build info
    pub commit_hash: String,
    pub version: String,

    // Logging
    pub log_level: String,
    pub log_format: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            server: server::ServerConfig::from_env(),
            workspace: workspace::WorkspaceConfig::from_env(),
            tools: tools::ToolsConfig::from_env(),
            notifications: notifications::NotificationConfig::from_env(),

            commit_hash: env::var("COMMIT_HASH").unwrap_or_else(|_| "unknown".to_string()),
            version: env!("CARGO_PKG_VERSION").to_string(),

            log_level: env::var("APPSTORE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: env::var("APPSTORE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
        }
    }
}

pub static CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

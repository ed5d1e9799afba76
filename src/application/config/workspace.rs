use std::env;
use std::path::PathBuf;

/// Filesystem layout used by the installation engine
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    /// Root for status files, log files and sentinel files
    pub root: PathBuf,
    /// Where package-manager installs materialize app sources
    pub apps_dir: PathBuf,
    /// Managed source-control checkouts
    pub git_dir: PathBuf,
    /// Seconds to wait after startup before resuming interrupted installs
    pub recovery_delay_secs: u64,
}

impl WorkspaceConfig {
    pub fn from_env() -> Self {
        let root = PathBuf::from(
            env::var("APPSTORE_WORKSPACE_ROOT").unwrap_or_else(|_| "/var/lib/appstore".to_string()),
        );

        Self {
            apps_dir: env::var("APPSTORE_APPS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| root.join("apps")),
            git_dir: env::var("APPSTORE_GIT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| root.join("gitsrc")),
            recovery_delay_secs: env::var("APPSTORE_RECOVERY_DELAY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            root,
        }
    }
}

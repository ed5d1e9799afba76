//! Host portal restart.
//!
//! After an install, update or uninstall the portal process has to reload
//! its app registry. Install-like changes first sync the portal database and
//! collect static files; then the restart is attempted with the privileged
//! command, the trigger file and the unprivileged command, in that order.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::services::installer::settings::Toolchain;
use crate::services::process::{CommandLine, ProcessRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartType {
    Install,
    Update,
    GithubInstall,
    ScaffoldInstall,
    Uninstall,
}

impl RestartType {
    /// Types that add code to the portal and need a database sync first
    pub fn needs_sync(&self) -> bool {
        matches!(
            self,
            RestartType::Install | RestartType::GithubInstall | RestartType::ScaffoldInstall
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartRequest {
    pub restart_type: RestartType,
    pub name: String,
}

impl RestartRequest {
    pub fn new(restart_type: RestartType, name: impl Into<String>) -> Self {
        Self {
            restart_type,
            name: name.into(),
        }
    }
}

/// How the restart was eventually triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartMethod {
    Privileged,
    TriggerFile,
    Unprivileged,
}

/// Restarts the host portal
#[async_trait]
pub trait HostRestarter: Send + Sync {
    async fn restart(&self, request: &RestartRequest) -> Result<RestartMethod>;
}

/// Restarts the portal through the configured commands
pub struct ServiceRestarter {
    tools: Toolchain,
    runner: ProcessRunner,
}

impl ServiceRestarter {
    pub fn new(tools: Toolchain, runner: ProcessRunner) -> Self {
        Self { tools, runner }
    }

    /// Run a helper command; failures are logged and reported as `false`
    async fn run_logged(&self, command: &CommandLine) -> bool {
        match self.runner.capture(command).await {
            Ok((outcome, lines)) => {
                for line in &lines {
                    tracing::debug!(command = %command, "{}", line);
                }
                if !outcome.success() {
                    tracing::warn!(command = %command, exit_code = ?outcome.exit_code, "Command failed");
                }
                outcome.success()
            }
            Err(e) => {
                tracing::warn!(command = %command, "Command could not run: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl HostRestarter for ServiceRestarter {
    async fn restart(&self, request: &RestartRequest) -> Result<RestartMethod> {
        tracing::info!(app = %request.name, restart_type = ?request.restart_type, "Restarting host portal");

        if request.restart_type.needs_sync() {
            self.run_logged(&self.tools.db_sync()).await;
            self.run_logged(&self.tools.collect_static()).await;
        }

        if let Some(ref command) = self.tools.restart_command {
            if self.run_logged(command).await {
                return Ok(RestartMethod::Privileged);
            }
        }

        if let Some(ref trigger) = self.tools.restart_trigger_file {
            match touch(trigger) {
                Ok(()) => return Ok(RestartMethod::TriggerFile),
                Err(e) => tracing::warn!(path = %trigger.display(), "Failed to touch restart trigger: {}", e),
            }
        }

        if let Some(ref command) = self.tools.restart_fallback_command {
            if self.run_logged(command).await {
                return Ok(RestartMethod::Unprivileged);
            }
        }

        Err(AppError::ServiceUnavailable(format!(
            "Could not restart the portal after {:?} of '{}'",
            request.restart_type, request.name
        )))
    }
}

fn touch(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?
        .set_modified(std::time::SystemTime::now())
}

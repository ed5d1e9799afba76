//! Update workflow: reinstall the package pinned to a new version.
//!
//! A failed update leaves whatever the package manager left behind and does
//! not restart the portal. No rollback to the previous version is attempted.

use std::sync::Arc;

use super::{ensure_safe_name, Attempt, Installer};
use crate::error::Result;
use crate::services::host::{RestartRequest, RestartType};
use crate::services::ledger::{InstallId, InstallKind};
use crate::services::markers::INSTALL_RULES;
use crate::services::tasks::TaskHandle;

pub(crate) const UPDATE_FAILED_MESSAGE: &str =
    "The update failed. The installed version was left unchanged. Please check the logs for details.";

/// Package to move to `version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTarget {
    pub name: String,
    pub channel: String,
    pub label: String,
    pub version: String,
}

impl Installer {
    pub fn begin_update(self: &Arc<Self>, target: UpdateTarget) -> Result<(InstallId, TaskHandle)> {
        ensure_safe_name(&target.name)?;

        let id = InstallId::generate();
        let mut attempt = self.start_attempt(InstallKind::Update, id.clone(), None, &target.name)?;
        attempt.log(&format!(
            "Update {} of '{}' to {} accepted",
            id, target.name, target.version
        ));
        tracing::info!(install_id = %id, app = %target.name, version = %target.version, "Update accepted");

        let installer = self.clone();
        let handle = self.tasks.submit(format!("update {}", id), async move {
            installer.run_update(attempt, target).await
        });
        Ok((id, handle))
    }

    async fn run_update(self: Arc<Self>, mut attempt: Attempt, target: UpdateTarget) -> Result<()> {
        attempt.notify(format!("Updating {} to {}...", target.name, target.version));

        let command = self.settings.tools.conda_install(
            &target.name,
            &target.channel,
            &target.label,
            Some(&target.version),
        );
        let (outcome, report) = match self.run_marked(&mut attempt, &command, INSTALL_RULES).await {
            Ok(result) => result,
            Err(e) => {
                attempt.log(&format!("ERROR: {}", e));
                attempt.notify(UPDATE_FAILED_MESSAGE);
                return Err(e);
            }
        };

        if !report.succeeded(outcome.exit_code) {
            let reason = match report.outcome {
                Some(marker) => marker.describe().to_string(),
                None => format!("package manager exited with {:?}", outcome.exit_code),
            };
            tracing::warn!(install_id = %attempt.id, app = %target.name, "Update failed: {}", reason);
            attempt.log(&format!("Update failed: {}", reason));
            attempt.notify(UPDATE_FAILED_MESSAGE);
            return Ok(());
        }

        self.cache.clear().await;
        tracing::info!(install_id = %attempt.id, app = %target.name, version = %target.version, "Update complete");
        attempt.notify("Update completed. Restarting server...");
        self.restart_host(&mut attempt, RestartRequest::new(RestartType::Update, target.name))
            .await;
        Ok(())
    }
}

//! Uninstall workflow.
//!
//! Every step is best-effort. When the package manager does not know the
//! app it was installed from source control, so its checkout is removed
//! instead.

use std::path::PathBuf;
use std::sync::Arc;

use super::{ensure_safe_name, Attempt, Installer};
use crate::error::{AppError, Result};
use crate::services::host::{RestartRequest, RestartType};
use crate::services::ledger::{InstallId, InstallKind};
use crate::services::manifest::InstallManifest;
use crate::services::markers::{MarkerOutcome, REMOVE_RULES};
use crate::services::process::LineControl;
use crate::services::tasks::TaskHandle;

pub(crate) const UNINSTALL_ERROR_MESSAGE: &str =
    "There was an error while uninstalling the app. Please check the logs for details.";

impl Installer {
    pub fn begin_uninstall(self: &Arc<Self>, name: &str) -> Result<(InstallId, TaskHandle)> {
        ensure_safe_name(name)?;

        let id = InstallId::generate();
        let mut attempt = self.start_attempt(InstallKind::Uninstall, id.clone(), None, name)?;
        attempt.log(&format!("Uninstall {} of '{}' accepted", id, name));
        tracing::info!(install_id = %id, app = %name, "Uninstall accepted");

        let installer = self.clone();
        let handle = self.tasks.submit(format!("uninstall {}", id), async move {
            installer.run_uninstall(attempt).await
        });
        Ok((id, handle))
    }

    async fn run_uninstall(self: Arc<Self>, mut attempt: Attempt) -> Result<()> {
        let result = self.uninstall(&mut attempt).await;
        if let Err(ref e) = result {
            attempt.log(&format!("ERROR: {}", e));
            attempt.notify(UNINSTALL_ERROR_MESSAGE);
        }
        result
    }

    async fn uninstall(&self, attempt: &mut Attempt) -> Result<()> {
        let name = attempt.app_name.clone();
        let tools = &self.settings.tools;

        attempt.notify("Removing app resources...");
        self.remove_app_resources(attempt, &name).await;

        attempt.notify("Removing app from the portal...");
        match self.run_logged(attempt, &tools.host_uninstall(&name)).await {
            Ok(outcome) if !outcome.success() => {
                attempt.log("Portal uninstall reported a failure, continuing");
            }
            Ok(_) => {}
            Err(e) => attempt.log(&format!("Portal uninstall could not run: {}", e)),
        }

        attempt.notify("Removing package...");
        match self
            .run_marked(attempt, &tools.conda_remove(&name), REMOVE_RULES)
            .await
        {
            Ok((_, report)) if report.outcome == Some(MarkerOutcome::NotFound) => {
                self.remove_source_files(attempt, &name);
            }
            Ok((outcome, report)) if !report.succeeded(outcome.exit_code) => {
                attempt.log(&format!(
                    "Package removal did not confirm success (exit code {:?})",
                    outcome.exit_code
                ));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(install_id = %attempt.id, app = %name, "Package removal could not run: {}", e);
                attempt.log(&format!("Package removal could not run: {}", e));
                attempt.notify("Package removal could not run. Continuing the uninstall.");
            }
        }

        self.cache.clear().await;
        tracing::info!(install_id = %attempt.id, app = %name, "Uninstall complete");
        attempt.notify("Uninstall completed. Restarting server...");
        self.restart_host(attempt, RestartRequest::new(RestartType::Uninstall, name))
            .await;
        Ok(())
    }

    /// Drop data-layer resources owned by the app; unassigned settings are
    /// expected and only logged
    async fn remove_app_resources(&self, attempt: &mut Attempt, name: &str) {
        let command = self.settings.tools.remove_app_resources(name);
        let log = &mut attempt.log;
        log.append(&format!("$ {}", command));

        let mut unassigned = 0usize;
        let result = self
            .runner
            .run(&command, &mut |line: &str| {
                if line.contains("not assigned") {
                    unassigned += 1;
                }
                log.append(line);
                LineControl::Continue
            })
            .await;

        match result {
            Ok(outcome) if !outcome.success() => {
                log.append(&format!(
                    "Resource removal exited with {:?}, continuing",
                    outcome.exit_code
                ));
            }
            Ok(_) => {}
            Err(e) => log.append(&format!("Resource removal could not run: {}", e)),
        }
        if unassigned > 0 {
            tracing::debug!(app = %name, unassigned, "Skipped unassigned app settings");
        }
    }

    fn remove_source_files(&self, attempt: &mut Attempt, name: &str) {
        match self.remove_source_workspace(name) {
            Ok(Some(path)) => {
                attempt.log(&format!("Removed source workspace {}", path.display()));
                attempt.notify("Source files removed.");
            }
            Ok(None) => attempt.log(&format!("No source workspace found for '{}'", name)),
            Err(e) => {
                tracing::warn!(install_id = %attempt.id, app = %name, "Could not remove source workspace: {}", e);
                attempt.log(&format!("Could not remove source workspace: {}", e));
                attempt.notify(format!("Could not remove the source files of {}.", name));
            }
        }
    }

    /// Find and delete the checkout an app was installed from. Only direct
    /// children of the source-control directory are ever deleted.
    fn remove_source_workspace(&self, name: &str) -> Result<Option<PathBuf>> {
        let Some(path) = self.find_source_workspace(name)? else {
            return Ok(None);
        };
        if path.parent() != Some(self.settings.git_dir.as_path()) {
            return Err(AppError::Conflict(format!(
                "Refusing to remove {}: not a checkout under {}",
                path.display(),
                self.settings.git_dir.display()
            )));
        }
        std::fs::remove_dir_all(&path)?;
        Ok(Some(path))
    }

    fn find_source_workspace(&self, name: &str) -> Result<Option<PathBuf>> {
        let direct = self.settings.git_workspace(name);
        if direct.is_dir() {
            return Ok(Some(direct));
        }

        let inside_git_dir = |path: &PathBuf| path.is_dir() && path.starts_with(&self.settings.git_dir);

        for (_, record) in self.ledger.list(InstallKind::Github)? {
            if record.target.app_name() == name && inside_git_dir(&record.workspace_path) {
                return Ok(Some(record.workspace_path));
            }
        }

        if !self.settings.git_dir.is_dir() {
            return Ok(None);
        }
        for entry in std::fs::read_dir(&self.settings.git_dir)?.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match InstallManifest::load(&path) {
                Ok(manifest) if manifest.name.as_deref() == Some(name) => return Ok(Some(path)),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(path = %path.display(), "Skipping unreadable manifest: {}", e)
                }
            }
        }
        Ok(None)
    }
}

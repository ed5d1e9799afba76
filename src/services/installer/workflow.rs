//! Install workflow: fetch, dependencies, build, data sync, post scripts,
//! finalize.
//!
//! Fetch, dependency and build failures end the attempt. A failed data sync
//! is recorded and the remaining stages still run. Post-install scripts are
//! best-effort and never fail their stage.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use super::{ensure_safe_name, Attempt, Installer};
use crate::error::{AppError, Result};
use crate::services::host::{RestartRequest, RestartType};
use crate::services::ledger::{
    repository_name, InstallId, InstallTarget, InstallationRecord, Stage, StageStatus,
};
use crate::services::manifest::InstallManifest;
use crate::services::markers::INSTALL_RULES;
use crate::services::notification::NotificationPayload;
use crate::services::process::CommandLine;
use crate::services::tasks::TaskHandle;

pub(crate) const INSTALL_ERROR_MESSAGE: &str =
    "There was an error while installing the app. Please check the install logs for details.";

impl Installer {
    /// Accept an install request: create its record and start the worker
    pub fn begin_install(
        self: &Arc<Self>,
        target: InstallTarget,
        develop: bool,
    ) -> Result<(InstallId, TaskHandle)> {
        let workspace = match &target {
            InstallTarget::Package { name, .. } => {
                ensure_safe_name(name)?;
                self.settings.package_workspace(name)
            }
            InstallTarget::Repository { url, .. } => {
                let repository = repository_name(url);
                ensure_safe_name(&repository)?;
                self.settings.git_workspace(&repository)
            }
        };

        let id = InstallId::generate();
        let record = InstallationRecord::new(id.clone(), target, workspace, develop);
        let path = self.ledger.create(&record)?;
        let mut attempt = self.start_attempt(
            record.target.kind(),
            id.clone(),
            Some(path),
            &record.target.app_name(),
        )?;
        attempt.log(&format!(
            "Install {} of '{}' accepted at {}",
            id,
            attempt.app_name,
            record.install_start_time.to_rfc3339()
        ));

        self.mark_install_running(&id);
        self.claim(&id);
        tracing::info!(install_id = %id, app = %attempt.app_name, kind = ?record.target.kind(), "Install accepted");

        let installer = self.clone();
        let handle = self.tasks.submit(format!("install {}", id), async move {
            installer.run_install(attempt, record).await
        });
        Ok((id, handle))
    }

    async fn run_install(self: Arc<Self>, mut attempt: Attempt, record: InstallationRecord) -> Result<()> {
        let result = match record.target {
            InstallTarget::Package { .. } => self.install_package(&mut attempt, &record).await,
            InstallTarget::Repository { .. } => self.install_repository(&mut attempt, &record).await,
        };

        if let Err(ref e) = result {
            attempt.log(&format!("ERROR: {}", e));
            attempt.notify(INSTALL_ERROR_MESSAGE);
            self.clear_install_running(&attempt.id);
        }
        self.release(&attempt.id);
        result
    }

    async fn install_package(&self, attempt: &mut Attempt, record: &InstallationRecord) -> Result<()> {
        let InstallTarget::Package {
            ref name,
            ref channel,
            ref label,
            ref version,
        } = record.target
        else {
            return Err(AppError::Internal("Package install without a package target".to_string()));
        };

        self.set_stage(attempt, Stage::Conda, StageStatus::Running, None)?;
        attempt.notify(format!("Installing {} from {}...", name, channel));

        let command = self
            .settings
            .tools
            .conda_install(name, channel, label, version.as_deref());
        let (outcome, report) = self.run_marked(attempt, &command, INSTALL_RULES).await?;

        if !report.succeeded(outcome.exit_code) {
            let reason = match report.outcome {
                Some(marker) => marker.describe().to_string(),
                None => format!("package manager exited with {:?}", outcome.exit_code),
            };
            return self.fail_stage(attempt, Stage::Conda, &reason);
        }
        self.set_stage(attempt, Stage::Conda, StageStatus::True, None)?;

        self.install_dependencies_and_build(attempt, record).await
    }

    /// Mark a load-bearing stage failed and end the attempt
    pub(super) fn fail_stage(&self, attempt: &mut Attempt, stage: Stage, reason: &str) -> Result<()> {
        tracing::warn!(install_id = %attempt.id, stage = %stage, "Install stage failed: {}", reason);
        self.set_stage(attempt, stage, StageStatus::False, Some(reason))?;
        attempt.notify(format!("Installation failed: {}", reason));
        self.clear_install_running(&attempt.id);
        Ok(())
    }

    /// Interpreter dependencies and the app's own build, shared by both
    /// install kinds
    pub(super) async fn install_dependencies_and_build(
        &self,
        attempt: &mut Attempt,
        record: &InstallationRecord,
    ) -> Result<()> {
        let workspace = record.workspace_path.as_path();
        let manifest = InstallManifest::load(workspace)?;

        self.set_stage(attempt, Stage::Pip, StageStatus::Running, None)?;
        let packages = manifest.pip_packages();
        if !packages.is_empty() {
            attempt.notify("Installing pip dependencies...");
            let command = self.settings.tools.pip_install(packages);
            let outcome = self.run_logged(attempt, &command).await?;
            if !outcome.success() {
                return self.fail_stage(
                    attempt,
                    Stage::Pip,
                    &format!("pip exited with {:?}", outcome.exit_code),
                );
            }
        }
        self.set_stage(attempt, Stage::Pip, StageStatus::True, None)?;

        self.set_stage(attempt, Stage::SetupPy, StageStatus::Running, None)?;
        if let Some(command) = self.settings.tools.build(workspace, record.develop) {
            attempt.notify("Running application setup...");
            let outcome = self.run_logged(attempt, &command).await?;
            if !outcome.success() {
                return self.fail_stage(
                    attempt,
                    Stage::SetupPy,
                    &format!("setup exited with {:?}", outcome.exit_code),
                );
            }
        }

        self.finish_install(attempt, record).await
    }

    /// Data sync, post scripts and finalize. Safe to repeat; the recovery
    /// scanner re-enters here.
    pub(super) async fn finish_install(
        &self,
        attempt: &mut Attempt,
        record: &InstallationRecord,
    ) -> Result<()> {
        let workspace = record.workspace_path.as_path();
        let manifest = InstallManifest::load(workspace)?;

        self.start_stage(attempt, record, Stage::DbSync)?;
        attempt.notify("Syncing the portal database...");
        let sync = self.run_logged(attempt, &self.settings.tools.db_sync()).await;
        match sync {
            Ok(outcome) if outcome.success() => {
                self.set_stage(attempt, Stage::DbSync, StageStatus::True, None)?;
            }
            failed => {
                let reason = match failed {
                    Ok(outcome) => format!("database sync exited with {:?}", outcome.exit_code),
                    Err(e) => format!("database sync could not run: {}", e),
                };
                tracing::warn!(install_id = %attempt.id, "{}", reason);
                self.set_stage(attempt, Stage::DbSync, StageStatus::False, Some(&reason))?;
                attempt.notify("The portal database sync failed. Continuing the installation.");
            }
        }

        self.start_stage(attempt, record, Stage::Post)?;
        let scripts = manifest.post_scripts(workspace);
        if !scripts.is_empty() {
            attempt.notify("Running post-install scripts...");
        }
        for script in scripts {
            self.run_post_script(attempt, &script, workspace).await;
        }
        self.set_stage(attempt, Stage::Post, StageStatus::True, None)?;

        self.finalize(attempt, record).await
    }

    /// Mark a stage `Running` unless a previous run already got further
    fn start_stage(
        &self,
        attempt: &mut Attempt,
        record: &InstallationRecord,
        stage: Stage,
    ) -> Result<()> {
        if record.stage(stage) == StageStatus::Pending {
            self.set_stage(attempt, stage, StageStatus::Running, None)?;
        }
        Ok(())
    }

    async fn run_post_script(&self, attempt: &mut Attempt, script: &Path, workspace: &Path) {
        if let Err(e) = make_executable(script) {
            attempt.log(&format!("Could not make {} executable: {}", script.display(), e));
        }
        let command = CommandLine::new(script.to_string_lossy()).current_dir(workspace);
        match self.run_logged(attempt, &command).await {
            Ok(outcome) if !outcome.success() => {
                tracing::warn!(install_id = %attempt.id, script = %script.display(), exit_code = ?outcome.exit_code, "Post-install script failed");
            }
            Ok(_) => {}
            Err(e) => {
                attempt.log(&format!("Post-install script {} could not run: {}", script.display(), e));
            }
        }
    }

    async fn finalize(&self, attempt: &mut Attempt, record: &InstallationRecord) -> Result<()> {
        self.set_stage(attempt, Stage::SetupPy, StageStatus::True, None)?;
        self.clear_install_running(&attempt.id);
        self.clear_scaffold_running();
        self.cache.clear().await;

        tracing::info!(install_id = %attempt.id, app = %attempt.app_name, "Install complete");
        attempt.log("Install complete");
        attempt.notify(NotificationPayload::routed(
            "addModalHelper",
            "installComplete",
            json!({
                "appName": attempt.app_name,
                "installID": attempt.id,
            }),
        ));

        let restart_type = match record.target {
            InstallTarget::Package { .. } => RestartType::Install,
            InstallTarget::Repository { .. } => RestartType::GithubInstall,
        };
        let request = RestartRequest::new(restart_type, attempt.app_name.clone());
        self.restart_host(attempt, request).await;
        Ok(())
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

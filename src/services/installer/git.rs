//! Source-control installs.
//!
//! The repository is checked out into the managed git directory; the
//! checkout and the manifest's package-manager dependencies together make
//! up the `conda` stage. Everything after that is the regular install path.

use std::path::Path;

use super::{Attempt, Installer};
use crate::error::{AppError, Result};
use crate::services::ledger::{InstallTarget, InstallationRecord, Stage, StageStatus};
use crate::services::manifest::InstallManifest;
use crate::services::markers::INSTALL_RULES;

const FALLBACK_BRANCH: &str = "main";

impl Installer {
    pub(super) async fn install_repository(
        &self,
        attempt: &mut Attempt,
        record: &InstallationRecord,
    ) -> Result<()> {
        let InstallTarget::Repository { ref url, ref branch } = record.target else {
            return Err(AppError::Internal(
                "Repository install without a repository target".to_string(),
            ));
        };
        let workspace = record.workspace_path.as_path();

        self.set_stage(attempt, Stage::Conda, StageStatus::Running, None)?;
        attempt.notify(format!("Fetching {} ({})...", url, branch));
        if !self.checkout(attempt, workspace, url, branch).await? {
            return self.fail_stage(
                attempt,
                Stage::Conda,
                &format!("could not check out {} from {}", branch, url),
            );
        }

        let manifest = InstallManifest::load(workspace)?;
        let packages = manifest.conda_packages();
        if !packages.is_empty() {
            attempt.notify("Installing conda dependencies...");
            let command = self
                .settings
                .tools
                .conda_install_dependencies(&manifest.requirements.conda.channels, packages);
            let (outcome, report) = self.run_marked(attempt, &command, INSTALL_RULES).await?;
            if !report.succeeded(outcome.exit_code) {
                let reason = match report.outcome {
                    Some(marker) => format!("dependency install: {}", marker.describe()),
                    None => format!("dependency install exited with {:?}", outcome.exit_code),
                };
                return self.fail_stage(attempt, Stage::Conda, &reason);
            }
        }
        self.set_stage(attempt, Stage::Conda, StageStatus::True, None)?;

        self.install_dependencies_and_build(attempt, record).await
    }

    /// Clone into a fresh workspace or pull an existing one; `false` when
    /// git could not produce a checkout
    async fn checkout(
        &self,
        attempt: &mut Attempt,
        workspace: &Path,
        url: &str,
        branch: &str,
    ) -> Result<bool> {
        let tools = &self.settings.tools;

        if workspace.is_dir() {
            attempt.log(&format!("{} exists, pulling {}", workspace.display(), branch));
            let outcome = self
                .run_logged(attempt, &tools.git(workspace, ["pull", "origin", branch]))
                .await?;
            return Ok(outcome.success());
        }

        std::fs::create_dir_all(workspace)?;
        let cloned = self.clone_into(attempt, workspace, url, branch).await;
        if !matches!(cloned, Ok(true)) {
            // a half-made clone would send the retry down the pull path
            if let Err(e) = std::fs::remove_dir_all(workspace) {
                tracing::warn!(workspace = %workspace.display(), "Could not remove failed clone: {}", e);
                attempt.log(&format!("Could not remove failed clone {}: {}", workspace.display(), e));
            }
        }
        cloned
    }

    async fn clone_into(
        &self,
        attempt: &mut Attempt,
        workspace: &Path,
        url: &str,
        branch: &str,
    ) -> Result<bool> {
        let tools = &self.settings.tools;
        let steps: [&[&str]; 3] = [&["init"], &["remote", "add", "origin", url], &["fetch", "origin"]];
        for args in steps {
            let outcome = self
                .run_logged(attempt, &tools.git(workspace, args.iter().copied()))
                .await?;
            if !outcome.success() {
                return Ok(false);
            }
        }

        let outcome = self
            .run_logged(attempt, &tools.git(workspace, ["checkout", branch]))
            .await?;
        if outcome.success() {
            return Ok(true);
        }

        attempt.log(&format!(
            "Checkout of '{}' failed, falling back to '{}'",
            branch, FALLBACK_BRANCH
        ));
        attempt.notify(format!(
            "Branch {} not found, using {} instead.",
            branch, FALLBACK_BRANCH
        ));
        let outcome = self
            .run_logged(attempt, &tools.git(workspace, ["checkout", FALLBACK_BRANCH]))
            .await?;
        Ok(outcome.success())
    }
}

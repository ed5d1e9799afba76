//! Installation, update and uninstall workflows.
//!
//! Each request becomes one [`Attempt`] running on a worker task. An attempt
//! owns its log stream and notification publisher; install attempts also
//! carry the path of their ledger record, which is the only state a stage
//! transition touches.
//!
//! The installer also remembers which installs this process is driving, so
//! crash recovery never resumes a record that a live worker still owns.

mod git;
pub mod recovery;
pub mod settings;
mod uninstall;
mod update;
mod workflow;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{AppError, Result};
use crate::services::catalog::PackageCache;
use crate::services::host::{HostRestarter, RestartRequest};
use crate::services::ledger::{InstallId, InstallKind, Ledger, LogStream, Stage, StageStatus};
use crate::services::markers::{MarkerReport, MarkerRule, MarkerSink};
use crate::services::notification::{NotificationHub, NotificationPayload, TopicPublisher};
use crate::services::process::{CommandLine, LineControl, ProcessOutcome, ProcessRunner};
use crate::services::tasks::TaskRunner;

pub use recovery::RecoveryScanner;
pub use settings::{InstallerSettings, Toolchain};
pub use update::UpdateTarget;

/// Names used as directory names must stay inside their parent directory
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

pub(crate) fn ensure_safe_name(name: &str) -> Result<()> {
    if is_safe_name(name) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("Invalid app name: '{}'", name)))
    }
}

/// One running install, update or uninstall
pub(crate) struct Attempt {
    pub(crate) id: InstallId,
    pub(crate) app_name: String,
    record: Option<PathBuf>,
    log: LogStream,
    notifier: TopicPublisher,
}

impl Attempt {
    pub(crate) fn log(&mut self, line: &str) {
        self.log.append(line);
    }

    pub(crate) fn notify(&self, message: impl Into<NotificationPayload>) {
        self.notifier.send(message);
    }
}

pub struct Installer {
    settings: Arc<InstallerSettings>,
    ledger: Ledger,
    hub: NotificationHub,
    runner: ProcessRunner,
    tasks: TaskRunner,
    host: Arc<dyn HostRestarter>,
    cache: PackageCache,
    in_flight: Mutex<HashSet<InstallId>>,
}

impl Installer {
    pub fn new(
        settings: Arc<InstallerSettings>,
        hub: NotificationHub,
        host: Arc<dyn HostRestarter>,
        cache: PackageCache,
    ) -> Self {
        Self {
            ledger: Ledger::new(&settings.workspace_root),
            settings,
            hub,
            runner: ProcessRunner::new(),
            tasks: TaskRunner::new(),
            host,
            cache,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> &InstallerSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    pub fn tasks(&self) -> &TaskRunner {
        &self.tasks
    }

    pub fn cache(&self) -> &PackageCache {
        &self.cache
    }

    /// Whether a worker of this process currently drives install `id`
    pub fn is_in_flight(&self, id: &InstallId) -> bool {
        self.in_flight.lock().contains(id)
    }

    /// Take ownership of an install; `false` when a worker already has it
    fn claim(&self, id: &InstallId) -> bool {
        self.in_flight.lock().insert(id.clone())
    }

    fn release(&self, id: &InstallId) {
        self.in_flight.lock().remove(id);
    }

    fn start_attempt(
        &self,
        kind: InstallKind,
        id: InstallId,
        record: Option<PathBuf>,
        app_name: &str,
    ) -> Result<Attempt> {
        let log = self.ledger.open_log(kind, &id)?;
        Ok(Attempt {
            id,
            app_name: app_name.to_string(),
            record,
            log,
            notifier: self.hub.topic(&self.settings.topic),
        })
    }

    /// Move one stage of the attempt's ledger record; attempts without a
    /// record only log the transition
    fn set_stage(
        &self,
        attempt: &mut Attempt,
        stage: Stage,
        status: StageStatus,
        error: Option<&str>,
    ) -> Result<()> {
        attempt.log(&format!("[{}] {:?}", stage, status));
        if let Some(ref path) = attempt.record {
            self.ledger.update_stage(path, stage, status, error)?;
        }
        Ok(())
    }

    /// Run a package-manager command through a marker rule table
    async fn run_marked(
        &self,
        attempt: &mut Attempt,
        command: &CommandLine,
        rules: &[MarkerRule],
    ) -> Result<(ProcessOutcome, MarkerReport)> {
        let Attempt { log, notifier, .. } = attempt;
        log.append(&format!("$ {}", command));

        let mut sink = MarkerSink::new(
            rules,
            |line: &str| log.append(line),
            |note: &str| notifier.send(note),
        );
        let outcome = self.runner.run(command, &mut sink).await?;
        let report = sink.into_report();

        tracing::debug!(
            install_id = %attempt.id,
            exit_code = ?outcome.exit_code,
            outcome = ?report.outcome,
            sentinel = report.sentinel_seen,
            "Package manager finished"
        );
        Ok((outcome, report))
    }

    /// Run a command, appending every output line to the attempt log
    async fn run_logged(&self, attempt: &mut Attempt, command: &CommandLine) -> Result<ProcessOutcome> {
        let log = &mut attempt.log;
        log.append(&format!("$ {}", command));
        let outcome = self
            .runner
            .run(command, &mut |line: &str| {
                log.append(line);
                LineControl::Continue
            })
            .await?;
        if !outcome.success() {
            log.append(&format!("exit code: {:?}", outcome.exit_code));
        }
        Ok(outcome)
    }

    /// Restart the portal; a failed restart is reported, not raised
    async fn restart_host(&self, attempt: &mut Attempt, request: RestartRequest) {
        match self.host.restart(&request).await {
            Ok(method) => {
                attempt.log(&format!("Portal restart triggered ({:?})", method));
            }
            Err(e) => {
                tracing::error!(install_id = %attempt.id, "Portal restart failed: {}", e);
                attempt.log(&format!("Portal restart failed: {}", e));
                attempt.notify("The portal could not be restarted. Please restart it manually.");
            }
        }
    }

    fn mark_install_running(&self, id: &InstallId) {
        let path = self.settings.install_running_path(id);
        if let Err(e) = std::fs::write(&path, b"") {
            tracing::warn!(path = %path.display(), "Failed to create install marker: {}", e);
        }
    }

    fn clear_install_running(&self, id: &InstallId) {
        remove_marker(&self.settings.install_running_path(id));
    }

    fn clear_scaffold_running(&self) {
        remove_marker(&self.settings.scaffold_running_path());
    }
}

fn remove_marker(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), "Failed to remove marker file: {}", e),
    }
}

//! Test helpers: a temporary workspace with scripted stand-ins for the
//! package manager, interpreter, portal CLI and git.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use appstore::error::Result;
use appstore::services::installer::{InstallerSettings, Toolchain};
use appstore::services::{
    HostRestarter, InstallationRecord, RestartMethod, RestartRequest, WorkspaceRegistry,
};
use appstore::state::AppState;

pub const TOPIC: &str = "notifications";

/// How the scripted package manager answers an install
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondaInstall {
    Success,
    NotFound,
    Conflict,
}

/// How the scripted package manager answers a removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondaRemove {
    Success,
    NotFound,
}

#[derive(Debug, Clone)]
pub struct FakeTools {
    pub conda_install: CondaInstall,
    pub conda_remove: CondaRemove,
    pub python_exit: i32,
    /// Seconds `python setup.py` takes before answering
    pub build_secs: u32,
    pub db_sync_exit: i32,
    pub git_fetch_exit: i32,
}

impl Default for FakeTools {
    fn default() -> Self {
        Self {
            conda_install: CondaInstall::Success,
            conda_remove: CondaRemove::Success,
            python_exit: 0,
            build_secs: 0,
            db_sync_exit: 0,
            git_fetch_exit: 0,
        }
    }
}

/// Host restarter that records every request
#[derive(Default)]
pub struct RecordingRestarter {
    pub requests: Mutex<Vec<RestartRequest>>,
}

impl RecordingRestarter {
    pub fn requests(&self) -> Vec<RestartRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HostRestarter for RecordingRestarter {
    async fn restart(&self, request: &RestartRequest) -> Result<RestartMethod> {
        self.requests.lock().push(request.clone());
        Ok(RestartMethod::Privileged)
    }
}

pub struct TestEnv {
    pub dir: TempDir,
    pub state: AppState,
    pub host: Arc<RecordingRestarter>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_tools(FakeTools::default())
    }

    pub fn with_tools(tools: FakeTools) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        let bin = dir.path().join("bin");
        let calls = dir.path().join("calls");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::create_dir_all(&calls).unwrap();

        let apps_dir = root.join("apps");
        let git_dir = root.join("gitsrc");

        let settings = InstallerSettings {
            workspace_root: root.clone(),
            apps_dir: apps_dir.clone(),
            git_dir: git_dir.clone(),
            topic: TOPIC.to_string(),
            recovery_delay: Duration::ZERO,
            tools: Toolchain {
                conda_bin: write_script(&bin, "conda", &conda_script(&tools, &calls, &apps_dir)),
                python_bin: write_script(&bin, "python", &python_script(&tools, &calls)),
                git_bin: write_script(&bin, "git", &git_script(&tools, &calls)),
                host_cli: write_script(&bin, "portal", &host_script(&tools, &calls)),
                restart_command: None,
                restart_fallback_command: None,
                restart_trigger_file: None,
            },
        };
        settings.ensure_directories().unwrap();

        let host = Arc::new(RecordingRestarter::default());
        let registry = Arc::new(WorkspaceRegistry::new(&apps_dir, &git_dir));
        let state = AppState::new(settings, host.clone(), registry, 64);
        state.ledger().ensure_layout().unwrap();

        Self { dir, state, host }
    }

    pub fn root(&self) -> &Path {
        &self.state.settings().workspace_root
    }

    pub fn apps_dir(&self) -> &Path {
        &self.state.settings().apps_dir
    }

    pub fn git_dir(&self) -> &Path {
        &self.state.settings().git_dir
    }

    /// Argument lines a scripted tool was invoked with
    pub fn calls(&self, tool: &str) -> Vec<String> {
        let path = self.dir.path().join("calls").join(format!("{}.calls", tool));
        std::fs::read_to_string(path)
            .map(|content| content.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Write `install.yml` into an app directory, creating it
    pub fn write_manifest(&self, workspace: &Path, manifest: &str) {
        std::fs::create_dir_all(workspace).unwrap();
        std::fs::write(workspace.join("install.yml"), manifest).unwrap();
    }

    pub fn record(&self, id: &appstore::services::InstallId) -> InstallationRecord {
        self.state.ledger().read(id).unwrap()
    }

    /// Wait until no workflow task is running
    pub async fn wait_idle(&self) {
        for _ in 0..500 {
            if self.state.installer.tasks().active() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("workflows did not finish in time");
    }
}

fn write_script(bin: &Path, name: &str, body: &str) -> String {
    let path: PathBuf = bin.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn conda_script(tools: &FakeTools, calls: &Path, apps_dir: &Path) -> String {
    let install = match tools.conda_install {
        CondaInstall::Success => format!(
            r#"echo "Collecting package metadata (current_repodata.json): done"
echo "Solving environment: done"
echo "Verifying transaction: done"
echo "Executing transaction: done"
for last in "$@"; do :; done
mkdir -p "{apps}/${{last%%=*}}"
exit 0"#,
            apps = apps_dir.display()
        ),
        CondaInstall::NotFound => r#"echo "Collecting package metadata (current_repodata.json): done"
echo "PackagesNotFoundError: The following packages are not available from current channels:"
exit 1"#
            .to_string(),
        CondaInstall::Conflict => r#"echo "Solving environment: failed"
echo "Found conflicts! Looking for incompatible packages."
echo "UnsatisfiableError: The following specifications were found to be incompatible"
exit 1"#
            .to_string(),
    };
    let remove = match tools.conda_remove {
        CondaRemove::Success => r#"echo "Executing transaction: done"
exit 0"#
            .to_string(),
        CondaRemove::NotFound => r#"echo "PackagesNotFoundError: The following packages are missing from the target environment:"
exit 1"#
            .to_string(),
    };
    format!(
        r#"echo "$@" >> "{calls}/conda.calls"
case "$1" in
  install)
{install}
    ;;
  remove)
{remove}
    ;;
esac
"#,
        calls = calls.display()
    )
}

fn python_script(tools: &FakeTools, calls: &Path) -> String {
    format!(
        r#"echo "$@" >> "{calls}/python.calls"
echo "python $@"
if [ "$1" = "setup.py" ]; then
  sleep {secs}
fi
exit {code}
"#,
        calls = calls.display(),
        secs = tools.build_secs,
        code = tools.python_exit
    )
}

fn host_script(tools: &FakeTools, calls: &Path) -> String {
    format!(
        r#"echo "$@" >> "{calls}/portal.calls"
if [ "$1" = "db" ]; then
  echo "syncing"
  exit {code}
fi
if [ "$1" = "app_settings" ]; then
  echo "Setting database_url is not assigned to $3"
fi
exit 0
"#,
        calls = calls.display(),
        code = tools.db_sync_exit
    )
}

/// `checkout missing` fails so the fallback to `main` is exercised; a
/// successful checkout writes a manifest into the working directory
fn git_script(tools: &FakeTools, calls: &Path) -> String {
    format!(
        r#"echo "$@" >> "{calls}/git.calls"
case "$1" in
  fetch)
    if [ {fetch} -ne 0 ]; then
      echo "fatal: could not read from remote repository" >&2
      exit {fetch}
    fi
    ;;
  checkout)
    if [ "$2" = "missing" ]; then
      echo "error: pathspec 'missing' did not match any file(s) known to git" >&2
      exit 1
    fi
    printf 'name: repo_app\n' > install.yml
    ;;
  pull)
    echo "Already up to date."
    ;;
esac
exit 0
"#,
        calls = calls.display(),
        fetch = tools.git_fetch_exit
    )
}

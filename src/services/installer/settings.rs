//! Paths and external commands used by the installation workflows.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::tools::ToolsConfig;
use crate::config::Config;
use crate::services::ledger::InstallId;
use crate::services::markers::{INSTALL_SENTINEL, REMOVE_SENTINEL};
use crate::services::process::{shell_quote, CommandLine};

/// Holds one marker file per install in flight, named after its install id
pub const INSTALL_RUNNING_DIR: &str = "install_running";
/// Marker file present while a scaffold is in flight
pub const SCAFFOLD_RUNNING_FILE: &str = "scaffold_running";

/// Everything a workflow needs to know about the filesystem and the tools
#[derive(Debug, Clone)]
pub struct InstallerSettings {
    pub workspace_root: PathBuf,
    pub apps_dir: PathBuf,
    pub git_dir: PathBuf,
    pub topic: String,
    pub recovery_delay: Duration,
    pub tools: Toolchain,
}

impl InstallerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workspace_root: config.workspace.root.clone(),
            apps_dir: config.workspace.apps_dir.clone(),
            git_dir: config.workspace.git_dir.clone(),
            topic: config.notifications.topic.clone(),
            recovery_delay: Duration::from_secs(config.workspace.recovery_delay_secs),
            tools: Toolchain::from_config(&config.tools),
        }
    }

    pub fn install_running_dir(&self) -> PathBuf {
        self.workspace_root.join(INSTALL_RUNNING_DIR)
    }

    pub fn install_running_path(&self, id: &InstallId) -> PathBuf {
        self.install_running_dir().join(id.as_str())
    }

    pub fn scaffold_running_path(&self) -> PathBuf {
        self.workspace_root.join(SCAFFOLD_RUNNING_FILE)
    }

    /// Where a package-manager install materializes `name`
    pub fn package_workspace(&self, name: &str) -> PathBuf {
        self.apps_dir.join(name)
    }

    /// Managed checkout directory for a repository
    pub fn git_workspace(&self, repository: &str) -> PathBuf {
        self.git_dir.join(repository)
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [
            self.workspace_root.clone(),
            self.install_running_dir(),
            self.apps_dir.clone(),
            self.git_dir.clone(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Builds the command lines of every external tool
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub conda_bin: String,
    pub python_bin: String,
    pub git_bin: String,
    pub host_cli: String,
    pub restart_command: Option<CommandLine>,
    pub restart_fallback_command: Option<CommandLine>,
    pub restart_trigger_file: Option<PathBuf>,
}

impl Toolchain {
    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self {
            conda_bin: tools.conda_bin.clone(),
            python_bin: tools.python_bin.clone(),
            git_bin: tools.git_bin.clone(),
            host_cli: tools.host_cli.clone(),
            restart_command: CommandLine::from_template(&tools.restart_command),
            restart_fallback_command: CommandLine::from_template(&tools.restart_fallback_command),
            restart_trigger_file: tools.restart_trigger_file.as_ref().map(PathBuf::from),
        }
    }

    /// `channel`, or `channel/label/<label>` for a non-empty label
    pub fn channel_spec(channel: &str, label: &str) -> String {
        if label.is_empty() {
            channel.to_string()
        } else {
            format!("{}/label/{}", channel, label)
        }
    }

    /// Install one package; the sentinel line follows whatever the tool prints
    pub fn conda_install(
        &self,
        name: &str,
        channel: &str,
        label: &str,
        version: Option<&str>,
    ) -> CommandLine {
        let spec = match version {
            Some(version) => format!("{}={}", name, version),
            None => name.to_string(),
        };
        CommandLine::shell(format!(
            "{} install --yes -c {} {}; echo {}",
            shell_quote(&self.conda_bin),
            shell_quote(&Self::channel_spec(channel, label)),
            shell_quote(&spec),
            shell_quote(INSTALL_SENTINEL),
        ))
    }

    /// Install declared package-manager dependencies
    pub fn conda_install_dependencies(&self, channels: &[String], packages: &[String]) -> CommandLine {
        let mut script = format!("{} install --yes", shell_quote(&self.conda_bin));
        for channel in channels {
            script.push_str(" -c ");
            script.push_str(&shell_quote(channel));
        }
        for package in packages {
            script.push(' ');
            script.push_str(&shell_quote(package));
        }
        script.push_str("; echo ");
        script.push_str(&shell_quote(INSTALL_SENTINEL));
        CommandLine::shell(script)
    }

    pub fn conda_remove(&self, name: &str) -> CommandLine {
        CommandLine::shell(format!(
            "{} remove --yes --force {}; echo {}",
            shell_quote(&self.conda_bin),
            shell_quote(name),
            shell_quote(REMOVE_SENTINEL),
        ))
    }

    pub fn pip_install(&self, packages: &[String]) -> CommandLine {
        CommandLine::new(&self.python_bin)
            .args(["-m", "pip", "install"])
            .args(packages.iter().cloned())
    }

    /// The app's own build entry point; `None` when the workspace has none
    pub fn build(&self, workspace: &Path, develop: bool) -> Option<CommandLine> {
        if workspace.join("setup.py").is_file() {
            let mode = if develop { "develop" } else { "install" };
            return Some(
                CommandLine::new(&self.python_bin)
                    .args(["setup.py", mode])
                    .current_dir(workspace),
            );
        }
        if workspace.join("pyproject.toml").is_file() {
            let mut cmd = CommandLine::new(&self.python_bin).args(["-m", "pip", "install"]);
            if develop {
                cmd = cmd.arg("-e");
            }
            return Some(cmd.arg(".").current_dir(workspace));
        }
        None
    }

    pub fn db_sync(&self) -> CommandLine {
        CommandLine::new(&self.host_cli).args(["db", "sync"])
    }

    pub fn collect_static(&self) -> CommandLine {
        CommandLine::new(&self.host_cli).args(["manage", "collectstatic"])
    }

    pub fn remove_app_resources(&self, name: &str) -> CommandLine {
        CommandLine::new(&self.host_cli).args(["app_settings", "remove", name])
    }

    pub fn host_uninstall(&self, name: &str) -> CommandLine {
        CommandLine::new(&self.host_cli).args(["uninstall", name, "-f"])
    }

    pub fn git<I, S>(&self, workspace: &Path, args: I) -> CommandLine
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandLine::new(&self.git_bin)
            .args(args)
            .current_dir(workspace)
    }
}

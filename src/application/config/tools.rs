use std::env;

/// External tools the engine shells out to
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    pub conda_bin: String,
    pub python_bin: String,
    pub git_bin: String,
    pub host_cli: String,
    pub restart_command: String,
    pub restart_fallback_command: String,
    pub restart_trigger_file: Option<String>,
}

impl ToolsConfig {
    pub fn from_env() -> Self {
        Self {
            conda_bin: env::var("APPSTORE_CONDA_BIN").unwrap_or_else(|_| "conda".to_string()),
            python_bin: env::var("APPSTORE_PYTHON_BIN").unwrap_or_else(|_| "python".to_string()),
            git_bin: env::var("APPSTORE_GIT_BIN").unwrap_or_else(|_| "git".to_string()),
            host_cli: env::var("APPSTORE_HOST_CLI").unwrap_or_else(|_| "tethys".to_string()),
            restart_command: env::var("APPSTORE_RESTART_COMMAND")
                .unwrap_or_else(|_| "sudo -n supervisorctl restart all".to_string()),
            restart_fallback_command: env::var("APPSTORE_RESTART_FALLBACK_COMMAND")
                .unwrap_or_else(|_| "supervisorctl restart all".to_string()),
            restart_trigger_file: env::var("APPSTORE_RESTART_TRIGGER_FILE")
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }
}

//! File-backed installation status ledger.
//!
//! Layout under the workspace root:
//!
//! ```text
//! install_status/<kind>/<installID>.json
//! install_logs/<kind>/<installID>.log
//! ```
//!
//! Each record is owned by exactly one worker at a time, so every update is
//! a plain read-modify-write of the whole file. Writes go through a temp
//! file and a rename so a crash never leaves a truncated record behind.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Named workflow stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Conda,
    Pip,
    SetupPy,
    DbSync,
    Post,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Conda,
        Stage::Pip,
        Stage::SetupPy,
        Stage::DbSync,
        Stage::Post,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Conda => "conda",
            Stage::Pip => "pip",
            Stage::SetupPy => "setupPy",
            Stage::DbSync => "dbSync",
            Stage::Post => "post",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress of a single stage. `True`/`False` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    True,
    False,
}

impl StageStatus {
    fn rank(self) -> u8 {
        match self {
            StageStatus::Pending => 0,
            StageStatus::Running => 1,
            StageStatus::True | StageStatus::False => 2,
        }
    }
}

/// Which workflow produced a record; also the directory partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallKind {
    Conda,
    Github,
    Update,
    Uninstall,
}

impl InstallKind {
    /// Kinds that keep a status record
    pub const TRACKED: [InstallKind; 2] = [InstallKind::Conda, InstallKind::Github];

    pub const ALL: [InstallKind; 4] = [
        InstallKind::Conda,
        InstallKind::Github,
        InstallKind::Update,
        InstallKind::Uninstall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstallKind::Conda => "conda",
            InstallKind::Github => "github",
            InstallKind::Update => "update",
            InstallKind::Uninstall => "uninstall",
        }
    }
}

/// Opaque installation identifier, safe to use as a file name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallId(String);

impl InstallId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= 64
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(AppError::BadRequest(format!("Invalid installID '{}'", raw)));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What is being installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InstallTarget {
    Package {
        name: String,
        channel: String,
        label: String,
        #[serde(default)]
        version: Option<String>,
    },
    Repository {
        url: String,
        branch: String,
    },
}

impl InstallTarget {
    /// App name: the package name, or the repository name for checkouts
    pub fn app_name(&self) -> String {
        match self {
            InstallTarget::Package { name, .. } => name.clone(),
            InstallTarget::Repository { url, .. } => repository_name(url),
        }
    }

    pub fn kind(&self) -> InstallKind {
        match self {
            InstallTarget::Package { .. } => InstallKind::Conda,
            InstallTarget::Repository { .. } => InstallKind::Github,
        }
    }
}

/// Last path segment of a repository URL without a `.git` suffix
pub fn repository_name(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}

/// One installation attempt, persisted as a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationRecord {
    #[serde(rename = "installID")]
    pub install_id: InstallId,
    pub target: InstallTarget,
    pub workspace_path: PathBuf,
    #[serde(default)]
    pub develop: bool,
    pub status: BTreeMap<Stage, StageStatus>,
    pub install_complete: bool,
    pub install_start_time: DateTime<Utc>,
    pub install_completed_time: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub error_date_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl InstallationRecord {
    /// Fresh record with every stage `Pending`
    pub fn new(
        install_id: InstallId,
        target: InstallTarget,
        workspace_path: PathBuf,
        develop: bool,
    ) -> Self {
        Self {
            install_id,
            target,
            workspace_path,
            develop,
            status: Stage::ALL
                .iter()
                .map(|stage| (*stage, StageStatus::Pending))
                .collect(),
            install_complete: false,
            install_start_time: Utc::now(),
            install_completed_time: None,
            last_update: None,
            error_date_time: None,
            error_message: None,
        }
    }

    pub fn stage(&self, stage: Stage) -> StageStatus {
        self.status
            .get(&stage)
            .copied()
            .unwrap_or(StageStatus::Pending)
    }

    pub fn all_stages_succeeded(&self) -> bool {
        !self.status.is_empty() && self.status.values().all(|s| *s == StageStatus::True)
    }

    /// Apply one stage transition in memory
    pub fn apply_stage(
        &mut self,
        stage: Stage,
        value: StageStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let current = self.stage(stage);
        if value.rank() < current.rank() {
            return Err(AppError::Conflict(format!(
                "Stage '{}' of install {} cannot move from {:?} to {:?}",
                stage, self.install_id, current, value
            )));
        }

        self.status.insert(stage, value);
        let now = Utc::now();

        if value == StageStatus::False {
            self.error_date_time = Some(now);
            self.error_message = Some(
                error
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Stage '{}' failed", stage)),
            );
        } else {
            self.last_update = Some(now);
        }

        self.install_complete = self.all_stages_succeeded();
        if self.install_complete && self.install_completed_time.is_none() {
            self.install_completed_time = Some(now);
        }

        Ok(())
    }
}

/// Durable store of installation records and their logs
#[derive(Debug, Clone)]
pub struct Ledger {
    root: PathBuf,
}

impl Ledger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn status_dir(&self, kind: InstallKind) -> PathBuf {
        self.root.join("install_status").join(kind.as_str())
    }

    pub fn log_dir(&self, kind: InstallKind) -> PathBuf {
        self.root.join("install_logs").join(kind.as_str())
    }

    pub fn status_path(&self, kind: InstallKind, id: &InstallId) -> PathBuf {
        self.status_dir(kind).join(format!("{}.json", id))
    }

    pub fn log_path(&self, kind: InstallKind, id: &InstallId) -> PathBuf {
        self.log_dir(kind).join(format!("{}.log", id))
    }

    /// Create every ledger directory
    pub fn ensure_layout(&self) -> Result<()> {
        for kind in InstallKind::ALL {
            fs::create_dir_all(self.status_dir(kind))?;
            fs::create_dir_all(self.log_dir(kind))?;
        }
        Ok(())
    }

    /// Persist a brand-new record; fails if the ID is already taken
    pub fn create(&self, record: &InstallationRecord) -> Result<PathBuf> {
        let path = self.status_path(record.target.kind(), &record.install_id);
        if path.exists() {
            return Err(AppError::Conflict(format!(
                "Install {} already exists",
                record.install_id
            )));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_record(&path, record)?;
        tracing::debug!(install_id = %record.install_id, path = %path.display(), "Created install record");
        Ok(path)
    }

    /// Find the status file of an install across the tracked kinds
    pub fn locate(&self, id: &InstallId) -> Option<PathBuf> {
        InstallKind::TRACKED
            .iter()
            .map(|kind| self.status_path(*kind, id))
            .find(|path| path.is_file())
    }

    pub fn exists(&self, id: &InstallId) -> bool {
        self.locate(id).is_some()
    }

    pub fn read(&self, id: &InstallId) -> Result<InstallationRecord> {
        let path = self
            .locate(id)
            .ok_or_else(|| AppError::NotFound(format!("Install '{}' not found", id)))?;
        read_record(&path)
    }

    /// Read-modify-write a single stage of the record stored at `path`
    pub fn update_stage(
        &self,
        path: &Path,
        stage: Stage,
        value: StageStatus,
        error: Option<&str>,
    ) -> Result<InstallationRecord> {
        let mut record = read_record(path)?;
        record.apply_stage(stage, value, error)?;
        write_record(path, &record)?;

        tracing::info!(
            install_id = %record.install_id,
            stage = %stage,
            status = ?value,
            complete = record.install_complete,
            "Install stage updated"
        );
        Ok(record)
    }

    /// All records of one kind, skipping unreadable files
    pub fn list(&self, kind: InstallKind) -> Result<Vec<(PathBuf, InstallationRecord)>> {
        let dir = self.status_dir(kind);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path) {
                Ok(record) => records.push((path, record)),
                Err(e) => tracing::warn!(path = %path.display(), "Skipping unreadable install record: {}", e),
            }
        }
        Ok(records)
    }

    /// Find the log file of any install, update or uninstall
    pub fn locate_log(&self, id: &InstallId) -> Option<PathBuf> {
        InstallKind::ALL
            .iter()
            .map(|kind| self.log_path(*kind, id))
            .find(|path| path.is_file())
    }

    pub fn read_log(&self, id: &InstallId) -> Result<String> {
        let path = self
            .locate_log(id)
            .ok_or_else(|| AppError::NotFound(format!("Logs for install '{}' not found", id)))?;
        Ok(fs::read_to_string(path)?)
    }

    pub fn open_log(&self, kind: InstallKind, id: &InstallId) -> Result<LogStream> {
        LogStream::open(self.log_path(kind, id))
    }
}

fn read_record(path: &Path) -> Result<InstallationRecord> {
    let content = fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            AppError::NotFound(format!("Install record {} not found", path.display()))
        }
        _ => AppError::Io(e),
    })?;
    Ok(serde_json::from_str(&content)?)
}

fn write_record(path: &Path, record: &InstallationRecord) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(serde_json::to_string_pretty(record)?.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Append-only text log of one installation
#[derive(Debug)]
pub struct LogStream {
    path: PathBuf,
    file: File,
}

impl LogStream {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Append one line; log write failures never abort a workflow
    pub fn append(&mut self, line: &str) {
        if let Err(e) = writeln!(self.file, "{}", line) {
            tracing::warn!(path = %self.path.display(), "Failed to write install log: {}", e);
        }
    }
}

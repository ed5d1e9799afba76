//! Crash recovery.
//!
//! An install whose build stage is still `Running` belonged to a process
//! that died between the build and finalize. On startup, after the portal
//! had time to boot, those installs are resumed from the data-sync stage.
//! Fetch, dependency and build stages are never repeated.
//!
//! The candidates are fixed when the scanner is built, before the server
//! accepts requests. An install started during the delay is owned by its
//! worker and is never picked up here.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::Installer;
use crate::error::Result;
use crate::services::ledger::{InstallId, InstallKind, Stage, StageStatus};

pub struct RecoveryScanner {
    installer: Arc<Installer>,
    delay: Duration,
    candidates: Vec<(InstallKind, InstallId)>,
}

impl RecoveryScanner {
    /// Snapshot the interrupted installs present right now
    pub fn new(installer: Arc<Installer>, delay: Duration) -> Self {
        let candidates = interrupted_installs(&installer).unwrap_or_else(|e| {
            tracing::error!("Could not list installs for recovery: {}", e);
            Vec::new()
        });
        Self {
            installer,
            delay,
            candidates,
        }
    }

    /// Scan once after the configured delay
    pub fn spawn(self) -> JoinHandle<usize> {
        tokio::spawn(async move {
            tokio::time::sleep(self.delay).await;
            match self.scan_once().await {
                Ok(resumed) => {
                    tracing::info!(resumed, "Install recovery scan finished");
                    resumed
                }
                Err(e) => {
                    tracing::error!("Install recovery scan failed: {}", e);
                    0
                }
            }
        })
    }

    /// Resume every interrupted install; returns how many were resumed
    pub async fn scan_once(&self) -> Result<usize> {
        let installer = &self.installer;
        let mut resumed = 0;

        for (kind, id) in &self.candidates {
            let path = installer.ledger.status_path(*kind, id);
            let record = match installer.ledger.read(id) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(install_id = %id, "Interrupted install vanished before recovery: {}", e);
                    continue;
                }
            };
            if record.stage(Stage::SetupPy) != StageStatus::Running {
                continue;
            }
            if !installer.claim(id) {
                tracing::debug!(install_id = %id, "Install is owned by a live worker, not resuming");
                continue;
            }

            tracing::info!(install_id = %id, app = %record.target.app_name(), "Resuming interrupted install");
            let outcome = match installer.start_attempt(*kind, id.clone(), Some(path), &record.target.app_name()) {
                Ok(mut attempt) => {
                    attempt.log("Resuming interrupted install from the data sync stage");
                    attempt.notify(format!("Resuming installation of {}...", attempt.app_name));
                    let result = installer.finish_install(&mut attempt, &record).await;
                    if let Err(ref e) = result {
                        attempt.log(&format!("ERROR: {}", e));
                    }
                    result
                }
                Err(e) => Err(e),
            };
            installer.release(id);

            match outcome {
                Ok(()) => resumed += 1,
                Err(e) => tracing::error!(install_id = %id, "Failed to resume install: {}", e),
            }
        }

        Ok(resumed)
    }
}

fn interrupted_installs(installer: &Installer) -> Result<Vec<(InstallKind, InstallId)>> {
    let mut candidates = Vec::new();
    for kind in InstallKind::TRACKED {
        for (_, record) in installer.ledger.list(kind)? {
            if record.stage(Stage::SetupPy) == StageStatus::Running {
                candidates.push((kind, record.install_id));
            }
        }
    }
    Ok(candidates)
}

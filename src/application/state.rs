use std::sync::Arc;

use crate::services::catalog::{PackageCache, PackageRegistry};
use crate::services::host::HostRestarter;
use crate::services::installer::{Installer, InstallerSettings};
use crate::services::ledger::Ledger;
use crate::services::notification::NotificationHub;

/// Shared installer handle
pub type SharedInstaller = Arc<Installer>;

/// Application state containing all shared resources
#[derive(Clone)]
pub struct AppState {
    pub installer: SharedInstaller,
    pub hub: NotificationHub,
    pub cache: PackageCache,
}

impl AppState {
    pub fn new(
        settings: InstallerSettings,
        host: Arc<dyn HostRestarter>,
        registry: Arc<dyn PackageRegistry>,
        notification_capacity: usize,
    ) -> Self {
        let hub = NotificationHub::new(notification_capacity);
        let cache = PackageCache::new(registry);
        let installer = Arc::new(Installer::new(
            Arc::new(settings),
            hub.clone(),
            host,
            cache.clone(),
        ));

        Self {
            installer,
            hub,
            cache,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        self.installer.ledger()
    }

    pub fn settings(&self) -> &InstallerSettings {
        self.installer.settings()
    }
}

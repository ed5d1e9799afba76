pub mod catalog;
pub mod host;
pub mod installer;
pub mod ledger;
pub mod manifest;
pub mod markers;
pub mod notification;
pub mod process;
pub mod tasks;

pub use catalog::{PackageCache, PackageRegistry, PackageSummary, WorkspaceRegistry};
pub use host::{HostRestarter, RestartMethod, RestartRequest, RestartType, ServiceRestarter};
pub use installer::{Installer, InstallerSettings, RecoveryScanner, UpdateTarget};
pub use ledger::{InstallId, InstallKind, InstallTarget, InstallationRecord, Ledger, Stage, StageStatus};
pub use notification::{NotificationHub, NotificationMessage, NotificationPayload};
pub use process::{CommandLine, ProcessRunner};
pub use tasks::{TaskHandle, TaskRunner};

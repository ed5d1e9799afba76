//! Installed-package listing and its cache.
//!
//! Listing walks the app directories, which is slow enough on a busy host
//! that the result is memoized. Every workflow that changes what is
//! installed clears the cache when it finishes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::error::Result;
use crate::services::manifest::{InstallManifest, MANIFEST_FILE};

/// How an installed app got onto the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PackageSource {
    Conda,
    Github,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PackageSummary {
    pub name: String,
    pub version: Option<String>,
    pub source: PackageSource,
    #[schema(value_type = String)]
    pub path: PathBuf,
}

/// Source of the installed-package list
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    async fn list_packages(&self) -> Result<Vec<PackageSummary>>;
}

/// Lists apps that carry an install manifest in the managed directories
pub struct WorkspaceRegistry {
    apps_dir: PathBuf,
    git_dir: PathBuf,
}

impl WorkspaceRegistry {
    pub fn new(apps_dir: impl Into<PathBuf>, git_dir: impl Into<PathBuf>) -> Self {
        Self {
            apps_dir: apps_dir.into(),
            git_dir: git_dir.into(),
        }
    }

    fn scan(dir: &Path, source: PackageSource, packages: &mut Vec<PackageSummary>) -> Result<()> {
        if !dir.is_dir() {
            return Ok(());
        }

        for entry in std::fs::read_dir(dir)?.flatten() {
            let path = entry.path();
            if !path.join(MANIFEST_FILE).is_file() {
                continue;
            }
            let Some(dir_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            match InstallManifest::load(&path) {
                Ok(manifest) => packages.push(PackageSummary {
                    name: manifest.name.unwrap_or_else(|| dir_name.to_string()),
                    version: manifest.version,
                    source,
                    path,
                }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Failed to read install manifest: {}", e);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PackageRegistry for WorkspaceRegistry {
    async fn list_packages(&self) -> Result<Vec<PackageSummary>> {
        let mut packages = Vec::new();
        Self::scan(&self.apps_dir, PackageSource::Conda, &mut packages)?;
        Self::scan(&self.git_dir, PackageSource::Github, &mut packages)?;
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(packages)
    }
}

/// Memoized package list
#[derive(Clone)]
pub struct PackageCache {
    entries: Arc<RwLock<Option<Vec<PackageSummary>>>>,
    registry: Arc<dyn PackageRegistry>,
}

impl PackageCache {
    pub fn new(registry: Arc<dyn PackageRegistry>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(None)),
            registry,
        }
    }

    /// Cached list, loading it from the registry on a miss
    pub async fn get(&self) -> Result<Vec<PackageSummary>> {
        if let Some(ref cached) = *self.entries.read().await {
            return Ok(cached.clone());
        }

        let mut entries = self.entries.write().await;
        if let Some(ref cached) = *entries {
            return Ok(cached.clone());
        }
        let packages = self.registry.list_packages().await?;
        tracing::debug!("Cached {} installed packages", packages.len());
        *entries = Some(packages.clone());
        Ok(packages)
    }

    pub async fn clear(&self) {
        *self.entries.write().await = None;
        tracing::debug!("Installed package cache cleared");
    }

    pub async fn is_cached(&self) -> bool {
        self.entries.read().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_app(dir: &Path, name: &str, manifest: &str) {
        let app = dir.join(name);
        std::fs::create_dir_all(&app).unwrap();
        std::fs::write(app.join(MANIFEST_FILE), manifest).unwrap();
    }

    #[tokio::test]
    async fn test_registry_lists_apps_with_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let apps = dir.path().join("apps");
        let git = dir.path().join("git");
        write_app(&apps, "demo_app", "name: demo_app\nversion: '1.0'\n");
        write_app(&git, "my-repo", "name: repo_app\n");
        std::fs::create_dir_all(apps.join("no_manifest")).unwrap();

        let registry = WorkspaceRegistry::new(&apps, &git);
        let packages = registry.list_packages().await.unwrap();

        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "demo_app");
        assert_eq!(packages[0].version.as_deref(), Some("1.0"));
        assert_eq!(packages[0].source, PackageSource::Conda);
        assert_eq!(packages[1].name, "repo_app");
        assert_eq!(packages[1].source, PackageSource::Github);
    }

    #[tokio::test]
    async fn test_cache_memoizes_until_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let apps = dir.path().join("apps");
        write_app(&apps, "first", "");

        let cache = PackageCache::new(Arc::new(WorkspaceRegistry::new(&apps, dir.path().join("git"))));
        assert!(!cache.is_cached().await);
        assert_eq!(cache.get().await.unwrap().len(), 1);
        assert!(cache.is_cached().await);

        write_app(&apps, "second", "");
        assert_eq!(cache.get().await.unwrap().len(), 1);

        cache.clear().await;
        assert!(!cache.is_cached().await);
        assert_eq!(cache.get().await.unwrap().len(), 2);
    }
}

//! `install.yml`: the options an app declares about its own installation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const MANIFEST_FILE: &str = "install.yml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CondaRequirements {
    pub channels: Vec<String>,
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Requirements {
    /// Skip both dependency stages
    pub skip: bool,
    pub conda: CondaRequirements,
    pub pip: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub requirements: Requirements,
    /// Post-install scripts, relative to the workspace
    pub post: Vec<String>,
}

impl InstallManifest {
    /// Load `install.yml` from `workspace`; absent means nothing declared
    pub fn load(workspace: &Path) -> Result<Self> {
        let path = workspace.join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn conda_packages(&self) -> &[String] {
        if self.requirements.skip {
            &[]
        } else {
            &self.requirements.conda.packages
        }
    }

    pub fn pip_packages(&self) -> &[String] {
        if self.requirements.skip {
            &[]
        } else {
            &self.requirements.pip
        }
    }

    /// Absolute paths of the declared post-install scripts
    pub fn post_scripts(&self, workspace: &Path) -> Vec<PathBuf> {
        self.post
            .iter()
            .filter(|script| !script.trim().is_empty())
            .map(|script| workspace.join(script))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_manifest_declares_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = InstallManifest::load(dir.path()).unwrap();
        assert_eq!(manifest, InstallManifest::default());
    }

    #[test]
    fn test_parses_declared_options() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"
name: demo_app
requirements:
  conda:
    channels: [conda-forge]
    packages: [numpy, pandas]
  pip: [requests]
post:
  - scripts/setup_db.sh
"#,
        )
        .unwrap();

        let manifest = InstallManifest::load(dir.path()).unwrap();
        assert_eq!(manifest.name.as_deref(), Some("demo_app"));
        assert_eq!(manifest.conda_packages(), ["numpy", "pandas"]);
        assert_eq!(manifest.requirements.conda.channels, vec!["conda-forge"]);
        assert_eq!(manifest.pip_packages(), ["requests"]);
        assert_eq!(
            manifest.post_scripts(dir.path()),
            vec![dir.path().join("scripts/setup_db.sh")]
        );
    }

    #[test]
    fn test_skip_hides_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            "requirements:\n  skip: true\n  pip: [requests]\n",
        )
        .unwrap();

        let manifest = InstallManifest::load(dir.path()).unwrap();
        assert!(manifest.pip_packages().is_empty());
        assert!(manifest.conda_packages().is_empty());
    }
}

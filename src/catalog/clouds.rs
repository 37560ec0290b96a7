use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::CatalogError;

const CLOUDS_FILE_NAMES: &[&str] = &["clouds.yaml", "clouds.yml"];

/// Parsed `clouds.yaml`, as used by the OpenStack client tools.
#[derive(Debug, Deserialize)]
pub struct CloudsFile {
    #[serde(default)]
    clouds: HashMap<String, Cloud>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cloud {
    pub(crate) auth: CloudAuth,
    #[serde(default)]
    pub(crate) region_name: Option<String>,
    #[serde(default)]
    pub(crate) interface: Option<String>,
    #[serde(default)]
    pub(crate) identity_api_version: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudAuth {
    pub(crate) auth_url: String,
    pub(crate) username: String,
    pub(crate) password: String,
    #[serde(default, alias = "tenant_name")]
    pub(crate) project_name: Option<String>,
    #[serde(default)]
    pub(crate) project_domain_name: Option<String>,
    #[serde(default)]
    pub(crate) user_domain_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityVersion {
    V2,
    V3,
}

impl Cloud {
    /// Keystone v3 unless the cloud explicitly asks for v2.
    pub fn identity_version(&self) -> IdentityVersion {
        let version = match &self.identity_api_version {
            Some(serde_yaml::Value::String(s)) => s.clone(),
            Some(serde_yaml::Value::Number(n)) => n.to_string(),
            _ => return IdentityVersion::V3,
        };
        if version.starts_with('2') {
            IdentityVersion::V2
        } else {
            IdentityVersion::V3
        }
    }

    pub fn region(&self) -> Option<&str> {
        self.region_name.as_deref()
    }

    pub fn interface(&self) -> &str {
        self.interface.as_deref().unwrap_or("public")
    }
}

impl CloudsFile {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, CatalogError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read the clouds file at `explicit`, or the first one found in the
    /// standard OpenStack locations.
    pub fn load(explicit: Option<&Path>) -> Result<Self, CatalogError> {
        let path = match explicit {
            Some(path) => expand_home(path),
            None => {
                let candidates = candidate_paths();
                let found = candidates.iter().find(|p| p.is_file()).cloned();
                found.ok_or(CatalogError::CloudsFileNotFound(candidates))?
            }
        };

        let data = std::fs::read_to_string(&path).map_err(|source| CatalogError::CloudsIo {
            path: path.clone(),
            source,
        })?;
        Self::from_yaml_str(&data)
    }

    pub fn cloud(&self, name: &str) -> Result<Cloud, CatalogError> {
        self.clouds
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownCloud(name.to_string()))
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut dirs_to_search = vec![PathBuf::from(".")];
    if let Some(home) = dirs::home_dir() {
        dirs_to_search.push(home.join(".config").join("openstack"));
    }
    dirs_to_search.push(PathBuf::from("/etc/openstack"));

    dirs_to_search
        .iter()
        .flat_map(|dir| CLOUDS_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .collect()
}

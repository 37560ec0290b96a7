use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct Product {
    #[serde(default)]
    arch: Option<String>,

    #[serde(default)]
    release: Option<String>,

    #[serde(default, rename = "version")]
    distro_version: Option<String>,

    #[serde(default)]
    versions: HashMap<String, super::Version>,
}

impl Product {
    pub fn arch(&self) -> Option<&str> {
        self.arch.as_deref()
    }

    pub fn release(&self) -> Option<&str> {
        self.release.as_deref()
    }

    pub fn distro_version(&self) -> Option<&str> {
        self.distro_version.as_deref()
    }

    /// Version ids are build serials (`20180126`, `20180126.1`), so the
    /// lexicographically greatest one is the newest build.
    pub fn latest_version(&self) -> Option<(&str, &super::Version)> {
        self.versions
            .iter()
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(id, version)| (id.as_str(), version))
    }
}

use reqwest::{Client, Url};
use tracing::debug;

use super::Resolved;
use crate::config::{ConfigError, Repository};
use crate::error::ResolutionError;
use crate::image::{ChecksumKind, ImageChecksum};
use crate::simplestreams;

pub const LATEST_RELEASE: &str = "xenial";
const BIOS_FTYPE: &str = "disk1.img";
const UEFI_FTYPE: &str = "uefi1.img";

/// Map the configured release onto a Simplestreams codename.
pub fn alias(release: &str) -> &str {
    match release {
        "" | "latest" => LATEST_RELEASE,
        other => other,
    }
}

/// Ubuntu cloud images, located through the Canonical Simplestreams index.
#[derive(Debug, Clone)]
pub struct UbuntuSource {
    release: String,
    architecture: String,
    index_url: String,
    base_for_paths: Url,
}

impl UbuntuSource {
    pub fn new(release: &str, architecture: &str, repo: &Repository) -> Result<Self, ConfigError> {
        let base = repo
            .parameter("base_for_paths")
            .ok_or_else(|| ConfigError::Invalid("ubuntu repository needs a 'base_for_paths' parameter".into()))?;
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        };
        let base_for_paths = Url::parse(&base)
            .map_err(|e| ConfigError::Invalid(format!("ubuntu base_for_paths '{base}': {e}")))?;

        Ok(Self {
            release: alias(release).to_string(),
            architecture: architecture.to_string(),
            index_url: repo.url().to_string(),
            base_for_paths,
        })
    }

    pub fn release(&self) -> &str {
        &self.release
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    /// arm64 images only ship as UEFI disks.
    fn ftype(&self) -> &'static str {
        if self.architecture == "arm64" {
            UEFI_FTYPE
        } else {
            BIOS_FTYPE
        }
    }

    pub async fn resolve(&self, client: &Client) -> Result<Resolved, ResolutionError> {
        let index = simplestreams::fetch_index(client, &self.index_url).await?;
        let located = simplestreams::locate(&index, &self.release, &self.architecture, self.ftype())?;
        debug!(
            product = %located.product,
            version = %located.version,
            distro_version = located.distro_version.as_deref().unwrap_or("unknown"),
            "resolved ubuntu image"
        );

        let url = self
            .base_for_paths
            .join(&located.path)
            .map_err(|source| ResolutionError::InvalidUrl {
                url: located.path.clone(),
                source,
            })?;

        Ok(Resolved {
            url,
            checksum: located
                .sha256
                .map(|value| ImageChecksum::new(ChecksumKind::Sha256, value)),
        })
    }
}

use std::sync::LazyLock;

use regex::Regex;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, warn};

use super::Resolved;
use crate::config::Repository;
use crate::error::ResolutionError;
use crate::image::{ChecksumKind, ImageChecksum};

pub const STABLE_RELEASE: &str = "current-9";
pub const TESTING_RELEASE: &str = "testing";
const CHECKSUM_FILENAME: &str = "SHA512SUMS";

static CHECKSUM_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<sha>[A-Fa-f0-9]{128})\s+\*?(?P<file>\S+)$").expect("checksum line pattern is valid")
});

/// Map codenames onto the directory names published under cdimage/openstack.
/// Anything unrecognised falls back to the latest stable release.
pub fn alias(release: &str) -> &'static str {
    match release {
        "" | "latest" | "stretch" | STABLE_RELEASE => STABLE_RELEASE,
        "buster" | TESTING_RELEASE => TESTING_RELEASE,
        other => {
            warn!(release = other, fallback = STABLE_RELEASE, "unknown debian release");
            STABLE_RELEASE
        }
    }
}

/// Version tag embedded in the image file name.
fn release_tag(release: &str) -> &'static str {
    match release {
        TESTING_RELEASE => "testing",
        _ => "9",
    }
}

/// Find the checksum of `filename` in a SHA512SUMS body.
fn find_checksum(sums: &str, filename: &str) -> Option<ImageChecksum> {
    sums.lines().find_map(|line| {
        let caps = CHECKSUM_LINE.captures(line.trim())?;
        if caps.name("file")?.as_str() != filename {
            return None;
        }
        Some(ImageChecksum::new(ChecksumKind::Sha512, caps.name("sha")?.as_str()))
    })
}

/// Debian OpenStack images from cdimage.debian.org.
#[derive(Debug, Clone)]
pub struct DebianSource {
    release: String,
    architecture: String,
    base_url: String,
}

impl DebianSource {
    pub fn new(release: &str, architecture: &str, repo: &Repository) -> Self {
        Self {
            release: alias(release).to_string(),
            architecture: architecture.to_string(),
            base_url: repo.url().trim_end_matches('/').to_string(),
        }
    }

    pub fn release(&self) -> &str {
        &self.release
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    fn filename(&self) -> String {
        format!(
            "debian-{}-openstack-{}.qcow2",
            release_tag(&self.release),
            self.architecture
        )
    }

    /// The published checksum list is optional: without it the download goes
    /// unverified. Anything other than a plain 404 is worth a warning.
    async fn expected_checksum(&self, client: &Client, filename: &str) -> Option<ImageChecksum> {
        let sums_url = format!("{}/{}/{CHECKSUM_FILENAME}", self.base_url, self.release);
        let resp = match client.get(&sums_url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(%sums_url, error = %err, "cannot fetch checksum list, image will not be verified");
                return None;
            }
        };

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!(%sums_url, "no checksum list published");
            return None;
        }
        if !status.is_success() {
            warn!(%sums_url, %status, "checksum list unavailable, image will not be verified");
            return None;
        }

        let sums = match resp.text().await {
            Ok(sums) => sums,
            Err(err) => {
                warn!(%sums_url, error = %err, "cannot read checksum list, image will not be verified");
                return None;
            }
        };

        let checksum = find_checksum(&sums, filename);
        if checksum.is_none() {
            debug!(%sums_url, %filename, "no checksum listed for image");
        }
        checksum
    }

    pub async fn resolve(&self, client: &Client) -> Result<Resolved, ResolutionError> {
        let filename = self.filename();
        let raw = format!("{}/{}/{filename}", self.base_url, self.release);
        let url = Url::parse(&raw).map_err(|source| ResolutionError::InvalidUrl { url: raw.clone(), source })?;

        Ok(Resolved {
            url,
            checksum: self.expected_checksum(client, &filename).await,
        })
    }
}

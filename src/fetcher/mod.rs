mod debian;
mod set;
mod ubuntu;

pub use debian::DebianSource;
pub use set::FetcherSet;
pub use ubuntu::UbuntuSource;

use std::path::Path;

use reqwest::{Client, Url};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::config::{Config, ConfigError, PipelineSettings};
use crate::error::{FetchError, PipelineError, ResolutionError};
use crate::image::{self, ChecksumKind, Digester, ImageChecksum, ImageDescriptor};

/// Concrete download location for one image.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub url: Url,
    /// Upstream checksum, when the distribution publishes one.
    pub checksum: Option<ImageChecksum>,
}

/// Distribution family of a fetcher. Adding a distribution means adding a
/// variant here; the orchestrator never looks inside.
#[derive(Debug, Clone)]
pub enum Source {
    Ubuntu(UbuntuSource),
    Debian(DebianSource),
}

impl Source {
    pub fn new(distribution: &str, release: &str, architecture: &str, config: &Config) -> Result<Self, ConfigError> {
        match distribution {
            "ubuntu" => Ok(Source::Ubuntu(UbuntuSource::new(
                release,
                architecture,
                &config.repository("ubuntu")?,
            )?)),
            "debian" => Ok(Source::Debian(DebianSource::new(
                release,
                architecture,
                &config.repository("debian")?,
            ))),
            other => Err(ConfigError::UnknownDistribution(other.to_string())),
        }
    }

    pub fn distribution(&self) -> &'static str {
        match self {
            Source::Ubuntu(_) => "ubuntu",
            Source::Debian(_) => "debian",
        }
    }

    pub fn release(&self) -> &str {
        match self {
            Source::Ubuntu(source) => source.release(),
            Source::Debian(source) => source.release(),
        }
    }

    pub fn architecture(&self) -> &str {
        match self {
            Source::Ubuntu(source) => source.architecture(),
            Source::Debian(source) => source.architecture(),
        }
    }

    async fn resolve(&self, client: &Client) -> Result<Resolved, ResolutionError> {
        match self {
            Source::Ubuntu(source) => source.resolve(client).await,
            Source::Debian(source) => source.resolve(client).await,
        }
    }
}

/// HTTP client shared by every fetcher.
pub fn http_client(settings: &PipelineSettings) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder().user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = settings.http_timeout() {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

/// Downloads one (distribution, release, architecture) image into storage
/// that no other fetcher touches.
#[derive(Debug)]
pub struct Fetcher {
    source: Source,
    storage: TempDir,
    client: Client,
}

impl Fetcher {
    pub fn new(source: Source, root: &Path, client: Client) -> Result<Self, ConfigError> {
        let storage = tempfile::Builder::new()
            .prefix(source.distribution())
            .tempdir_in(root)
            .map_err(ConfigError::Storage)?;

        Ok(Self {
            source,
            storage,
            client,
        })
    }

    /// Stable name used in logs and as the catalog image name.
    pub fn identity(&self) -> String {
        image::catalog_name(
            self.source.distribution(),
            self.source.release(),
            self.source.architecture(),
        )
    }

    pub fn storage(&self) -> &Path {
        self.storage.path()
    }

    pub async fn resolve(&self) -> Result<Resolved, ResolutionError> {
        self.source.resolve(&self.client).await
    }

    /// Resolve the current image and download it.
    pub async fn fetch(&self) -> Result<ImageDescriptor, PipelineError> {
        let resolved = self.resolve().await?;
        Ok(self.download(&resolved).await?)
    }

    /// Stream `resolved.url` into a fresh file in this fetcher's storage,
    /// hashing the bytes on the way through.
    pub async fn download(&self, resolved: &Resolved) -> Result<ImageDescriptor, FetchError> {
        let url = resolved.url.as_str();
        info!(fetcher = %self.identity(), %url, "downloading image");

        let http_err = |source: reqwest::Error| FetchError::Http {
            url: url.to_string(),
            source,
        };

        let mut res = self.client.get(resolved.url.clone()).send().await.map_err(http_err)?;
        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let (file, path) = tempfile::Builder::new()
            .prefix("image")
            .tempfile_in(self.storage())
            .and_then(|file| file.keep().map_err(|e| e.error))
            .map_err(|source| FetchError::Io {
                path: self.storage().to_path_buf(),
                source,
            })?;
        let mut file = tokio::fs::File::from_std(file);

        let kind = resolved
            .checksum
            .as_ref()
            .map_or(ChecksumKind::Sha256, ImageChecksum::kind);
        let mut digester = Digester::new(kind);
        let mut size: u64 = 0;

        while let Some(chunk) = res.chunk().await.map_err(http_err)? {
            digester.update(&chunk);
            file.write_all(&chunk).await.map_err(|source| FetchError::Io {
                path: path.clone(),
                source,
            })?;
            size += chunk.len() as u64;
        }
        file.flush().await.map_err(|source| FetchError::Io {
            path: path.clone(),
            source,
        })?;

        let digest = digester.finish();
        if let Some(expected) = &resolved.checksum
            && expected != &digest
        {
            return Err(FetchError::ChecksumMismatch {
                url: url.to_string(),
                expected: expected.clone(),
                actual: digest,
            });
        }

        info!(fetcher = %self.identity(), size, %digest, "image downloaded");
        Ok(ImageDescriptor::new(
            self.source.distribution(),
            self.source.release(),
            self.source.architecture(),
            path,
            size,
            digest,
        ))
    }

    /// Remove everything this fetcher downloaded. Safe to call repeatedly.
    pub fn cleanup(&self) -> std::io::Result<()> {
        info!(fetcher = %self.identity(), path = %self.storage().display(), "cleaning up image directory");
        match std::fs::remove_dir_all(self.storage()) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Repository;
    use httpmock::prelude::*;

    pub(crate) fn debian_fetcher(server: &MockServer, root: &Path, release: &str, arch: &str) -> Fetcher {
        let repo = Repository::new("debian", server.url("/openstack"));
        let source = Source::Debian(DebianSource::new(release, arch, &repo));
        Fetcher::new(source, root, Client::new()).expect("fetcher")
    }

    #[test]
    fn unknown_distribution_fails_fast() {
        let config = Config::from_yaml_str("sources: {}").expect("config");
        let err = Source::new("gentoo", "latest", "amd64", &config).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDistribution(name) if name == "gentoo"));
    }

    #[test]
    fn debian_identity_uses_aliased_release() {
        let server = MockServer::start();
        let root = tempfile::tempdir().expect("tempdir");
        let fetcher = debian_fetcher(&server, root.path(), "stretch", "amd64");
        assert_eq!(fetcher.identity(), "debian-current-9-amd64");
    }

    #[test]
    fn fetchers_get_exclusive_storage() {
        let server = MockServer::start();
        let root = tempfile::tempdir().expect("tempdir");
        let a = debian_fetcher(&server, root.path(), "stretch", "amd64");
        let b = debian_fetcher(&server, root.path(), "stretch", "amd64");
        assert_ne!(a.storage(), b.storage());
        assert!(a.storage().starts_with(root.path()));
    }

    #[tokio::test]
    async fn fetch_streams_body_and_digests_it() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/openstack/current-9/debian-9-openstack-amd64.qcow2");
            then.status(200).body("hello world");
        });
        let root = tempfile::tempdir().expect("tempdir");
        let fetcher = debian_fetcher(&server, root.path(), "stretch", "amd64");

        let image = fetcher.fetch().await.expect("image");

        assert_eq!(image.catalog_name(), "debian-current-9-amd64");
        assert_eq!(image.size(), 11);
        assert!(image.path().starts_with(fetcher.storage()));
        assert_eq!(std::fs::read(image.path()).expect("read back"), b"hello world");
        assert_eq!(
            image.digest().value(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn not_found_is_fetch_error() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/openstack/current-9/debian-9-openstack-amd64.qcow2");
            then.status(404);
        });
        let root = tempfile::tempdir().expect("tempdir");
        let fetcher = debian_fetcher(&server, root.path(), "stretch", "amd64");

        let err = fetcher.fetch().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Fetch(FetchError::Status { status, .. }) if status.as_u16() == 404
        ));
        assert_eq!(std::fs::read_dir(fetcher.storage()).expect("storage").count(), 0);
    }

    #[tokio::test]
    async fn checksum_mismatch_is_rejected() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/openstack/current-9/SHA512SUMS");
            then.status(200)
                .body(format!("{}  debian-9-openstack-amd64.qcow2\n", "0".repeat(128)));
        });
        server.mock(|when, then| {
            when.method(GET).path("/openstack/current-9/debian-9-openstack-amd64.qcow2");
            then.status(200).body("tampered");
        });
        let root = tempfile::tempdir().expect("tempdir");
        let fetcher = debian_fetcher(&server, root.path(), "stretch", "amd64");

        let err = fetcher.fetch().await.unwrap_err();
        assert!(matches!(err, PipelineError::Fetch(FetchError::ChecksumMismatch { .. })));
    }

    #[test]
    fn cleanup_is_idempotent() {
        let server = MockServer::start();
        let root = tempfile::tempdir().expect("tempdir");
        let fetcher = debian_fetcher(&server, root.path(), "testing", "amd64");
        std::fs::write(fetcher.storage().join("image-leftover"), b"x").expect("write");

        fetcher.cleanup().expect("first cleanup");
        assert!(!fetcher.storage().exists());
        fetcher.cleanup().expect("second cleanup");
    }
}

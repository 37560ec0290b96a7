use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{info, warn};

use super::{Fetcher, Source, http_client};
use crate::config::{Config, ConfigError};

/// Every configured fetcher, plus the top-level directory their storage lives in.
#[derive(Debug)]
pub struct FetcherSet {
    root: TempDir,
    fetchers: Vec<Arc<Fetcher>>,
}

impl FetcherSet {
    /// Build one fetcher per configured (distribution, release, architecture).
    /// Releases that alias onto the same identity are only tracked once.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let client = http_client(config.pipeline())?;
        let mut builder = tempfile::Builder::new();
        builder.prefix("images");
        let root = match config.pipeline().temp_dir() {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
        .map_err(ConfigError::Storage)?;

        let mut seen = HashSet::new();
        let mut fetchers = Vec::new();

        for (distro, source) in config.sources().distros() {
            for (release, entry) in source.releases() {
                for architecture in entry.architectures() {
                    let source = Source::new(distro, release, architecture, config)?;
                    let fetcher = Fetcher::new(source, root.path(), client.clone())?;
                    if !seen.insert(fetcher.identity()) {
                        warn!(fetcher = %fetcher.identity(), release = %release, "duplicate image, skipping");
                        continue;
                    }
                    fetchers.push(Arc::new(fetcher));
                }
            }
        }

        info!(count = fetchers.len(), root = %root.path().display(), "fetchers ready");
        Ok(Self { root, fetchers })
    }

    pub fn fetchers(&self) -> &[Arc<Fetcher>] {
        &self.fetchers
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }

    /// Release every fetcher's storage and the top-level directory.
    pub fn cleanup(&self) {
        for fetcher in &self.fetchers {
            if let Err(err) = fetcher.cleanup() {
                warn!(fetcher = %fetcher.identity(), error = %err, "cannot remove image directory");
            }
        }

        info!(path = %self.root().display(), "cleaning up base image directory");
        if let Err(err) = std::fs::remove_dir_all(self.root())
            && err.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.root().display(), error = %err, "cannot remove base image directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(scratch: &Path, distros: &str) -> Config {
        let yaml = format!(
            "sources:\n  distros:\n{distros}\npipeline:\n  temp_dir: {}\n",
            scratch.display()
        );
        Config::from_yaml_str(&yaml).expect("config")
    }

    #[test]
    fn one_fetcher_per_release_and_architecture() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let set = FetcherSet::from_config(&config(
            scratch.path(),
            "    ubuntu:\n      releases:\n        xenial:\n          archs: [amd64, arm64]\n    debian:\n      releases:\n        stretch:\n          archs: [amd64]",
        ))
        .expect("fetchers");

        let mut names: Vec<String> = set.fetchers().iter().map(|f| f.identity()).collect();
        names.sort();
        assert_eq!(
            names,
            ["debian-current-9-amd64", "ubuntu-xenial-amd64", "ubuntu-xenial-arm64"]
        );
        assert!(set.root().starts_with(scratch.path()));
        assert!(set.fetchers().iter().all(|f| f.storage().starts_with(set.root())));
    }

    #[test]
    fn aliased_releases_are_tracked_once() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let set = FetcherSet::from_config(&config(
            scratch.path(),
            "    debian:\n      releases:\n        stretch:\n          archs: [amd64]\n        latest:\n          archs: [amd64]",
        ))
        .expect("fetchers");

        assert_eq!(set.len(), 1);
    }

    #[test]
    fn unknown_distribution_is_a_configuration_error() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let err = FetcherSet::from_config(&config(
            scratch.path(),
            "    gentoo:\n      releases:\n        latest:\n          archs: [amd64]",
        ))
        .unwrap_err();

        assert!(matches!(err, ConfigError::UnknownDistribution(_)));
    }

    #[test]
    fn cleanup_removes_the_whole_tree() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let set = FetcherSet::from_config(&config(
            scratch.path(),
            "    ubuntu:\n      releases:\n        xenial:\n          archs: [amd64]",
        ))
        .expect("fetchers");
        let storage = set.fetchers()[0].storage().to_path_buf();
        std::fs::write(storage.join("image123"), b"data").expect("write");

        set.cleanup();

        assert!(!storage.exists());
        assert!(!set.root().exists());
        set.cleanup();
    }
}

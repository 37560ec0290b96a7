mod models;

use std::{fs, path::Path};

pub use models::{Config, PipelineSettings, Repository};

pub const UBUNTU_STREAMS_URL: &str =
    "https://cloud-images.ubuntu.com/releases/streams/v1/com.ubuntu.cloud:released:download.json";
pub const UBUNTU_BASE_FOR_PATHS: &str = "https://cloud-images.ubuntu.com/releases/";
pub const DEBIAN_OPENSTACK_URL: &str = "https://cdimage.debian.org/cdimage/openstack";

/// Built-in upstream endpoints, overridable through `sources.repositories`.
fn default_repositories() -> Vec<Repository> {
    vec![
        Repository::new("ubuntu", UBUNTU_STREAMS_URL).with_parameter("base_for_paths", UBUNTU_BASE_FOR_PATHS),
        Repository::new("debian", DEBIAN_OPENSTACK_URL),
    ]
}

impl Config {
    /// Load and validate the configuration from a YAML (or JSON) file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&data)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let pipeline = self.pipeline();
        if pipeline.interval_secs == 0 {
            return Err(ConfigError::Invalid("pipeline.interval_secs must be at least 1".into()));
        }
        if pipeline.fetch_workers == 0 || pipeline.upload_workers == 0 {
            return Err(ConfigError::Invalid("pipeline worker counts must be at least 1".into()));
        }
        if pipeline.error_buffer == 0 {
            return Err(ConfigError::Invalid("pipeline.error_buffer must be at least 1".into()));
        }

        for (distro, source) in self.sources().distros() {
            for (release, entry) in source.releases() {
                if entry.architectures().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "{distro} release '{release}' lists no architectures"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Endpoint for a distribution family: a configured override wins over the
    /// built-in default.
    pub fn repository(&self, name: &str) -> Result<Repository, ConfigError> {
        self.sources
            .repositories
            .iter()
            .find(|r| r.name() == name)
            .cloned()
            .or_else(|| default_repositories().into_iter().find(|r| r.name() == name))
            .ok_or_else(|| ConfigError::MissingRepository(name.to_string()))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("no handler for distribution: {0}")]
    UnknownDistribution(String),
    #[error("repository '{0}' is not configured")]
    MissingRepository(String),
    #[error("cannot prepare storage: {0}")]
    Storage(#[source] std::io::Error),
    #[error("cannot build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
sources:
  distros:
    ubuntu:
      releases:
        xenial:
          archs: [amd64, arm64]
    debian:
      releases:
        stretch:
          archs: [amd64]
      glance:
        os_distro: debian
  repositories:
    - name: debian
      url: http://mirror.local/openstack
catalog:
  cloud: uk.linaro.cloud
  visibility: private
pipeline:
  interval_secs: 60
  upload_workers: 1
"#;

    #[test]
    fn parses_sources_and_settings() {
        let config = Config::from_yaml_str(SAMPLE).expect("sample config parses");

        let ubuntu = &config.sources().distros()["ubuntu"];
        assert_eq!(ubuntu.releases()["xenial"].architectures(), ["amd64", "arm64"]);

        let debian = &config.sources().distros()["debian"];
        assert_eq!(debian.glance_options()["os_distro"], "debian");

        assert_eq!(config.catalog().cloud(), Some("uk.linaro.cloud"));
        assert_eq!(config.catalog().visibility(), "private");
        assert_eq!(config.catalog().disk_format(), "qcow2");
        assert_eq!(config.catalog().container_format(), "bare");

        assert_eq!(config.pipeline().interval().as_secs(), 60);
        assert_eq!(config.pipeline().fetch_workers(), 4);
        assert_eq!(config.pipeline().upload_workers(), 1);
    }

    #[test]
    fn repository_override_wins_over_default() {
        let config = Config::from_yaml_str(SAMPLE).expect("sample config parses");

        let debian = config.repository("debian").expect("debian repository");
        assert_eq!(debian.url(), "http://mirror.local/openstack");

        let ubuntu = config.repository("ubuntu").expect("ubuntu repository");
        assert_eq!(ubuntu.url(), UBUNTU_STREAMS_URL);
        assert_eq!(ubuntu.parameter("base_for_paths"), Some(UBUNTU_BASE_FOR_PATHS));

        assert!(matches!(
            config.repository("gentoo"),
            Err(ConfigError::MissingRepository(name)) if name == "gentoo"
        ));
    }

    #[test]
    fn rejects_zero_workers() {
        let yaml = "sources: {}\npipeline:\n  fetch_workers: 0\n";
        assert!(matches!(Config::from_yaml_str(yaml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_release_without_architectures() {
        let yaml = "sources:\n  distros:\n    ubuntu:\n      releases:\n        xenial: {}\n";
        assert!(matches!(Config::from_yaml_str(yaml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Config::from_file("/definitely/not/here.yml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

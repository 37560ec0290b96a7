use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

/// Root of the YAML configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub(crate) sources: ImageSources,
    #[serde(default)]
    pub(crate) catalog: CatalogSettings,
    #[serde(default)]
    pub(crate) pipeline: PipelineSettings,
}

impl Config {
    pub fn sources(&self) -> &ImageSources {
        &self.sources
    }

    pub fn catalog(&self) -> &CatalogSettings {
        &self.catalog
    }

    pub fn pipeline(&self) -> &PipelineSettings {
        &self.pipeline
    }
}

/// Which distributions/releases/architectures to track, and where to find them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageSources {
    #[serde(default)]
    pub(crate) distros: BTreeMap<String, DistroSource>,
    #[serde(default)]
    pub(crate) repositories: Vec<Repository>,
}

impl ImageSources {
    pub fn distros(&self) -> &BTreeMap<String, DistroSource> {
        &self.distros
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DistroSource {
    #[serde(default)]
    pub(crate) releases: BTreeMap<String, Release>,
    /// Extra image properties attached to every upload of this distribution.
    #[serde(default, rename = "glance")]
    pub(crate) glance_options: BTreeMap<String, String>,
}

impl DistroSource {
    pub fn releases(&self) -> &BTreeMap<String, Release> {
        &self.releases
    }

    pub fn glance_options(&self) -> &BTreeMap<String, String> {
        &self.glance_options
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Release {
    #[serde(default, rename = "archs")]
    pub(crate) architectures: Vec<String>,
}

impl Release {
    pub fn architectures(&self) -> &[String] {
        &self.architectures
    }
}

/// Upstream endpoint for one distribution family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub(crate) name: String,
    pub(crate) url: String,
    #[serde(default, rename = "parameters")]
    pub(crate) other_parameters: Option<HashMap<String, String>>,
}

impl Repository {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            other_parameters: None,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.other_parameters
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.other_parameters.as_ref()?.get(key).map(String::as_str)
    }
}

/// Where images are published and with which fixed metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSettings {
    #[serde(default)]
    pub(crate) cloud: Option<String>,
    #[serde(default)]
    pub(crate) clouds_file: Option<PathBuf>,
    #[serde(default = "default_disk_format")]
    pub(crate) disk_format: String,
    #[serde(default = "default_container_format")]
    pub(crate) container_format: String,
    #[serde(default = "default_visibility")]
    pub(crate) visibility: String,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            cloud: None,
            clouds_file: None,
            disk_format: default_disk_format(),
            container_format: default_container_format(),
            visibility: default_visibility(),
        }
    }
}

impl CatalogSettings {
    pub fn cloud(&self) -> Option<&str> {
        self.cloud.as_deref()
    }

    pub fn clouds_file(&self) -> Option<&PathBuf> {
        self.clouds_file.as_ref()
    }

    pub fn disk_format(&self) -> &str {
        &self.disk_format
    }

    pub fn container_format(&self) -> &str {
        &self.container_format
    }

    pub fn visibility(&self) -> &str {
        &self.visibility
    }
}

fn default_disk_format() -> String {
    "qcow2".to_string()
}

fn default_container_format() -> String {
    "bare".to_string()
}

fn default_visibility() -> String {
    "public".to_string()
}

/// Scheduling and resource limits for the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_interval_secs")]
    pub(crate) interval_secs: u64,
    #[serde(default = "default_fetch_workers")]
    pub(crate) fetch_workers: usize,
    #[serde(default = "default_upload_workers")]
    pub(crate) upload_workers: usize,
    #[serde(default = "default_error_buffer")]
    pub(crate) error_buffer: usize,
    #[serde(default)]
    pub(crate) temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub(crate) http_timeout_secs: Option<u64>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            fetch_workers: default_fetch_workers(),
            upload_workers: default_upload_workers(),
            error_buffer: default_error_buffer(),
            temp_dir: None,
            http_timeout_secs: None,
        }
    }
}

impl PipelineSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn fetch_workers(&self) -> usize {
        self.fetch_workers
    }

    pub fn upload_workers(&self) -> usize {
        self.upload_workers
    }

    pub fn error_buffer(&self) -> usize {
        self.error_buffer
    }

    pub fn temp_dir(&self) -> Option<&PathBuf> {
        self.temp_dir.as_ref()
    }

    pub fn http_timeout(&self) -> Option<Duration> {
        self.http_timeout_secs.map(Duration::from_secs)
    }
}

fn default_interval_secs() -> u64 {
    30
}

fn default_fetch_workers() -> usize {
    4
}

fn default_upload_workers() -> usize {
    2
}

fn default_error_buffer() -> usize {
    64
}

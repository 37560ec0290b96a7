//! Remote image catalog: the trait the pipeline talks to, and its Glance
//! implementation.

mod clouds;
mod glance;
mod identity;

pub use clouds::{Cloud, CloudsFile, IdentityVersion};
pub use glance::GlanceClient;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

const ACTIVE: &str = "active";

/// An image record as returned by the catalog.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CatalogImage {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

impl CatalogImage {
    #[cfg(test)]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            status: Some(ACTIVE.into()),
            created_at: None,
            updated_at: None,
        }
    }

    #[cfg(test)]
    pub fn with_status(mut self, status: &str) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Whether the record carries uploaded data. Records left `queued` or
    /// `killed` by an interrupted upload do not count.
    pub fn is_active(&self) -> bool {
        self.status() == Some(ACTIVE)
    }

    /// Last modification time reported by the catalog, falling back to the
    /// creation time.
    pub fn timestamp(&self) -> Option<&str> {
        self.updated_at.as_deref().or(self.created_at.as_deref())
    }
}

/// Metadata submitted alongside a new image.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CreateImage {
    pub name: String,
    pub disk_format: String,
    pub container_format: String,
    pub visibility: String,
    #[serde(flatten)]
    pub properties: BTreeMap<String, String>,
}

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("cannot decode {operation} response: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("no clouds.yaml found (looked in {0:?})")]
    CloudsFileNotFound(Vec<PathBuf>),
    #[error("cannot read {path}: {source}")]
    CloudsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse clouds file: {0}")]
    CloudsYaml(#[from] serde_yaml::Error),
    #[error("cloud '{0}' is not defined in clouds.yaml")]
    UnknownCloud(String),
}

/// Operations the pipeline needs from the image repository.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn list_images(&self) -> Result<Vec<CatalogImage>, CatalogError>;

    /// Look up an image by exact name.
    async fn find_image(&self, name: &str) -> Result<Option<CatalogImage>, CatalogError> {
        Ok(self.list_images().await?.into_iter().find(|image| image.name() == name))
    }

    /// Register `request` and upload `file` as its payload.
    async fn create_image(&self, request: &CreateImage, file: tokio::fs::File) -> Result<CatalogImage, CatalogError>;
}

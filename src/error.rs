//! Error taxonomy for the fetch/upload pipeline and the shared error sink.
//!
//! Every recoverable failure is wrapped in a [`PipelineError`], tagged with the
//! identity of the stage that produced it, and pushed into the [`ErrorSink`].
//! A single [`ErrorLog`] consumer drains the sink into the log.

use reqwest::StatusCode;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::catalog::CatalogError;
use crate::image::ImageChecksum;

#[derive(thiserror::Error, Debug)]
pub enum ResolutionError {
    #[error("metadata request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: StatusCode },
    #[error("cannot parse metadata from {url}: {source}")]
    Metadata {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no product for release={release} arch={arch}")]
    NoProduct { release: String, arch: String },
    #[error("product {product} has no versions")]
    NoVersion { product: String },
    #[error("product {product} version {version} has no {ftype} item")]
    NoItem {
        product: String,
        version: String,
        ftype: String,
    },
    #[error("invalid image URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("download of {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: StatusCode },
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: ImageChecksum,
        actual: ImageChecksum,
    },
    #[error("upload side is gone, dropping image")]
    HandoffClosed,
}

#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Any recoverable failure raised while the pipeline is running.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("cannot get image url: {0}")]
    Resolution(#[from] ResolutionError),
    #[error("cannot fetch image: {0}")]
    Fetch(#[from] FetchError),
    #[error("cannot query catalog: {0}")]
    CatalogQuery(#[source] CatalogError),
    #[error("cannot upload image: {0}")]
    Upload(#[from] UploadError),
}

/// One failure, tagged with the fetcher or image it concerns.
#[derive(Debug)]
pub struct ErrorReport {
    pub origin: String,
    pub error: PipelineError,
}

/// Producer side of the shared error channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    tx: mpsc::Sender<ErrorReport>,
}

impl ErrorSink {
    /// Create the sink and its single consumer.
    pub fn channel(buffer: usize) -> (ErrorSink, ErrorLog) {
        let (tx, rx) = mpsc::channel(buffer);
        (ErrorSink { tx }, ErrorLog { rx })
    }

    /// Queue a report without ever waiting on the consumer. When the buffer is
    /// full (or the consumer is gone) the report is logged in place.
    pub fn report(&self, origin: impl Into<String>, error: impl Into<PipelineError>) {
        let report = ErrorReport {
            origin: origin.into(),
            error: error.into(),
        };
        if let Err(err) = self.tx.try_send(report) {
            let report = match err {
                mpsc::error::TrySendError::Full(report) | mpsc::error::TrySendError::Closed(report) => report,
            };
            warn!(origin = %report.origin, error = %report.error, "error sink unavailable, logging inline");
        }
    }
}

/// Consumer side of the error channel.
#[derive(Debug)]
pub struct ErrorLog {
    rx: mpsc::Receiver<ErrorReport>,
}

impl ErrorLog {
    /// Log every report until all producers are dropped.
    pub async fn consume(mut self) {
        while let Some(report) = self.rx.recv().await {
            error!(origin = %report.origin, error = %report.error, "error handling image fetch/upload");
        }
    }

    #[cfg(test)]
    pub async fn recv(&mut self) -> Option<ErrorReport> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<ErrorReport> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_reach_the_consumer() {
        let (sink, mut log) = ErrorSink::channel(4);
        sink.report("ubuntu-xenial-amd64", FetchError::HandoffClosed);

        let report = log.recv().await.expect("report queued");
        assert_eq!(report.origin, "ubuntu-xenial-amd64");
        assert!(matches!(report.error, PipelineError::Fetch(FetchError::HandoffClosed)));
    }

    #[tokio::test]
    async fn full_buffer_never_blocks_the_reporter() {
        let (sink, mut log) = ErrorSink::channel(1);
        sink.report("first", FetchError::HandoffClosed);
        sink.report("second", FetchError::HandoffClosed);

        assert_eq!(log.try_recv().map(|r| r.origin), Some("first".to_string()));
        assert!(log.try_recv().is_none());
    }

    #[tokio::test]
    async fn consumer_finishes_once_producers_are_gone() {
        let (sink, log) = ErrorSink::channel(4);
        sink.report("debian-testing-amd64", FetchError::HandoffClosed);
        drop(sink);
        log.consume().await;
    }
}

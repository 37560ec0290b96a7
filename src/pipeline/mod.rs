//! The fetch → dedup → handoff → upload pipeline.
//!
//! Channels are created here, once per run, and handed to each stage:
//! the handoff channel (capacity 1) from fetch tasks to the upload
//! dispatcher, and the error sink shared by every stage.

mod dedup;
mod orchestrator;
mod shutdown;
mod upload;

pub use dedup::DedupFilter;
pub use orchestrator::FetchOrchestrator;
pub use shutdown::{Exit, ShutdownHandler, termination_signal};
pub use upload::{PublicationOptions, UploadDispatcher};

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::catalog::CatalogClient;
use crate::config::Config;
use crate::error::ErrorSink;
use crate::fetcher::FetcherSet;

const HANDOFF_CAPACITY: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Batch on the configured interval until signalled.
    Daemon,
    /// One batch, drain the uploads, stop.
    Once,
}

/// Wire up every stage and run until the work ends or `signal` fires.
/// Fetcher storage is always removed before this returns.
pub async fn run<S>(
    config: &Config,
    catalog: Arc<dyn CatalogClient>,
    fetchers: Arc<FetcherSet>,
    mode: RunMode,
    signal: S,
) -> Exit
where
    S: Future<Output = ()>,
{
    let pipeline = config.pipeline();
    let (errors, error_log) = ErrorSink::channel(pipeline.error_buffer());
    let error_log = tokio::spawn(error_log.consume());

    let (handoff, incoming) = mpsc::channel(HANDOFF_CAPACITY);
    let dispatcher = UploadDispatcher::new(
        incoming,
        Arc::clone(&catalog),
        errors.clone(),
        PublicationOptions::from_config(config),
        pipeline.upload_workers(),
    );
    let uploads = tokio::spawn(dispatcher.run());

    let filter = DedupFilter::new(catalog, errors.clone());
    let orchestrator = FetchOrchestrator::new(
        Arc::clone(&fetchers),
        handoff,
        errors,
        pipeline.interval(),
        pipeline.fetch_workers(),
    );

    info!(
        fetchers = fetchers.len(),
        interval_secs = pipeline.interval().as_secs(),
        ?mode,
        "pipeline starting"
    );

    let work = async move {
        match mode {
            RunMode::Daemon => orchestrator.run(&filter).await,
            RunMode::Once => {
                orchestrator.run_cycle(&filter).await;
                // Dropping the stages closes the handoff and the error sink.
                drop(orchestrator);
                drop(filter);
                if let Err(err) = uploads.await {
                    warn!(error = %err, "upload dispatcher panicked");
                }
                if let Err(err) = error_log.await {
                    warn!(error = %err, "error log consumer panicked");
                }
            }
        }
    };

    ShutdownHandler::new(fetchers).guard(work, signal).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fake::InMemoryCatalog;
    use crate::pipeline::upload::DIGEST_PROPERTY;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn single_run_publishes_new_images_and_cleans_up() {
        let server = MockServer::start_async().await;
        let stable = server.mock(|when, then| {
            when.method(GET).path("/openstack/current-9/debian-9-openstack-amd64.qcow2");
            then.status(200).body("stable image");
        });
        let testing = server.mock(|when, then| {
            when.method(GET).path("/openstack/testing/debian-testing-openstack-amd64.qcow2");
            then.status(200).body("testing image");
        });
        let scratch = tempfile::tempdir().expect("tempdir");
        let yaml = format!(
            "sources:\n  distros:\n    debian:\n      releases:\n        stretch:\n          archs: [amd64]\n        buster:\n          archs: [amd64]\n      glance:\n        os_distro: debian\n  repositories:\n    - name: debian\n      url: {}\npipeline:\n  temp_dir: {}\n",
            server.url("/openstack"),
            scratch.path().display(),
        );
        let config = Config::from_yaml_str(&yaml).expect("config");
        let fetchers = Arc::new(FetcherSet::from_config(&config).expect("fetchers"));
        let root = fetchers.root().to_path_buf();
        let catalog = Arc::new(InMemoryCatalog::with_images(&["debian-testing-amd64"]));

        let exit = run(
            &config,
            catalog.clone(),
            fetchers,
            RunMode::Once,
            std::future::pending(),
        )
        .await;

        assert_eq!(exit, Exit::Completed);
        stable.assert();
        testing.assert_hits(0);
        let uploads = catalog.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0.name, "debian-current-9-amd64");
        assert_eq!(uploads[0].0.properties["os_distro"], "debian");
        assert!(uploads[0].0.properties[DIGEST_PROPERTY].starts_with("sha256:"));
        assert_eq!(uploads[0].1, b"stable image");
        assert!(!root.exists());
    }
}

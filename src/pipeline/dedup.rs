use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::catalog::CatalogClient;
use crate::error::{ErrorSink, PipelineError};
use crate::fetcher::Fetcher;

/// Narrows the fetcher set down to the ones worth running this cycle.
#[async_trait]
pub trait FetcherFilter: Send + Sync {
    async fn select(&self, fetchers: &[Arc<Fetcher>]) -> Vec<Arc<Fetcher>>;
}

/// Keeps every fetcher.
#[cfg(test)]
pub struct FetchAll;

#[cfg(test)]
#[async_trait]
impl FetcherFilter for FetchAll {
    async fn select(&self, fetchers: &[Arc<Fetcher>]) -> Vec<Arc<Fetcher>> {
        fetchers.to_vec()
    }
}

/// Skips fetchers whose image is already published. Only `active` records
/// count; a record left behind by an interrupted upload does not.
///
/// A fetcher whose lookup fails is reported and skipped too: treating an
/// unreachable catalog as "image missing" would re-upload everything.
pub struct DedupFilter {
    catalog: Arc<dyn CatalogClient>,
    errors: ErrorSink,
}

impl DedupFilter {
    pub fn new(catalog: Arc<dyn CatalogClient>, errors: ErrorSink) -> Self {
        Self { catalog, errors }
    }
}

#[async_trait]
impl FetcherFilter for DedupFilter {
    async fn select(&self, fetchers: &[Arc<Fetcher>]) -> Vec<Arc<Fetcher>> {
        let mut selected = Vec::new();

        for fetcher in fetchers {
            let name = fetcher.identity();
            match self.catalog.find_image(&name).await {
                Ok(Some(image)) if image.is_active() => {
                    debug!(fetcher = %name, id = image.id(), "image already in catalog")
                }
                Ok(Some(image)) => {
                    info!(
                        fetcher = %name,
                        id = image.id(),
                        status = image.status().unwrap_or("unknown"),
                        "catalog record has no image data, fetching again"
                    );
                    selected.push(Arc::clone(fetcher));
                }
                Ok(None) => {
                    info!(fetcher = %name, "adding image to the list of images to fetch");
                    selected.push(Arc::clone(fetcher));
                }
                Err(err) => self.errors.report(name, PipelineError::CatalogQuery(err)),
            }
        }

        info!(count = selected.len(), "found new images to fetch");
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogImage;
    use crate::catalog::fake::InMemoryCatalog;
    use crate::fetcher::tests::debian_fetcher;
    use crate::fetcher::{Fetcher, Source, UbuntuSource};
    use crate::config::Repository;
    use httpmock::MockServer;
    use reqwest::Client;
    use std::path::Path;

    fn ubuntu_fetcher(root: &Path, release: &str, arch: &str) -> Fetcher {
        let repo = Repository::new("ubuntu", "http://127.0.0.1:9/index.json")
            .with_parameter("base_for_paths", "http://127.0.0.1:9/");
        let source = Source::Ubuntu(UbuntuSource::new(release, arch, &repo).expect("source"));
        Fetcher::new(source, root, Client::new()).expect("fetcher")
    }

    fn names(fetchers: &[Arc<Fetcher>]) -> Vec<String> {
        fetchers.iter().map(|f| f.identity()).collect()
    }

    #[tokio::test]
    async fn excludes_images_already_published() {
        let root = tempfile::tempdir().expect("tempdir");
        let fetchers = vec![
            Arc::new(ubuntu_fetcher(root.path(), "xenial", "amd64")),
            Arc::new(ubuntu_fetcher(root.path(), "xenial", "arm64")),
        ];
        let catalog = Arc::new(InMemoryCatalog::with_images(&["ubuntu-xenial-amd64"]));
        let (errors, mut log) = ErrorSink::channel(8);

        let selected = DedupFilter::new(catalog.clone(), errors).select(&fetchers).await;

        assert_eq!(names(&selected), ["ubuntu-xenial-arm64"]);
        assert_eq!(catalog.lookups(), 2);
        assert!(log.try_recv().is_none());
    }

    #[tokio::test]
    async fn filtering_is_idempotent() {
        let server = MockServer::start_async().await;
        let root = tempfile::tempdir().expect("tempdir");
        let fetchers = vec![
            Arc::new(ubuntu_fetcher(root.path(), "latest", "amd64")),
            Arc::new(debian_fetcher(&server, root.path(), "stretch", "amd64")),
            Arc::new(debian_fetcher(&server, root.path(), "buster", "amd64")),
        ];
        let catalog = Arc::new(InMemoryCatalog::with_images(&["debian-testing-amd64"]));
        let (errors, _log) = ErrorSink::channel(8);
        let filter = DedupFilter::new(catalog, errors);

        let first = names(&filter.select(&fetchers).await);
        let second = names(&filter.select(&fetchers).await);

        assert_eq!(first, ["ubuntu-xenial-amd64", "debian-current-9-amd64"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn records_without_data_are_fetched_again() {
        let server = MockServer::start_async().await;
        let root = tempfile::tempdir().expect("tempdir");
        let fetchers = vec![
            Arc::new(debian_fetcher(&server, root.path(), "stretch", "amd64")),
            Arc::new(debian_fetcher(&server, root.path(), "buster", "amd64")),
        ];
        let catalog = Arc::new(InMemoryCatalog::default());
        catalog.insert(CatalogImage::new("abc", "debian-current-9-amd64").with_status("queued"));
        catalog.insert(CatalogImage::new("def", "debian-testing-amd64").with_status("killed"));
        let (errors, mut log) = ErrorSink::channel(8);

        let selected = DedupFilter::new(catalog, errors).select(&fetchers).await;

        assert_eq!(names(&selected), ["debian-current-9-amd64", "debian-testing-amd64"]);
        assert!(log.try_recv().is_none());
    }

    #[tokio::test]
    async fn lookup_errors_exclude_and_report() {
        let root = tempfile::tempdir().expect("tempdir");
        let fetchers = vec![
            Arc::new(ubuntu_fetcher(root.path(), "xenial", "amd64")),
            Arc::new(ubuntu_fetcher(root.path(), "bionic", "amd64")),
        ];
        let catalog = Arc::new(InMemoryCatalog::default());
        catalog.fail_lookup("ubuntu-bionic-amd64");
        let (errors, mut log) = ErrorSink::channel(8);

        let selected = DedupFilter::new(catalog, errors).select(&fetchers).await;

        assert_eq!(names(&selected), ["ubuntu-xenial-amd64"]);
        let report = log.try_recv().expect("lookup failure reported");
        assert_eq!(report.origin, "ubuntu-bionic-amd64");
        assert!(matches!(report.error, PipelineError::CatalogQuery(_)));
    }

    #[tokio::test]
    async fn fetch_all_keeps_everything() {
        let root = tempfile::tempdir().expect("tempdir");
        let fetchers = vec![Arc::new(ubuntu_fetcher(root.path(), "xenial", "amd64"))];
        assert_eq!(FetchAll.select(&fetchers).await.len(), 1);
    }
}

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::catalog::{CatalogClient, CreateImage};
use crate::config::Config;
use crate::error::{ErrorSink, UploadError};
use crate::image::ImageDescriptor;

/// Image property carrying the digest computed while downloading.
pub const DIGEST_PROPERTY: &str = "source_digest";

/// Fixed metadata applied to every published image, plus per-distribution
/// extra properties from the `glance:` section of the configuration.
#[derive(Debug, Clone)]
pub struct PublicationOptions {
    disk_format: String,
    container_format: String,
    visibility: String,
    extra: HashMap<String, BTreeMap<String, String>>,
}

impl PublicationOptions {
    pub fn from_config(config: &Config) -> Self {
        let catalog = config.catalog();
        let extra = config
            .sources()
            .distros()
            .iter()
            .map(|(distro, source)| (distro.clone(), source.glance_options().clone()))
            .collect();

        Self {
            disk_format: catalog.disk_format().to_string(),
            container_format: catalog.container_format().to_string(),
            visibility: catalog.visibility().to_string(),
            extra,
        }
    }

    pub fn request_for(&self, image: &ImageDescriptor) -> CreateImage {
        let mut properties = self.extra.get(image.distribution()).cloned().unwrap_or_default();
        properties.insert(DIGEST_PROPERTY.to_string(), image.digest().to_string());

        CreateImage {
            name: image.catalog_name(),
            disk_format: self.disk_format.clone(),
            container_format: self.container_format.clone(),
            visibility: self.visibility.clone(),
            properties,
        }
    }
}

/// Consumes the handoff channel and publishes each image in its own task.
pub struct UploadDispatcher {
    incoming: mpsc::Receiver<ImageDescriptor>,
    catalog: Arc<dyn CatalogClient>,
    errors: ErrorSink,
    options: Arc<PublicationOptions>,
    permits: Arc<Semaphore>,
}

impl UploadDispatcher {
    pub fn new(
        incoming: mpsc::Receiver<ImageDescriptor>,
        catalog: Arc<dyn CatalogClient>,
        errors: ErrorSink,
        options: PublicationOptions,
        upload_workers: usize,
    ) -> Self {
        Self {
            incoming,
            catalog,
            errors,
            options: Arc::new(options),
            permits: Arc::new(Semaphore::new(upload_workers.max(1))),
        }
    }

    /// Dispatch uploads until every sender is dropped, then wait for the
    /// uploads still in flight.
    pub async fn run(mut self) {
        let mut in_flight = JoinSet::new();

        while let Some(image) = self.incoming.recv().await {
            // Waiting here keeps the next image in the channel while all
            // upload slots are busy.
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            debug!(image = %image.catalog_name(), "dispatching upload");

            let catalog = Arc::clone(&self.catalog);
            let errors = self.errors.clone();
            let options = Arc::clone(&self.options);
            while let Some(outcome) = in_flight.try_join_next() {
                check_finished(outcome);
            }
            in_flight.spawn(async move {
                let name = image.catalog_name();
                if let Err(err) = upload(catalog.as_ref(), &options, &image).await {
                    errors.report(name, err);
                }
                drop(permit);
            });
        }

        debug!(count = in_flight.len(), "handoff closed, waiting for uploads");
        while let Some(outcome) = in_flight.join_next().await {
            check_finished(outcome);
        }
    }
}

fn check_finished(outcome: Result<(), JoinError>) {
    if let Err(err) = outcome {
        warn!(error = %err, "upload task panicked");
    }
}

/// Publish one downloaded image. The backing file is left where it is.
pub async fn upload(
    catalog: &dyn CatalogClient,
    options: &PublicationOptions,
    image: &ImageDescriptor,
) -> Result<(), UploadError> {
    let file = tokio::fs::File::open(image.path())
        .await
        .map_err(|source| UploadError::Open {
            path: image.path().to_path_buf(),
            source,
        })?;

    let request = options.request_for(image);
    info!(image = %request.name, size = image.size(), "uploading image to catalog");
    let created = catalog.create_image(&request, file).await?;

    info!(
        image = %request.name,
        id = created.id(),
        status = created.status().unwrap_or("unknown"),
        timestamp = created.timestamp().unwrap_or("unknown"),
        "image uploaded"
    );
    Ok(())
}

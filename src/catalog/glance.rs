use async_trait::async_trait;
use reqwest::{Body, Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::identity::{self, Session};
use super::{CatalogClient, CatalogError, CatalogImage, Cloud, CreateImage};

const TOKEN_HEADER: &str = "X-Auth-Token";

#[derive(Debug, Deserialize)]
struct ImagePage {
    #[serde(default)]
    images: Vec<CatalogImage>,
    #[serde(default)]
    next: Option<String>,
}

/// Glance v2 client authenticated through Keystone.
#[derive(Debug)]
pub struct GlanceClient {
    http: Client,
    cloud: Cloud,
    session: RwLock<Session>,
}

impl GlanceClient {
    /// Authenticate against the cloud's identity service and locate Glance.
    pub async fn connect(http: Client, cloud: Cloud) -> Result<Self, CatalogError> {
        let session = identity::authenticate(&http, &cloud).await?;
        info!(endpoint = %session.image_endpoint, "connected to image catalog");
        Ok(Self {
            http,
            cloud,
            session: RwLock::new(session),
        })
    }

    async fn reauthenticate(&self) -> Result<(), CatalogError> {
        debug!("token rejected, re-authenticating");
        let session = identity::authenticate(&self.http, &self.cloud).await?;
        *self.session.write().await = session;
        Ok(())
    }

    async fn endpoint(&self) -> String {
        self.session.read().await.image_endpoint.clone()
    }

    async fn send_once<F>(&self, build: &F) -> Result<reqwest::Response, CatalogError>
    where
        F: Fn(&Client, &Session) -> RequestBuilder + Send + Sync,
    {
        let request = {
            let session = self.session.read().await;
            build(&self.http, &*session).header(TOKEN_HEADER, session.token.as_str())
        };
        let request = request.build().map_err(|source| CatalogError::Http {
            url: "<request>".to_string(),
            source,
        })?;
        let url = request.url().to_string();
        self.http
            .execute(request)
            .await
            .map_err(|source| CatalogError::Http { url, source })
    }

    /// Send a metadata request, re-authenticating once if the token expired.
    async fn send_json<T, F>(&self, operation: &'static str, build: F) -> Result<T, CatalogError>
    where
        T: DeserializeOwned,
        F: Fn(&Client, &Session) -> RequestBuilder + Send + Sync,
    {
        let mut res = self.send_once(&build).await?;
        if res.status() == StatusCode::UNAUTHORIZED {
            self.reauthenticate().await?;
            res = self.send_once(&build).await?;
        }

        let res = check_status(operation, res).await?;
        res.json::<T>()
            .await
            .map_err(|source| CatalogError::Decode { operation, source })
    }

    async fn list_with_query(&self, query: &[(&str, &str)]) -> Result<Vec<CatalogImage>, CatalogError> {
        let base = self.endpoint().await;
        let mut url = format!("{base}/v2/images");
        let mut first = true;
        let mut images = Vec::new();

        loop {
            let page: ImagePage = self
                .send_json("list images", |http, _| {
                    let request = http.get(&url);
                    if first { request.query(query) } else { request }
                })
                .await?;
            images.extend(page.images);

            // `next` already carries the original query plus a marker.
            match page.next {
                Some(next) => {
                    url = format!("{base}{next}");
                    first = false;
                }
                None => break,
            }
        }

        Ok(images)
    }

    async fn upload_data(&self, image_url: &str, file: tokio::fs::File) -> Result<(), CatalogError> {
        // The payload stream can only be sent once, so no re-authentication here;
        // the token was just accepted by the create call.
        let file_url = format!("{image_url}/file");
        let token = self.session.read().await.token.clone();
        let res = self
            .http
            .put(&file_url)
            .header(TOKEN_HEADER, token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|source| CatalogError::Http { url: file_url, source })?;
        check_status("upload image data", res).await?;
        Ok(())
    }

    /// Remove a record whose data never arrived, so the next cycle does not
    /// mistake it for a published image.
    async fn discard(&self, image_url: &str, id: &str) {
        let deleted = match self.send_once(&|http: &Client, _: &Session| http.delete(image_url)).await {
            Ok(res) => check_status("delete image", res).await.map(drop),
            Err(err) => Err(err),
        };
        match deleted {
            Ok(()) => debug!(id, "removed image record after failed upload"),
            Err(err) => warn!(id, error = %err, "cannot remove image record after failed upload"),
        }
    }
}

async fn check_status(operation: &'static str, res: reqwest::Response) -> Result<reqwest::Response, CatalogError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    Err(CatalogError::Status {
        operation,
        status,
        body,
    })
}

#[async_trait]
impl CatalogClient for GlanceClient {
    async fn list_images(&self) -> Result<Vec<CatalogImage>, CatalogError> {
        self.list_with_query(&[]).await
    }

    async fn find_image(&self, name: &str) -> Result<Option<CatalogImage>, CatalogError> {
        let images = self.list_with_query(&[("name", name)]).await?;
        Ok(images.into_iter().find(|image| image.name() == name))
    }

    async fn create_image(&self, request: &CreateImage, file: tokio::fs::File) -> Result<CatalogImage, CatalogError> {
        let base = self.endpoint().await;
        let images_url = format!("{base}/v2/images");

        let record: CatalogImage = self
            .send_json("create image", |http, _| http.post(&images_url).json(request))
            .await?;
        debug!(id = record.id(), name = record.name(), "image record created, uploading data");

        let image_url = format!("{base}/v2/images/{}", record.id());
        if let Err(err) = self.upload_data(&image_url, file).await {
            self.discard(&image_url, record.id()).await;
            return Err(err);
        }

        self.send_json("show image", |http, _| http.get(&image_url)).await
    }
}

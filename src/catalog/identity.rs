use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{CatalogError, Cloud, IdentityVersion};

const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";
const IMAGE_SERVICE: &str = "image";
const DEFAULT_DOMAIN: &str = "Default";

/// An authenticated Keystone session scoped to the image service.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    /// Image service root, without a trailing slash or version suffix.
    pub image_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct V3Response {
    token: V3Token,
}

#[derive(Debug, Deserialize)]
struct V3Token {
    #[serde(default)]
    catalog: Vec<V3Service>,
}

#[derive(Debug, Deserialize)]
struct V3Service {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<V3Endpoint>,
}

#[derive(Debug, Deserialize)]
struct V3Endpoint {
    interface: String,
    #[serde(default)]
    region_id: Option<String>,
    #[serde(default)]
    region: Option<String>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct V2Response {
    access: V2Access,
}

#[derive(Debug, Deserialize)]
struct V2Access {
    token: V2Token,
    #[serde(default, rename = "serviceCatalog")]
    service_catalog: Vec<V2Service>,
}

#[derive(Debug, Deserialize)]
struct V2Token {
    id: String,
}

#[derive(Debug, Deserialize)]
struct V2Service {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<V2Endpoint>,
}

#[derive(Debug, Deserialize)]
struct V2Endpoint {
    #[serde(default)]
    region: Option<String>,
    #[serde(default, rename = "publicURL")]
    public_url: Option<String>,
    #[serde(default, rename = "internalURL")]
    internal_url: Option<String>,
    #[serde(default, rename = "adminURL")]
    admin_url: Option<String>,
}

/// Endpoint flattened out of either catalog format.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    interface: String,
    region: Option<String>,
    url: String,
}

fn select_endpoint(candidates: &[Candidate], interface: &str, region: Option<&str>) -> Option<String> {
    candidates
        .iter()
        .filter(|c| c.interface == interface)
        .find(|c| region.is_none() || c.region.as_deref() == region)
        .map(|c| normalise_endpoint(&c.url))
}

/// Strip trailing slashes and a version suffix so request paths can always
/// start with `/v2/`.
fn normalise_endpoint(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    trimmed
        .strip_suffix("/v2.0")
        .or_else(|| trimmed.strip_suffix("/v2"))
        .unwrap_or(trimmed)
        .to_string()
}

fn versioned_url(auth_url: &str, version: &str) -> String {
    let base = auth_url.trim_end_matches('/');
    if base.ends_with(version) {
        base.to_string()
    } else {
        format!("{base}/{version}")
    }
}

fn v3_body(cloud: &Cloud) -> Value {
    let auth = &cloud.auth;
    let user_domain = auth.user_domain_name.as_deref().unwrap_or(DEFAULT_DOMAIN);
    let project_domain = auth.project_domain_name.as_deref().unwrap_or(DEFAULT_DOMAIN);

    let mut body = json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": auth.username,
                        "domain": {"name": user_domain},
                        "password": auth.password,
                    }
                }
            }
        }
    });
    if let Some(project) = &auth.project_name {
        body["auth"]["scope"] = json!({
            "project": {"name": project, "domain": {"name": project_domain}}
        });
    }
    body
}

fn v2_body(cloud: &Cloud) -> Value {
    let auth = &cloud.auth;
    let mut body = json!({
        "auth": {
            "passwordCredentials": {"username": auth.username, "password": auth.password}
        }
    });
    if let Some(project) = &auth.project_name {
        body["auth"]["tenantName"] = json!(project);
    }
    body
}

async fn post_json(client: &Client, url: &str, body: &Value) -> Result<reqwest::Response, CatalogError> {
    let res = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|source| CatalogError::Http {
            url: url.to_string(),
            source,
        })?;

    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(CatalogError::Status {
            operation: "authenticate",
            status,
            body,
        });
    }
    Ok(res)
}

async fn authenticate_v3(client: &Client, cloud: &Cloud) -> Result<Session, CatalogError> {
    let url = format!("{}/auth/tokens", versioned_url(&cloud.auth.auth_url, "v3"));
    let res = post_json(client, &url, &v3_body(cloud)).await?;

    let token = res
        .headers()
        .get(SUBJECT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| CatalogError::Auth(format!("{url} returned no {SUBJECT_TOKEN_HEADER} header")))?;

    let body: V3Response = res.json().await.map_err(|source| CatalogError::Decode {
        operation: "authenticate",
        source,
    })?;

    let candidates: Vec<Candidate> = body
        .token
        .catalog
        .into_iter()
        .filter(|s| s.service_type == IMAGE_SERVICE)
        .flat_map(|s| s.endpoints)
        .map(|e| Candidate {
            interface: e.interface,
            region: e.region_id.or(e.region),
            url: e.url,
        })
        .collect();

    session_from(token, &candidates, cloud)
}

async fn authenticate_v2(client: &Client, cloud: &Cloud) -> Result<Session, CatalogError> {
    let url = format!("{}/tokens", versioned_url(&cloud.auth.auth_url, "v2.0"));
    let res = post_json(client, &url, &v2_body(cloud)).await?;

    let body: V2Response = res.json().await.map_err(|source| CatalogError::Decode {
        operation: "authenticate",
        source,
    })?;

    let mut candidates = Vec::new();
    for endpoint in body
        .access
        .service_catalog
        .into_iter()
        .filter(|s| s.service_type == IMAGE_SERVICE)
        .flat_map(|s| s.endpoints)
    {
        for (interface, url) in [
            ("public", endpoint.public_url),
            ("internal", endpoint.internal_url),
            ("admin", endpoint.admin_url),
        ] {
            if let Some(url) = url {
                candidates.push(Candidate {
                    interface: interface.to_string(),
                    region: endpoint.region.clone(),
                    url,
                });
            }
        }
    }

    session_from(body.access.token.id, &candidates, cloud)
}

fn session_from(token: String, candidates: &[Candidate], cloud: &Cloud) -> Result<Session, CatalogError> {
    let image_endpoint = select_endpoint(candidates, cloud.interface(), cloud.region()).ok_or_else(|| {
        CatalogError::Auth(format!(
            "no {} image endpoint in service catalog (region {:?})",
            cloud.interface(),
            cloud.region()
        ))
    })?;
    debug!(%image_endpoint, "authenticated against keystone");
    Ok(Session { token, image_endpoint })
}

/// Obtain a token and the image service endpoint for `cloud`.
pub async fn authenticate(client: &Client, cloud: &Cloud) -> Result<Session, CatalogError> {
    match cloud.identity_version() {
        IdentityVersion::V3 => authenticate_v3(client, cloud).await,
        IdentityVersion::V2 => authenticate_v2(client, cloud).await,
    }
}

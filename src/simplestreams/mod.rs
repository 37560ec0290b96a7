//! Reader for Simplestreams product indexes, used to turn an Ubuntu
//! (release, architecture, file type) request into a concrete download path.

mod index;
mod item;
mod product;
mod version;

pub use index::ProductIndex;
pub use item::Item;
pub use product::Product;
pub use version::Version;

use reqwest::Client;

use crate::error::ResolutionError;

const KNOWN_ARCHES: &[&str] = &["amd64", "arm64", "armhf", "i386", "ppc64el", "s390x"];

/// The newest matching artifact for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub product: String,
    pub version: String,
    /// Distribution version of the product, e.g. `16.04`.
    pub distro_version: Option<String>,
    pub path: String,
    pub sha256: Option<String>,
}

/// Download and parse a product index.
pub async fn fetch_index(client: &Client, url: &str) -> Result<ProductIndex, ResolutionError> {
    let res = client
        .get(url)
        .send()
        .await
        .map_err(|source| ResolutionError::Http {
            url: url.to_string(),
            source,
        })?;

    let status = res.status();
    if !status.is_success() {
        return Err(ResolutionError::Status {
            url: url.to_string(),
            status,
        });
    }

    let bytes = res.bytes().await.map_err(|source| ResolutionError::Http {
        url: url.to_string(),
        source,
    })?;

    serde_json::from_slice(&bytes).map_err(|source| ResolutionError::Metadata {
        url: url.to_string(),
        source,
    })
}

/// Product entries occasionally omit `arch`; the product id always ends with it.
fn product_arch<'a>(product_name: &'a str, product: &'a Product) -> Option<&'a str> {
    product.arch().or_else(|| {
        product_name
            .rsplit(':')
            .next()
            .filter(|tail| KNOWN_ARCHES.contains(tail))
    })
}

/// Pick the newest `ftype` artifact for `release`/`arch` out of the index.
pub fn locate(index: &ProductIndex, release: &str, arch: &str, ftype: &str) -> Result<Located, ResolutionError> {
    let (product_name, product) = index
        .products()
        .iter()
        .filter(|(name, product)| product.release() == Some(release) && product_arch(name, product) == Some(arch))
        // Several products can share release/arch (e.g. minimal vs server);
        // prefer a stable choice over hash-map order.
        .min_by(|(a, _), (b, _)| a.cmp(b))
        .ok_or_else(|| ResolutionError::NoProduct {
            release: release.to_string(),
            arch: arch.to_string(),
        })?;

    let (version_id, version) = product.latest_version().ok_or_else(|| ResolutionError::NoVersion {
        product: product_name.clone(),
    })?;

    let item = version
        .item(ftype)
        .filter(|item| item.path().is_some())
        .ok_or_else(|| ResolutionError::NoItem {
            product: product_name.clone(),
            version: version_id.to_string(),
            ftype: ftype.to_string(),
        })?;

    Ok(Located {
        product: product_name.clone(),
        version: version_id.to_string(),
        distro_version: product.distro_version().map(str::to_string),
        path: item.path().unwrap_or_default().to_string(),
        sha256: item.sha256().map(str::to_string),
    })
}

use serde::Deserialize;
use std::collections::HashMap;

/// Top-level container of a Simplestreams product index
/// (`com.ubuntu.cloud:released:download.json`).
#[derive(Debug, Deserialize)]
pub struct ProductIndex {
    #[serde(default)]
    products: HashMap<String, super::Product>,
}

impl ProductIndex {
    /// Borrow the index entries keyed by their product identifier.
    pub fn products(&self) -> &HashMap<String, super::Product> {
        &self.products
    }
}

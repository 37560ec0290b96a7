use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct Version {
    #[serde(default)]
    items: HashMap<String, super::Item>,
}

impl Version {
    /// Find an item by its key, falling back to its declared `ftype`.
    pub fn item(&self, ftype: &str) -> Option<&super::Item> {
        self.items
            .get(ftype)
            .or_else(|| self.items.values().find(|item| item.ftype() == Some(ftype)))
    }
}

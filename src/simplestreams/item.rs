use serde::Deserialize;

/// A single downloadable artifact inside a product version.
#[derive(Debug, Deserialize)]
pub struct Item {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    ftype: Option<String>,
}

impl Item {
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn sha256(&self) -> Option<&str> {
        self.sha256.as_deref()
    }

    pub fn ftype(&self) -> Option<&str> {
        self.ftype.as_deref()
    }
}

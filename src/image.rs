use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::path::{Path, PathBuf};

/// Separator used when joining an image identity into its catalog name.
pub const NAME_SEPARATOR: &str = "-";

/// Build the catalog name for a (distribution, release, architecture) triple.
pub fn catalog_name(distribution: &str, release: &str, architecture: &str) -> String {
    [distribution, release, architecture].join(NAME_SEPARATOR)
}

/// Supported checksum algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Sha256,
    Sha512,
}

impl ChecksumKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumKind::Sha256 => "sha256",
            ChecksumKind::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convenience wrapper that couples the checksum value with its algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageChecksum {
    kind: ChecksumKind,
    value: String,
}

impl ImageChecksum {
    pub fn new(kind: ChecksumKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into().to_ascii_lowercase(),
        }
    }

    pub fn kind(&self) -> ChecksumKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for ImageChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Incremental hasher fed with the same bytes that are written to disk.
pub enum Digester {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Digester {
    pub fn new(kind: ChecksumKind) -> Self {
        match kind {
            ChecksumKind::Sha256 => Digester::Sha256(Sha256::new()),
            ChecksumKind::Sha512 => Digester::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            Digester::Sha256(hasher) => hasher.update(chunk),
            Digester::Sha512(hasher) => hasher.update(chunk),
        }
    }

    pub fn finish(self) -> ImageChecksum {
        match self {
            Digester::Sha256(hasher) => ImageChecksum::new(ChecksumKind::Sha256, hex::encode(hasher.finalize())),
            Digester::Sha512(hasher) => ImageChecksum::new(ChecksumKind::Sha512, hex::encode(hasher.finalize())),
        }
    }
}

/// A downloaded image waiting to be published.
///
/// The backing file lives inside the producing fetcher's storage directory and
/// is never removed by the pipeline itself; the whole directory tree goes away
/// on cleanup.
#[derive(Debug)]
pub struct ImageDescriptor {
    distribution: String,
    release: String,
    architecture: String,
    path: PathBuf,
    size: u64,
    digest: ImageChecksum,
}

impl ImageDescriptor {
    pub fn new(
        distribution: impl Into<String>,
        release: impl Into<String>,
        architecture: impl Into<String>,
        path: PathBuf,
        size: u64,
        digest: ImageChecksum,
    ) -> Self {
        Self {
            distribution: distribution.into(),
            release: release.into(),
            architecture: architecture.into(),
            path,
            size,
            digest,
        }
    }

    pub fn distribution(&self) -> &str {
        &self.distribution
    }

    /// Location of the downloaded payload.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn digest(&self) -> &ImageChecksum {
        &self.digest
    }

    /// Name under which the image is published in the catalog.
    pub fn catalog_name(&self) -> String {
        catalog_name(&self.distribution, &self.release, &self.architecture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_name_joins_identity_triple() {
        assert_eq!(catalog_name("ubuntu", "xenial", "amd64"), "ubuntu-xenial-amd64");
    }

    #[test]
    fn sha256_digest_of_known_input() {
        let mut digester = Digester::new(ChecksumKind::Sha256);
        digester.update(b"hello ");
        digester.update(b"world");
        let digest = digester.finish();
        assert_eq!(digest.kind(), ChecksumKind::Sha256);
        assert_eq!(
            digest.value(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn checksum_values_are_normalised_to_lowercase() {
        let upper = ImageChecksum::new(ChecksumKind::Sha512, "ABCDEF");
        assert_eq!(upper, ImageChecksum::new(ChecksumKind::Sha512, "abcdef"));
        assert_eq!(upper.to_string(), "sha512:abcdef");
    }

    #[test]
    fn descriptor_exposes_catalog_name() {
        let digest = ImageChecksum::new(ChecksumKind::Sha256, "00");
        let image = ImageDescriptor::new("debian", "current-9", "amd64", PathBuf::from("/tmp/x"), 3, digest);
        assert_eq!(image.catalog_name(), "debian-current-9-amd64");
        assert_eq!(image.size(), 3);
    }
}

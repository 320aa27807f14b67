//! Artifact references.
//!
//! Parsing follows Docker reference normalisation via `oci-distribution`:
//! `app` becomes `docker.io/library/app:latest`.

use oci_distribution::Reference;
use std::fmt;

use crate::{Error, Result};

/// Scheme prefix handled by the OCI remote loader.
pub const OCI_PREFIX: &str = "oci://";

/// A parsed registry address: registry, repository and an optional tag or digest.
#[derive(Debug, Clone)]
pub struct ArtifactRef {
    inner: Reference,
}

impl ArtifactRef {
    /// Parse a registry address without scheme prefix.
    pub fn parse(address: &str) -> Result<Self> {
        let inner = address.parse().map_err(|e: oci_distribution::ParseError| {
            Error::invalid_reference(address, e.to_string())
        })?;
        Ok(Self { inner })
    }

    /// Parse a reference carrying the `oci://` prefix.
    pub fn from_prefixed(reference: &str) -> Result<Self> {
        let address = reference
            .strip_prefix(OCI_PREFIX)
            .ok_or_else(|| Error::invalid_reference(reference, "missing oci:// prefix"))?;
        Self::parse(address)
    }

    /// Registry host (with port, if any).
    #[must_use]
    pub fn registry(&self) -> &str {
        self.inner.registry()
    }

    /// Repository path within the registry.
    #[must_use]
    pub fn repository(&self) -> &str {
        self.inner.repository()
    }

    /// Tag, if the reference names one.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.inner.tag()
    }

    /// Digest, if the reference is content-addressed.
    #[must_use]
    pub fn digest(&self) -> Option<&str> {
        self.inner.digest()
    }

    /// Address of `digest` within the same repository.
    #[must_use]
    pub fn with_digest(&self, digest: &str) -> Self {
        Self {
            inner: Reference::with_digest(
                self.inner.registry().to_string(),
                self.inner.repository().to_string(),
                digest.to_string(),
            ),
        }
    }

    /// The underlying `oci-distribution` reference.
    #[must_use]
    pub fn as_reference(&self) -> &Reference {
        &self.inner
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.whole())
    }
}

//! Registry-backed artifact resolver.
//!
//! Uses `oci-distribution` for registry operations.

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::OciDistributionError;
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::Client;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::reference::ArtifactRef;
use crate::resolver::{ArtifactResolver, Descriptor};
use crate::{Error, Result};

/// Manifest media types requested from the registry.
const MANIFEST_MEDIA_TYPES: &[&str] = &[
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.docker.distribution.manifest.v2+json",
];

/// Resolver talking to a real OCI registry.
pub struct RegistryResolver {
    client: Client,
}

impl Default for RegistryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryResolver {
    /// Create a resolver that talks HTTPS to every registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_protocol(ClientProtocol::Https)
    }

    /// Create a resolver that uses plain HTTP for the listed registries.
    #[must_use]
    pub fn with_insecure_registries(registries: Vec<String>) -> Self {
        if registries.is_empty() {
            Self::new()
        } else {
            Self::with_protocol(ClientProtocol::HttpsExcept(registries))
        }
    }

    fn with_protocol(protocol: ClientProtocol) -> Self {
        let config = ClientConfig {
            protocol,
            ..Default::default()
        };
        Self {
            client: Client::new(config),
        }
    }

    /// Get authentication for a registry.
    ///
    /// Anonymous, except for ghcr.io where a GitHub token is used when present.
    fn get_auth(&self, reference: &ArtifactRef) -> RegistryAuth {
        if reference.registry() == "ghcr.io" {
            if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                return RegistryAuth::Basic(String::new(), token);
            }
            if let Ok(token) = std::env::var("GH_TOKEN") {
                return RegistryAuth::Basic(String::new(), token);
            }
        }

        RegistryAuth::Anonymous
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaTypeProbe {
    #[serde(default)]
    media_type: Option<String>,
}

#[async_trait]
impl ArtifactResolver for RegistryResolver {
    async fn get_manifest(&self, reference: &ArtifactRef) -> Result<(Vec<u8>, Descriptor)> {
        debug!(%reference, "Pulling manifest");
        let auth = self.get_auth(reference);

        let (bytes, digest) = self
            .client
            .pull_manifest_raw(reference.as_reference(), &auth, MANIFEST_MEDIA_TYPES)
            .await
            .map_err(|e| classify(reference, &e))?;

        let media_type = serde_json::from_slice::<MediaTypeProbe>(&bytes)
            .ok()
            .and_then(|p| p.media_type)
            .unwrap_or_default();

        trace!(%reference, %digest, %media_type, size = bytes.len(), "Got manifest");

        let size = i64::try_from(bytes.len()).unwrap_or(i64::MAX);
        Ok((
            bytes,
            Descriptor {
                media_type,
                digest,
                size,
            },
        ))
    }

    async fn get_blob(&self, reference: &ArtifactRef, descriptor: &Descriptor) -> Result<Vec<u8>> {
        debug!(%reference, digest = %descriptor.digest, "Pulling blob");

        let layer = OciDescriptor {
            media_type: descriptor.media_type.clone(),
            digest: descriptor.digest.clone(),
            size: descriptor.size,
            ..Default::default()
        };

        let mut content = Vec::with_capacity(initial_capacity(descriptor.size));
        self.client
            .pull_blob(reference.as_reference(), &layer, &mut content)
            .await
            .map_err(|e| classify(reference, &e))?;

        check_blob_size(reference, descriptor, content.len())?;

        trace!(%reference, size = content.len(), "Pulled blob");
        Ok(content)
    }
}

/// Largest buffer reserved up front for a blob; bigger blobs grow as they stream.
const MAX_PREALLOCATED_BLOB: usize = 16 * 1024 * 1024;

/// Buffer size to reserve for a blob of the declared `size`.
///
/// The size comes from the registry, so it is clamped rather than trusted.
fn initial_capacity(size: i64) -> usize {
    usize::try_from(size).map_or(0, |size| size.min(MAX_PREALLOCATED_BLOB))
}

/// Reject a blob whose length differs from a declared, non-zero size.
fn check_blob_size(reference: &ArtifactRef, descriptor: &Descriptor, len: usize) -> Result<()> {
    if descriptor.size <= 0 || i64::try_from(len).ok() == Some(descriptor.size) {
        return Ok(());
    }
    Err(Error::registry_permanent(
        reference.to_string(),
        format!("blob is {len} bytes, descriptor declares {}", descriptor.size),
    ))
}

/// Network failures and server-side errors are worth retrying; everything
/// else (auth, not found, malformed responses) is not.
fn classify(reference: &ArtifactRef, err: &OciDistributionError) -> Error {
    let transient = match err {
        OciDistributionError::RequestError(_) => true,
        OciDistributionError::ServerError { code, .. } => *code >= 500 || *code == 429,
        _ => false,
    };

    if transient {
        Error::registry(reference.to_string(), err.to_string())
    } else {
        Error::registry_permanent(reference.to_string(), err.to_string())
    }
}

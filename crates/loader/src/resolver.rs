//! Artifact resolver contract and the manifest model it serves.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::reference::ArtifactRef;
use crate::Result;

/// Config media type identifying a compose project artifact.
pub const COMPOSE_PROJECT_MEDIA_TYPE: &str = "application/vnd.docker.compose.project";

/// A content descriptor: what a blob or manifest is and where it lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    #[serde(default)]
    pub media_type: String,
    /// Content digest (`sha256:<hex>`).
    pub digest: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: i64,
}

impl Descriptor {
    /// Describe `bytes` with the given media type.
    #[must_use]
    pub fn for_content(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            digest: crate::digest::sha256_digest(bytes),
            size: i64::try_from(bytes.len()).unwrap_or(i64::MAX),
        }
    }
}

/// An OCI image manifest, reduced to the fields the loader reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Manifest schema version (2 for OCI).
    #[serde(default)]
    pub schema_version: u32,
    /// Manifest media type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Config blob descriptor; its media type identifies the artifact kind.
    pub config: Descriptor,
    /// Layers in assembly order.
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    /// Decode a manifest from its JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Whether the config descriptor marks a compose project.
    #[must_use]
    pub fn is_compose_project(&self) -> bool {
        self.config.media_type == COMPOSE_PROJECT_MEDIA_TYPE
    }
}

/// Fetches manifests and blobs from an artifact registry.
///
/// Implementations should report failures that may clear up on their own
/// (timeouts, 5xx responses) as transient registry errors so callers can retry.
#[async_trait]
pub trait ArtifactResolver: Send + Sync {
    /// Fetch the raw manifest for `reference` and a descriptor carrying its digest.
    async fn get_manifest(&self, reference: &ArtifactRef) -> Result<(Vec<u8>, Descriptor)>;

    /// Fetch the content of a blob addressed by a digest-qualified reference.
    async fn get_blob(&self, reference: &ArtifactRef, descriptor: &Descriptor) -> Result<Vec<u8>>;
}

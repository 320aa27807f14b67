//! Loader for `oci://` references.
//!
//! The manifest is resolved on every load to learn its digest; layers are only
//! downloaded when no cache entry exists for that digest. Digest-addressed
//! references that are already cached are served without any registry call.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use tokio::io::BufWriter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::assemble::DocumentWriter;
use crate::cache::ComposeCache;
use crate::client::RegistryResolver;
use crate::config::LoaderConfig;
use crate::digest::{sha256_digest, validate_digest, verify_digest};
use crate::reference::{ArtifactRef, OCI_PREFIX};
use crate::registry::ResourceLoader;
use crate::resolver::{ArtifactResolver, Manifest};
use crate::retry::{RetryConfig, with_retry};
use crate::{Error, Result};

/// Population locks keyed by entry directory, shared by every loader in the
/// process so that loaders pointing at the same cache root download once.
static ENTRY_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Resolves `oci://` references to cached compose files.
pub struct OciRemoteLoader {
    cache: ComposeCache,
    resolver: Arc<dyn ArtifactResolver>,
    offline: bool,
    retry: RetryConfig,
}

impl OciRemoteLoader {
    /// Create a loader using `resolver` for registry access.
    #[must_use]
    pub fn new(config: &LoaderConfig, resolver: Arc<dyn ArtifactResolver>) -> Self {
        Self {
            cache: config.cache(),
            resolver,
            offline: config.offline,
            retry: config.retry.clone(),
        }
    }

    /// Create a loader backed by a real registry client.
    #[must_use]
    pub fn with_registry(config: &LoaderConfig) -> Self {
        Self::new(config, Arc::new(RegistryResolver::new()))
    }

    /// The cache this loader populates.
    #[must_use]
    pub fn cache(&self) -> &ComposeCache {
        &self.cache
    }

    /// Resolve `reference` to the path of its composed document.
    pub async fn resolve(&self, reference: &str, cancel: &CancellationToken) -> Result<PathBuf> {
        let artifact = ArtifactRef::from_prefixed(reference)?;

        if let Some(digest) = artifact.digest()
            && let Some(path) = self.cache.lookup(digest)
        {
            debug!(%artifact, ?path, "Using cached compose project");
            return Ok(path);
        }

        let (manifest_bytes, descriptor) =
            with_retry(&self.retry, cancel, || self.resolver.get_manifest(&artifact)).await?;

        if let Some(expected) = artifact.digest() {
            verify_digest(expected, &manifest_bytes)?;
        }
        let digest = if descriptor.digest.is_empty() {
            sha256_digest(&manifest_bytes)
        } else {
            verify_digest(&descriptor.digest, &manifest_bytes)?;
            descriptor.digest
        };
        validate_digest(&digest)?;
        trace!(%artifact, %digest, "Resolved manifest");

        if let Some(path) = self.cache.lookup(&digest) {
            debug!(%artifact, %digest, ?path, "Using cached compose project");
            return Ok(path);
        }

        let lock = self.entry_lock(&digest)?;
        let _guard = lock.lock().await;

        // Another task may have populated the entry while we waited
        if let Some(path) = self.cache.lookup(&digest) {
            return Ok(path);
        }

        self.populate(&artifact, &manifest_bytes, &digest, cancel).await
    }

    /// Download every layer into a staged entry and publish it.
    async fn populate(
        &self,
        artifact: &ArtifactRef,
        manifest_bytes: &[u8],
        digest: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let manifest = Manifest::from_slice(manifest_bytes).map_err(|source| Error::InvalidManifest {
            reference: artifact.to_string(),
            source,
        })?;

        if !manifest.is_compose_project() {
            return Err(Error::NotComposeProject {
                reference: artifact.to_string(),
                media_type: manifest.config.media_type,
            });
        }

        // Layer digests name registry paths; reject malformed ones before any download
        for layer in &manifest.layers {
            validate_digest(&layer.digest)?;
        }

        info!(%artifact, %digest, layers = manifest.layers.len(), "Fetching compose project");

        let staged = self.cache.stage()?;
        let staged_path = staged.document_path();
        let file = tokio::fs::File::create(&staged_path)
            .await
            .map_err(|e| Error::io(e, &staged_path, "create"))?;
        let mut writer = DocumentWriter::new(BufWriter::new(file));

        for layer in &manifest.layers {
            let layer_ref = artifact.with_digest(&layer.digest);
            let content =
                with_retry(&self.retry, cancel, || self.resolver.get_blob(&layer_ref, layer)).await?;
            verify_digest(&layer.digest, &content)?;

            writer
                .push(&content)
                .await
                .map_err(|e| Error::io(e, &staged_path, "write"))?;
            trace!(digest = %layer.digest, size = content.len(), "Appended layer");
        }

        let blocks = writer.blocks_written();
        let file = writer
            .finish()
            .await
            .map_err(|e| Error::io(e, &staged_path, "flush"))?
            .into_inner();
        file.sync_all()
            .await
            .map_err(|e| Error::io(e, &staged_path, "sync"))?;
        drop(file);

        let path = staged.commit(digest)?;
        info!(%artifact, %digest, layers = blocks, ?path, "Cached compose project");
        Ok(path)
    }

    /// Lock serialising population of one cache entry within this process.
    fn entry_lock(&self, digest: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let dir = self.cache.entry_dir(digest)?;
        let mut locks = ENTRY_LOCKS.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(Arc::clone(locks.entry(dir).or_default()))
    }
}

#[async_trait]
impl ResourceLoader for OciRemoteLoader {
    fn name(&self) -> &'static str {
        "oci"
    }

    fn accept(&self, reference: &str) -> bool {
        reference.starts_with(OCI_PREFIX)
    }

    async fn load(&self, reference: &str, cancel: &CancellationToken) -> Result<Option<PathBuf>> {
        if self.offline {
            debug!(reference, "Offline, skipping remote compose project");
            return Ok(None);
        }
        self.resolve(reference, cancel).await.map(Some)
    }
}

impl std::fmt::Debug for OciRemoteLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OciRemoteLoader")
            .field("cache", &self.cache)
            .field("offline", &self.offline)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

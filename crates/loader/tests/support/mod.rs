//! In-memory registry used by the loader integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use conflux_loader::{
    ArtifactRef, ArtifactResolver, COMPOSE_PROJECT_MEDIA_TYPE, Descriptor, Error, LoaderConfig,
    Manifest, OciRemoteLoader, Result, RetryConfig,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const LAYER_MEDIA_TYPE: &str = "application/vnd.docker.compose.file+yaml";

#[derive(Default)]
pub struct MemoryResolver {
    manifests: Mutex<HashMap<String, Vec<u8>>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    broken_blobs: Mutex<HashSet<String>>,
    corrupt_blobs: Mutex<HashSet<String>>,
    transient_failures: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    reported_digest: Mutex<Option<String>>,
    manifest_calls: AtomicUsize,
    blob_calls: AtomicUsize,
}

impl MemoryResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish an artifact under `reference` (no `oci://` prefix) and
    /// return its manifest digest.
    pub fn publish(&self, reference: &str, config_media_type: &str, layers: &[&str]) -> String {
        let mut blobs = self.blobs.lock().unwrap();
        let layer_descriptors: Vec<Descriptor> = layers
            .iter()
            .map(|content| {
                let descriptor = Descriptor::for_content(LAYER_MEDIA_TYPE, content.as_bytes());
                blobs.insert(descriptor.digest.clone(), content.as_bytes().to_vec());
                descriptor
            })
            .collect();

        let manifest = Manifest {
            schema_version: 2,
            media_type: Some("application/vnd.oci.image.manifest.v1+json".to_string()),
            config: Descriptor::for_content(config_media_type, b"{}"),
            layers: layer_descriptors,
        };
        let bytes = serde_json::to_vec(&manifest).unwrap();
        let digest = Descriptor::for_content("", &bytes).digest;

        let artifact = ArtifactRef::parse(reference).unwrap();
        let mut manifests = self.manifests.lock().unwrap();
        manifests.insert(artifact.to_string(), bytes.clone());
        manifests.insert(artifact.with_digest(&digest).to_string(), bytes);
        digest
    }

    /// Publish `manifest` as-is under `reference`, without storing any blobs.
    pub fn publish_manifest(&self, reference: &str, manifest: &Manifest) {
        let artifact = ArtifactRef::parse(reference).unwrap();
        let bytes = serde_json::to_vec(manifest).unwrap();
        self.manifests.lock().unwrap().insert(artifact.to_string(), bytes);
    }

    /// Report `digest` for every manifest instead of the real one.
    pub fn report_manifest_digest(&self, digest: &str) {
        *self.reported_digest.lock().unwrap() = Some(digest.to_string());
    }

    pub fn publish_compose(&self, reference: &str, layers: &[&str]) -> String {
        self.publish(reference, COMPOSE_PROJECT_MEDIA_TYPE, layers)
    }

    /// Every fetch of this blob fails permanently.
    pub fn break_blob(&self, content: &str) {
        let digest = Descriptor::for_content("", content.as_bytes()).digest;
        self.broken_blobs.lock().unwrap().insert(digest);
    }

    pub fn repair_blob(&self, content: &str) {
        let digest = Descriptor::for_content("", content.as_bytes()).digest;
        self.broken_blobs.lock().unwrap().remove(&digest);
    }

    /// This blob is served with bytes that do not match its digest.
    pub fn corrupt_blob(&self, content: &str) {
        let digest = Descriptor::for_content("", content.as_bytes()).digest;
        self.corrupt_blobs.lock().unwrap().insert(digest);
    }

    /// The next `count` calls of any kind fail with a transient error.
    pub fn fail_transiently(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Every call sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn manifest_calls(&self) -> usize {
        self.manifest_calls.load(Ordering::SeqCst)
    }

    pub fn blob_calls(&self) -> usize {
        self.blob_calls.load(Ordering::SeqCst)
    }

    async fn before_call(&self, reference: &ArtifactRef) -> Result<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let pending = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(Error::registry(reference.to_string(), "503 Service Unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactResolver for MemoryResolver {
    async fn get_manifest(&self, reference: &ArtifactRef) -> Result<(Vec<u8>, Descriptor)> {
        self.manifest_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call(reference).await?;

        let bytes = self
            .manifests
            .lock()
            .unwrap()
            .get(&reference.to_string())
            .cloned()
            .ok_or_else(|| Error::registry_permanent(reference.to_string(), "manifest unknown"))?;
        let mut descriptor =
            Descriptor::for_content("application/vnd.oci.image.manifest.v1+json", &bytes);
        if let Some(digest) = self.reported_digest.lock().unwrap().clone() {
            descriptor.digest = digest;
        }
        Ok((bytes, descriptor))
    }

    async fn get_blob(&self, reference: &ArtifactRef, descriptor: &Descriptor) -> Result<Vec<u8>> {
        self.blob_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call(reference).await?;

        assert_eq!(reference.digest(), Some(descriptor.digest.as_str()));
        if self.broken_blobs.lock().unwrap().contains(&descriptor.digest) {
            return Err(Error::registry_permanent(reference.to_string(), "blob unknown"));
        }
        let mut content = self
            .blobs
            .lock()
            .unwrap()
            .get(&descriptor.digest)
            .cloned()
            .ok_or_else(|| Error::registry_permanent(reference.to_string(), "blob unknown"))?;
        if self.corrupt_blobs.lock().unwrap().contains(&descriptor.digest) {
            content.extend_from_slice(b"# tampered\n");
        }
        Ok(content)
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        exponential_base: 2.0,
    }
}

pub fn loader_in(cache: &TempDir, resolver: &Arc<MemoryResolver>) -> OciRemoteLoader {
    let config = LoaderConfig::new()
        .with_cache_root(cache.path())
        .with_retry(fast_retry(3));
    OciRemoteLoader::new(&config, resolver.clone())
}

/// Directories directly under the OCI scheme directory.
pub fn scheme_entries(cache: &TempDir) -> Vec<String> {
    let dir = cache.path().join("oci");
    let Ok(read) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = read
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

//! Resource loader contract and registry.
//!
//! A resource loader maps a scheme-prefixed reference to a local file. The
//! registry holds loaders in registration order and dispatches each reference
//! to the first one that accepts it.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Error, Result};

/// Maps scheme-prefixed references to local files.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    /// Short name used in logs (e.g. "oci").
    fn name(&self) -> &'static str;

    /// Whether this loader handles `reference`. Must not perform I/O.
    fn accept(&self, reference: &str) -> bool;

    /// Resolve `reference` to a local file.
    ///
    /// `Ok(None)` means the source was deliberately skipped (offline mode)
    /// and the caller should carry on without it.
    async fn load(&self, reference: &str, cancel: &CancellationToken) -> Result<Option<PathBuf>>;
}

/// Ordered collection of resource loaders.
#[derive(Default)]
pub struct LoaderRegistry {
    loaders: Vec<Arc<dyn ResourceLoader>>,
}

impl LoaderRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a loader; earlier registrations take precedence.
    pub fn register<L: ResourceLoader + 'static>(&mut self, loader: L) {
        self.loaders.push(Arc::new(loader));
    }

    /// Append a loader wrapped in Arc.
    ///
    /// Useful when the same loader instance needs to be shared.
    pub fn register_arc(&mut self, loader: Arc<dyn ResourceLoader>) {
        self.loaders.push(loader);
    }

    /// Find the first loader that accepts `reference`.
    #[must_use]
    pub fn find(&self, reference: &str) -> Option<&Arc<dyn ResourceLoader>> {
        self.loaders.iter().find(|l| l.accept(reference))
    }

    /// Whether any loader accepts `reference`.
    #[must_use]
    pub fn accepts(&self, reference: &str) -> bool {
        self.find(reference).is_some()
    }

    /// Resolve `reference` with the first accepting loader.
    pub async fn load(&self, reference: &str, cancel: &CancellationToken) -> Result<Option<PathBuf>> {
        let loader = self
            .find(reference)
            .ok_or_else(|| Error::Unsupported(reference.to_string()))?;
        debug!(loader = loader.name(), reference, "Dispatching reference");
        loader.load(reference, cancel).await
    }

    /// Iterate over loaders in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ResourceLoader>> {
        self.loaders.iter()
    }

    /// Get the number of registered loaders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    /// Loader names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.loaders.iter().map(|l| l.name()).collect()
    }
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("loaders", &self.names())
            .finish()
    }
}

//! Subcommand implementations.
//!
//! Output goes to the supplied writer; diagnostics go through tracing.

use conflux_loader::{
    ComposeCache, LoaderConfig, LoaderRegistry, OCI_PREFIX, OCI_REMOTE_ENV, OciRemoteLoader,
    PrunePolicy, RegistryResolver, oci_remote_enabled,
};
use miette::IntoDiagnostic;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Loaders available in this process, in dispatch order.
pub fn build_registry(
    config: &LoaderConfig,
    insecure_registries: &[String],
) -> miette::Result<LoaderRegistry> {
    let mut registry = LoaderRegistry::new();
    if oci_remote_enabled()? {
        let resolver = RegistryResolver::with_insecure_registries(insecure_registries.to_vec());
        registry.register(OciRemoteLoader::new(config, Arc::new(resolver)));
    }
    Ok(registry)
}

/// Resolve each reference and print `<reference>\t<path>` lines.
#[instrument(skip(registry, cancel, out))]
pub async fn resolve(
    registry: &LoaderRegistry,
    references: &[String],
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> miette::Result<()> {
    for reference in references {
        if !registry.accepts(reference) && reference.starts_with(OCI_PREFIX) {
            return Err(miette::miette!(
                help = format!("Set {OCI_REMOTE_ENV}=1 to enable OCI references"),
                "OCI remote loading is disabled, cannot load '{reference}'"
            ));
        }

        match registry.load(reference, cancel).await? {
            Some(path) => writeln!(out, "{reference}\t{}", path.display()).into_diagnostic()?,
            None => writeln!(out, "{reference}\tskipped (offline)").into_diagnostic()?,
        }
    }
    Ok(())
}

/// Prune `cache` and print a one-line report.
#[instrument(skip(cache, out))]
pub fn prune(cache: &ComposeCache, policy: &PrunePolicy, out: &mut impl Write) -> miette::Result<()> {
    let report = cache.prune(policy)?;
    info!(
        entries = report.entries_removed,
        staging = report.staging_removed,
        bytes = report.bytes_freed,
        "Pruned cache"
    );
    writeln!(
        out,
        "Removed {} entries and {} staging directories, freed {} bytes",
        report.entries_removed, report.staging_removed, report.bytes_freed
    )
    .into_diagnostic()
}

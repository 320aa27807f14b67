//! Error types for remote configuration loading.

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving a remote reference.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Failed to parse an artifact reference.
    #[error("Invalid artifact reference '{reference}': {message}")]
    #[diagnostic(
        code(conflux::loader::invalid_reference),
        help("References look like oci://registry.example/repository:tag or ...@sha256:<digest>")
    )]
    InvalidReference {
        /// The reference as given by the caller.
        reference: String,
        /// Parser message.
        message: String,
    },

    /// The registry rejected or failed a request.
    #[error("Registry request for '{reference}' failed: {message}")]
    #[diagnostic(code(conflux::loader::registry))]
    Registry {
        /// Reference being fetched.
        reference: String,
        /// Error message from the registry client.
        message: String,
        /// Whether retrying the request may succeed.
        transient: bool,
    },

    /// The manifest could not be decoded.
    #[error("Invalid manifest for '{reference}': {source}")]
    #[diagnostic(code(conflux::loader::invalid_manifest))]
    InvalidManifest {
        /// Reference the manifest was fetched for.
        reference: String,
        /// Decoding error.
        #[source]
        source: serde_json::Error,
    },

    /// The artifact is not a compose project.
    #[error("{reference} is not a compose project OCI artifact, but {media_type}")]
    #[diagnostic(
        code(conflux::loader::not_compose_project),
        help("Publish the project with a config media type of application/vnd.docker.compose.project")
    )]
    NotComposeProject {
        /// Reference that was resolved.
        reference: String,
        /// The config media type found in the manifest.
        media_type: String,
    },

    /// Fetched content does not hash to its declared digest.
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    #[diagnostic(code(conflux::loader::digest_mismatch))]
    DigestMismatch {
        /// The declared digest.
        expected: String,
        /// The computed digest.
        actual: String,
    },

    /// A digest is malformed or uses an unsupported algorithm.
    #[error("Invalid digest '{digest}': {message}")]
    #[diagnostic(code(conflux::loader::invalid_digest))]
    InvalidDigest {
        /// The digest as received.
        digest: String,
        /// What is wrong with it.
        message: String,
    },

    /// I/O error during cache operations.
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(conflux::loader::io),
        help("Check permissions on the cache directory")
    )]
    Io {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available.
        path: Option<Box<Path>>,
        /// Operation that failed (e.g. "create", "write", "rename").
        operation: String,
    },

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    #[diagnostic(code(conflux::loader::cancelled))]
    Cancelled,

    /// An environment variable holds an unusable value.
    #[error("{name} environment variable expects boolean value, got '{value}'")]
    #[diagnostic(code(conflux::loader::invalid_env))]
    InvalidEnv {
        /// Variable name.
        name: String,
        /// Offending value.
        value: String,
    },

    /// No registered loader accepts the reference.
    #[error("No loader accepts '{0}'")]
    #[diagnostic(
        code(conflux::loader::unsupported),
        help("Remote loaders are opt-in; check that the matching loader is enabled")
    )]
    Unsupported(String),
}

impl Error {
    /// Create an invalid reference error.
    #[must_use]
    pub fn invalid_reference(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Create a registry error that may succeed when retried.
    #[must_use]
    pub fn registry(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Registry {
            reference: reference.into(),
            message: message.into(),
            transient: true,
        }
    }

    /// Create a registry error that retrying cannot fix.
    #[must_use]
    pub fn registry_permanent(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Registry {
            reference: reference.into(),
            message: message.into(),
            transient: false,
        }
    }

    /// Create a digest mismatch error.
    #[must_use]
    pub fn digest_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::DigestMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an invalid digest error.
    #[must_use]
    pub fn invalid_digest(digest: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDigest {
            digest: digest.into(),
            message: message.into(),
        }
    }

    /// Create an I/O error with path context.
    #[must_use]
    pub fn io(source: std::io::Error, path: impl AsRef<Path>, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Whether the failed operation is worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Registry {
                transient: true,
                ..
            }
        )
    }
}

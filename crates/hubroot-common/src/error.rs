//! Unified error type for the hubroot workspace.
//!
//! Every variant is fatal to a run: the pipeline has no local recovery,
//! so the first error aborts and is reported once to the caller. A child
//! process exiting with a non-zero status is *not* an error and never
//! appears here.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum HubrootError {
    /// The image reference string could not be parsed.
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidReference {
        /// The raw reference as supplied by the caller.
        reference: String,
        /// Why the reference was rejected.
        reason: &'static str,
    },

    /// The token endpoint refused or returned an unusable credential.
    #[error("authentication for {repository} failed (HTTP {status}): {message}")]
    Auth {
        /// Repository the token was requested for.
        repository: String,
        /// HTTP status returned by the token endpoint.
        status: u16,
        /// Description of the failure.
        message: String,
    },

    /// The manifest endpoint returned a non-success status.
    #[error("fetch image manifest for {repository}:{tag} failed with status code: {status}")]
    Manifest {
        /// Repository whose manifest was requested.
        repository: String,
        /// Tag whose manifest was requested.
        tag: String,
        /// HTTP status returned by the registry.
        status: u16,
    },

    /// A registry response body was not well-formed.
    #[error("malformed {what}: {source}")]
    Decode {
        /// The document that failed to decode.
        what: &'static str,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A layer blob could not be fetched or failed verification.
    #[error("failed to fetch blob {digest}: {message}")]
    BlobFetch {
        /// Digest of the layer being fetched.
        digest: String,
        /// Description of the failure.
        message: String,
    },

    /// A layer archive could not be unpacked.
    #[error("failed to extract {archive}: {source}")]
    Extraction {
        /// Path of the archive being unpacked.
        archive: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A directory or file needed for the root filesystem could not be prepared.
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The root change or namespace primitive failed.
    #[error("isolation failed: {message}")]
    Isolation {
        /// Description of the failed primitive.
        message: String,
    },

    /// The child process could not be started or did not finish.
    #[error("failed to launch '{command}': {message}")]
    Launch {
        /// Command that was being launched.
        command: String,
        /// Description of the failure.
        message: String,
    },

    /// A request never produced an HTTP response.
    #[error("request to {url} failed: {message}")]
    Transport {
        /// URL that was being requested.
        url: String,
        /// Description of the transport failure.
        message: String,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },
}

impl HubrootError {
    /// Returns the HTTP status carried by registry errors, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Auth { status, .. } | Self::Manifest { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` when the registry reported the manifest as missing.
    ///
    /// This is the error users hit for typos and nonexistent tags.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Manifest { status: 404, .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, HubrootError>;

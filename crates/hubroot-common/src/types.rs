//! Domain primitive types used across the hubroot workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A repository and tag identifying one image on the registry.
///
/// Immutable once constructed; parsing lives in `hubroot_image::reference`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    repository: String,
    tag: String,
}

impl ImageReference {
    /// Creates a reference from an already-namespaced repository and a tag.
    #[must_use]
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Returns the namespaced repository, e.g. `library/alpine`.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Returns the tag, e.g. `latest`.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Scope string requested from the token endpoint.
    #[must_use]
    pub fn pull_scope(&self) -> String {
        format!("repository:{}:pull", self.repository)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Lifecycle stage of a single pipeline run.
///
/// Stages advance strictly in declaration order; a failure at any stage
/// ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RunStage {
    /// Nothing has happened yet.
    Created,
    /// The image string has been parsed.
    Resolved,
    /// A pull token has been issued.
    Authenticated,
    /// The layer list is known.
    ManifestFetched,
    /// Every layer is unpacked and devices are seeded.
    LayersExtracted,
    /// The process root now points at the assembled directory.
    RootChanged,
    /// The child process has been spawned.
    Running,
    /// The child process has terminated.
    Exited,
}

impl RunStage {
    /// The stage that must follow this one, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::Resolved),
            Self::Resolved => Some(Self::Authenticated),
            Self::Authenticated => Some(Self::ManifestFetched),
            Self::ManifestFetched => Some(Self::LayersExtracted),
            Self::LayersExtracted => Some(Self::RootChanged),
            Self::RootChanged => Some(Self::Running),
            Self::Running => Some(Self::Exited),
            Self::Exited => None,
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Resolved => write!(f, "resolved"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::ManifestFetched => write!(f, "manifest-fetched"),
            Self::LayersExtracted => write!(f, "layers-extracted"),
            Self::RootChanged => write!(f, "root-changed"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

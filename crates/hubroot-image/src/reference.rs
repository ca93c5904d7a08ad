//! Image reference parsing.
//!
//! References have the form `name[:tag]`. The string is split on the
//! first colon, the tag defaults to `latest`, and a name without a `/`
//! is placed under the default namespace (`library/` on Docker Hub).
//! No network access happens here and no whitespace is trimmed. An
//! explicit empty tag (`alpine:`) is kept as is; the registry rejects it.

use hubroot_common::constants::{DEFAULT_NAMESPACE, DEFAULT_TAG};
use hubroot_common::error::{HubrootError, Result};
use hubroot_common::types::ImageReference;

/// Parses `image` using the default `library` namespace.
///
/// # Errors
///
/// Returns `HubrootError::InvalidReference` if the repository is empty.
pub fn resolve(image: &str) -> Result<ImageReference> {
    resolve_in_namespace(image, DEFAULT_NAMESPACE)
}

/// Parses `image`, prefixing single-segment names with `namespace`.
///
/// An empty `namespace` leaves single-segment names untouched.
///
/// # Errors
///
/// Returns `HubrootError::InvalidReference` if the repository is empty.
pub fn resolve_in_namespace(image: &str, namespace: &str) -> Result<ImageReference> {
    let (name, tag) = image.split_once(':').unwrap_or((image, DEFAULT_TAG));

    if name.is_empty() {
        return Err(HubrootError::InvalidReference {
            reference: image.to_string(),
            reason: "repository name is empty",
        });
    }

    let repository = if name.contains('/') || namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}/{name}")
    };

    let reference = ImageReference::new(repository, tag);
    tracing::debug!(image, reference = %reference, "resolved image reference");
    Ok(reference)
}

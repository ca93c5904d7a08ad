//! Image manifests as served by the registry's manifest endpoint.
//!
//! The wire format is the schema-1 document:
//!
//! ```json
//! { "name": "library/alpine", "tag": "latest",
//!   "fsLayers": [ { "blobSum": "sha256:..." } ] }
//! ```
//!
//! Layer order is kept exactly as served. Extraction follows it.

use std::fmt;

use hubroot_common::constants::LAYER_ARCHIVE_SUFFIX;
use hubroot_common::error::{HubrootError, Result};
use hubroot_common::types::ImageReference;
use serde::{Deserialize, Serialize};

/// Content identifier of one layer blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerRef {
    /// Digest, e.g. `sha256:9a0b...`. Also the fetch key on the blob endpoint.
    pub digest: String,
}

impl LayerRef {
    /// Creates a layer reference from a digest string.
    #[must_use]
    pub fn new(digest: impl Into<String>) -> Self {
        Self {
            digest: digest.into(),
        }
    }

    /// Local file name for the downloaded archive: `<digest>.tar.gz`.
    ///
    /// # Errors
    ///
    /// Returns `HubrootError::BlobFetch` if the digest is empty or could
    /// escape the staging directory.
    pub fn archive_file_name(&self) -> Result<String> {
        let digest = &self.digest;
        if digest.is_empty()
            || digest.contains(['/', '\\', '\0'])
            || digest == "."
            || digest == ".."
        {
            return Err(HubrootError::BlobFetch {
                digest: digest.clone(),
                message: "digest is not a valid blob identifier".into(),
            });
        }
        Ok(format!("{digest}{LAYER_ARCHIVE_SUFFIX}"))
    }
}

impl fmt::Display for LayerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest)
    }
}

/// Identity and ordered layer list of one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Repository the registry reports for this image.
    pub name: String,
    /// Tag the registry reports for this image.
    pub tag: String,
    /// Layers in registry order.
    pub layers: Vec<LayerRef>,
}

#[derive(Debug, Deserialize)]
struct ManifestDocument {
    #[serde(default)]
    name: String,
    #[serde(default)]
    tag: String,
    #[serde(rename = "fsLayers")]
    fs_layers: Vec<FsLayer>,
}

#[derive(Debug, Deserialize)]
struct FsLayer {
    #[serde(rename = "blobSum")]
    blob_sum: String,
}

impl Manifest {
    /// Decodes a manifest body.
    ///
    /// A missing `name` or `tag` falls back to the requested reference so
    /// blob URLs can always be formed.
    ///
    /// # Errors
    ///
    /// Returns `HubrootError::Decode` if the body is not a well-formed
    /// manifest document.
    pub fn from_json(body: &[u8], requested: &ImageReference) -> Result<Self> {
        let document: ManifestDocument =
            serde_json::from_slice(body).map_err(|source| HubrootError::Decode {
                what: "image manifest",
                source,
            })?;

        let name = if document.name.is_empty() {
            requested.repository().to_string()
        } else {
            document.name
        };
        let tag = if document.tag.is_empty() {
            requested.tag().to_string()
        } else {
            document.tag
        };

        Ok(Self {
            name,
            tag,
            layers: document
                .fs_layers
                .into_iter()
                .map(|l| LayerRef::new(l.blob_sum))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alpine() -> ImageReference {
        ImageReference::new("library/alpine", "latest")
    }

    #[test]
    fn layers_keep_registry_order() {
        let body = br#"{
            "schemaVersion": 1,
            "name": "library/alpine",
            "tag": "latest",
            "architecture": "amd64",
            "fsLayers": [
                {"blobSum": "sha256:cc"},
                {"blobSum": "sha256:aa"},
                {"blobSum": "sha256:bb"}
            ]
        }"#;
        let manifest = Manifest::from_json(body, &alpine()).expect("decode failed");
        let digests: Vec<_> = manifest.layers.iter().map(|l| l.digest.as_str()).collect();
        assert_eq!(digests, ["sha256:cc", "sha256:aa", "sha256:bb"]);
        assert_eq!(manifest.name, "library/alpine");
    }

    #[test]
    fn missing_name_and_tag_fall_back_to_reference() {
        let body = br#"{"fsLayers": []}"#;
        let manifest =
            Manifest::from_json(body, &ImageReference::new("library/busybox", "1.36"))
                .expect("decode failed");
        assert_eq!(manifest.name, "library/busybox");
        assert_eq!(manifest.tag, "1.36");
        assert!(manifest.layers.is_empty());
    }

    #[test]
    fn missing_fs_layers_is_decode_error() {
        let body = br#"{"schemaVersion": 2, "layers": []}"#;
        let err = Manifest::from_json(body, &alpine()).expect_err("should fail");
        assert!(matches!(err, HubrootError::Decode { .. }));
    }

    #[test]
    fn non_json_is_decode_error() {
        let err = Manifest::from_json(b"<html>oops</html>", &alpine()).expect_err("should fail");
        assert!(matches!(err, HubrootError::Decode { .. }));
    }

    #[test]
    fn archive_file_name_appends_suffix() {
        let layer = LayerRef::new("sha256:abc");
        assert_eq!(
            layer.archive_file_name().expect("name"),
            "sha256:abc.tar.gz"
        );
    }

    #[test]
    fn archive_file_name_rejects_path_traversal() {
        for digest in ["", "..", "../../etc/passwd", "sha256:a/b"] {
            assert!(LayerRef::new(digest).archive_file_name().is_err(), "{digest}");
        }
    }
}

//! Registry client: tokens, manifests, and layer blobs.
//!
//! Speaks the subset of the registry HTTP API v2 needed for an anonymous
//! pull from a single hub:
//!
//! 1. `GET <auth_url>?service=<service>&scope=repository:<repo>:pull` for a
//!    bearer token,
//! 2. `GET <registry>/v2/<repo>/manifests/<tag>` for the layer list,
//! 3. `GET <registry>/v2/<repo>/blobs/<digest>` once per layer.
//!
//! Every request carries the configured deadline. Transport failures,
//! `429`, and `5xx` responses are retried with exponential backoff up to
//! `max_retries` times; other statuses are returned at once. A body that
//! fails mid-stream is not retried.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use hubroot_common::config::RegistryConfig;
use hubroot_common::constants::{
    APP_NAME, DISTRIBUTION_API_VERSION, DISTRIBUTION_API_VERSION_HEADER,
};
use hubroot_common::error::{HubrootError, Result};
use hubroot_common::types::ImageReference;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::AUTHORIZATION;

use crate::auth::{AuthToken, TokenResponse};
use crate::hash::{self, HashingWriter};
use crate::layer::extract_archive;
use crate::manifest::{LayerRef, Manifest};
use crate::reference;
use crate::rootfs;

/// One layer that was downloaded and unpacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulledLayer {
    /// The layer as listed in the manifest.
    pub layer: LayerRef,
    /// Number of compressed bytes downloaded.
    pub size_bytes: u64,
}

/// Blocking client for one registry.
#[derive(Debug)]
pub struct RegistryClient {
    config: RegistryConfig,
    http: Client,
}

impl RegistryClient {
    /// Builds a client for the configured registry.
    ///
    /// # Errors
    ///
    /// Returns `HubrootError::Config` if the configuration is invalid or
    /// the HTTP client cannot be constructed.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(format!("{APP_NAME}/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HubrootError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { config, http })
    }

    /// Returns the configuration this client was built with.
    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Parses `image` using this registry's default namespace.
    ///
    /// # Errors
    ///
    /// Returns `HubrootError::InvalidReference` for an empty repository or tag.
    pub fn resolve(&self, image: &str) -> Result<ImageReference> {
        reference::resolve_in_namespace(image, &self.config.default_namespace)
    }

    /// Requests a pull token scoped to the reference's repository.
    ///
    /// # Errors
    ///
    /// Returns `HubrootError::Auth` on a non-success status or when the
    /// body carries no usable token, and `HubrootError::Transport` when no
    /// response arrives.
    pub fn authenticate(&self, reference: &ImageReference) -> Result<AuthToken> {
        let url = &self.config.auth_url;
        let scope = reference.pull_scope();
        tracing::info!(repository = reference.repository(), "requesting pull token");

        let response = self.send(url, |http| {
            http.get(url)
                .query(&[("service", self.config.service.as_str()), ("scope", scope.as_str())])
        })?;

        let status = response.status();
        let auth_error = |message: String| HubrootError::Auth {
            repository: reference.repository().to_string(),
            status: status.as_u16(),
            message,
        };
        if !status.is_success() {
            return Err(auth_error("token endpoint returned a non-success status".into()));
        }

        let body = response.bytes().map_err(|e| transport_error(url, &e))?;
        let parsed: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| auth_error(format!("malformed token response: {e}")))?;
        let token = parsed
            .into_token()
            .ok_or_else(|| auth_error("token response carried no token".into()))?;

        tracing::debug!(repository = reference.repository(), "pull token issued");
        Ok(token)
    }

    /// Fetches the manifest for the reference's repository and tag.
    ///
    /// # Errors
    ///
    /// Returns `HubrootError::Manifest` carrying the HTTP status on a
    /// non-success response (`is_not_found()` for 404),
    /// `HubrootError::Decode` for a malformed body, and
    /// `HubrootError::Transport` when no response arrives.
    pub fn fetch_manifest(&self, reference: &ImageReference, token: &AuthToken) -> Result<Manifest> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.config.registry_base(),
            reference.repository(),
            reference.tag()
        );
        tracing::info!(image = %reference, "fetching image manifest");

        let response = self.send(&url, |http| authorized(http.get(&url), token))?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(image = %reference, status = status.as_u16(), "manifest fetch refused");
            return Err(HubrootError::Manifest {
                repository: reference.repository().to_string(),
                tag: reference.tag().to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().map_err(|e| transport_error(&url, &e))?;
        let manifest = Manifest::from_json(&body, reference)?;
        tracing::info!(image = %reference, layers = manifest.layers.len(), "manifest fetched");
        Ok(manifest)
    }

    /// Downloads every layer in manifest order and unpacks it into `dest`.
    ///
    /// Archives are staged in `dest` itself and removed after extraction.
    ///
    /// # Errors
    ///
    /// See [`Self::fetch_and_extract_layers_into`].
    pub fn fetch_and_extract_layers(
        &self,
        manifest: &Manifest,
        token: &AuthToken,
        dest: &Path,
    ) -> Result<Vec<PulledLayer>> {
        self.fetch_and_extract_layers_into(manifest, token, dest, dest)
    }

    /// Downloads every layer in manifest order into `staging` and unpacks
    /// it into `dest`.
    ///
    /// The first failure aborts the pull: later layers are not fetched and
    /// nothing is retried at this level. Each archive is deleted after a
    /// successful extraction; a failed delete is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns `HubrootError::BlobFetch` for a refused, interrupted, or
    /// mismatching download, `HubrootError::Extraction` for an archive that
    /// cannot be unpacked, and `HubrootError::Filesystem` when `staging`
    /// or `dest` cannot be written.
    pub fn fetch_and_extract_layers_into(
        &self,
        manifest: &Manifest,
        token: &AuthToken,
        staging: &Path,
        dest: &Path,
    ) -> Result<Vec<PulledLayer>> {
        rootfs::prepare_root_dir(staging)?;
        rootfs::prepare_root_dir(dest)?;

        let total = manifest.layers.len();
        let mut pulled = Vec::with_capacity(total);
        for (index, layer) in manifest.layers.iter().enumerate() {
            tracing::info!(index, total, digest = %layer, "pulling layer");
            let archive = staging.join(layer.archive_file_name()?);

            let size_bytes = match self.download_blob(&manifest.name, layer, token, &archive) {
                Ok(size_bytes) => size_bytes,
                Err(e) => {
                    let _ = std::fs::remove_file(&archive);
                    return Err(e);
                }
            };
            let _ = extract_archive(&archive, dest)?;

            if let Err(e) = std::fs::remove_file(&archive) {
                tracing::warn!(archive = %archive.display(), error = %e, "failed to remove layer archive");
            }
            pulled.push(PulledLayer {
                layer: layer.clone(),
                size_bytes,
            });
        }

        tracing::info!(layers = pulled.len(), dest = %dest.display(), "all layers extracted");
        Ok(pulled)
    }

    /// Streams one blob to `archive`, hashing it on the way.
    fn download_blob(
        &self,
        repository: &str,
        layer: &LayerRef,
        token: &AuthToken,
        archive: &Path,
    ) -> Result<u64> {
        let url = format!(
            "{}/v2/{}/blobs/{}",
            self.config.registry_base(),
            repository,
            layer.digest
        );
        let blob_error = |message: String| HubrootError::BlobFetch {
            digest: layer.digest.clone(),
            message,
        };

        let mut response = self.send(&url, |http| authorized(http.get(&url), token))?;
        let status = response.status();
        if !status.is_success() {
            return Err(blob_error(format!("registry returned HTTP {status}")));
        }

        let file = File::create(archive).map_err(|e| HubrootError::Filesystem {
            path: archive.to_path_buf(),
            source: e,
        })?;
        let mut writer = HashingWriter::new(BufWriter::new(file));
        let _ = std::io::copy(&mut response, &mut writer)
            .map_err(|e| blob_error(format!("streaming to {} failed: {e}", archive.display())))?;

        let (mut inner, computed, written) = writer.finish();
        inner.flush().map_err(|e| HubrootError::Filesystem {
            path: archive.to_path_buf(),
            source: e,
        })?;
        drop(inner);

        if self.config.verify_digests {
            hash::verify_digest(&layer.digest, &computed)?;
        }
        tracing::debug!(digest = %layer, bytes = written, "blob downloaded");
        Ok(written)
    }

    /// Sends a GET built by `build`, retrying transient failures.
    fn send(&self, url: &str, build: impl Fn(&Client) -> RequestBuilder) -> Result<Response> {
        let mut attempt = 0;
        loop {
            let retries_left = attempt < self.config.max_retries;
            match build(&self.http).send() {
                Ok(response) if retries_left && is_transient(response.status()) => {
                    tracing::warn!(url, status = response.status().as_u16(), attempt, "transient registry status, retrying");
                }
                Ok(response) => return Ok(response),
                Err(e) if retries_left && !e.is_builder() => {
                    tracing::warn!(url, error = %e, attempt, "registry request failed, retrying");
                }
                Err(e) => return Err(transport_error(url, &e)),
            }
            std::thread::sleep(self.config.backoff_for(attempt));
            attempt += 1;
        }
    }
}

fn authorized(request: RequestBuilder, token: &AuthToken) -> RequestBuilder {
    request
        .header(DISTRIBUTION_API_VERSION_HEADER, DISTRIBUTION_API_VERSION)
        .header(AUTHORIZATION, token.bearer())
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn transport_error(url: &str, error: &reqwest::Error) -> HubrootError {
    HubrootError::Transport {
        url: url.to_string(),
        message: error.to_string(),
    }
}

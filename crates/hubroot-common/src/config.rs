//! Configuration models for the registry client and the launcher.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{HubrootError, Result};

/// Endpoints and network policy for the registry client.
///
/// The default targets Docker Hub. Every field can be overridden from a
/// JSON file; missing fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Base URL of the registry API, without the `/v2` suffix.
    pub registry_url: String,
    /// Token-issuing endpoint.
    pub auth_url: String,
    /// Service name passed to the token endpoint.
    pub service: String,
    /// Namespace prepended to single-segment repository names.
    pub default_namespace: String,
    /// Deadline for each HTTP request, in seconds.
    pub timeout_secs: u64,
    /// Retries for idempotent GETs after the first attempt.
    pub max_retries: u32,
    /// Base delay between retries, in milliseconds. Doubles per attempt.
    pub retry_backoff_ms: u64,
    /// Whether `sha256:` blob digests are checked after download.
    pub verify_digests: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_url: constants::DEFAULT_REGISTRY_URL.into(),
            auth_url: constants::DEFAULT_AUTH_URL.into(),
            service: constants::DEFAULT_AUTH_SERVICE.into(),
            default_namespace: constants::DEFAULT_NAMESPACE.into(),
            timeout_secs: constants::DEFAULT_HTTP_TIMEOUT_SECS,
            max_retries: constants::DEFAULT_MAX_RETRIES,
            retry_backoff_ms: constants::DEFAULT_RETRY_BACKOFF_MS,
            verify_digests: true,
        }
    }
}

impl RegistryConfig {
    /// Loads a configuration from a JSON file, filling unset fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns `HubrootError::Config` if the file cannot be read or parsed,
    /// or if the resulting configuration fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| HubrootError::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| HubrootError::Config {
            message: format!("cannot parse {}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Per-request deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay before retry number `attempt` (zero-based), capped.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let millis = self
            .retry_backoff_ms
            .saturating_mul(factor)
            .min(constants::MAX_RETRY_BACKOFF_MS);
        Duration::from_millis(millis)
    }

    /// Checks that endpoints are absolute HTTP(S) URLs and the deadline is non-zero.
    ///
    /// # Errors
    ///
    /// Returns `HubrootError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        for (field, url) in [("registry_url", &self.registry_url), ("auth_url", &self.auth_url)] {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(HubrootError::Config {
                    message: format!("{field} must be an http(s) URL, got '{url}'"),
                });
            }
        }
        if self.service.is_empty() {
            return Err(HubrootError::Config {
                message: "service must not be empty".into(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(HubrootError::Config {
                message: "timeout_secs must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Registry base URL with any trailing slash removed.
    #[must_use]
    pub fn registry_base(&self) -> &str {
        self.registry_url.trim_end_matches('/')
    }
}

/// How `/dev/null` is provided inside the assembled root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceMode {
    /// Empty regular file. Enough for programs that only open the path.
    #[default]
    Placeholder,
    /// Real `1:3` character device, falling back to a placeholder without privilege.
    CharDevice,
}

/// Options for the isolated launch step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Start the child in a new PID namespace.
    pub pid_namespace: bool,
    /// How device nodes are seeded before the root change.
    pub device_mode: DeviceMode,
    /// Kill the child if it runs longer than this many seconds.
    pub timeout_secs: Option<u64>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            pid_namespace: true,
            device_mode: DeviceMode::default(),
            timeout_secs: None,
        }
    }
}

impl LaunchConfig {
    /// Deadline for the child process, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

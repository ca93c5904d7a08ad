//! System-wide constants and default endpoints.

/// Registry API base URL used when no override is configured.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.hub.docker.com";

/// Token-issuing endpoint for the default registry.
pub const DEFAULT_AUTH_URL: &str = "https://auth.docker.io/token";

/// Service name the token endpoint expects for the default registry.
pub const DEFAULT_AUTH_SERVICE: &str = "registry.docker.io";

/// Namespace prepended to single-segment repository names.
pub const DEFAULT_NAMESPACE: &str = "library";

/// Tag used when an image reference carries none.
pub const DEFAULT_TAG: &str = "latest";

/// Value of the `Docker-Distribution-API-Version` request header.
pub const DISTRIBUTION_API_VERSION: &str = "registry/2.0";

/// Header name carrying the distribution API version.
pub const DISTRIBUTION_API_VERSION_HEADER: &str = "Docker-Distribution-API-Version";

/// Default per-request deadline, in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Default number of retries for idempotent registry requests.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Base delay between registry retries, in milliseconds.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;

/// Upper bound on a single retry delay, in milliseconds.
pub const MAX_RETRY_BACKOFF_MS: u64 = 5_000;

/// Suffix appended to a layer digest to name its local archive.
pub const LAYER_ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Prefix for root directories created by the CLI.
pub const ROOT_DIR_PREFIX: &str = "hubroot-";

/// Exit code reported when the pipeline fails before the child starts.
pub const PIPELINE_FAILURE_EXIT_CODE: u8 = 125;

/// Offset added to a signal number to form a shell-style exit code.
pub const SIGNAL_EXIT_OFFSET: i32 = 128;

/// Application name used in CLI output and the HTTP user agent.
pub const APP_NAME: &str = "hubroot";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "hubroot";

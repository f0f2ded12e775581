//! Configuration loading and types for OssBridge.
//!
//! Configuration is read once from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! gateway: networking, protocol translation, the backend endpoint,
//! logging, and metrics.  Nothing mutates the value after startup.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Protocol translation settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Backend object-store settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Region reported by `GET ?location`.
    #[serde(default = "default_region")]
    pub region: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            region: default_region(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Protocol translation settings shared by every request.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Domain suffix for virtual-hosted-style requests
    /// (`bucket.<storage_domain>`).  Empty disables virtual hosting.
    #[serde(default)]
    pub storage_domain: String,

    /// Accept multipart-upload sub-resources.
    #[serde(default = "default_true")]
    pub allow_multipart_uploads: bool,

    /// Enable the ACL-aware request variant (eager pre-authentication,
    /// sysmeta ACLs, per-call permission checks).
    #[serde(default)]
    pub oss_acl: bool,

    /// Ask the backend to access-log the translated calls even when an
    /// outer stage already logged the client request.
    #[serde(default)]
    pub force_swift_request_proxy_log: bool,

    /// Enforce DNS-compatible bucket names.
    #[serde(default = "default_true")]
    pub dns_compliant_bucket_names: bool,

    /// Maximum accepted size of an ACL request body.
    #[serde(default = "default_max_acl_body_size")]
    pub max_acl_body_size: usize,

    /// Maximum keys in one multi-object delete.
    #[serde(default = "default_max_multi_delete_objects")]
    pub max_multi_delete_objects: usize,

    /// Maximum accepted size of a multi-object delete body.
    #[serde(default = "default_max_multi_delete_body_size")]
    pub max_multi_delete_body_size: usize,

    /// Upper bound for `max-keys` in bucket listings.
    #[serde(default = "default_max_bucket_listing")]
    pub max_bucket_listing: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            storage_domain: String::new(),
            allow_multipart_uploads: true,
            oss_acl: false,
            force_swift_request_proxy_log: false,
            dns_compliant_bucket_names: true,
            max_acl_body_size: default_max_acl_body_size(),
            max_multi_delete_objects: default_max_multi_delete_objects(),
            max_multi_delete_body_size: default_max_multi_delete_body_size(),
            max_bucket_listing: default_max_bucket_listing(),
        }
    }
}

/// Backend object-store endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the backend proxy (scheme, host, port).
    #[serde(default = "default_backend_endpoint")]
    pub endpoint: String,

    /// API version path segment prepended to every backend path.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Per-call transport timeout in seconds.
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: default_backend_endpoint(),
            api_version: default_api_version(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_region() -> String {
    "oss-cn-hangzhou".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_acl_body_size() -> usize {
    200 * 1024
}

fn default_max_multi_delete_objects() -> usize {
    1000
}

fn default_max_multi_delete_body_size() -> usize {
    61_365
}

fn default_max_bucket_listing() -> u32 {
    1000
}

fn default_backend_endpoint() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_backend_timeout() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8090);
        assert!(config.gateway.allow_multipart_uploads);
        assert!(!config.gateway.oss_acl);
        assert!(config.gateway.storage_domain.is_empty());
        assert_eq!(config.backend.api_version, "v1");
        assert_eq!(config.gateway.max_acl_body_size, 204_800);
    }

    #[test]
    fn test_load_config_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "gateway:\n  storage_domain: oss.example.com\n  oss_acl: true\nbackend:\n  endpoint: http://swift:8080\n"
        )
        .expect("write yaml");

        let config = load_config(file.path()).expect("load");
        assert_eq!(config.gateway.storage_domain, "oss.example.com");
        assert!(config.gateway.oss_acl);
        assert!(config.gateway.dns_compliant_bucket_names);
        assert_eq!(config.backend.endpoint, "http://swift:8080");
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config("/nonexistent/ossbridge.yaml").is_err());
    }
}

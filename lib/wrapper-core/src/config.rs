//! Wrapper configuration, loaded once at startup and shared read-only

use crate::{CoreError, Result};
use http::HeaderName;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable naming an optional YAML configuration file
pub const CONFIG_PATH_ENV: &str = "WRAPPER_CONFIG";

/// Immutable process-wide configuration for the tenant wrapper.
///
/// Built once in `main`, validated, then shared behind an `Arc` by every
/// request task. Nothing mutates it after startup.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WrapperConfig {
    /// Base URL of the proxied LLMTwins service, without trailing slash
    pub upstream_base_url: String,
    /// Tenant used when the caller sends no tenant header
    pub default_tenant: String,
    /// Accepted tenants; empty means every tenant is accepted
    pub valid_tenants: Vec<String>,
    /// Header carrying the tenant both inbound and towards upstream
    pub tenant_header: String,
    /// Token placed between tenant and session identifier
    pub tenant_separator: String,
    /// Per-call upstream timeout in seconds
    pub upstream_timeout_secs: u64,
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Attach permissive CORS headers to every response
    pub cors_enabled: bool,
    pub logging: LoggingConfig,
}

/// Logging output settings
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            upstream_base_url: "http://localhost:8000".to_string(),
            default_tenant: "default".to_string(),
            valid_tenants: Vec::new(),
            tenant_header: "X-Tenant-ID".to_string(),
            tenant_separator: "::".to_string(),
            upstream_timeout_secs: 300,
            host: "0.0.0.0".to_string(),
            port: 8004,
            cors_enabled: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl WrapperConfig {
    /// Load configuration the way the gateway binary does: optional YAML file
    /// named by `WRAPPER_CONFIG`, then environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!("Reading wrapper configuration from {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("LLMTWINS_BASE_URL") {
            self.upstream_base_url = url;
        }
        if let Some(tenant) = lookup("DEFAULT_TENANT") {
            self.default_tenant = tenant;
        }
        if let Some(tenants) = lookup("VALID_TENANTS") {
            self.valid_tenants = tenants
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(header) = lookup("TENANT_HEADER") {
            self.tenant_header = header;
        }
        if let Some(separator) = lookup("TENANT_SEPARATOR") {
            self.tenant_separator = separator;
        }
        if let Some(timeout) = lookup("UPSTREAM_TIMEOUT") {
            match timeout.parse() {
                Ok(secs) => self.upstream_timeout_secs = secs,
                Err(_) => warn!("Ignoring non-numeric UPSTREAM_TIMEOUT: {}", timeout),
            }
        }
        if let Some(host) = lookup("WRAPPER_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("WRAPPER_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => warn!("Ignoring invalid WRAPPER_PORT: {}", port),
            }
        }
    }

    /// Check invariants the proxy relies on
    pub fn validate(&mut self) -> Result<()> {
        let trimmed = self.upstream_base_url.trim_end_matches('/').to_string();
        let url = url::Url::parse(&trimmed).map_err(|e| {
            CoreError::InvalidConfiguration(format!(
                "upstream_base_url '{}' is not a valid URL: {}",
                self.upstream_base_url, e
            ))
        })?;
        if url.scheme() != "http" {
            return Err(CoreError::InvalidConfiguration(format!(
                "upstream_base_url must use http, got '{}'",
                url.scheme()
            )));
        }
        self.upstream_base_url = trimmed;

        if self.tenant_separator.is_empty() {
            return Err(CoreError::InvalidConfiguration(
                "tenant_separator must not be empty".to_string(),
            ));
        }
        if self.default_tenant.trim().is_empty() {
            return Err(CoreError::InvalidConfiguration(
                "default_tenant must not be empty".to_string(),
            ));
        }
        self.tenant_header_name()?;
        if self.upstream_timeout_secs == 0 {
            return Err(CoreError::InvalidConfiguration(
                "upstream_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parsed tenant header name
    pub fn tenant_header_name(&self) -> Result<HeaderName> {
        HeaderName::from_bytes(self.tenant_header.as_bytes()).map_err(|e| {
            CoreError::InvalidConfiguration(format!(
                "tenant_header '{}' is not a valid header name: {}",
                self.tenant_header, e
            ))
        })
    }

    /// Upstream call timeout
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    /// Listen address as `host:port`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

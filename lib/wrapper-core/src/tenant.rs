//! Per-request tenant resolution

use crate::{CoreError, Result, WrapperConfig};
use std::collections::HashSet;
use std::fmt;

/// A resolved, validated tenant identifier. Never empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tenant(String);

impl Tenant {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Tenant {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolves the caller's tenant from the raw tenant header value.
///
/// Stateless apart from its immutable settings, so one instance is shared
/// by every request task.
#[derive(Clone, Debug)]
pub struct TenantResolver {
    default_tenant: String,
    whitelist: HashSet<String>,
}

impl TenantResolver {
    pub fn new(default_tenant: impl Into<String>, whitelist: impl IntoIterator<Item = String>) -> Self {
        Self {
            default_tenant: default_tenant.into(),
            whitelist: whitelist.into_iter().collect(),
        }
    }

    pub fn from_config(config: &WrapperConfig) -> Self {
        Self::new(
            config.default_tenant.trim(),
            config.valid_tenants.iter().cloned(),
        )
    }

    /// Trim the header, fall back to the default tenant, then enforce the
    /// whitelist when one is configured.
    pub fn resolve(&self, header_value: Option<&str>) -> Result<Tenant> {
        let tenant = match header_value.map(str::trim) {
            Some(value) if !value.is_empty() => value,
            _ => self.default_tenant.as_str(),
        };

        if !self.whitelist.is_empty() && !self.whitelist.contains(tenant) {
            return Err(CoreError::InvalidTenant(tenant.to_string()));
        }

        Ok(Tenant(tenant.to_string()))
    }

    pub fn default_tenant(&self) -> &str {
        &self.default_tenant
    }
}

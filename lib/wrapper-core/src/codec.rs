//! Tenant namespacing of session identifiers
//!
//! A bare identifier `s1` becomes `acme::s1` for tenant `acme` on its way to
//! the upstream and is stripped back to `s1` on the way out. The separator is
//! reserved: callers must not put it inside their own identifiers, otherwise
//! a bare `acme::x` sent by tenant `acme` is indistinguishable from a
//! namespaced one and is left as is.

use crate::Tenant;
use std::borrow::Cow;

/// Default reserved separator between tenant and identifier
pub const DEFAULT_SEPARATOR: &str = "::";

#[derive(Clone, Debug)]
pub struct IdentifierCodec {
    separator: String,
}

impl IdentifierCodec {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// `<tenant><separator>`
    pub fn prefix(&self, tenant: &Tenant) -> String {
        format!("{}{}", tenant.as_str(), self.separator)
    }

    /// Prefix `id` with the tenant namespace. Empty and already namespaced
    /// identifiers are returned unchanged.
    pub fn namespace<'a>(&self, id: &'a str, tenant: &Tenant) -> Cow<'a, str> {
        if id.is_empty() || self.strip(id, tenant).is_some() {
            return Cow::Borrowed(id);
        }
        Cow::Owned(format!("{}{}{}", tenant.as_str(), self.separator, id))
    }

    /// Remove the tenant namespace from `id` if present.
    pub fn denamespace<'a>(&self, id: &'a str, tenant: &Tenant) -> &'a str {
        self.strip(id, tenant).unwrap_or(id)
    }

    fn strip<'a>(&self, id: &'a str, tenant: &Tenant) -> Option<&'a str> {
        id.strip_prefix(tenant.as_str())?
            .strip_prefix(self.separator.as_str())
    }
}

impl Default for IdentifierCodec {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

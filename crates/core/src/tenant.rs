//! Tenant identifiers and the explicit tenant context.
//!
//! There is no ambient tenant: every repository, handler and scheduler call
//! receives a [`TenantContext`] and scopes all reads and writes by it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum tenant identifier length.
pub const MAX_TENANT_LEN: usize = 64;

/// Validated tenant (project / namespace) identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parse and validate a tenant identifier.
    pub fn parse(s: impl Into<String>) -> crate::Result<Self> {
        let s = s.into();
        if s.is_empty() {
            return Err(crate::Error::InvalidTenant("tenant is empty".to_string()));
        }
        if s.len() > MAX_TENANT_LEN {
            return Err(crate::Error::InvalidTenant(format!(
                "tenant exceeds {MAX_TENANT_LEN} characters"
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(crate::Error::InvalidTenant(format!(
                "tenant contains invalid characters: {s}"
            )));
        }
        Ok(Self(s))
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TenantId {
    type Error = crate::Error;

    fn try_from(s: String) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl From<TenantId> for String {
    fn from(t: TenantId) -> Self {
        t.0
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Explicit per-operation context.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TenantContext {
    tenant: TenantId,
}

impl TenantContext {
    /// Create a context for the given tenant.
    pub fn new(tenant: TenantId) -> Self {
        Self { tenant }
    }

    /// Parse a tenant identifier and wrap it in a context.
    pub fn for_tenant(tenant: &str) -> crate::Result<Self> {
        TenantId::parse(tenant).map(Self::new)
    }

    /// The tenant this context is scoped to.
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// The tenant as the string stored in every scoped row.
    pub fn tenant_str(&self) -> &str {
        self.tenant.as_str()
    }
}

//! Tenant records
//!
//! The tenant entity and the request-scoped context that carries it.

use crate::error::{Result, TenantError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Characters a tenant id may not contain.
const FORBIDDEN_ID_CHARS: [char; 5] = ['/', '\\', '?', '#', '%'];

/// Tenant lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Tenant is live and resolvable
    #[default]
    Active,
    /// Tenant was soft-deleted; its id stays reserved
    Deleted,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "deleted" => Ok(Self::Deleted),
            other => Err(TenantError::Storage(format!("unknown tenant status '{}'", other))),
        }
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tenant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantRecord {
    /// Unique, immutable identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Custom domain routing key (empty when unused)
    #[serde(default)]
    pub domain: String,

    /// Subdomain routing key (empty when unused)
    #[serde(default)]
    pub subdomain: String,

    /// Backing-store connection locator, filled in during provisioning
    #[serde(default)]
    pub store_locator: String,

    pub status: TenantStatus,

    /// Arbitrary tenant-scoped settings (plan tier, feature flags, ...)
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantRecord {
    /// Create an active tenant
    ///
    /// # Examples
    ///
    /// ```
    /// use tenement_tenancy::TenantRecord;
    ///
    /// let tenant = TenantRecord::new("acme", "Acme Corp").with_subdomain("acme");
    /// assert!(tenant.is_active());
    /// ```
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            domain: String::new(),
            subdomain: String::new(),
            store_locator: String::new(),
            status: TenantStatus::Active,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set custom domain (stored lower-cased)
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into().trim().to_ascii_lowercase();
        self
    }

    /// Set subdomain (stored lower-cased)
    pub fn with_subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.subdomain = subdomain.into().trim().to_ascii_lowercase();
        self
    }

    /// Set an explicit store locator, bypassing the generator
    pub fn with_store_locator(mut self, locator: impl Into<String>) -> Self {
        self.store_locator = locator.into();
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }

    /// Non-empty routing keys in lookup order: id, domain, subdomain
    pub fn routing_keys(&self) -> Vec<&str> {
        [self.id.as_str(), self.domain.as_str(), self.subdomain.as_str()]
            .into_iter()
            .filter(|key| !key.is_empty())
            .collect()
    }

    /// Namespaced key for tenant-scoped cache entries
    ///
    /// ```
    /// use tenement_tenancy::TenantRecord;
    ///
    /// let tenant = TenantRecord::new("tenant-123", "Acme");
    /// assert_eq!(tenant.cache_key("users:1"), "tenant:tenant-123:users:1");
    /// ```
    pub fn cache_key(&self, key: &str) -> String {
        format!("tenant:{}:{}", self.id, key)
    }

    /// Reject records that cannot be stored or routed
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(TenantError::Invalid("tenant id must not be empty".to_string()));
        }
        if self.id.trim() != self.id {
            return Err(TenantError::Invalid(format!(
                "tenant id '{}' has surrounding whitespace",
                self.id
            )));
        }
        // The id is substituted into store locators as is.
        if let Some(c) = self.id.chars().find(|c| FORBIDDEN_ID_CHARS.contains(c)) {
            return Err(TenantError::Invalid(format!(
                "tenant id '{}' must not contain '{}'",
                self.id, c
            )));
        }
        if self.id == "." || self.id == ".." {
            return Err(TenantError::Invalid(format!(
                "tenant id '{}' is reserved",
                self.id
            )));
        }
        Ok(())
    }
}

/// Partial update applied by the provisioning service
///
/// `id`, `store_locator` and `status` are deliberately absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantUpdate {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub subdomain: Option<String>,
    /// Entries merged into existing metadata
    pub metadata: Option<HashMap<String, String>>,
}

impl TenantUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set domain; an empty string clears it
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set subdomain; an empty string clears it
    pub fn with_subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.subdomain = Some(subdomain.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.domain.is_none()
            && self.subdomain.is_none()
            && self.metadata.as_ref().is_none_or(HashMap::is_empty)
    }

    /// Apply to a record. Never touches id, locator or status.
    pub fn apply_to(self, record: &mut TenantRecord) {
        if let Some(name) = self.name {
            record.name = name;
        }
        if let Some(domain) = self.domain {
            record.domain = domain.trim().to_ascii_lowercase();
        }
        if let Some(subdomain) = self.subdomain {
            record.subdomain = subdomain.trim().to_ascii_lowercase();
        }
        if let Some(metadata) = self.metadata {
            record.metadata.extend(metadata);
        }
        record.updated_at = Utc::now();
    }
}

/// Tenant context stored in request extensions
#[derive(Debug, Clone, Default)]
pub struct TenantContext {
    tenant: Option<Arc<TenantRecord>>,
}

impl TenantContext {
    pub fn new() -> Self {
        Self { tenant: None }
    }

    pub fn with_tenant(tenant: Arc<TenantRecord>) -> Self {
        Self {
            tenant: Some(tenant),
        }
    }

    pub fn tenant(&self) -> Option<&Arc<TenantRecord>> {
        self.tenant.as_ref()
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant.as_ref().map(|t| t.id.as_str())
    }

    pub fn has_tenant(&self) -> bool {
        self.tenant.is_some()
    }
}

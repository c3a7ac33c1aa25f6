//! Configuration for tenant resolution, caching and store pools.
//!
//! Every type deserializes with defaults, so a TOML file only needs to name
//! what it changes:
//!
//! ```toml
//! registry_url = "sqlite://data/registry.db?mode=rwc"
//!
//! [cache]
//! capacity = 512
//! ttl = "10m"
//!
//! [resolution]
//! base_domain = "example.com"
//! order = ["header", "domain"]
//! ```

use crate::error::{Result, TenantError};
use crate::strategy::StrategyKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Bounds for an [`ExpiringCache`](crate::cache::ExpiringCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Entry lifetime. Zero disables caching.
    #[serde(default = "default_cache_ttl")]
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

fn default_cache_capacity() -> usize {
    128
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(5 * 60) // 5 minutes
}

impl CacheConfig {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { capacity, ttl }
    }

    /// A cache that never retains anything.
    pub fn disabled() -> Self {
        Self::new(default_cache_capacity(), Duration::ZERO)
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(default_cache_capacity(), default_cache_ttl())
    }
}

/// Connection-pool policy applied to every opened store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of open connections.
    #[serde(default = "default_tenant_max_connections")]
    pub max_connections: u32,

    /// Idle connections kept warm.
    #[serde(default)]
    pub min_connections: u32,

    /// Maximum lifetime of a connection.
    #[serde(default = "default_max_lifetime")]
    #[serde(with = "humantime_serde")]
    pub max_lifetime: Duration,

    /// Idle connections are closed after this long.
    #[serde(default = "default_idle_timeout")]
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// How long to wait for a free connection.
    #[serde(default = "default_acquire_timeout")]
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

fn default_registry_max_connections() -> u32 {
    25
}

fn default_tenant_max_connections() -> u32 {
    10
}

fn default_max_lifetime() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(2 * 60)
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(30)
}

impl PoolConfig {
    /// Policy for the tenant registry store.
    pub fn registry() -> Self {
        Self {
            max_connections: default_registry_max_connections(),
            ..Self::tenant()
        }
    }

    /// Policy for each tenant's own store.
    pub fn tenant() -> Self {
        Self {
            max_connections: default_tenant_max_connections(),
            min_connections: 0,
            max_lifetime: default_max_lifetime(),
            idle_timeout: default_idle_timeout(),
            acquire_timeout: default_acquire_timeout(),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(TenantError::Configuration(
                "pool max_connections must be positive".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(TenantError::Configuration(format!(
                "pool min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::tenant()
    }
}

/// How requests are classified into tenants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Domain under which tenants get subdomains (`acme.example.com`).
    #[serde(default)]
    pub base_domain: String,

    #[serde(default = "default_header_name")]
    pub header_name: String,

    #[serde(default = "default_query_param")]
    pub query_param: String,

    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Strategies in precedence order; the first to extract a key wins.
    #[serde(default = "default_order")]
    pub order: Vec<StrategyKind>,
}

fn default_header_name() -> String {
    "X-Tenant-ID".to_string()
}

fn default_query_param() -> String {
    "tenant".to_string()
}

fn default_cookie_name() -> String {
    "tenant_id".to_string()
}

fn default_order() -> Vec<StrategyKind> {
    vec![StrategyKind::Header, StrategyKind::Domain]
}

impl ResolutionConfig {
    pub fn new(base_domain: impl Into<String>) -> Self {
        Self {
            base_domain: base_domain.into(),
            ..Self::default()
        }
    }

    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    pub fn query_param(mut self, name: impl Into<String>) -> Self {
        self.query_param = name.into();
        self
    }

    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    pub fn order(mut self, order: Vec<StrategyKind>) -> Self {
        self.order = order;
        self
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            base_domain: String::new(),
            header_name: default_header_name(),
            query_param: default_query_param(),
            cookie_name: default_cookie_name(),
            order: default_order(),
        }
    }
}

/// Top-level tenancy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenancyConfig {
    /// Locator of the tenant registry store.
    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    /// Template for tenant store locators; `{id}` is replaced by the tenant id.
    #[serde(default = "default_locator_template")]
    pub locator_template: String,

    /// Session cookie name assumed for handlers that do not set one.
    #[serde(default = "default_session_cookie")]
    pub session_cookie_default: String,

    /// Resolved-tenant cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Factory-built handler cache.
    #[serde(default)]
    pub handler_cache: CacheConfig,

    #[serde(default = "PoolConfig::registry")]
    pub registry_pool: PoolConfig,

    #[serde(default = "PoolConfig::tenant")]
    pub tenant_pool: PoolConfig,

    #[serde(default)]
    pub resolution: ResolutionConfig,
}

fn default_registry_url() -> String {
    "sqlite://data/registry.db?mode=rwc".to_string()
}

fn default_locator_template() -> String {
    "sqlite://data/tenants/{id}.db?mode=rwc".to_string()
}

fn default_session_cookie() -> String {
    "session_id".to_string()
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            locator_template: default_locator_template(),
            session_cookie_default: default_session_cookie(),
            cache: CacheConfig::default(),
            handler_cache: CacheConfig::default(),
            registry_pool: PoolConfig::registry(),
            tenant_pool: PoolConfig::tenant(),
            resolution: ResolutionConfig::default(),
        }
    }
}

impl TenancyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from the process environment, reading a `.env` file first when present.
    ///
    /// Recognised variables:
    /// - `TENEMENT_REGISTRY_URL`
    /// - `TENEMENT_LOCATOR_TEMPLATE`
    /// - `TENEMENT_SESSION_COOKIE`
    /// - `TENEMENT_BASE_DOMAIN`
    /// - `TENEMENT_TENANT_HEADER`
    /// - `TENEMENT_TENANT_QUERY`
    /// - `TENEMENT_TENANT_COOKIE`
    /// - `TENEMENT_RESOLUTION_ORDER`: comma separated, e.g. `header,domain`
    /// - `TENEMENT_CACHE_CAPACITY`, `TENEMENT_CACHE_TTL_SECS`
    /// - `TENEMENT_HANDLER_CACHE_CAPACITY`, `TENEMENT_HANDLER_CACHE_TTL_SECS`
    /// - `TENEMENT_REGISTRY_MAX_CONNECTIONS`, `TENEMENT_TENANT_MAX_CONNECTIONS`
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("TENEMENT_REGISTRY_URL") {
            config.registry_url = url;
        }
        if let Some(template) = lookup("TENEMENT_LOCATOR_TEMPLATE") {
            config.locator_template = template;
        }
        if let Some(cookie) = lookup("TENEMENT_SESSION_COOKIE") {
            config.session_cookie_default = cookie;
        }
        if let Some(domain) = lookup("TENEMENT_BASE_DOMAIN") {
            config.resolution.base_domain = domain;
        }
        if let Some(header) = lookup("TENEMENT_TENANT_HEADER") {
            config.resolution.header_name = header;
        }
        if let Some(param) = lookup("TENEMENT_TENANT_QUERY") {
            config.resolution.query_param = param;
        }
        if let Some(cookie) = lookup("TENEMENT_TENANT_COOKIE") {
            config.resolution.cookie_name = cookie;
        }
        if let Some(order) = lookup("TENEMENT_RESOLUTION_ORDER") {
            config.resolution.order = order
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(StrategyKind::from_str)
                .collect::<Result<Vec<_>>>()?;
        }

        if let Some(capacity) = parse_var::<usize>(&lookup, "TENEMENT_CACHE_CAPACITY")? {
            config.cache.capacity = capacity;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "TENEMENT_CACHE_TTL_SECS")? {
            config.cache.ttl = Duration::from_secs(secs);
        }
        if let Some(capacity) = parse_var::<usize>(&lookup, "TENEMENT_HANDLER_CACHE_CAPACITY")? {
            config.handler_cache.capacity = capacity;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "TENEMENT_HANDLER_CACHE_TTL_SECS")? {
            config.handler_cache.ttl = Duration::from_secs(secs);
        }
        if let Some(max) = parse_var::<u32>(&lookup, "TENEMENT_REGISTRY_MAX_CONNECTIONS")? {
            config.registry_pool.max_connections = max;
        }
        if let Some(max) = parse_var::<u32>(&lookup, "TENEMENT_TENANT_MAX_CONNECTIONS")? {
            config.tenant_pool.max_connections = max;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| TenantError::Configuration(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TenantError::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.capacity == 0 {
            return Err(TenantError::Configuration(
                "tenant cache capacity must be positive".into(),
            ));
        }
        if self.handler_cache.capacity == 0 {
            return Err(TenantError::Configuration(
                "handler cache capacity must be positive".into(),
            ));
        }
        if !self.locator_template.contains("{id}") {
            return Err(TenantError::Configuration(format!(
                "locator template '{}' has no {{id}} slot",
                self.locator_template
            )));
        }
        if self.session_cookie_default.trim().is_empty() {
            return Err(TenantError::Configuration(
                "default session cookie name must not be empty".into(),
            ));
        }
        self.registry_pool.validate()?;
        self.tenant_pool.validate()?;
        Ok(())
    }

    pub fn registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = url.into();
        self
    }

    pub fn locator_template(mut self, template: impl Into<String>) -> Self {
        self.locator_template = template.into();
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn handler_cache(mut self, cache: CacheConfig) -> Self {
        self.handler_cache = cache;
        self
    }

    pub fn resolution(mut self, resolution: ResolutionConfig) -> Self {
        self.resolution = resolution;
        self
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| TenantError::Configuration(format!("Invalid {}: '{}'", key, raw))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = TenancyConfig::default();
        assert_eq!(config.cache.capacity, 128);
        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        assert_eq!(config.registry_pool.max_connections, 25);
        assert_eq!(config.tenant_pool.max_connections, 10);
        assert_eq!(config.registry_pool.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.resolution.header_name, "X-Tenant-ID");
        assert_eq!(
            config.resolution.order,
            vec![StrategyKind::Header, StrategyKind::Domain]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_str() {
        let config = TenancyConfig::from_toml_str(
            r#"
            locator_template = "sqlite:///var/lib/tenants/{id}.db"

            [cache]
            capacity = 16
            ttl = "30s"

            [resolution]
            base_domain = "example.com"
            order = ["cookie", "path", "domain"]
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.capacity, 16);
        assert_eq!(config.cache.ttl, Duration::from_secs(30));
        assert_eq!(config.handler_cache, CacheConfig::default());
        assert_eq!(config.resolution.base_domain, "example.com");
        assert_eq!(config.resolution.query_param, "tenant");
        assert_eq!(
            config.resolution.order,
            vec![StrategyKind::Cookie, StrategyKind::Path, StrategyKind::Domain]
        );
        assert_eq!(config.registry_pool, PoolConfig::registry());
    }

    #[test]
    fn test_from_lookup() {
        let config = TenancyConfig::from_lookup(lookup_from(&[
            ("TENEMENT_BASE_DOMAIN", "example.com"),
            ("TENEMENT_RESOLUTION_ORDER", "query, header"),
            ("TENEMENT_CACHE_TTL_SECS", "0"),
            ("TENEMENT_TENANT_MAX_CONNECTIONS", "4"),
        ]))
        .unwrap();

        assert_eq!(config.resolution.base_domain, "example.com");
        assert_eq!(
            config.resolution.order,
            vec![StrategyKind::Query, StrategyKind::Header]
        );
        assert!(!config.cache.is_enabled());
        assert_eq!(config.tenant_pool.max_connections, 4);
    }

    #[test]
    fn test_from_lookup_rejects_bad_numbers() {
        let err = TenancyConfig::from_lookup(lookup_from(&[("TENEMENT_CACHE_CAPACITY", "lots")]))
            .unwrap_err();
        assert!(matches!(err, TenantError::Configuration(_)));

        let err = TenancyConfig::from_lookup(lookup_from(&[("TENEMENT_RESOLUTION_ORDER", "dns")]))
            .unwrap_err();
        assert!(matches!(err, TenantError::Configuration(_)));
    }

    #[test]
    fn test_validate() {
        let zero_capacity = TenancyConfig::new().cache(CacheConfig::default().capacity(0));
        assert!(zero_capacity.validate().is_err());

        let no_slot = TenancyConfig::new().locator_template("sqlite://tenants.db");
        assert!(no_slot.validate().is_err());

        let mut bad_pool = TenancyConfig::new();
        bad_pool.tenant_pool = PoolConfig::tenant().min_connections(20);
        assert!(bad_pool.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenancy.toml");
        std::fs::write(&path, "session_cookie_default = \"sid\"\n").unwrap();

        let config = TenancyConfig::from_file(&path).unwrap();
        assert_eq!(config.session_cookie_default, "sid");

        assert!(TenancyConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}

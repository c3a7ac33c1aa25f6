//! Tenant Resolution
//!
//! [`TenantResolver`] turns a request into an active [`TenantRecord`]:
//!
//! 1. the [`StrategyChain`] extracts a routing key,
//! 2. the resolved-tenant cache is consulted,
//! 3. on a miss the [`TenantStore`] is queried and the outcome cached.
//!
//! Unknown keys are cached too, as a negative entry, so a flood of requests
//! for a bogus subdomain costs one store query per TTL window.

use crate::cache::{CacheStats, ExpiringCache};
use crate::config::{CacheConfig, TenancyConfig};
use crate::error::TenantError;
use crate::store::TenantStore;
use crate::strategy::StrategyChain;
use crate::tenant::TenantRecord;
use std::sync::Arc;
use tenement_core::HttpRequest;
use tracing::{debug, warn};

#[derive(Clone)]
enum CachedTenant {
    Found(Arc<TenantRecord>),
    Missing,
}

/// Strategy chain, tenant store and resolved-tenant cache combined.
pub struct TenantResolver {
    chain: StrategyChain,
    store: Arc<dyn TenantStore>,
    cache: ExpiringCache<CachedTenant>,
}

impl TenantResolver {
    /// Create a resolver
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use tenement_tenancy::*;
    ///
    /// let chain = StrategyChain::new()
    ///     .with_strategy(HeaderStrategy::new("X-Tenant-ID"))
    ///     .with_strategy(DomainStrategy::new("example.com"));
    /// let resolver = TenantResolver::new(
    ///     chain,
    ///     Arc::new(InMemoryTenantStore::new()),
    ///     &CacheConfig::default(),
    /// );
    /// ```
    pub fn new(chain: StrategyChain, store: Arc<dyn TenantStore>, cache: &CacheConfig) -> Self {
        Self {
            chain,
            store,
            cache: ExpiringCache::from_config(cache),
        }
    }

    /// Resolver with the configured strategy order and cache bounds.
    pub fn from_config(store: Arc<dyn TenantStore>, config: &TenancyConfig) -> Self {
        Self::new(
            StrategyChain::from_config(&config.resolution),
            store,
            &config.cache,
        )
    }

    pub fn chain(&self) -> &StrategyChain {
        &self.chain
    }

    pub fn store(&self) -> &Arc<dyn TenantStore> {
        &self.store
    }

    /// Resolve the tenant a request belongs to.
    ///
    /// `None` means no strategy produced a key or the key names no active
    /// tenant; the caller decides between a fallback and a 404.
    pub async fn resolve(&self, request: &HttpRequest) -> Option<Arc<TenantRecord>> {
        let Some((strategy, key)) = self.chain.resolve(request) else {
            debug!(path = %request.path, "No strategy produced a tenant key");
            return None;
        };

        let tenant = self.resolve_key(&key).await;
        debug!(
            strategy = strategy,
            key = %key,
            tenant_id = tenant.as_ref().map(|t| t.id.as_str()).unwrap_or("-"),
            "Tenant resolution finished"
        );
        tenant
    }

    /// Resolve a raw routing key, using and filling the cache.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use tenement_tenancy::*;
    ///
    /// # tokio_test::block_on(async {
    /// let store = Arc::new(InMemoryTenantStore::new());
    /// store.create(&TenantRecord::new("acme", "Acme").with_domain("acme.io")).await.unwrap();
    ///
    /// let resolver = TenantResolver::new(StrategyChain::new(), store, &CacheConfig::default());
    /// assert_eq!(resolver.resolve_key("acme.io").await.unwrap().id, "acme");
    /// assert!(resolver.resolve_key("nobody").await.is_none());
    /// # });
    /// ```
    pub async fn resolve_key(&self, key: &str) -> Option<Arc<TenantRecord>> {
        if let Some(cached) = self.cache.get(key) {
            return match cached {
                CachedTenant::Found(tenant) => Some(tenant),
                CachedTenant::Missing => None,
            };
        }

        match self.store.get_by_identifier(key).await {
            Ok(record) if record.is_active() => {
                let tenant = Arc::new(record);
                self.cache.set(key, CachedTenant::Found(tenant.clone()));
                Some(tenant)
            }
            Ok(_) | Err(TenantError::NotFound(_)) => {
                self.cache.set(key, CachedTenant::Missing);
                None
            }
            Err(err) => {
                // Treated as a miss until the entry expires or is invalidated.
                warn!(key = %key, error = %err, "Tenant lookup failed");
                self.cache.set(key, CachedTenant::Missing);
                None
            }
        }
    }

    /// Drop the cached outcome for one routing key.
    ///
    /// Domains and subdomains match regardless of case, so a tenant may be
    /// cached under any casing of its keys; every casing is dropped.
    pub fn invalidate(&self, key: &str) {
        let key = key.trim();
        self.cache
            .delete_matching(|cached| cached.trim().eq_ignore_ascii_case(key));
    }

    /// Drop cached outcomes for every routing key of `tenant`.
    pub fn invalidate_tenant(&self, tenant: &TenantRecord) {
        for key in tenant.routing_keys() {
            self.invalidate(key);
        }
    }

    /// Drop every cached outcome, positive and negative.
    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

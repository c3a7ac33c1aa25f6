//! Multi-Tenancy for Tenement
//!
//! Tenant resolution, per-tenant store provisioning and isolated handler
//! dispatch for services that host many customers behind one process.
//!
//! # Features
//!
//! - **Tenant Registry** - In-memory or SQLite-backed tenant records with soft delete
//! - **Tenant Resolution** - Ordered strategies (header, domain, query, cookie, path)
//! - **Resolution Cache** - LRU + TTL cache with negative entries for unknown keys
//! - **Store Per Tenant** - Each tenant gets its own SQLite store, created and migrated on provisioning
//! - **Connection Pools** - Lazily opened, shared per-tenant pools
//! - **Routing** - Static or factory-built handlers per tenant, with at most one build in flight
//! - **Session Isolation** - Startup check that no two tenants share a session cookie
//!
//! # Quick Start
//!
//! ## 1. Registry and provisioning
//!
//! ```rust,ignore
//! use tenement_tenancy::*;
//!
//! let config = TenancyConfig::from_env()?;
//! let registry: Arc<dyn TenantStore> =
//!     Arc::new(SqlTenantStore::connect(&config.registry_url, &config.registry_pool).await?);
//!
//! let provisioning = TenantProvisioningService::from_config(registry.clone(), &config)?
//!     .with_migration_hook(|store: TenantStoreHandle, _tenant: TenantRecord| async move {
//!         sqlx::query("CREATE TABLE IF NOT EXISTS orders (id INTEGER PRIMARY KEY)")
//!             .execute(store.pool())
//!             .await?;
//!         Ok(())
//!     });
//!
//! provisioning
//!     .create_tenant(TenantRecord::new("acme", "Acme Corp").with_subdomain("acme"))
//!     .await?;
//! ```
//!
//! ## 2. Resolution and routing
//!
//! ```rust,ignore
//! let resolver = Arc::new(TenantResolver::from_config(registry, &config));
//! let pools = TenantPoolRegistry::shared(config.tenant_pool.clone());
//!
//! let router = MultiTenantRouter::from_config(resolver, &config)
//!     .factory(move |tenant: TenantRecord| {
//!         let pools = pools.clone();
//!         async move {
//!             let store = pools.get(&tenant).await?;
//!             let app = TenantApp::from_fn(move |req| handle_orders(store.clone(), req))
//!                 .with_session_cookie(format!("{}_session", tenant.id));
//!             Ok::<Arc<dyn TenantHandler>, TenantError>(Arc::new(app))
//!         }
//!     })
//!     .fallback(TenantApp::from_fn(marketing_site))
//!     .build()?;
//!
//! let response = router.dispatch(request).await;
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod locator;
mod lock;
pub mod middleware;
pub mod pool;
pub mod provisioning;
pub mod resolver;
pub mod router;
pub mod session;
pub mod store;
pub mod strategy;
pub mod tenant;

pub use cache::{CacheStats, ExpiringCache};
pub use config::{CacheConfig, PoolConfig, ResolutionConfig, TenancyConfig};
pub use context::{RequireTenant, current_tenant, current_tenant_id, set_current_tenant};
pub use error::{Result, TenantError};
pub use locator::{StoreLocatorGenerator, TemplateLocatorGenerator};
pub use middleware::{TenantAware, TenantMiddleware, notify_tenant_aware};
pub use pool::{
    BOOTSTRAP_VERSION, MIGRATION_TABLE, StoreHealth, TenantPoolRegistry, TenantStoreHandle,
    open_pool,
};
pub use provisioning::{
    MigrationHook, SqliteStoreProvisioner, StoreProvisioner, TenantProvisioningService,
};
pub use resolver::TenantResolver;
pub use router::{
    HandlerFactory, MultiTenantRouter, MultiTenantRouterBuilder, RouterStats, TenantApp,
    TenantHandler,
};
pub use session::SessionIsolationValidator;
pub use store::{InMemoryTenantStore, SqlTenantStore, TenantStore};
pub use strategy::{
    CookieStrategy, DomainStrategy, HeaderStrategy, PathStrategy, QueryStrategy,
    ResolutionStrategy, StrategyChain, StrategyKind,
};
pub use tenant::{TenantContext, TenantRecord, TenantStatus, TenantUpdate};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{CacheConfig, PoolConfig, ResolutionConfig, TenancyConfig};
    pub use crate::context::{RequireTenant, current_tenant, current_tenant_id};
    pub use crate::error::TenantError;
    pub use crate::middleware::{TenantAware, TenantMiddleware};
    pub use crate::pool::{TenantPoolRegistry, TenantStoreHandle};
    pub use crate::provisioning::{MigrationHook, TenantProvisioningService};
    pub use crate::resolver::TenantResolver;
    pub use crate::router::{HandlerFactory, MultiTenantRouter, TenantApp, TenantHandler};
    pub use crate::store::{InMemoryTenantStore, SqlTenantStore, TenantStore};
    pub use crate::strategy::{DomainStrategy, HeaderStrategy, StrategyChain};
    pub use crate::tenant::{TenantRecord, TenantStatus, TenantUpdate};
}

//! Tenant store connections
//!
//! Opens SQLite pools under a [`PoolConfig`] policy, wraps them as
//! [`TenantStoreHandle`]s and keeps one open pool per tenant in
//! [`TenantPoolRegistry`].
//!
//! ```rust,ignore
//! let pools = TenantPoolRegistry::new(PoolConfig::tenant());
//! let handle = pools.get(&tenant).await?;
//! let rows = sqlx::query("SELECT * FROM orders").fetch_all(handle.pool()).await?;
//! ```

use crate::config::PoolConfig;
use crate::error::{Result, TenantError};
use crate::tenant::TenantRecord;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Table that records which migrations a tenant store has applied.
pub const MIGRATION_TABLE: &str = "_tenement_migrations";

/// Version recorded when a store is first provisioned.
pub const BOOTSTRAP_VERSION: &str = "0000_bootstrap";

/// Open a connection pool for `locator`.
///
/// With `create_if_missing`, the database file and its parent directory are
/// created when absent; otherwise a missing file is an error.
pub async fn open_pool(locator: &str, config: &PoolConfig, create_if_missing: bool) -> Result<SqlitePool> {
    config.validate()?;

    let options = SqliteConnectOptions::from_str(locator)
        .map_err(|e| TenantError::Configuration(format!("invalid store locator '{}': {}", locator, e)))?
        .create_if_missing(create_if_missing);

    if create_if_missing {
        ensure_parent_dir(options.get_filename())?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await?;

    debug!(locator = %locator, max_connections = config.max_connections, "Store pool opened");
    Ok(pool)
}

fn ensure_parent_dir(filename: &Path) -> Result<()> {
    if filename.as_os_str() == ":memory:" {
        return Ok(());
    }
    match filename.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|e| TenantError::Storage(format!("cannot create {}: {}", parent.display(), e))),
        _ => Ok(()),
    }
}

/// Result of a store health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHealth {
    /// Whether the store answered the probe.
    pub healthy: bool,
    /// Round-trip time in milliseconds.
    pub response_time_ms: u64,
    /// Error message if unhealthy.
    pub error: Option<String>,
}

/// An opened tenant store.
///
/// Cheap to clone; clones share the underlying pool.
#[derive(Debug, Clone)]
pub struct TenantStoreHandle {
    locator: String,
    pool: SqlitePool,
}

impl TenantStoreHandle {
    pub fn new(locator: impl Into<String>, pool: SqlitePool) -> Self {
        Self {
            locator: locator.into(),
            pool,
        }
    }

    /// Open the store at `locator`, creating it when `create_if_missing`.
    pub async fn open(locator: &str, config: &PoolConfig, create_if_missing: bool) -> Result<Self> {
        let pool = open_pool(locator, config, create_if_missing).await?;
        Ok(Self::new(locator, pool))
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Probe the store with a trivial query.
    pub async fn health_check(&self) -> StoreHealth {
        let start = Instant::now();
        let result = sqlx::query("SELECT 1").execute(&self.pool).await;

        StoreHealth {
            healthy: result.is_ok(),
            response_time_ms: start.elapsed().as_millis() as u64,
            error: result.err().map(|e| e.to_string()),
        }
    }

    /// Create the migration-tracking table if absent.
    pub async fn ensure_migration_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (version TEXT PRIMARY KEY NOT NULL, applied_at TEXT NOT NULL)",
            MIGRATION_TABLE
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Record `version` as applied. Returns `false` if it was already recorded.
    pub async fn record_migration(&self, version: &str) -> Result<bool> {
        let sql = format!(
            "INSERT OR IGNORE INTO {} (version, applied_at) VALUES (?, ?)",
            MIGRATION_TABLE
        );
        let result = sqlx::query(&sql)
            .bind(version)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Applied migration versions, sorted.
    pub async fn applied_migrations(&self) -> Result<Vec<String>> {
        let sql = format!("SELECT version FROM {} ORDER BY version", MIGRATION_TABLE);
        let rows: Vec<(String,)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(version,)| version).collect())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// One open pool per tenant, opened on first use.
///
/// Pools are keyed by tenant id and open the tenant's existing store; they
/// never create one. A single open lock serialises first opens so two
/// concurrent requests for the same tenant open one pool.
pub struct TenantPoolRegistry {
    config: PoolConfig,
    pools: RwLock<HashMap<String, TenantStoreHandle>>,
    open_lock: Mutex<()>,
    opened: AtomicUsize,
}

impl TenantPoolRegistry {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            pools: RwLock::new(HashMap::new()),
            open_lock: Mutex::new(()),
            opened: AtomicUsize::new(0),
        }
    }

    pub fn shared(config: PoolConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    /// Handle for `tenant`'s store, opening its pool on first use.
    pub async fn get(&self, tenant: &TenantRecord) -> Result<TenantStoreHandle> {
        let cached = self.pools.read().get(&tenant.id).cloned();
        if let Some(handle) = cached {
            return Ok(handle);
        }

        if tenant.store_locator.is_empty() {
            return Err(TenantError::Invalid(format!(
                "tenant '{}' has no store locator",
                tenant.id
            )));
        }

        let _guard = self.open_lock.lock().await;
        let cached = self.pools.read().get(&tenant.id).cloned();
        if let Some(handle) = cached {
            return Ok(handle);
        }

        let handle = TenantStoreHandle::open(&tenant.store_locator, &self.config, false).await?;
        self.opened.fetch_add(1, Ordering::Relaxed);
        self.pools.write().insert(tenant.id.clone(), handle.clone());

        info!(tenant_id = %tenant.id, "Tenant store pool opened");
        Ok(handle)
    }

    /// Close and forget a tenant's pool. Returns whether one was open.
    pub async fn evict(&self, tenant_id: &str) -> bool {
        let removed = self.pools.write().remove(tenant_id);
        match removed {
            Some(handle) => {
                handle.close().await;
                debug!(tenant_id = %tenant_id, "Tenant store pool evicted");
                true
            }
            None => false,
        }
    }

    /// Close every pool.
    pub async fn close_all(&self) {
        let handles: Vec<(String, TenantStoreHandle)> = self.pools.write().drain().collect();
        for (tenant_id, handle) in handles {
            if handle.pool().is_closed() {
                warn!(tenant_id = %tenant_id, "Tenant store pool was already closed");
            }
            handle.close().await;
        }
    }

    pub fn contains(&self, tenant_id: &str) -> bool {
        self.pools.read().contains_key(tenant_id)
    }

    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }

    /// Total pools opened over the registry's lifetime.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator(dir: &tempfile::TempDir, name: &str) -> String {
        format!("sqlite://{}", dir.path().join(name).display())
    }

    #[tokio::test]
    async fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let url = locator(&dir, "nested/deeper/acme.db");

        let handle = TenantStoreHandle::open(&url, &PoolConfig::tenant(), true).await.unwrap();
        assert!(handle.health_check().await.healthy);
        assert!(dir.path().join("nested/deeper/acme.db").exists());
    }

    #[tokio::test]
    async fn test_open_without_create_fails_for_missing_store() {
        let dir = tempfile::tempdir().unwrap();
        let result = TenantStoreHandle::open(&locator(&dir, "absent.db"), &PoolConfig::tenant(), false).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_invalid_locator() {
        let result = open_pool("sqlite://acme.db?flavour=vanilla", &PoolConfig::tenant(), true).await;
        assert!(matches!(result, Err(TenantError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_migration_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let handle = TenantStoreHandle::open(&locator(&dir, "acme.db"), &PoolConfig::tenant(), true)
            .await
            .unwrap();

        handle.ensure_migration_table().await.unwrap();
        handle.ensure_migration_table().await.unwrap();

        assert!(handle.record_migration(BOOTSTRAP_VERSION).await.unwrap());
        assert!(handle.record_migration("0001_orders").await.unwrap());
        assert!(!handle.record_migration("0001_orders").await.unwrap());

        assert_eq!(
            handle.applied_migrations().await.unwrap(),
            vec![BOOTSTRAP_VERSION.to_string(), "0001_orders".to_string()]
        );
    }

    #[tokio::test]
    async fn test_health_check_reports_closed_pool() {
        let dir = tempfile::tempdir().unwrap();
        let handle = TenantStoreHandle::open(&locator(&dir, "acme.db"), &PoolConfig::tenant(), true)
            .await
            .unwrap();
        handle.close().await;

        let health = handle.health_check().await;
        assert!(!health.healthy);
        assert!(health.error.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_registry_opens_one_pool_per_tenant() {
        let dir = tempfile::tempdir().unwrap();
        let url = locator(&dir, "acme.db");
        TenantStoreHandle::open(&url, &PoolConfig::tenant(), true).await.unwrap().close().await;

        let registry = TenantPoolRegistry::shared(PoolConfig::tenant());
        let tenant = TenantRecord::new("acme", "Acme").with_store_locator(url);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let tenant = tenant.clone();
            tasks.push(tokio::spawn(async move { registry.get(&tenant).await.map(|_| ()) }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(registry.opened(), 1);
        assert!(registry.contains("acme"));

        assert!(registry.evict("acme").await);
        assert!(!registry.evict("acme").await);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_registry_requires_locator() {
        let registry = TenantPoolRegistry::new(PoolConfig::tenant());
        let result = registry.get(&TenantRecord::new("acme", "Acme")).await;
        assert!(matches!(result, Err(TenantError::Invalid(_))));
    }
}

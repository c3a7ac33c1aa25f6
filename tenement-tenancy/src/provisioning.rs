//! Tenant provisioning
//!
//! Creating a tenant is all-or-nothing from the caller's point of view: the
//! record is persisted only after its store has been created, health-checked
//! and migrated. A store created for a tenant whose migration hook fails is
//! left on disk; removing stores is a separate, deliberate operation and never
//! happens here. Deleting a tenant is a soft delete and keeps its store.

use crate::config::{PoolConfig, TenancyConfig};
use crate::error::{Result, TenantError};
use crate::locator::{StoreLocatorGenerator, TemplateLocatorGenerator};
use crate::lock::KeyedLocks;
use crate::pool::{BOOTSTRAP_VERSION, StoreHealth, TenantStoreHandle};
use crate::resolver::TenantResolver;
use crate::store::TenantStore;
use crate::tenant::{TenantRecord, TenantStatus, TenantUpdate};
use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Physically creates a tenant's backing store.
#[async_trait]
pub trait StoreProvisioner: Send + Sync {
    /// Open or create the store at `locator`, verify it answers and prepare
    /// migration tracking. Failures are `Provisioning` errors.
    async fn provision(&self, locator: &str) -> Result<TenantStoreHandle>;

    /// Probe an already provisioned store.
    async fn health_check(&self, store: &TenantStoreHandle) -> StoreHealth {
        store.health_check().await
    }
}

/// Provisions SQLite files, creating parent directories as needed.
#[derive(Debug, Clone)]
pub struct SqliteStoreProvisioner {
    pool: PoolConfig,
}

impl SqliteStoreProvisioner {
    pub fn new(pool: PoolConfig) -> Self {
        Self { pool }
    }
}

impl Default for SqliteStoreProvisioner {
    fn default() -> Self {
        Self::new(PoolConfig::tenant())
    }
}

fn provisioning_error(locator: &str, err: TenantError) -> TenantError {
    match err {
        TenantError::Provisioning(_) => err,
        other => TenantError::Provisioning(format!("store '{}': {}", locator, other)),
    }
}

#[async_trait]
impl StoreProvisioner for SqliteStoreProvisioner {
    async fn provision(&self, locator: &str) -> Result<TenantStoreHandle> {
        let handle = TenantStoreHandle::open(locator, &self.pool, true)
            .await
            .map_err(|e| provisioning_error(locator, e))?;

        let health = self.health_check(&handle).await;
        if !health.healthy {
            handle.close().await;
            return Err(TenantError::Provisioning(format!(
                "store '{}' failed its health check: {}",
                locator,
                health.error.unwrap_or_default()
            )));
        }

        let prepared = async {
            handle.ensure_migration_table().await?;
            handle.record_migration(BOOTSTRAP_VERSION).await?;
            Ok::<_, TenantError>(())
        }
        .await;
        if let Err(err) = prepared {
            handle.close().await;
            return Err(provisioning_error(locator, err));
        }

        debug!(
            locator = %locator,
            response_time_ms = health.response_time_ms,
            "Tenant store provisioned"
        );
        Ok(handle)
    }
}

/// Migration or seed step run once per newly provisioned store.
#[async_trait]
pub trait MigrationHook: Send + Sync {
    async fn migrate(&self, store: &TenantStoreHandle, tenant: &TenantRecord) -> Result<()>;
}

#[async_trait]
impl<F, Fut> MigrationHook for F
where
    F: Fn(TenantStoreHandle, TenantRecord) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn migrate(&self, store: &TenantStoreHandle, tenant: &TenantRecord) -> Result<()> {
        self(store.clone(), tenant.clone()).await
    }
}

/// Creates, updates and soft-deletes tenants.
///
/// # Examples
///
/// ```rust,ignore
/// let service = TenantProvisioningService::from_config(store, &config)?
///     .with_migration_hook(|db: TenantStoreHandle, _tenant: TenantRecord| async move {
///         sqlx::query("CREATE TABLE orders (id INTEGER PRIMARY KEY)")
///             .execute(db.pool())
///             .await?;
///         db.record_migration("0001_orders").await?;
///         Ok::<(), TenantError>(())
///     })
///     .with_resolver(resolver.clone());
///
/// let tenant = service
///     .create_tenant(TenantRecord::new("acme", "Acme Corp").with_subdomain("acme"))
///     .await?;
/// ```
pub struct TenantProvisioningService {
    store: Arc<dyn TenantStore>,
    locator: Arc<dyn StoreLocatorGenerator>,
    provisioner: Arc<dyn StoreProvisioner>,
    hook: Option<Arc<dyn MigrationHook>>,
    resolver: Option<Arc<TenantResolver>>,
    creating: KeyedLocks,
}

impl TenantProvisioningService {
    pub fn new(store: Arc<dyn TenantStore>, locator: Arc<dyn StoreLocatorGenerator>) -> Self {
        Self {
            store,
            locator,
            provisioner: Arc::new(SqliteStoreProvisioner::default()),
            hook: None,
            resolver: None,
            creating: KeyedLocks::new(),
        }
    }

    /// Service using the configured locator template and tenant pool policy.
    pub fn from_config(store: Arc<dyn TenantStore>, config: &TenancyConfig) -> Result<Self> {
        let locator = TemplateLocatorGenerator::new(&config.locator_template)?;
        Ok(Self::new(store, Arc::new(locator))
            .with_provisioner(SqliteStoreProvisioner::new(config.tenant_pool.clone())))
    }

    pub fn with_provisioner<P: StoreProvisioner + 'static>(mut self, provisioner: P) -> Self {
        self.provisioner = Arc::new(provisioner);
        self
    }

    pub fn with_migration_hook<H: MigrationHook + 'static>(mut self, hook: H) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Keep this resolver's cache consistent with every change made here.
    pub fn with_resolver(mut self, resolver: Arc<TenantResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn store(&self) -> &Arc<dyn TenantStore> {
        &self.store
    }

    /// Provision and persist a new tenant. Returns the stored record.
    pub async fn create_tenant(&self, record: TenantRecord) -> Result<TenantRecord> {
        record.validate()?;

        // Held until the record is persisted so a second create for the same
        // id sees it and conflicts instead of provisioning twice.
        let _creating = self.creating.lock(&record.id).await;

        match self.store.get_by_id_any_status(&record.id).await {
            Ok(_) => {
                return Err(TenantError::Conflict(format!(
                    "tenant id '{}' already exists",
                    record.id
                )));
            }
            Err(TenantError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        let now = Utc::now();
        let mut record = record;
        record.status = TenantStatus::Active;
        record.created_at = now;
        record.updated_at = now;
        if record.store_locator.trim().is_empty() {
            record.store_locator = self.locator.generate(&record);
        }
        if record.store_locator.trim().is_empty() {
            return Err(TenantError::Provisioning(format!(
                "no store locator could be derived for tenant '{}'",
                record.id
            )));
        }

        let handle = self.provisioner.provision(&record.store_locator).await?;

        if let Some(hook) = &self.hook {
            let migrated = hook.migrate(&handle, &record).await;
            if let Err(err) = migrated {
                handle.close().await;
                error!(tenant_id = %record.id, error = %err, "Tenant migration hook failed");
                return Err(match err {
                    TenantError::Provisioning(_) => err,
                    other => TenantError::Provisioning(format!(
                        "migration hook failed for tenant '{}': {}",
                        record.id, other
                    )),
                });
            }
        }
        handle.close().await;

        if let Err(err) = self.store.create(&record).await {
            warn!(
                tenant_id = %record.id,
                locator = %record.store_locator,
                error = %err,
                "Tenant store provisioned but record was not persisted"
            );
            return Err(err);
        }

        if let Some(resolver) = &self.resolver {
            resolver.invalidate_tenant(&record);
        }

        info!(tenant_id = %record.id, locator = %record.store_locator, "Tenant created");
        Ok(record)
    }

    /// Apply a partial update. Never re-provisions.
    pub async fn update_tenant(&self, id: &str, update: TenantUpdate) -> Result<TenantRecord> {
        let previous = self.get_tenant(id).await?;

        let mut record = previous.clone();
        update.apply_to(&mut record);
        self.store.update(&record).await?;

        if let Some(resolver) = &self.resolver {
            resolver.invalidate_tenant(&previous);
            resolver.invalidate_tenant(&record);
        }

        info!(tenant_id = %id, "Tenant updated");
        Ok(record)
    }

    /// Soft-delete a tenant. Its store is left untouched.
    pub async fn delete_tenant(&self, id: &str) -> Result<()> {
        let record = self.store.get_by_id_any_status(id).await?;
        self.store.soft_delete(id).await?;

        if let Some(resolver) = &self.resolver {
            resolver.invalidate_tenant(&record);
        }

        info!(tenant_id = %id, "Tenant soft-deleted");
        Ok(())
    }

    /// Active tenant by id.
    pub async fn get_tenant(&self, id: &str) -> Result<TenantRecord> {
        let record = self.store.get_by_id_any_status(id).await?;
        if !record.is_active() {
            return Err(TenantError::NotFound(id.to_string()));
        }
        Ok(record)
    }

    pub async fn list_tenants(&self) -> Result<Vec<TenantRecord>> {
        self.store.list().await
    }
}

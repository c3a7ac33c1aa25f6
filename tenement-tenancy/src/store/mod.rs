//! Tenant registry storage
//!
//! - **Memory**: indexed maps behind a read/write lock (tests, single process)
//! - **Sql**: one SQLite table, metadata stored as a JSON blob

mod memory;
mod sql;

pub use memory::InMemoryTenantStore;
pub use sql::SqlTenantStore;

use crate::error::Result;
use crate::tenant::TenantRecord;
use async_trait::async_trait;

/// Persistence for tenant records.
///
/// Normal-path reads only ever return active tenants. Routing keys (id,
/// domain, subdomain) are unique across active tenants, and an id is never
/// reused once taken, even after deletion.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Find an active tenant whose id, domain or subdomain equals `key`.
    ///
    /// Keys are tried in that order. Fails with `NotFound`.
    async fn get_by_identifier(&self, key: &str) -> Result<TenantRecord>;

    /// Fetch by id regardless of status. Administrative path.
    async fn get_by_id_any_status(&self, id: &str) -> Result<TenantRecord>;

    /// All active tenants in creation order.
    async fn list(&self) -> Result<Vec<TenantRecord>>;

    /// All tenants including soft-deleted ones, in creation order. Administrative path.
    async fn list_all(&self) -> Result<Vec<TenantRecord>>;

    /// Insert a new tenant. Fails with `Conflict` on a taken id or routing key.
    async fn create(&self, record: &TenantRecord) -> Result<()>;

    /// Replace an active tenant. Fails with `NotFound` when `record.id` is
    /// unknown or deleted and with `Conflict` on a taken routing key.
    async fn update(&self, record: &TenantRecord) -> Result<()>;

    /// Flip a tenant to deleted. Unknown ids fail with `NotFound`; repeating
    /// the call on a deleted tenant succeeds.
    async fn soft_delete(&self, id: &str) -> Result<()>;

    /// Backend name for logs
    fn store_type(&self) -> &'static str;
}

/// Normalised routing keys of `record` other than its id.
pub(crate) fn secondary_keys(record: &TenantRecord) -> Vec<String> {
    [&record.domain, &record.subdomain]
        .into_iter()
        .map(|key| key.trim().to_ascii_lowercase())
        .filter(|key| !key.is_empty())
        .collect()
}

//! In-memory tenant store
//!
//! Three indexes (id, domain, subdomain) share the same `Arc` per record and
//! are rewritten together under one write lock.

use super::{TenantStore, secondary_keys};
use crate::error::{Result, TenantError};
use crate::tenant::{TenantRecord, TenantStatus};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct Indexes {
    /// Every tenant ever created, deleted ones included
    by_id: HashMap<String, Arc<TenantRecord>>,
    /// Active tenants only
    by_domain: HashMap<String, Arc<TenantRecord>>,
    /// Active tenants only
    by_subdomain: HashMap<String, Arc<TenantRecord>>,
    /// Ids in creation order
    order: Vec<String>,
}

impl Indexes {
    /// Active tenant other than `own_id` that already answers to `key`.
    fn claimant(&self, key: &str, own_id: &str) -> Option<&str> {
        let lowered = key.to_ascii_lowercase();
        [
            self.by_id.get(key).filter(|t| t.is_active()),
            self.by_domain.get(&lowered),
            self.by_subdomain.get(&lowered),
        ]
        .into_iter()
        .flatten()
        .find(|t| t.id != own_id)
        .map(|t| t.id.as_str())
    }

    fn check_routing_keys(&self, record: &TenantRecord) -> Result<()> {
        let keys = std::iter::once(record.id.clone()).chain(secondary_keys(record));
        for key in keys {
            if let Some(owner) = self.claimant(&key, &record.id) {
                return Err(TenantError::Conflict(format!(
                    "routing key '{}' is already used by tenant '{}'",
                    key, owner
                )));
            }
        }
        Ok(())
    }

    fn unindex(&mut self, record: &TenantRecord) {
        if !record.domain.is_empty()
            && self
                .by_domain
                .get(&record.domain)
                .is_some_and(|t| t.id == record.id)
        {
            self.by_domain.remove(&record.domain);
        }
        if !record.subdomain.is_empty()
            && self
                .by_subdomain
                .get(&record.subdomain)
                .is_some_and(|t| t.id == record.id)
        {
            self.by_subdomain.remove(&record.subdomain);
        }
    }

    fn index(&mut self, record: Arc<TenantRecord>) {
        if record.is_active() {
            if !record.domain.is_empty() {
                self.by_domain.insert(record.domain.clone(), record.clone());
            }
            if !record.subdomain.is_empty() {
                self.by_subdomain
                    .insert(record.subdomain.clone(), record.clone());
            }
        }
        self.by_id.insert(record.id.clone(), record);
    }
}

fn normalised(record: &TenantRecord) -> TenantRecord {
    let mut record = record.clone();
    record.domain = record.domain.trim().to_ascii_lowercase();
    record.subdomain = record.subdomain.trim().to_ascii_lowercase();
    record
}

/// Tenant store held entirely in process memory.
#[derive(Default)]
pub struct InMemoryTenantStore {
    inner: RwLock<Indexes>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tenants, deleted ones included
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_id.is_empty()
    }

    fn collect(&self, include_deleted: bool) -> Vec<TenantRecord> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|t| include_deleted || t.is_active())
            .map(|t| (**t).clone())
            .collect()
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn get_by_identifier(&self, key: &str) -> Result<TenantRecord> {
        let inner = self.inner.read();
        let lowered = key.trim().to_ascii_lowercase();

        inner
            .by_id
            .get(key)
            .filter(|t| t.is_active())
            .or_else(|| inner.by_domain.get(&lowered))
            .or_else(|| inner.by_subdomain.get(&lowered))
            .map(|t| (**t).clone())
            .ok_or_else(|| TenantError::NotFound(key.to_string()))
    }

    async fn get_by_id_any_status(&self, id: &str) -> Result<TenantRecord> {
        self.inner
            .read()
            .by_id
            .get(id)
            .map(|t| (**t).clone())
            .ok_or_else(|| TenantError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<TenantRecord>> {
        Ok(self.collect(false))
    }

    async fn list_all(&self) -> Result<Vec<TenantRecord>> {
        Ok(self.collect(true))
    }

    async fn create(&self, record: &TenantRecord) -> Result<()> {
        record.validate()?;
        let record = normalised(record);
        let mut inner = self.inner.write();

        if inner.by_id.contains_key(&record.id) {
            return Err(TenantError::Conflict(format!(
                "tenant id '{}' already exists",
                record.id
            )));
        }
        inner.check_routing_keys(&record)?;

        debug!(tenant_id = %record.id, "Tenant created in memory store");
        inner.order.push(record.id.clone());
        inner.index(Arc::new(record));
        Ok(())
    }

    async fn update(&self, record: &TenantRecord) -> Result<()> {
        let record = normalised(record);
        let mut inner = self.inner.write();

        let existing = match inner.by_id.get(&record.id) {
            Some(existing) if existing.is_active() => existing.clone(),
            _ => return Err(TenantError::NotFound(record.id.clone())),
        };
        inner.check_routing_keys(&record)?;

        let mut updated = record;
        updated.status = existing.status;
        updated.created_at = existing.created_at;

        inner.unindex(&existing);
        inner.index(Arc::new(updated));
        Ok(())
    }

    async fn soft_delete(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write();

        let existing = inner
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| TenantError::NotFound(id.to_string()))?;
        if !existing.is_active() {
            return Ok(());
        }

        let mut deleted = (*existing).clone();
        deleted.status = TenantStatus::Deleted;
        deleted.updated_at = Utc::now();

        inner.unindex(&existing);
        inner.index(Arc::new(deleted));
        debug!(tenant_id = %id, "Tenant soft-deleted in memory store");
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acme() -> TenantRecord {
        TenantRecord::new("acme", "Acme Corp")
            .with_domain("acme.io")
            .with_subdomain("acme-sub")
            .with_store_locator("sqlite://acme.db")
    }

    #[tokio::test]
    async fn test_lookup_by_every_routing_key() {
        let store = InMemoryTenantStore::new();
        store.create(&acme()).await.unwrap();

        for key in ["acme", "acme.io", "ACME.io", "acme-sub"] {
            let tenant = store.get_by_identifier(key).await.unwrap();
            assert_eq!(tenant.id, "acme", "lookup by {}", key);
        }
        assert!(store.get_by_identifier("globex").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let store = InMemoryTenantStore::new();
        store.create(&acme()).await.unwrap();

        let same_id = TenantRecord::new("acme", "Other");
        assert!(matches!(
            store.create(&same_id).await,
            Err(TenantError::Conflict(_))
        ));

        let same_domain = TenantRecord::new("globex", "Globex").with_domain("ACME.IO");
        assert!(matches!(
            store.create(&same_domain).await,
            Err(TenantError::Conflict(_))
        ));

        let subdomain_is_other_id = TenantRecord::new("globex", "Globex").with_subdomain("acme");
        assert!(matches!(
            store.create(&subdomain_is_other_id).await,
            Err(TenantError::Conflict(_))
        ));

        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_soft_delete_hides_all_keys() {
        let store = InMemoryTenantStore::new();
        store.create(&acme()).await.unwrap();
        store.soft_delete("acme").await.unwrap();

        for key in ["acme", "acme.io", "acme-sub"] {
            assert!(store.get_by_identifier(key).await.unwrap_err().is_not_found());
        }
        assert!(store.list().await.unwrap().is_empty());

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, TenantStatus::Deleted);

        let admin = store.get_by_id_any_status("acme").await.unwrap();
        assert!(!admin.is_active());
    }

    #[tokio::test]
    async fn test_soft_delete_is_idempotent() {
        let store = InMemoryTenantStore::new();
        store.create(&acme()).await.unwrap();

        store.soft_delete("acme").await.unwrap();
        store.soft_delete("acme").await.unwrap();
        assert!(store.soft_delete("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_deleted_id_stays_reserved_but_keys_are_released() {
        let store = InMemoryTenantStore::new();
        store.create(&acme()).await.unwrap();
        store.soft_delete("acme").await.unwrap();

        assert!(matches!(
            store.create(&TenantRecord::new("acme", "Again")).await,
            Err(TenantError::Conflict(_))
        ));

        let successor = TenantRecord::new("acme-2", "Acme Reborn").with_domain("acme.io");
        store.create(&successor).await.unwrap();
        assert_eq!(store.get_by_identifier("acme.io").await.unwrap().id, "acme-2");
    }

    #[tokio::test]
    async fn test_update_reindexes() {
        let store = InMemoryTenantStore::new();
        store.create(&acme()).await.unwrap();

        let mut changed = store.get_by_id_any_status("acme").await.unwrap();
        changed.domain = "acme.com".into();
        changed.subdomain.clear();
        store.update(&changed).await.unwrap();

        assert!(store.get_by_identifier("acme.io").await.is_err());
        assert!(store.get_by_identifier("acme-sub").await.is_err());
        assert_eq!(store.get_by_identifier("acme.com").await.unwrap().id, "acme");
    }

    #[tokio::test]
    async fn test_update_missing_or_deleted_is_not_found() {
        let store = InMemoryTenantStore::new();
        assert!(store.update(&acme()).await.unwrap_err().is_not_found());

        store.create(&acme()).await.unwrap();
        store.soft_delete("acme").await.unwrap();
        assert!(store.update(&acme()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_keeps_creation_order() {
        let store = InMemoryTenantStore::new();
        for id in ["zeta", "alpha", "mid"] {
            store.create(&TenantRecord::new(id, id)).await.unwrap();
        }
        store.soft_delete("alpha").await.unwrap();

        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["zeta", "mid"]);

        let all: Vec<String> = store.list_all().await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(all, vec!["zeta", "alpha", "mid"]);
    }
}

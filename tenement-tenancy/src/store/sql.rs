//! SQLite-backed tenant store
//!
//! One row per tenant in `tenants`. Metadata is a JSON object in a TEXT
//! column and is decoded on every read. Writes run in a transaction so the
//! routing-key check and the insert/update see the same snapshot.

use super::{TenantStore, secondary_keys};
use crate::config::PoolConfig;
use crate::error::{Result, TenantError};
use crate::pool::open_pool;
use crate::tenant::{TenantRecord, TenantStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tenants (
    id            TEXT PRIMARY KEY NOT NULL,
    name          TEXT NOT NULL,
    domain        TEXT NOT NULL DEFAULT '',
    subdomain     TEXT NOT NULL DEFAULT '',
    store_locator TEXT NOT NULL DEFAULT '',
    status        TEXT NOT NULL DEFAULT 'active',
    metadata      TEXT NOT NULL DEFAULT '{}',
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
)
"#;

const CREATE_DOMAIN_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_tenants_domain ON tenants (domain)";

const CREATE_SUBDOMAIN_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_tenants_subdomain ON tenants (subdomain)";

const COLUMNS: &str =
    "id, name, domain, subdomain, store_locator, status, metadata, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: String,
    name: String,
    domain: String,
    subdomain: String,
    store_locator: String,
    status: String,
    metadata: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TenantRow> for TenantRecord {
    type Error = TenantError;

    fn try_from(row: TenantRow) -> Result<Self> {
        let metadata: HashMap<String, String> = if row.metadata.trim().is_empty() {
            HashMap::new()
        } else {
            serde_json::from_str(&row.metadata)?
        };

        Ok(TenantRecord {
            id: row.id,
            name: row.name,
            domain: row.domain,
            subdomain: row.subdomain,
            store_locator: row.store_locator,
            status: TenantStatus::parse(&row.status)?,
            metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Tenant store over a SQLite connection pool.
#[derive(Clone)]
pub struct SqlTenantStore {
    pool: SqlitePool,
}

impl SqlTenantStore {
    /// Open (creating if needed) the registry at `url` and ensure the schema exists.
    pub async fn connect(url: &str, config: &PoolConfig) -> Result<Self> {
        let start = Instant::now();
        let pool = open_pool(url, config, true).await?;
        let store = Self::from_pool(pool);
        store.migrate().await?;

        info!(
            url = %url,
            max_connections = config.max_connections,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Tenant registry connected"
        );
        Ok(store)
    }

    /// Wrap an existing pool. Call [`SqlTenantStore::migrate`] before use.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `tenants` table and its lookup indexes if absent.
    pub async fn migrate(&self) -> Result<()> {
        for statement in [CREATE_TABLE, CREATE_DOMAIN_INDEX, CREATE_SUBDOMAIN_INDEX] {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Tenant registry schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch_all(&self, include_deleted: bool) -> Result<Vec<TenantRecord>> {
        let sql = if include_deleted {
            format!("SELECT {} FROM tenants ORDER BY rowid", COLUMNS)
        } else {
            format!(
                "SELECT {} FROM tenants WHERE status = 'active' ORDER BY rowid",
                COLUMNS
            )
        };

        sqlx::query_as::<_, TenantRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(TenantRecord::try_from)
            .collect()
    }
}

/// Id of an active tenant other than `own_id` that already answers to `key`.
async fn claimant(conn: &mut SqliteConnection, key: &str, own_id: &str) -> Result<Option<String>> {
    let lowered = key.to_ascii_lowercase();
    let owner: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM tenants \
         WHERE status = 'active' AND id <> ? AND (id = ? OR domain = ? OR subdomain = ?) \
         LIMIT 1",
    )
    .bind(own_id)
    .bind(key)
    .bind(&lowered)
    .bind(&lowered)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(owner.map(|(id,)| id))
}

async fn check_routing_keys(conn: &mut SqliteConnection, record: &TenantRecord) -> Result<()> {
    let keys = std::iter::once(record.id.clone()).chain(secondary_keys(record));
    for key in keys {
        if let Some(owner) = claimant(conn, &key, &record.id).await? {
            return Err(TenantError::Conflict(format!(
                "routing key '{}' is already used by tenant '{}'",
                key, owner
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl TenantStore for SqlTenantStore {
    async fn get_by_identifier(&self, key: &str) -> Result<TenantRecord> {
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(TenantError::NotFound(key.to_string()));
        }
        let lowered = trimmed.to_ascii_lowercase();

        let sql = format!(
            "SELECT {} FROM tenants \
             WHERE status = 'active' AND (id = ? OR domain = ? OR subdomain = ?) \
             ORDER BY CASE WHEN id = ? THEN 0 WHEN domain = ? THEN 1 ELSE 2 END \
             LIMIT 1",
            COLUMNS
        );

        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(key)
            .bind(&lowered)
            .bind(&lowered)
            .bind(key)
            .bind(&lowered)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(TenantError::NotFound(key.to_string())),
        }
    }

    async fn get_by_id_any_status(&self, id: &str) -> Result<TenantRecord> {
        let sql = format!("SELECT {} FROM tenants WHERE id = ?", COLUMNS);
        sqlx::query_as::<_, TenantRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| TenantError::NotFound(id.to_string()))?
            .try_into()
    }

    async fn list(&self) -> Result<Vec<TenantRecord>> {
        self.fetch_all(false).await
    }

    async fn list_all(&self) -> Result<Vec<TenantRecord>> {
        self.fetch_all(true).await
    }

    async fn create(&self, record: &TenantRecord) -> Result<()> {
        record.validate()?;
        let metadata = serde_json::to_string(&record.metadata)?;
        let mut tx = self.pool.begin().await?;

        let taken: Option<(String,)> = sqlx::query_as("SELECT id FROM tenants WHERE id = ?")
            .bind(&record.id)
            .fetch_optional(&mut *tx)
            .await?;
        if taken.is_some() {
            return Err(TenantError::Conflict(format!(
                "tenant id '{}' already exists",
                record.id
            )));
        }
        check_routing_keys(&mut *tx, record).await?;

        sqlx::query(
            "INSERT INTO tenants \
             (id, name, domain, subdomain, store_locator, status, metadata, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(record.domain.trim().to_ascii_lowercase())
        .bind(record.subdomain.trim().to_ascii_lowercase())
        .bind(&record.store_locator)
        .bind(record.status.as_str())
        .bind(&metadata)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(tenant_id = %record.id, "Tenant row inserted");
        Ok(())
    }

    async fn update(&self, record: &TenantRecord) -> Result<()> {
        let metadata = serde_json::to_string(&record.metadata)?;
        let mut tx = self.pool.begin().await?;

        let status: Option<(String,)> = sqlx::query_as("SELECT status FROM tenants WHERE id = ?")
            .bind(&record.id)
            .fetch_optional(&mut *tx)
            .await?;
        match status {
            Some((status,)) if status == TenantStatus::Active.as_str() => {}
            _ => return Err(TenantError::NotFound(record.id.clone())),
        }
        check_routing_keys(&mut *tx, record).await?;

        sqlx::query(
            "UPDATE tenants \
             SET name = ?, domain = ?, subdomain = ?, store_locator = ?, metadata = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&record.name)
        .bind(record.domain.trim().to_ascii_lowercase())
        .bind(record.subdomain.trim().to_ascii_lowercase())
        .bind(&record.store_locator)
        .bind(&metadata)
        .bind(record.updated_at)
        .bind(&record.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn soft_delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tenants SET status = 'deleted', updated_at = ? \
             WHERE id = ? AND status = 'active'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM tenants WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            if exists.is_none() {
                return Err(TenantError::NotFound(id.to_string()));
            }
        } else {
            debug!(tenant_id = %id, "Tenant row soft-deleted");
        }
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "sql"
    }
}

//! Tenancy errors
//!
//! `NotFound` is absorbed by the resolver and becomes a fallback or 404 at
//! the router. `Provisioning` and `Configuration` always reach the caller.
//! `ServiceUnavailable` means the tenant exists but nothing can serve it.

use tenement_core::Error;

/// Tenancy errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TenantError {
    #[error("Tenant not found: {0}")]
    NotFound(String),

    #[error("Tenant conflict: {0}")]
    Conflict(String),

    #[error("Tenant provisioning failed: {0}")]
    Provisioning(String),

    #[error("Tenancy configuration error: {0}")]
    Configuration(String),

    #[error("Service unavailable for tenant: {0}")]
    ServiceUnavailable(String),

    #[error("Invalid tenant: {0}")]
    Invalid(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result alias for tenancy operations
pub type Result<T> = std::result::Result<T, TenantError>;

impl TenantError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TenantError::NotFound(_))
    }
}

impl From<sqlx::Error> for TenantError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => TenantError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                TenantError::Conflict(db.message().to_string())
            }
            other => TenantError::Storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for TenantError {
    fn from(err: serde_json::Error) -> Self {
        TenantError::Storage(format!("metadata encoding: {}", err))
    }
}

impl From<TenantError> for Error {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::NotFound(msg) => Error::NotFound(msg),
            TenantError::Conflict(msg) => Error::Conflict(msg),
            TenantError::ServiceUnavailable(msg) => Error::ServiceUnavailable(msg),
            TenantError::Invalid(msg) => Error::BadRequest(msg),
            other => Error::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_mapping() {
        let cases = [
            (TenantError::NotFound("a".into()), 404),
            (TenantError::Conflict("a".into()), 409),
            (TenantError::ServiceUnavailable("a".into()), 503),
            (TenantError::Invalid("a".into()), 400),
            (TenantError::Provisioning("a".into()), 500),
            (TenantError::Configuration("a".into()), 500),
            (TenantError::Storage("a".into()), 500),
        ];

        for (err, status) in cases {
            let http: Error = err.into();
            assert_eq!(http.status_code(), status);
        }
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: TenantError = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());
    }
}

//! Request-scoped tenant access
//!
//! The router and [`TenantMiddleware`](crate::TenantMiddleware) attach a
//! [`TenantContext`] to the request's extensions. Downstream code reads it
//! back with these helpers.

use crate::error::{Result, TenantError};
use crate::tenant::{TenantContext, TenantRecord};
use std::ops::Deref;
use std::sync::Arc;
use tenement_core::HttpRequest;

/// Attach `tenant` to the request, replacing any previous one.
pub fn set_current_tenant(request: &mut HttpRequest, tenant: Arc<TenantRecord>) {
    request.extensions.insert(TenantContext::with_tenant(tenant));
}

/// The tenant attached to this request, if any.
pub fn current_tenant(request: &HttpRequest) -> Option<Arc<TenantRecord>> {
    request
        .extensions
        .get::<TenantContext>()
        .and_then(|context| context.tenant().cloned())
}

pub fn current_tenant_id(request: &HttpRequest) -> Option<String> {
    request
        .extensions
        .get::<TenantContext>()
        .and_then(|context| context.tenant_id().map(str::to_string))
}

/// A tenant that must be present.
///
/// ```rust,ignore
/// async fn list_orders(req: HttpRequest) -> Result<HttpResponse, Error> {
///     let tenant = RequireTenant::from_request(&req)?;
///     let key = tenant.cache_key("orders");
///     // ...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireTenant(pub Arc<TenantRecord>);

impl RequireTenant {
    /// Fails with `NotFound` when no tenant was resolved for the request.
    pub fn from_request(request: &HttpRequest) -> Result<Self> {
        current_tenant(request)
            .map(Self)
            .ok_or_else(|| TenantError::NotFound("no tenant resolved for this request".into()))
    }

    pub fn into_inner(self) -> Arc<TenantRecord> {
        self.0
    }
}

impl Deref for RequireTenant {
    type Target = TenantRecord;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_through_extensions() {
        let mut request = HttpRequest::get("/");
        assert!(current_tenant(&request).is_none());
        assert!(RequireTenant::from_request(&request).unwrap_err().is_not_found());

        set_current_tenant(&mut request, Arc::new(TenantRecord::new("acme", "Acme")));

        assert_eq!(current_tenant_id(&request).as_deref(), Some("acme"));
        let required = RequireTenant::from_request(&request).unwrap();
        assert_eq!(required.name, "Acme");
    }

    #[test]
    fn test_set_replaces_previous_tenant() {
        let mut request = HttpRequest::get("/");
        set_current_tenant(&mut request, Arc::new(TenantRecord::new("acme", "Acme")));
        set_current_tenant(&mut request, Arc::new(TenantRecord::new("globex", "Globex")));

        assert_eq!(current_tenant_id(&request).as_deref(), Some("globex"));
    }
}

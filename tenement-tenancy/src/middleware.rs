//! Tenant Middleware
//!
//! Resolves the tenant for requests that go through a plain
//! [`MiddlewareChain`](tenement_core::MiddlewareChain) rather than the
//! [`MultiTenantRouter`](crate::MultiTenantRouter), and defines the
//! pre-dispatch hook both of them call.

use crate::context::set_current_tenant;
use crate::resolver::TenantResolver;
use crate::tenant::TenantRecord;
use async_trait::async_trait;
use std::sync::Arc;
use tenement_core::middleware::Next;
use tenement_core::{Error, HttpRequest, HttpResponse, Middleware};
use tracing::debug;

/// Notified of the current tenant before the tenant's handler runs.
///
/// Returning an error aborts the request with that error.
#[async_trait]
pub trait TenantAware: Send + Sync {
    async fn on_tenant(&self, tenant: &TenantRecord, request: &HttpRequest) -> Result<(), Error>;
}

/// Run `hooks` in order, stopping at the first error.
pub async fn notify_tenant_aware(
    hooks: &[Arc<dyn TenantAware>],
    tenant: &TenantRecord,
    request: &HttpRequest,
) -> Result<(), Error> {
    for hook in hooks {
        hook.on_tenant(tenant, request).await?;
    }
    Ok(())
}

/// Tenant middleware
///
/// Resolves the tenant and stores it in the request's extensions.
pub struct TenantMiddleware {
    resolver: Arc<TenantResolver>,
    hooks: Vec<Arc<dyn TenantAware>>,
    optional: bool,
}

impl TenantMiddleware {
    /// Create new tenant middleware
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let mut chain = MiddlewareChain::new();
    /// chain.use_middleware(TenantMiddleware::new(resolver.clone()).with_optional(true));
    /// ```
    pub fn new(resolver: Arc<TenantResolver>) -> Self {
        Self {
            resolver,
            hooks: Vec::new(),
            optional: false,
        }
    }

    /// Let requests without a tenant through instead of answering 404.
    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn with_hook<H: TenantAware + 'static>(mut self, hook: H) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }
}

#[async_trait]
impl Middleware for TenantMiddleware {
    async fn handle(&self, mut request: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        match self.resolver.resolve(&request).await {
            Some(tenant) => {
                set_current_tenant(&mut request, tenant.clone());
                notify_tenant_aware(&self.hooks, &tenant, &request).await?;
                next(request).await
            }
            None if self.optional => {
                debug!(path = %request.path, "No tenant resolved, continuing without one");
                next(request).await
            }
            None => Err(Error::NotFound("Tenant could not be resolved".to_string())),
        }
    }
}

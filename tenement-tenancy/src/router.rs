//! Multi-tenant request routing
//!
//! [`MultiTenantRouter`] resolves the tenant for each request, attaches it to
//! the request, finds the tenant's handler and dispatches to it.
//!
//! Handlers come from two places:
//!
//! - **Static**: registered up front, live for the life of the router.
//! - **Factory**: built on first use by a [`HandlerFactory`] and kept in an
//!   expiring cache.
//!
//! Factory builds are collapsed per tenant: concurrent first requests for the
//! same tenant wait on a single build. The build runs in its own task, so a
//! request that goes away mid-build does not cancel it for the others.

use crate::cache::ExpiringCache;
use crate::config::{CacheConfig, TenancyConfig};
use crate::context::set_current_tenant;
use crate::error::{Result, TenantError};
use crate::lock::KeyedLocks;
use crate::middleware::{TenantAware, notify_tenant_aware};
use crate::resolver::TenantResolver;
use crate::session::SessionIsolationValidator;
use crate::tenant::TenantRecord;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tenement_core::{
    Error, HandlerFn, HttpRequest, HttpResponse, Middleware, MiddlewareChain, handler_fn,
};
use tracing::{debug, error, info, warn};

/// A tenant-scoped request handler.
#[async_trait]
pub trait TenantHandler: Send + Sync {
    async fn handle(&self, request: HttpRequest) -> std::result::Result<HttpResponse, Error>;

    /// Session cookie this handler uses; `None` means the router default.
    fn session_cookie_name(&self) -> Option<&str> {
        None
    }
}

/// A handler function plus its own middleware and session cookie.
///
/// ```
/// use tenement_core::{HttpRequest, HttpResponse};
/// use tenement_tenancy::TenantApp;
///
/// let app = TenantApp::from_fn(|_req: HttpRequest| async { Ok(HttpResponse::text("hello")) })
///     .with_session_cookie("acme_session");
/// ```
#[derive(Clone)]
pub struct TenantApp {
    handler: HandlerFn,
    middleware: MiddlewareChain,
    session_cookie: Option<String>,
}

impl TenantApp {
    pub fn new(handler: HandlerFn) -> Self {
        Self {
            handler,
            middleware: MiddlewareChain::new(),
            session_cookie: None,
        }
    }

    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<HttpResponse, Error>> + Send + 'static,
    {
        Self::new(handler_fn(f))
    }

    pub fn with_session_cookie(mut self, name: impl Into<String>) -> Self {
        self.session_cookie = Some(name.into());
        self
    }

    pub fn with_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.use_middleware(middleware);
        self
    }
}

#[async_trait]
impl TenantHandler for TenantApp {
    async fn handle(&self, request: HttpRequest) -> std::result::Result<HttpResponse, Error> {
        self.middleware.apply(request, self.handler.clone()).await
    }

    fn session_cookie_name(&self) -> Option<&str> {
        self.session_cookie.as_deref()
    }
}

/// Builds a handler for a tenant that has no static registration.
#[async_trait]
pub trait HandlerFactory: Send + Sync {
    async fn build(&self, tenant: &TenantRecord) -> Result<Arc<dyn TenantHandler>>;
}

#[async_trait]
impl<F, Fut> HandlerFactory for F
where
    F: Fn(TenantRecord) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Arc<dyn TenantHandler>>> + Send + 'static,
{
    async fn build(&self, tenant: &TenantRecord) -> Result<Arc<dyn TenantHandler>> {
        self(tenant.clone()).await
    }
}

/// Dispatch outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Requests handed to a tenant handler
    pub dispatched: u64,
    /// Unresolved requests answered with 404
    pub not_found: u64,
    /// Unresolved requests handed to the fallback
    pub fallback: u64,
    /// Resolved tenants with no usable handler (503)
    pub unavailable: u64,
    /// Successful factory builds
    pub builds: u64,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    not_found: AtomicU64,
    fallback: AtomicU64,
    unavailable: AtomicU64,
    builds: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RouterStats {
        RouterStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            fallback: self.fallback.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
        }
    }
}

type SharedHandler = Arc<dyn TenantHandler>;

/// Routes requests to per-tenant handlers.
pub struct MultiTenantRouter {
    resolver: Arc<TenantResolver>,
    handlers: RwLock<HashMap<String, SharedHandler>>,
    built: Arc<ExpiringCache<SharedHandler>>,
    build_locks: KeyedLocks,
    factory: Option<Arc<dyn HandlerFactory>>,
    fallback: Option<SharedHandler>,
    hooks: Vec<Arc<dyn TenantAware>>,
    validator: SessionIsolationValidator,
    counters: Arc<Counters>,
}

impl MultiTenantRouter {
    pub fn builder(resolver: Arc<TenantResolver>) -> MultiTenantRouterBuilder {
        MultiTenantRouterBuilder::new(resolver)
    }

    /// Builder preloaded with the configured handler cache and cookie default.
    pub fn from_config(resolver: Arc<TenantResolver>, config: &TenancyConfig) -> MultiTenantRouterBuilder {
        MultiTenantRouterBuilder::new(resolver)
            .handler_cache(config.handler_cache.clone())
            .session_cookie_default(config.session_cookie_default.clone())
    }

    pub fn resolver(&self) -> &Arc<TenantResolver> {
        &self.resolver
    }

    /// Dispatch, mapping every failure to its HTTP response.
    pub async fn dispatch(&self, request: HttpRequest) -> HttpResponse {
        match self.try_dispatch(request).await {
            Ok(response) => response,
            Err(err) => HttpResponse::from_error(&err),
        }
    }

    /// Dispatch a request.
    ///
    /// - no tenant: fallback handler, or `NotFound`
    /// - tenant without handler: `ServiceUnavailable`
    /// - hook or handler error: returned as is
    pub async fn try_dispatch(&self, mut request: HttpRequest) -> std::result::Result<HttpResponse, Error> {
        let Some(tenant) = self.resolver.resolve(&request).await else {
            if let Some(fallback) = &self.fallback {
                Counters::bump(&self.counters.fallback);
                debug!(path = %request.path, "No tenant resolved, using fallback handler");
                return fallback.handle(request).await;
            }
            Counters::bump(&self.counters.not_found);
            debug!(path = %request.path, "No tenant resolved");
            return Err(Error::NotFound("Tenant not found".to_string()));
        };

        set_current_tenant(&mut request, tenant.clone());

        let handler = match self.handler_for(&tenant).await {
            Ok(handler) => handler,
            Err(err) => {
                Counters::bump(&self.counters.unavailable);
                warn!(tenant_id = %tenant.id, error = %err, "No handler available for tenant");
                return Err(Error::ServiceUnavailable(format!(
                    "no handler available for tenant '{}'",
                    tenant.id
                )));
            }
        };

        notify_tenant_aware(&self.hooks, &tenant, &request).await?;

        Counters::bump(&self.counters.dispatched);
        handler.handle(request).await
    }

    /// Static handler, cached build, or a fresh build, in that order.
    async fn handler_for(&self, tenant: &Arc<TenantRecord>) -> Result<SharedHandler> {
        if let Some(handler) = self.lookup(&tenant.id) {
            return Ok(handler);
        }

        let Some(factory) = self.factory.clone() else {
            return Err(TenantError::ServiceUnavailable(format!(
                "tenant '{}' has no registered handler and no factory is configured",
                tenant.id
            )));
        };

        let guard = self.build_locks.lock(&tenant.id).await;

        // Another request may have finished the build while we waited.
        if let Some(handler) = self.lookup(&tenant.id) {
            return Ok(handler);
        }

        let built = self.built.clone();
        let counters = self.counters.clone();
        let tenant = tenant.clone();
        let build = tokio::spawn(async move {
            let _guard = guard;
            let start = std::time::Instant::now();
            match factory.build(&tenant).await {
                Ok(handler) => {
                    built.set(tenant.id.clone(), handler.clone());
                    Counters::bump(&counters.builds);
                    info!(
                        tenant_id = %tenant.id,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Tenant handler built"
                    );
                    Ok(handler)
                }
                Err(err) => {
                    error!(tenant_id = %tenant.id, error = %err, "Tenant handler build failed");
                    Err(err)
                }
            }
        });

        build
            .await
            .map_err(|e| TenantError::ServiceUnavailable(format!("handler build aborted: {}", e)))?
    }

    fn lookup(&self, tenant_id: &str) -> Option<SharedHandler> {
        let registered = self.handlers.read().get(tenant_id).cloned();
        registered.or_else(|| self.built.get(tenant_id))
    }

    /// Register a static handler at runtime. Fails with `Configuration` if
    /// its session cookie collides with another tenant's.
    pub fn register<H: TenantHandler + 'static>(&self, tenant_id: impl Into<String>, handler: H) -> Result<()> {
        self.register_arc(tenant_id, Arc::new(handler))
    }

    pub fn register_arc(&self, tenant_id: impl Into<String>, handler: SharedHandler) -> Result<()> {
        let tenant_id = tenant_id.into();
        let mut handlers = self.handlers.write();

        let candidates = handlers
            .iter()
            .filter(|(id, _)| **id != tenant_id)
            .map(|(id, h)| (id.as_str(), h.session_cookie_name()))
            .chain(std::iter::once((tenant_id.as_str(), handler.session_cookie_name())));
        self.validator.validate(candidates)?;

        self.built.delete(&tenant_id);
        handlers.insert(tenant_id.clone(), handler);
        info!(tenant_id = %tenant_id, "Tenant handler registered");
        Ok(())
    }

    /// Remove a static handler. Returns whether one was registered.
    pub fn unregister(&self, tenant_id: &str) -> bool {
        self.handlers.write().remove(tenant_id).is_some()
    }

    /// Drop a factory-built handler so the next request rebuilds it.
    /// Static handlers are unaffected.
    pub fn invalidate_handler(&self, tenant_id: &str) -> bool {
        self.built.delete(tenant_id)
    }

    /// Tenant ids with a static handler, sorted.
    pub fn registered_tenants(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn stats(&self) -> RouterStats {
        self.counters.snapshot()
    }

    /// Expose the router as a plain handler function.
    pub fn into_handler_fn(self: Arc<Self>) -> HandlerFn {
        handler_fn(move |request: HttpRequest| {
            let router = self.clone();
            async move { Ok(router.dispatch(request).await) }
        })
    }
}

/// Builder for [`MultiTenantRouter`].
pub struct MultiTenantRouterBuilder {
    resolver: Arc<TenantResolver>,
    handlers: HashMap<String, SharedHandler>,
    factory: Option<Arc<dyn HandlerFactory>>,
    fallback: Option<SharedHandler>,
    hooks: Vec<Arc<dyn TenantAware>>,
    handler_cache: CacheConfig,
    session_cookie_default: String,
}

impl MultiTenantRouterBuilder {
    pub fn new(resolver: Arc<TenantResolver>) -> Self {
        Self {
            resolver,
            handlers: HashMap::new(),
            factory: None,
            fallback: None,
            hooks: Vec::new(),
            handler_cache: CacheConfig::default(),
            session_cookie_default: SessionIsolationValidator::default().default_cookie().to_string(),
        }
    }

    /// Register a static handler. A later registration for the same id wins.
    pub fn handler<H: TenantHandler + 'static>(self, tenant_id: impl Into<String>, handler: H) -> Self {
        self.handler_arc(tenant_id, Arc::new(handler))
    }

    pub fn handler_arc(mut self, tenant_id: impl Into<String>, handler: SharedHandler) -> Self {
        self.handlers.insert(tenant_id.into(), handler);
        self
    }

    pub fn factory<F: HandlerFactory + 'static>(mut self, factory: F) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Handler for requests that resolve to no tenant.
    pub fn fallback<H: TenantHandler + 'static>(mut self, handler: H) -> Self {
        self.fallback = Some(Arc::new(handler));
        self
    }

    /// Pre-dispatch hook; hooks run in the order they are added.
    pub fn hook<H: TenantAware + 'static>(mut self, hook: H) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn handler_cache(mut self, config: CacheConfig) -> Self {
        self.handler_cache = config;
        self
    }

    pub fn session_cookie_default(mut self, name: impl Into<String>) -> Self {
        self.session_cookie_default = name.into();
        self
    }

    /// Build the router, rejecting session cookie collisions between
    /// statically registered tenants.
    pub fn build(self) -> Result<MultiTenantRouter> {
        let validator = SessionIsolationValidator::new(self.session_cookie_default);
        validator.validate(
            self.handlers
                .iter()
                .map(|(id, handler)| (id.as_str(), handler.session_cookie_name())),
        )?;

        info!(
            static_handlers = self.handlers.len(),
            factory = self.factory.is_some(),
            fallback = self.fallback.is_some(),
            strategies = ?self.resolver.chain().names(),
            "Multi-tenant router ready"
        );

        Ok(MultiTenantRouter {
            resolver: self.resolver,
            handlers: RwLock::new(self.handlers),
            built: Arc::new(ExpiringCache::from_config(&self.handler_cache)),
            build_locks: KeyedLocks::new(),
            factory: self.factory,
            fallback: self.fallback,
            hooks: self.hooks,
            validator,
            counters: Arc::new(Counters::default()),
        })
    }
}

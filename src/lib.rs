// Tenement - multi-tenant request routing for Rust services
//
// This library resolves the tenant behind each request, provisions a store
// per tenant, and dispatches to per-tenant handlers.

// Re-export core functionality
pub use tenement_core::*;

// Re-export optional crates
#[cfg(feature = "tenancy")]
pub use tenement_tenancy;

/// Prelude for common imports.
///
/// ```
/// use tenement::prelude::*;
/// ```
pub mod prelude {
    pub use tenement_core::logging::{LogConfig, LogFormat, LogLevel};
    pub use tenement_core::{
        Error, HandlerFn, HttpRequest, HttpResponse, Middleware, MiddlewareChain, handler_fn,
    };

    #[cfg(feature = "tenancy")]
    pub use tenement_tenancy::prelude::*;

    pub use async_trait::async_trait;
    pub use std::sync::Arc;
}

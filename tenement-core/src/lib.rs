// Tenement core: the request/response surface the tenancy layer rides on.

pub mod error;
pub mod extensions;
pub mod http;
pub mod logging;
pub mod middleware;

pub use error::*;
pub use extensions::Extensions;
pub use http::*;
pub use middleware::{HandlerFn, Middleware, MiddlewareChain, Next, handler_fn};

// Middleware system for request/response processing

use crate::{Error, HttpRequest, HttpResponse};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, trace};

/// Type alias for the next handler in the middleware chain
pub type Next = Box<
    dyn FnOnce(HttpRequest) -> Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>>
        + Send,
>;

/// Type alias for handler functions
pub type HandlerFn = Arc<
    dyn Fn(HttpRequest) -> Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>>
        + Send
        + Sync,
>;

/// Wrap an async function as a [`HandlerFn`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}

/// Middleware trait for processing requests before they reach the handler
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Process the request and optionally pass to next middleware
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error>;
}

/// Middleware chain executor
#[derive(Clone)]
pub struct MiddlewareChain {
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self {
            middlewares: Arc::new(Vec::new()),
        }
    }

    /// Add a middleware to the chain
    pub fn use_middleware<M: Middleware + 'static>(&mut self, middleware: M) {
        self.use_arc(Arc::new(middleware));
    }

    /// Add an already shared middleware to the chain
    pub fn use_arc(&mut self, middleware: Arc<dyn Middleware>) {
        let mut mws = (*self.middlewares).clone();
        mws.push(middleware);
        self.middlewares = Arc::new(mws);
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Execute the middleware chain with a handler
    ///
    /// ```
    /// use tenement_core::{HttpRequest, HttpResponse, MiddlewareChain, handler_fn};
    ///
    /// # tokio_test::block_on(async {
    /// let chain = MiddlewareChain::new();
    /// let handler = handler_fn(|_req| async { Ok(HttpResponse::text("pong")) });
    /// let response = chain.apply(HttpRequest::get("/ping"), handler).await.unwrap();
    /// assert_eq!(response.body_text(), "pong");
    /// # });
    /// ```
    pub async fn apply(&self, req: HttpRequest, handler: HandlerFn) -> Result<HttpResponse, Error> {
        debug!(
            middleware_count = self.middlewares.len(),
            path = %req.path,
            method = %req.method,
            "Executing middleware chain"
        );
        self.execute_from(0, req, handler).await
    }

    fn execute_from(
        &self,
        index: usize,
        req: HttpRequest,
        handler: HandlerFn,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>> {
        if index >= self.middlewares.len() {
            trace!("Middleware chain complete, calling handler");
            handler(req)
        } else {
            let middleware = self.middlewares[index].clone();
            let chain = self.clone();
            let handler_clone = handler.clone();

            trace!(middleware_index = index, "Executing middleware");
            Box::pin(async move {
                middleware
                    .handle(
                        req,
                        Box::new(move |req| chain.execute_from(index + 1, req, handler_clone)),
                    )
                    .await
            })
        }
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag(&'static str);

    #[async_trait]
    impl Middleware for Tag {
        async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
            let mut response = next(req).await?;
            let order = response
                .headers
                .remove("x-order")
                .map(|prev| format!("{},{}", self.0, prev))
                .unwrap_or_else(|| self.0.to_string());
            response.headers.insert("x-order".to_string(), order);
            Ok(response)
        }
    }

    struct Reject;

    #[async_trait]
    impl Middleware for Reject {
        async fn handle(&self, _req: HttpRequest, _next: Next) -> Result<HttpResponse, Error> {
            Err(Error::Forbidden("rejected".to_string()))
        }
    }

    #[tokio::test]
    async fn test_chain_runs_in_registration_order() {
        let mut chain = MiddlewareChain::new();
        chain.use_middleware(Tag("outer"));
        chain.use_middleware(Tag("inner"));

        let handler = handler_fn(|_req| async { Ok(HttpResponse::ok()) });
        let response = chain.apply(HttpRequest::get("/"), handler).await.unwrap();

        assert_eq!(
            response.headers.get("x-order").map(String::as_str),
            Some("outer,inner")
        );
    }

    #[tokio::test]
    async fn test_middleware_can_short_circuit() {
        let mut chain = MiddlewareChain::new();
        chain.use_middleware(Reject);

        let handler = handler_fn(|_req| async {
            Err::<HttpResponse, Error>(Error::Internal("handler must not run".to_string()))
        });
        let result = chain.apply(HttpRequest::get("/"), handler).await;

        assert_eq!(result.unwrap_err().status_code(), 403);
    }

    #[tokio::test]
    async fn test_empty_chain_calls_handler() {
        let chain = MiddlewareChain::default();
        assert!(chain.is_empty());

        let handler = handler_fn(|req: HttpRequest| async move { Ok(HttpResponse::text(req.path)) });
        let response = chain.apply(HttpRequest::get("/ping"), handler).await.unwrap();
        assert_eq!(response.body_text(), "/ping");
    }
}

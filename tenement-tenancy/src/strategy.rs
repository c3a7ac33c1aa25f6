//! Resolution strategies
//!
//! A strategy extracts a raw routing key from a request without touching any
//! store. [`StrategyChain`] tries strategies in registration order and stops
//! at the first that yields a key, so registration order is the precedence
//! policy.

use crate::config::ResolutionConfig;
use crate::error::TenantError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tenement_core::HttpRequest;
use tracing::trace;

/// Extracts a routing key from a request.
pub trait ResolutionStrategy: Send + Sync {
    /// Short name used in logs and chain introspection.
    fn name(&self) -> &str;

    /// Returns a non-empty key, or `None` when this strategy does not apply.
    fn resolve(&self, request: &HttpRequest) -> Option<String>;
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Resolves from the `Host` header.
///
/// `acme.example.com` with base domain `example.com` yields `acme`; any other
/// host such as `acme.io` yields the whole host so custom domains can match.
pub struct DomainStrategy {
    base_domain: String,
}

impl DomainStrategy {
    pub fn new(base_domain: impl Into<String>) -> Self {
        Self {
            base_domain: base_domain.into().trim().trim_matches('.').to_ascii_lowercase(),
        }
    }

    /// Pure key extraction from a host value.
    pub fn extract(&self, host: &str) -> Option<String> {
        let host = strip_port(host.trim()).to_ascii_lowercase();
        if host.is_empty() {
            return None;
        }
        if self.base_domain.is_empty() {
            return Some(host);
        }
        if host == self.base_domain {
            return None;
        }

        match host
            .strip_suffix(self.base_domain.as_str())
            .and_then(|prefix| prefix.strip_suffix('.'))
        {
            Some(prefix) => non_empty(prefix),
            None => Some(host),
        }
    }
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // IPv6 literal, e.g. [::1]:8080
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

impl ResolutionStrategy for DomainStrategy {
    fn name(&self) -> &str {
        "domain"
    }

    fn resolve(&self, request: &HttpRequest) -> Option<String> {
        self.extract(request.host()?)
    }
}

/// Resolves from a request header such as `X-Tenant-ID`.
pub struct HeaderStrategy {
    header_name: String,
}

impl HeaderStrategy {
    pub fn new(header_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
        }
    }
}

impl ResolutionStrategy for HeaderStrategy {
    fn name(&self) -> &str {
        "header"
    }

    fn resolve(&self, request: &HttpRequest) -> Option<String> {
        non_empty(request.header(&self.header_name)?)
    }
}

/// Resolves from a query parameter such as `?tenant=acme`.
pub struct QueryStrategy {
    param: String,
}

impl QueryStrategy {
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }
}

impl ResolutionStrategy for QueryStrategy {
    fn name(&self) -> &str {
        "query"
    }

    fn resolve(&self, request: &HttpRequest) -> Option<String> {
        non_empty(request.query(&self.param)?)
    }
}

/// Resolves from a cookie.
pub struct CookieStrategy {
    cookie_name: String,
}

impl CookieStrategy {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
        }
    }
}

impl ResolutionStrategy for CookieStrategy {
    fn name(&self) -> &str {
        "cookie"
    }

    fn resolve(&self, request: &HttpRequest) -> Option<String> {
        non_empty(request.cookie(&self.cookie_name)?)
    }
}

/// Resolves from the URL path.
///
/// By default the first segment (`/acme/orders` yields `acme`). With
/// [`PathStrategy::pattern`] a capture group of a regex is used instead.
pub struct PathStrategy {
    pattern: Option<(Regex, usize)>,
}

impl PathStrategy {
    pub fn new() -> Self {
        Self { pattern: None }
    }

    /// Match the path against `pattern` and use capture `group` as the key.
    pub fn pattern(pattern: &str, group: usize) -> Result<Self, TenantError> {
        let regex = Regex::new(pattern)
            .map_err(|e| TenantError::Configuration(format!("invalid path pattern: {}", e)))?;
        if group >= regex.captures_len() {
            return Err(TenantError::Configuration(format!(
                "path pattern '{}' has no capture group {}",
                pattern, group
            )));
        }
        Ok(Self {
            pattern: Some((regex, group)),
        })
    }
}

impl Default for PathStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolutionStrategy for PathStrategy {
    fn name(&self) -> &str {
        "path"
    }

    fn resolve(&self, request: &HttpRequest) -> Option<String> {
        match &self.pattern {
            Some((regex, group)) => non_empty(regex.captures(&request.path)?.get(*group)?.as_str()),
            None => non_empty(request.path.split('/').find(|s| !s.is_empty())?),
        }
    }
}

/// Built-in strategy kinds, used to configure chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Header,
    Domain,
    Query,
    Cookie,
    Path,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Domain => "domain",
            Self::Query => "query",
            Self::Cookie => "cookie",
            Self::Path => "path",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = TenantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "header" => Ok(Self::Header),
            "domain" | "subdomain" | "host" => Ok(Self::Domain),
            "query" => Ok(Self::Query),
            "cookie" => Ok(Self::Cookie),
            "path" => Ok(Self::Path),
            other => Err(TenantError::Configuration(format!(
                "unknown resolution strategy '{}'",
                other
            ))),
        }
    }
}

/// Ordered list of strategies.
#[derive(Clone, Default)]
pub struct StrategyChain {
    strategies: Vec<Arc<dyn ResolutionStrategy>>,
}

impl StrategyChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the built-in strategies in the configured order.
    pub fn from_config(config: &ResolutionConfig) -> Self {
        config
            .order
            .iter()
            .fold(Self::new(), |chain, kind| match kind {
                StrategyKind::Header => chain.with_strategy(HeaderStrategy::new(&config.header_name)),
                StrategyKind::Domain => chain.with_strategy(DomainStrategy::new(&config.base_domain)),
                StrategyKind::Query => chain.with_strategy(QueryStrategy::new(&config.query_param)),
                StrategyKind::Cookie => chain.with_strategy(CookieStrategy::new(&config.cookie_name)),
                StrategyKind::Path => chain.with_strategy(PathStrategy::new()),
            })
    }

    pub fn with_strategy<S: ResolutionStrategy + 'static>(mut self, strategy: S) -> Self {
        self.push(Arc::new(strategy));
        self
    }

    pub fn push(&mut self, strategy: Arc<dyn ResolutionStrategy>) {
        self.strategies.push(strategy);
    }

    /// Run strategies in order. Returns the winning strategy's name and key.
    pub fn resolve(&self, request: &HttpRequest) -> Option<(&str, String)> {
        self.strategies.iter().find_map(|strategy| {
            let key = strategy.resolve(request)?;
            trace!(strategy = strategy.name(), key = %key, "Strategy extracted tenant key");
            Some((strategy.name(), key))
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl std::fmt::Debug for StrategyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

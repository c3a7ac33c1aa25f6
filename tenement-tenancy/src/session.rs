//! Session cookie isolation
//!
//! Tenants served from one domain share a cookie jar. Two tenant handlers
//! using the same session cookie name would read each other's sessions, so
//! the router refuses to start (or to register a handler) when that happens.

use crate::error::{Result, TenantError};
use std::collections::HashMap;

/// Checks that registered tenant handlers use distinct session cookies.
#[derive(Debug, Clone)]
pub struct SessionIsolationValidator {
    default_cookie: String,
}

impl SessionIsolationValidator {
    /// `default_cookie` is assumed for handlers that do not name a cookie.
    pub fn new(default_cookie: impl Into<String>) -> Self {
        Self {
            default_cookie: default_cookie.into(),
        }
    }

    pub fn default_cookie(&self) -> &str {
        &self.default_cookie
    }

    /// Cookie name a handler actually ends up using.
    pub fn effective_cookie<'a>(&'a self, configured: Option<&'a str>) -> &'a str {
        configured
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.default_cookie.trim())
    }

    /// Fail with `Configuration` naming both tenants and the shared cookie on
    /// the first collision. Tenants are checked in id order so the error is
    /// deterministic.
    ///
    /// ```
    /// use tenement_tenancy::SessionIsolationValidator;
    ///
    /// let validator = SessionIsolationValidator::new("session_id");
    /// assert!(validator.validate([("acme", Some("acme_sid")), ("globex", None)]).is_ok());
    /// assert!(validator.validate([("acme", None), ("globex", None)]).is_err());
    /// ```
    pub fn validate<'a, I>(&self, handlers: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        let mut handlers: Vec<(&str, Option<&str>)> = handlers.into_iter().collect();
        handlers.sort_by(|a, b| a.0.cmp(b.0));

        let mut owners: HashMap<&str, &str> = HashMap::new();
        for (tenant_id, cookie) in handlers {
            let cookie = self.effective_cookie(cookie);
            if let Some(first) = owners.get(cookie) {
                if *first == tenant_id {
                    continue;
                }
                return Err(TenantError::Configuration(format!(
                    "tenants '{}' and '{}' share session cookie '{}'",
                    first, tenant_id, cookie
                )));
            }
            owners.insert(cookie, tenant_id);
        }
        Ok(())
    }
}

impl Default for SessionIsolationValidator {
    fn default() -> Self {
        Self::new("session_id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cookie_collision_names_both_tenants() {
        let validator = SessionIsolationValidator::default();
        let err = validator
            .validate([("globex", None), ("acme", None)])
            .unwrap_err();

        let TenantError::Configuration(message) = err else {
            panic!("expected configuration error");
        };
        assert!(message.contains("'acme'"));
        assert!(message.contains("'globex'"));
        assert!(message.contains("'session_id'"));
    }

    #[test]
    fn test_distinct_cookies_pass() {
        let validator = SessionIsolationValidator::new("sid");
        tokio_test::assert_ok!(validator.validate([
            ("acme", Some("acme_session")),
            ("globex", Some("globex_session")),
            ("initech", None),
        ]));
    }

    #[test]
    fn test_explicit_cookie_equal_to_default_collides() {
        let validator = SessionIsolationValidator::new("sid");
        tokio_test::assert_err!(validator.validate([("acme", Some("sid")), ("globex", None)]));
    }

    #[test]
    fn test_names_are_trimmed_and_case_sensitive() {
        let validator = SessionIsolationValidator::new("sid");
        assert!(validator.validate([("acme", Some(" shared ")), ("globex", Some("shared"))]).is_err());
        assert!(validator.validate([("acme", Some("Shared")), ("globex", Some("shared"))]).is_ok());
        assert_eq!(validator.effective_cookie(Some("  ")), "sid");
    }

    #[test]
    fn test_single_or_no_handlers() {
        let validator = SessionIsolationValidator::default();
        assert!(validator.validate(std::iter::empty()).is_ok());
        assert!(validator.validate([("acme", None)]).is_ok());
    }
}

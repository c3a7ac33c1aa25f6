//! Store locator generation
//!
//! Decides where a new tenant's backing store lives when the record does not
//! name one explicitly.

use crate::error::{Result, TenantError};
use crate::tenant::TenantRecord;

/// Derives a backing-store locator for a tenant.
pub trait StoreLocatorGenerator: Send + Sync {
    fn generate(&self, tenant: &TenantRecord) -> String;
}

impl<F> StoreLocatorGenerator for F
where
    F: Fn(&TenantRecord) -> String + Send + Sync,
{
    fn generate(&self, tenant: &TenantRecord) -> String {
        self(tenant)
    }
}

/// Substitutes `{id}` (and optionally `{name}`) into a template.
///
/// ```
/// use tenement_tenancy::{StoreLocatorGenerator, TemplateLocatorGenerator, TenantRecord};
///
/// let generator = TemplateLocatorGenerator::new("sqlite://data/tenants/{id}.db").unwrap();
/// let tenant = TenantRecord::new("acme", "Acme Corp");
/// assert_eq!(generator.generate(&tenant), "sqlite://data/tenants/acme.db");
/// ```
#[derive(Debug, Clone)]
pub struct TemplateLocatorGenerator {
    template: String,
}

impl TemplateLocatorGenerator {
    /// Fails with `Configuration` when the template has no `{id}` slot, since
    /// every tenant would then share one store.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains("{id}") {
            return Err(TenantError::Configuration(format!(
                "locator template '{}' has no {{id}} slot",
                template
            )));
        }
        Ok(Self { template })
    }

    pub fn template(&self) -> &str {
        &self.template
    }
}

impl StoreLocatorGenerator for TemplateLocatorGenerator {
    fn generate(&self, tenant: &TenantRecord) -> String {
        self.template
            .replace("{id}", &tenant.id)
            .replace("{name}", &slug(&tenant.name))
    }
}

/// Lower-case, ASCII alphanumerics and dashes only.
fn slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_substitution() {
        let generator = TemplateLocatorGenerator::new("sqlite:///srv/{id}/{name}.db").unwrap();
        let tenant = TenantRecord::new("t-42", "Acme Corp, Inc.");
        assert_eq!(generator.generate(&tenant), "sqlite:///srv/t-42/acme-corp-inc.db");
    }

    #[test]
    fn test_template_requires_id_slot() {
        assert!(matches!(
            TemplateLocatorGenerator::new("sqlite://shared.db"),
            Err(TenantError::Configuration(_))
        ));
    }

    #[test]
    fn test_closure_generator() {
        let generator = |tenant: &TenantRecord| format!("postgres://db.internal/{}", tenant.id);
        let tenant = TenantRecord::new("acme", "Acme");
        assert_eq!(generator.generate(&tenant), "postgres://db.internal/acme");
    }
}

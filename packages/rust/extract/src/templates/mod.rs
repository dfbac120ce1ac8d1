//! Page template trait and the registry that picks one per document.
//!
//! A template knows the markup convention of one store page layout and turns
//! a parsed document into a [`RawProduct`]. Reconciliation and storage never
//! see the markup, so adding a layout only means adding a template.

mod storefront;

use pricewatch_shared::RawProduct;
use scraper::Html;
use url::Url;

pub use storefront::StorefrontTemplate;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Selector-based extraction for one product page layout.
pub trait PageTemplate: Send + Sync {
    /// Whether this template recognizes the document.
    fn detect(&self, doc: &Html, url: &Url) -> bool;

    /// Extract the product record. Absent elements yield empty/zero fields.
    fn extract(&self, doc: &Html) -> RawProduct;

    /// Human-readable template name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds registered templates in priority order.
pub struct TemplateRegistry {
    templates: Vec<Box<dyn PageTemplate>>,
    fallback: Box<dyn PageTemplate>,
}

impl TemplateRegistry {
    /// Create a registry whose only template (and fallback) is the storefront layout.
    pub fn new() -> Self {
        Self {
            templates: Vec::new(),
            fallback: Box::new(StorefrontTemplate),
        }
    }

    /// Register a template. Later registrations are tried after earlier ones.
    pub fn register(mut self, template: impl PageTemplate + 'static) -> Self {
        self.templates.push(Box::new(template));
        self
    }

    /// Pick the template for a document. Always returns one.
    pub fn select(&self, doc: &Html, url: &Url) -> &dyn PageTemplate {
        self.templates
            .iter()
            .find(|t| t.detect(doc, url))
            .map(|t| t.as_ref())
            .unwrap_or(self.fallback.as_ref())
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

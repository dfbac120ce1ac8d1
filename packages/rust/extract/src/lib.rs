//! pricewatch-extract: product page fetching and field extraction.
//!
//! [`HttpFetcher`] retrieves raw page bytes with bounded time and size.
//! [`Extractor`] parses those bytes and hands the document to the matching
//! [`PageTemplate`], which pulls name, prices, and gallery images out of the
//! markup.

pub mod currency;
pub mod fetch;
pub mod templates;

use scraper::Html;
use tracing::{debug, warn};
use url::Url;

use pricewatch_shared::{PriceWatchError, RawProduct, Result};

pub use currency::normalize_price;
pub use fetch::HttpFetcher;
pub use templates::{PageTemplate, StorefrontTemplate, TemplateRegistry};

/// Turns a fetched page body into a [`RawProduct`].
#[derive(Default)]
pub struct Extractor {
    registry: TemplateRegistry,
}

impl Extractor {
    /// Extractor using the default storefront layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Extractor with a caller-supplied template registry.
    pub fn with_registry(registry: TemplateRegistry) -> Self {
        Self { registry }
    }

    /// Parse `body` and extract the product fields.
    ///
    /// Fails only when the body cannot be read as a document at all. Missing
    /// fields degrade to empty/zero and are logged as warnings.
    pub fn extract(&self, body: &[u8], url: &Url) -> Result<RawProduct> {
        let text = std::str::from_utf8(body)
            .map_err(|e| PriceWatchError::parse(format!("{url}: body is not valid UTF-8: {e}")))?;
        if text.trim().is_empty() {
            return Err(PriceWatchError::parse(format!("{url}: empty response body")));
        }

        let doc = Html::parse_document(text);
        let template = self.registry.select(&doc, url);
        let product = template.extract(&doc);

        debug!(
            url = %url,
            template = template.name(),
            images = product.images.len(),
            "extracted product"
        );

        if product.name.trim().is_empty() {
            warn!(url = %url, "product name not found on page");
        }
        if product.current_price == 0 {
            warn!(url = %url, "current price not found on page");
        }

        Ok(product)
    }
}

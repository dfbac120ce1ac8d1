//! Storefront product page layout.

use std::sync::LazyLock;

use pricewatch_shared::RawProduct;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::PageTemplate;
use crate::currency::normalize_price;

/// Product name heading.
static NAME_SELECTOR: LazyLock<Selector> = LazyLock::new(|| selector("h1#product-name"));
/// Price after discount (what the buyer pays).
static FINAL_PRICE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| selector("div#product-final-price"));
/// Struck-through price before discount. Absent when nothing is discounted.
static DISCOUNT_PRICE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| selector("div#product-discount-price"));
/// Gallery container; each element child is one slide.
static GALLERY_SELECTOR: LazyLock<Selector> = LazyLock::new(|| selector(".css-1iv32ek"));
/// Image inside a gallery slide.
static GALLERY_IMAGE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| selector("img#product-image"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

/// The fixed-selector storefront layout. Matches every document.
pub struct StorefrontTemplate;

impl PageTemplate for StorefrontTemplate {
    fn detect(&self, _doc: &Html, _url: &Url) -> bool {
        true
    }

    fn extract(&self, doc: &Html) -> RawProduct {
        let current_price = normalize_price(&first_text(doc, &FINAL_PRICE_SELECTOR));

        // No visible discount means the original price equals the current one.
        let original_price = match normalize_price(&first_text(doc, &DISCOUNT_PRICE_SELECTOR)) {
            0 => current_price,
            price => price,
        };

        RawProduct {
            name: all_text(doc, &NAME_SELECTOR),
            current_price,
            original_price,
            images: gallery_images(doc),
        }
    }

    fn name(&self) -> &str {
        "storefront"
    }
}

/// Concatenated text of every element matching `selector`, untrimmed.
fn all_text(doc: &Html, selector: &Selector) -> String {
    doc.select(selector).flat_map(|el| el.text()).collect()
}

/// Text of the first element matching `selector`, or empty.
fn first_text(doc: &Html, selector: &Selector) -> String {
    doc.select(selector)
        .next()
        .map(|el| el.text().collect())
        .unwrap_or_default()
}

/// One entry per gallery slide: the image `src` cut at the first `&`.
///
/// Slides without an image still contribute an empty string.
fn gallery_images(doc: &Html) -> Vec<String> {
    let mut images = Vec::new();
    for gallery in doc.select(&GALLERY_SELECTOR) {
        for slide in gallery.children().filter_map(ElementRef::wrap) {
            let src = slide
                .select(&GALLERY_IMAGE_SELECTOR)
                .next()
                .and_then(|img| img.value().attr("src"))
                .unwrap_or("");
            // Tracking parameters are appended after the first `&`.
            let base = src.split('&').next().unwrap_or_default();
            images.push(base.to_string());
        }
    }
    images
}

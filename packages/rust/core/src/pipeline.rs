//! The scrape-and-reconcile pipeline and the read queries built on the store.
//!
//! A registration is: fetch the page, extract the product fields, upsert the
//! observation. Nothing is persisted unless every step succeeds.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use pricewatch_extract::{Extractor, HttpFetcher};
use pricewatch_shared::{
    PriceHistory, PriceWatchError, Product, ProductId, ProductPayload, Result,
};
use pricewatch_storage::Storage;

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback trait for CLI reporting.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each product of a batch refresh, successful or not.
    fn product_refreshed(&self, url: &str, current: usize, total: usize);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn product_refreshed(&self, _url: &str, _current: usize, _total: usize) {}
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// One page of the product listing plus the overall count.
#[derive(Debug, Clone)]
pub struct ProductPage {
    pub products: Vec<Product>,
    pub total: u64,
}

/// Registers product pages and answers queries about tracked products.
pub struct ProductTracker {
    storage: Arc<Storage>,
    fetcher: HttpFetcher,
    extractor: Extractor,
}

impl ProductTracker {
    /// Tracker using the default storefront extractor.
    pub fn new(storage: Arc<Storage>, fetcher: HttpFetcher) -> Self {
        Self {
            storage,
            fetcher,
            extractor: Extractor::new(),
        }
    }

    /// Replace the extractor (custom page templates).
    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// The underlying store.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Scrape `url` and record the observation. Returns the product id.
    pub async fn register_product(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<ProductId> {
        self.register_product_with_progress(url, cancel, &SilentProgress)
            .await
    }

    /// [`register_product`](Self::register_product) with phase reporting.
    ///
    /// Cancellation aborts the fetch in flight. Once the upsert has started it
    /// runs to completion or rolls back on its own.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn register_product_with_progress(
        &self,
        url: &Url,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<ProductId> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PriceWatchError::validation(format!(
                "unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        progress.phase("Fetching page");
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PriceWatchError::Cancelled),
            body = self.fetcher.fetch(url) => body?,
        };

        progress.phase("Extracting product");
        let raw = self.extractor.extract(&body, url)?;

        if cancel.is_cancelled() {
            return Err(PriceWatchError::Cancelled);
        }

        progress.phase("Saving");
        let payload = ProductPayload::from_raw(raw, url.as_str(), Utc::now());
        let id = self.storage.upsert_product(&payload).await?;

        info!(
            product_id = id.0,
            name = %payload.name,
            current_price = payload.current_price,
            original_price = payload.original_price,
            "product registered"
        );
        Ok(id)
    }

    /// A product with its active images.
    pub async fn product_detail(&self, id: ProductId) -> Result<Product> {
        self.storage
            .get_product(id)
            .await?
            .ok_or_else(|| PriceWatchError::not_found("product", id.0))
    }

    /// One page of products ordered by id, with the total count.
    pub async fn list_products(&self, offset: u32, limit: u32) -> Result<ProductPage> {
        let products = self.storage.list_products(offset, limit).await?;
        let total = self.storage.count_products().await?;
        debug!(offset, limit, returned = products.len(), total, "listed products");
        Ok(ProductPage { products, total })
    }

    /// The latest `limit` price observations of a product, oldest first.
    ///
    /// Unknown products have an empty history.
    pub async fn price_history(&self, id: ProductId, limit: u32) -> Result<Vec<PriceHistory>> {
        self.storage.recent_price_history(id, limit).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pricewatch_shared::FetchOptions;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) const WIDGET_PAGE: &str = r#"<html><body>
        <h1 id="product-name">Widget</h1>
        <div id="product-final-price">Rp100.000</div>
        <div id="product-discount-price"></div>
        <div class="css-1iv32ek">
            <div><img id="product-image" src="https://img.shop.example/w1.jpg&ref=pdp"></div>
            <div><img id="product-image" src="https://img.shop.example/w2.jpg"></div>
        </div>
    </body></html>"#;

    pub(crate) fn product_page(name: &str, price: &str) -> String {
        format!(
            r#"<html><body>
            <h1 id="product-name">{name}</h1>
            <div id="product-final-price">{price}</div>
            </body></html>"#
        )
    }

    pub(crate) async fn test_tracker() -> ProductTracker {
        let tmp = std::env::temp_dir().join(format!("pw_core_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&tmp).await.expect("open test db");
        let options = FetchOptions {
            allow_private_hosts: true,
            ..FetchOptions::default()
        };
        let fetcher = HttpFetcher::new(&options).expect("fetcher");
        ProductTracker::new(Arc::new(storage), fetcher)
    }

    pub(crate) fn page_url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{p}", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn registers_widget_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/p/widget"))
            .respond_with(ResponseTemplate::new(200).set_body_string(WIDGET_PAGE))
            .mount(&server)
            .await;

        let tracker = test_tracker().await;
        let url = page_url(&server, "/p/widget");
        let id = tracker
            .register_product(&url, &CancellationToken::new())
            .await
            .expect("register");

        let product = tracker.product_detail(id).await.unwrap();
        assert_eq!(product.name, "Widget");
        assert_eq!(product.current_price, 100_000);
        assert_eq!(product.original_price, 100_000);
        assert_eq!(product.source_url, url.as_str());
        assert_eq!(
            product.images,
            vec![
                "https://img.shop.example/w1.jpg".to_string(),
                "https://img.shop.example/w2.jpg".to_string(),
            ]
        );

        let history = tracker.price_history(id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].current_price, 100_000);
    }

    #[tokio::test]
    async fn registering_twice_keeps_identity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(WIDGET_PAGE))
            .mount(&server)
            .await;

        let tracker = test_tracker().await;
        let cancel = CancellationToken::new();
        let first = tracker
            .register_product(&page_url(&server, "/a"), &cancel)
            .await
            .unwrap();
        let second = tracker
            .register_product(&page_url(&server, "/b"), &cancel)
            .await
            .unwrap();

        assert_eq!(first, second);
        let listing = tracker.list_products(0, 10).await.unwrap();
        assert_eq!(listing.total, 1);
        assert!(listing.products[0].source_url.ends_with("/b"));
        assert_eq!(tracker.price_history(first, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_stores_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let tracker = test_tracker().await;
        let err = tracker
            .register_product(&page_url(&server, "/p/down"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PriceWatchError::Fetch(_)));
        assert_eq!(tracker.list_products(0, 10).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn unparsable_body_stores_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xfe, 0xfd]))
            .mount(&server)
            .await;

        let tracker = test_tracker().await;
        let err = tracker
            .register_product(&page_url(&server, "/p/bin"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PriceWatchError::Parse { .. }));
        assert_eq!(tracker.list_products(0, 10).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn cancelled_registration_never_fetches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(WIDGET_PAGE))
            .expect(0)
            .mount(&server)
            .await;

        let tracker = test_tracker().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = tracker
            .register_product(&page_url(&server, "/p/widget"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PriceWatchError::Cancelled));
        assert_eq!(tracker.list_products(0, 10).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn cancellation_aborts_slow_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(WIDGET_PAGE)
                    .set_delay(std::time::Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let tracker = test_tracker().await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = tracker
            .register_product(&page_url(&server, "/p/widget"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PriceWatchError::Cancelled));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(tracker.list_products(0, 10).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn non_http_url_is_rejected() {
        let tracker = test_tracker().await;
        let url = Url::parse("ftp://shop.example/p").unwrap();
        let err = tracker
            .register_product(&url, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn unknown_product_is_not_found() {
        let tracker = test_tracker().await;
        let err = tracker.product_detail(ProductId(99)).await.unwrap_err();
        assert!(matches!(err, PriceWatchError::NotFound { id: 99, .. }));
        assert!(tracker.price_history(ProductId(99), 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_pages_by_offset() {
        let server = MockServer::start().await;
        for (p, name) in [("/1", "One"), ("/2", "Two"), ("/3", "Three")] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(
                    ResponseTemplate::new(200).set_body_string(product_page(name, "Rp1.000")),
                )
                .mount(&server)
                .await;
        }

        let tracker = test_tracker().await;
        let cancel = CancellationToken::new();
        for p in ["/1", "/2", "/3"] {
            tracker
                .register_product(&page_url(&server, p), &cancel)
                .await
                .unwrap();
        }

        let page = tracker.list_products(1, 1).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.products.len(), 1);
        assert_eq!(page.products[0].name, "Two");
    }
}

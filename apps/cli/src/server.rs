//! JSON web API over the product tracker.
//!
//! Routes:
//! - `GET  /ping`                                  liveness, answers `pong`
//! - `POST /addlink` (form `input_link`)            register a product page
//! - `GET  /list/product?draw&start&length`         DataTables server-side listing
//! - `GET  /product/{id}`                           product with active images
//! - `GET  /histories?product_id&limit`             price history, oldest first

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Extension, Form, Router,
    extract::{Path, Query},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use color_eyre::eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::{error, info, warn};
use url::Url;

use pricewatch_core::ProductTracker;
use pricewatch_shared::{PriceWatchError, Product, ProductId};

/// Largest page the listing endpoint will return.
const MAX_PAGE_SIZE: u32 = 100;

/// Shared handler state.
#[derive(Clone)]
pub(crate) struct AppState {
    pub tracker: Arc<ProductTracker>,
    /// Listing page size when the client sends no `length`.
    pub page_size: u32,
    /// History length when the client sends no `limit`.
    pub history_limit: u32,
    /// Cancelled on shutdown; each request works under a child token.
    pub shutdown: CancellationToken,
}

/// Build the API router.
pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/addlink", post(add_link))
        .route("/list/product", get(list_products))
        .route("/product/{id}", get(product_detail))
        .route("/histories", get(histories))
        .layer(ServiceBuilder::new().layer(Extension(state)))
}

/// Bind `host:port` and serve until `state.shutdown` is cancelled.
pub(crate) async fn serve(state: AppState, host: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| eyre!("invalid listen address {host}:{port}: {e}"))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| eyre!("failed to bind to {addr}: {e}"))?;

    info!(%addr, "web server listening");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| eyre!("server error: {e}"))?;

    info!("web server stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

/// `{status, data, error}` wrapper for command-style endpoints.
#[derive(Debug, Serialize)]
struct Envelope<T> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> Envelope<T> {
    fn success(data: T) -> Self {
        Self {
            status: "Success",
            data: Some(data),
            error: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct Registered {
    id: ProductId,
}

/// DataTables server-side processing response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    draw: u64,
    records_total: u64,
    records_filtered: u64,
    data: Vec<ProductRow>,
}

#[derive(Debug, Serialize)]
struct ProductRow {
    id: ProductId,
    name: String,
    current_price: i64,
    original_price: i64,
}

impl From<Product> for ProductRow {
    fn from(p: Product) -> Self {
        Self {
            id: p.id,
            name: p.name,
            current_price: p.current_price,
            original_price: p.original_price,
        }
    }
}

#[derive(Debug, Serialize)]
struct HistoryPoint {
    current_price: i64,
    original_price: i64,
    update_time: DateTime<Utc>,
}

/// Maps library errors onto status codes and the error envelope.
struct ApiError(PriceWatchError);

impl From<PriceWatchError> for ApiError {
    fn from(e: PriceWatchError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PriceWatchError::Validation { .. } => StatusCode::BAD_REQUEST,
            PriceWatchError::NotFound { .. } => StatusCode::NOT_FOUND,
            PriceWatchError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        } else {
            warn!(error = %self.0, "request rejected");
        }

        let body = Envelope::<()> {
            status: "Error",
            data: None,
            error: Some(self.0.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn ping() -> &'static str {
    "pong"
}

#[derive(Debug, Deserialize)]
struct AddLinkForm {
    #[serde(default)]
    input_link: String,
}

async fn add_link(
    Extension(state): Extension<AppState>,
    Form(form): Form<AddLinkForm>,
) -> Result<Json<Envelope<Registered>>, ApiError> {
    let link = form.input_link.trim();
    if link.is_empty() {
        return Err(PriceWatchError::validation("input_link is required").into());
    }
    let url = Url::parse(link)
        .map_err(|e| PriceWatchError::validation(format!("invalid URL '{link}': {e}")))?;

    // Dropping the handler (client gone) cancels the registration.
    let cancel = state.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();

    let id = state.tracker.register_product(&url, &cancel).await?;
    Ok(Json(Envelope::success(Registered { id })))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    draw: Option<u64>,
    start: Option<u32>,
    length: Option<u32>,
}

async fn list_products(
    Extension(state): Extension<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, ApiError> {
    let offset = params.start.unwrap_or(0);
    let limit = params
        .length
        .unwrap_or(state.page_size)
        .clamp(1, MAX_PAGE_SIZE);

    let page = state.tracker.list_products(offset, limit).await?;
    Ok(Json(ListResponse {
        draw: params.draw.unwrap_or(0),
        records_total: page.total,
        records_filtered: page.total,
        data: page.products.into_iter().map(ProductRow::from).collect(),
    }))
}

async fn product_detail(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Envelope<Product>>, ApiError> {
    let product = state.tracker.product_detail(ProductId(id)).await?;
    Ok(Json(Envelope::success(product)))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    product_id: Option<String>,
    limit: Option<u32>,
}

async fn histories(
    Extension(state): Extension<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<HistoryPoint>>, ApiError> {
    let raw_id = params
        .product_id
        .ok_or_else(|| PriceWatchError::validation("product_id is required"))?;
    let id: ProductId = raw_id
        .parse()
        .map_err(|_| PriceWatchError::validation(format!("invalid product_id '{raw_id}'")))?;
    let limit = params.limit.unwrap_or(state.history_limit).max(1);

    let history = state.tracker.price_history(id, limit).await?;
    Ok(Json(
        history
            .into_iter()
            .map(|h| HistoryPoint {
                current_price: h.current_price,
                original_price: h.original_price,
                update_time: h.recorded_at,
            })
            .collect(),
    ))
}

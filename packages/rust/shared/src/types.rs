//! Core domain types for tracked products.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ProductId
// ---------------------------------------------------------------------------

/// Database identity of a product. Stable across upserts of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub i64);

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ProductId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

// ---------------------------------------------------------------------------
// Extraction output
// ---------------------------------------------------------------------------

/// Product data scraped from a single page, before it is tied to a URL.
///
/// Missing fields degrade to empty/zero instead of failing extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawProduct {
    pub name: String,
    pub current_price: i64,
    pub original_price: i64,
    /// Image URLs in page order. May contain duplicates and empty strings.
    pub images: Vec<String>,
}

/// Everything the store needs to upsert one observation of a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductPayload {
    pub name: String,
    pub current_price: i64,
    pub original_price: i64,
    pub source_url: String,
    pub images: Vec<String>,
    /// When the page was scraped; becomes `updated_at` and the history timestamp.
    pub observed_at: DateTime<Utc>,
}

impl ProductPayload {
    /// Attach the source URL and observation time to an extracted record.
    pub fn from_raw(raw: RawProduct, source_url: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            name: raw.name,
            current_price: raw.current_price,
            original_price: raw.original_price,
            source_url: source_url.into(),
            images: raw.images,
            observed_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Stored records
// ---------------------------------------------------------------------------

/// A tracked product as stored, with its currently active images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    /// Natural key: upserts with the same name update this row.
    pub name: String,
    pub current_price: i64,
    pub original_price: i64,
    pub source_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

/// Lifecycle state of a product image row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Active,
    Deleted,
}

impl ImageStatus {
    /// Integer code stored in the `status` column.
    pub fn code(self) -> i64 {
        match self {
            Self::Active => 1,
            Self::Deleted => 0,
        }
    }

    /// Decode a stored status code. Unknown codes are treated as deleted.
    pub fn from_code(code: i64) -> Self {
        if code == 1 { Self::Active } else { Self::Deleted }
    }
}

/// One image row. Rows are soft-deleted, never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductImage {
    pub id: i64,
    pub product_id: ProductId,
    pub image_url: String,
    pub status: ImageStatus,
}

/// Append-only price observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceHistory {
    pub id: i64,
    pub product_id: ProductId,
    pub current_price: i64,
    pub original_price: i64,
    pub recorded_at: DateTime<Utc>,
}

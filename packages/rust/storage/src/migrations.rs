//! SQL migration definitions for the PriceWatch database.
//!
//! Migrations are applied in order on database open. Each migration records
//! its version in `schema_migrations` as its last statement.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: products, product_images, price_history",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Tracked products, keyed by name for upserts
CREATE TABLE IF NOT EXISTS products (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    name           TEXT NOT NULL UNIQUE,
    current_price  INTEGER NOT NULL,
    original_price INTEGER NOT NULL,
    source_url     TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_products_updated_at ON products(updated_at);

-- Gallery images; status 1 = active, 0 = soft-deleted
CREATE TABLE IF NOT EXISTS product_images (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL REFERENCES products(id),
    image_url  TEXT NOT NULL,
    status     INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_product_images_product ON product_images(product_id, status);

-- Append-only price observations
CREATE TABLE IF NOT EXISTS price_history (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id     INTEGER NOT NULL REFERENCES products(id),
    current_price  INTEGER NOT NULL,
    original_price INTEGER NOT NULL,
    recorded_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_price_history_product ON price_history(product_id, recorded_at);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "At most one active image row per product and URL",
            sql: r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_product_images_active_url
    ON product_images(product_id, image_url) WHERE status = 1;

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}

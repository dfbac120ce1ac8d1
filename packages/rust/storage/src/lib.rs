//! Turso Embedded / libSQL product store.
//!
//! The [`Storage`] struct wraps a libSQL database holding tracked products,
//! their gallery images (soft-deleted, never removed), and the append-only
//! price history.
//!
//! **Write rules:**
//! - [`Storage::upsert_product`] is the only write path. It runs on its own
//!   connection inside a `BEGIN IMMEDIATE` transaction, so concurrent upserts
//!   serialize and the image diff always reads the latest committed state.
//! - Every other method is a read against the shared connection.

mod migrations;
pub mod reconcile;

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, TransactionBehavior, params};
use tracing::{debug, instrument, warn};

use pricewatch_shared::{
    ImageStatus, PriceHistory, PriceWatchError, Product, ProductId, ProductImage, ProductPayload,
    Result,
};

pub use reconcile::{ImageDiff, diff_images};

/// How long a writer waits for another writer's lock before failing.
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PriceWatchError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;
        set_busy_timeout(&conn).await?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        PriceWatchError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", ())
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Product reads
    // -----------------------------------------------------------------------

    /// Get a product by id, with its active images.
    pub async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"),
                params![id.0],
            )
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(None);
        };
        let mut product = row_to_product(&row)?;
        drop(rows);

        product.images = self
            .active_images(id)
            .await?
            .into_iter()
            .map(|img| img.image_url)
            .collect();
        Ok(Some(product))
    }

    /// One page of products ordered by id, each with its active images.
    pub async fn list_products(&self, offset: u32, limit: u32) -> Result<Vec<Product>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY id LIMIT ?1 OFFSET ?2"
                ),
                params![i64::from(limit), i64::from(offset)],
            )
            .await
            .map_err(db_err)?;

        let mut products = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            products.push(row_to_product(&row)?);
        }
        drop(rows);

        if products.is_empty() {
            return Ok(products);
        }

        // Active images for the whole page in one query.
        let mut rows = self
            .conn
            .query(
                "SELECT i.product_id, i.image_url
                 FROM product_images i
                 JOIN (SELECT id FROM products ORDER BY id LIMIT ?1 OFFSET ?2) p
                   ON p.id = i.product_id
                 WHERE i.status = 1
                 ORDER BY i.product_id, i.id",
                params![i64::from(limit), i64::from(offset)],
            )
            .await
            .map_err(db_err)?;

        let mut images: HashMap<i64, Vec<String>> = HashMap::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let product_id = row.get::<i64>(0).map_err(db_err)?;
            let url = row.get::<String>(1).map_err(db_err)?;
            images.entry(product_id).or_default().push(url);
        }

        for product in &mut products {
            if let Some(urls) = images.remove(&product.id.0) {
                product.images = urls;
            }
        }
        Ok(products)
    }

    /// Total number of tracked products.
    pub async fn count_products(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM products", ())
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(db_err)?.max(0) as u64),
            None => Ok(0),
        }
    }

    /// Products whose `updated_at` falls in `[start, end)`, ordered by id.
    ///
    /// Images are not loaded; refresh only needs the id and source URL.
    pub async fn products_updated_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Product>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {PRODUCT_COLUMNS} FROM products
                     WHERE updated_at >= ?1 AND updated_at < ?2
                     ORDER BY id"
                ),
                params![format_ts(start), format_ts(end)],
            )
            .await
            .map_err(db_err)?;

        let mut products = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            products.push(row_to_product(&row)?);
        }
        Ok(products)
    }

    /// Active image rows of a product, oldest first.
    pub async fn active_images(&self, product_id: ProductId) -> Result<Vec<ProductImage>> {
        load_active_images(&self.conn, product_id).await
    }

    /// The latest `limit` price observations of a product, returned oldest first.
    pub async fn recent_price_history(
        &self,
        product_id: ProductId,
        limit: u32,
    ) -> Result<Vec<PriceHistory>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, product_id, current_price, original_price, recorded_at
                 FROM price_history
                 WHERE product_id = ?1
                 ORDER BY recorded_at DESC, id DESC
                 LIMIT ?2",
                params![product_id.0, i64::from(limit)],
            )
            .await
            .map_err(db_err)?;

        let mut history = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            history.push(PriceHistory {
                id: row.get::<i64>(0).map_err(db_err)?,
                product_id: ProductId(row.get::<i64>(1).map_err(db_err)?),
                current_price: row.get::<i64>(2).map_err(db_err)?,
                original_price: row.get::<i64>(3).map_err(db_err)?,
                recorded_at: parse_ts(&row.get::<String>(4).map_err(db_err)?)?,
            });
        }
        history.reverse();
        Ok(history)
    }

    // -----------------------------------------------------------------------
    // Transactional upsert
    // -----------------------------------------------------------------------

    /// Record one observation of a product.
    ///
    /// Inserts or updates the product row keyed by name, reconciles its active
    /// images against `payload.images`, and appends a price history row. All
    /// three happen in one transaction; on any failure nothing is written.
    #[instrument(skip_all, fields(name = %payload.name))]
    pub async fn upsert_product(&self, payload: &ProductPayload) -> Result<ProductId> {
        let conn = self.db.connect().map_err(db_err)?;
        set_busy_timeout(&conn).await?;

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(db_err)?;

        match write_observation(&tx, payload).await {
            Ok((id, diff)) => {
                tx.commit()
                    .await
                    .map_err(|e| PriceWatchError::Storage(format!("commit failed: {e}")))?;
                debug!(
                    product_id = id.0,
                    inserted = diff.to_insert.len(),
                    soft_deleted = diff.to_soft_delete.len(),
                    unchanged = diff.unchanged.len(),
                    "product upserted"
                );
                Ok(id)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Statements shared by reads and the upsert transaction
// ---------------------------------------------------------------------------

const PRODUCT_COLUMNS: &str =
    "id, name, current_price, original_price, source_url, created_at, updated_at";

/// Steps of the upsert, run on the transaction's connection.
async fn write_observation(
    conn: &Connection,
    payload: &ProductPayload,
) -> Result<(ProductId, ImageDiff)> {
    let observed_at = format_ts(payload.observed_at);

    let mut rows = conn
        .query(
            "INSERT INTO products
                 (name, current_price, original_price, source_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(name) DO UPDATE SET
                 current_price = excluded.current_price,
                 original_price = excluded.original_price,
                 source_url = excluded.source_url,
                 updated_at = excluded.updated_at
             RETURNING id",
            params![
                payload.name.as_str(),
                payload.current_price,
                payload.original_price,
                payload.source_url.as_str(),
                observed_at.as_str()
            ],
        )
        .await
        .map_err(db_err)?;

    let product_id = match rows.next().await.map_err(db_err)? {
        Some(row) => ProductId(row.get::<i64>(0).map_err(db_err)?),
        None => {
            return Err(PriceWatchError::Storage(
                "product upsert returned no id".into(),
            ));
        }
    };
    drop(rows);

    let stored = load_active_images(conn, product_id).await?;
    let diff = diff_images(&stored, &payload.images);

    for image_id in &diff.to_soft_delete {
        soft_delete_image(conn, *image_id).await?;
    }
    for url in &diff.to_insert {
        insert_image(conn, product_id, url).await?;
    }

    append_price_history(
        conn,
        product_id,
        payload.current_price,
        payload.original_price,
        &observed_at,
    )
    .await?;

    Ok((product_id, diff))
}

async fn load_active_images(conn: &Connection, product_id: ProductId) -> Result<Vec<ProductImage>> {
    let mut rows = conn
        .query(
            "SELECT id, product_id, image_url, status
             FROM product_images
             WHERE product_id = ?1 AND status = ?2
             ORDER BY id",
            params![product_id.0, ImageStatus::Active.code()],
        )
        .await
        .map_err(db_err)?;

    let mut images = Vec::new();
    while let Some(row) = rows.next().await.map_err(db_err)? {
        images.push(ProductImage {
            id: row.get::<i64>(0).map_err(db_err)?,
            product_id: ProductId(row.get::<i64>(1).map_err(db_err)?),
            image_url: row.get::<String>(2).map_err(db_err)?,
            status: ImageStatus::from_code(row.get::<i64>(3).map_err(db_err)?),
        });
    }
    Ok(images)
}

async fn insert_image(conn: &Connection, product_id: ProductId, url: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO product_images (product_id, image_url, status) VALUES (?1, ?2, ?3)",
        params![product_id.0, url, ImageStatus::Active.code()],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn soft_delete_image(conn: &Connection, image_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE product_images SET status = ?1 WHERE id = ?2",
        params![ImageStatus::Deleted.code(), image_id],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn append_price_history(
    conn: &Connection,
    product_id: ProductId,
    current_price: i64,
    original_price: i64,
    recorded_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO price_history (product_id, current_price, original_price, recorded_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![product_id.0, current_price, original_price, recorded_at],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn set_busy_timeout(conn: &Connection) -> Result<()> {
    // The pragma answers with a row, so it has to go through `query`.
    conn.query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ())
        .await
        .map_err(db_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Convert a row selected with [`PRODUCT_COLUMNS`]. Images are left empty.
fn row_to_product(row: &libsql::Row) -> Result<Product> {
    Ok(Product {
        id: ProductId(row.get::<i64>(0).map_err(db_err)?),
        name: row.get::<String>(1).map_err(db_err)?,
        current_price: row.get::<i64>(2).map_err(db_err)?,
        original_price: row.get::<i64>(3).map_err(db_err)?,
        source_url: row.get::<String>(4).map_err(db_err)?,
        created_at: parse_ts(&row.get::<String>(5).map_err(db_err)?)?,
        updated_at: parse_ts(&row.get::<String>(6).map_err(db_err)?)?,
        images: Vec::new(),
    })
}

/// Fixed-width UTC timestamp, so string order is time order.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PriceWatchError::Storage(format!("bad timestamp {s:?}: {e}")))
}

fn db_err(e: libsql::Error) -> PriceWatchError {
    PriceWatchError::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("pw_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, m, s).unwrap()
    }

    fn payload(name: &str, current: i64, original: i64, images: &[&str]) -> ProductPayload {
        ProductPayload {
            name: name.into(),
            current_price: current,
            original_price: original,
            source_url: format!("https://shop.example/p/{}", name.to_lowercase()),
            images: images.iter().map(|s| s.to_string()).collect(),
            observed_at: at(10, 0, 30),
        }
    }

    /// Every image row of a product, including soft-deleted ones.
    async fn all_image_rows(storage: &Storage, id: ProductId) -> Vec<(String, i64)> {
        let mut rows = storage
            .conn
            .query(
                "SELECT image_url, status FROM product_images WHERE product_id = ?1 ORDER BY id",
                params![id.0],
            )
            .await
            .unwrap();
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            out.push((row.get::<String>(0).unwrap(), row.get::<i64>(1).unwrap()));
        }
        out
    }

    async fn history_count(storage: &Storage, id: ProductId) -> usize {
        storage.recent_price_history(id, 1000).await.unwrap().len()
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("pw_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn first_upsert_creates_product_images_and_history() {
        let storage = test_storage().await;
        let id = storage
            .upsert_product(&payload("Widget", 100_000, 100_000, &["A", "B"]))
            .await
            .expect("upsert");

        let product = storage.get_product(id).await.unwrap().expect("product");
        assert_eq!(product.name, "Widget");
        assert_eq!(product.current_price, 100_000);
        assert_eq!(product.original_price, 100_000);
        assert_eq!(product.source_url, "https://shop.example/p/widget");
        assert_eq!(product.created_at, at(10, 0, 30));
        assert_eq!(product.images, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(history_count(&storage, id).await, 1);
    }

    #[tokio::test]
    async fn upsert_by_name_keeps_id_and_updates_in_place() {
        let storage = test_storage().await;
        let first = storage
            .upsert_product(&payload("Widget", 100_000, 120_000, &[]))
            .await
            .unwrap();

        let mut second = payload("Widget", 90_000, 120_000, &[]);
        second.source_url = "https://shop.example/p/widget-v2".into();
        second.observed_at = at(11, 0, 0);
        let second_id = storage.upsert_product(&second).await.unwrap();

        assert_eq!(first, second_id);
        assert_eq!(storage.count_products().await.unwrap(), 1);

        let product = storage.get_product(first).await.unwrap().unwrap();
        assert_eq!(product.current_price, 90_000);
        assert_eq!(product.source_url, "https://shop.example/p/widget-v2");
        assert_eq!(product.created_at, at(10, 0, 30));
        assert_eq!(product.updated_at, at(11, 0, 0));
    }

    #[tokio::test]
    async fn unchanged_price_still_appends_history() {
        let storage = test_storage().await;
        let p = payload("Widget", 100_000, 100_000, &["A"]);
        let id = storage.upsert_product(&p).await.unwrap();
        storage.upsert_product(&p).await.unwrap();
        assert_eq!(history_count(&storage, id).await, 2);
    }

    #[tokio::test]
    async fn image_reconciliation_soft_deletes_and_inserts() {
        let storage = test_storage().await;
        let id = storage
            .upsert_product(&payload("Widget", 1, 1, &["A", "B"]))
            .await
            .unwrap();
        let before = storage.active_images(id).await.unwrap();
        let b_row = before.iter().find(|i| i.image_url == "B").unwrap().id;

        storage
            .upsert_product(&payload("Widget", 1, 1, &["B", "C"]))
            .await
            .unwrap();

        let active = storage.active_images(id).await.unwrap();
        let urls: Vec<_> = active.iter().map(|i| i.image_url.as_str()).collect();
        assert_eq!(urls, vec!["B", "C"]);
        // B keeps its row.
        assert_eq!(active[0].id, b_row);

        let all = all_image_rows(&storage, id).await;
        assert_eq!(
            all,
            vec![
                ("A".to_string(), 0),
                ("B".to_string(), 1),
                ("C".to_string(), 1)
            ]
        );
    }

    #[tokio::test]
    async fn same_images_twice_writes_no_image_rows() {
        let storage = test_storage().await;
        let p = payload("Widget", 1, 1, &["A", "B", "A"]);
        let id = storage.upsert_product(&p).await.unwrap();
        storage.upsert_product(&p).await.unwrap();
        assert_eq!(all_image_rows(&storage, id).await.len(), 2);
    }

    #[tokio::test]
    async fn removed_then_restored_image_has_one_active_row() {
        let storage = test_storage().await;
        let id = storage
            .upsert_product(&payload("Widget", 1, 1, &["A"]))
            .await
            .unwrap();
        storage
            .upsert_product(&payload("Widget", 1, 1, &[]))
            .await
            .unwrap();
        storage
            .upsert_product(&payload("Widget", 1, 1, &["A"]))
            .await
            .unwrap();

        let active = storage.active_images(id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(all_image_rows(&storage, id).await.len(), 2);
    }

    #[tokio::test]
    async fn failure_at_any_step_rolls_back_everything() {
        let triggers = [
            "CREATE TRIGGER inject BEFORE INSERT ON price_history
             BEGIN SELECT RAISE(ABORT, 'injected'); END;",
            "CREATE TRIGGER inject BEFORE INSERT ON product_images
             BEGIN SELECT RAISE(ABORT, 'injected'); END;",
            "CREATE TRIGGER inject BEFORE UPDATE ON product_images
             BEGIN SELECT RAISE(ABORT, 'injected'); END;",
        ];

        for trigger in triggers {
            let storage = test_storage().await;
            let id = storage
                .upsert_product(&payload("Widget", 100, 100, &["A", "B"]))
                .await
                .unwrap();
            let before = storage.get_product(id).await.unwrap().unwrap();

            storage.conn.execute_batch(trigger).await.unwrap();

            let mut changed = payload("Widget", 50, 100, &["B", "C"]);
            changed.observed_at = at(12, 0, 0);
            let err = storage.upsert_product(&changed).await.unwrap_err();
            assert!(matches!(err, PriceWatchError::Storage(_)), "{trigger}");

            let after = storage.get_product(id).await.unwrap().unwrap();
            assert_eq!(after.current_price, before.current_price);
            assert_eq!(after.updated_at, before.updated_at);
            assert_eq!(after.images, before.images);
            assert_eq!(all_image_rows(&storage, id).await.len(), 2);
            assert_eq!(history_count(&storage, id).await, 1);
        }
    }

    #[tokio::test]
    async fn failed_first_registration_leaves_no_product() {
        let storage = test_storage().await;
        storage
            .conn
            .execute_batch(
                "CREATE TRIGGER inject BEFORE INSERT ON price_history
                 BEGIN SELECT RAISE(ABORT, 'injected'); END;",
            )
            .await
            .unwrap();

        assert!(
            storage
                .upsert_product(&payload("Widget", 1, 1, &["A"]))
                .await
                .is_err()
        );
        assert_eq!(storage.count_products().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_upserts_of_same_name_serialize() {
        let storage = Arc::new(test_storage().await);

        let mut handles = Vec::new();
        for price in [10, 20, 30, 40] {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                storage
                    .upsert_product(&payload("Widget", price, 50, &["A", "B"]))
                    .await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().expect("upsert"));
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(storage.count_products().await.unwrap(), 1);
        assert_eq!(storage.active_images(ids[0]).await.unwrap().len(), 2);
        assert_eq!(history_count(&storage, ids[0]).await, 4);
    }

    #[tokio::test]
    async fn list_products_pages_with_images() {
        let storage = test_storage().await;
        for (name, images) in [
            ("Alpha", vec!["a1", "a2"]),
            ("Beta", vec![]),
            ("Gamma", vec!["g1"]),
        ] {
            storage
                .upsert_product(&payload(name, 1, 1, &images))
                .await
                .unwrap();
        }

        assert_eq!(storage.count_products().await.unwrap(), 3);

        let first = storage.list_products(0, 2).await.unwrap();
        let names: Vec<_> = first.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Beta"]);
        assert_eq!(first[0].images, vec!["a1".to_string(), "a2".to_string()]);
        assert!(first[1].images.is_empty());

        let second = storage.list_products(2, 2).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].name, "Gamma");
        assert_eq!(second[0].images, vec!["g1".to_string()]);

        assert!(storage.list_products(10, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn updated_between_is_half_open() {
        let storage = test_storage().await;
        for (name, ts) in [
            ("Early", at(9, 59, 59)),
            ("Start", at(10, 0, 0)),
            ("Inside", at(10, 0, 59)),
            ("End", at(10, 1, 0)),
        ] {
            let mut p = payload(name, 1, 1, &[]);
            p.observed_at = ts;
            storage.upsert_product(&p).await.unwrap();
        }

        let due = storage
            .products_updated_between(at(10, 0, 0), at(10, 0, 0) + Duration::minutes(1))
            .await
            .unwrap();
        let names: Vec<_> = due.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Start", "Inside"]);
    }

    #[tokio::test]
    async fn recent_history_is_latest_n_oldest_first() {
        let storage = test_storage().await;
        let mut id = ProductId(0);
        for (minute, price) in [(1, 100), (2, 90), (3, 80), (4, 70)] {
            let mut p = payload("Widget", price, 100, &[]);
            p.observed_at = at(10, minute, 0);
            id = storage.upsert_product(&p).await.unwrap();
        }

        let history = storage.recent_price_history(id, 3).await.unwrap();
        let prices: Vec<_> = history.iter().map(|h| h.current_price).collect();
        assert_eq!(prices, vec![90, 80, 70]);
        assert_eq!(history[2].recorded_at, at(10, 4, 0));
    }

    #[tokio::test]
    async fn missing_product_is_none() {
        let storage = test_storage().await;
        assert!(storage.get_product(ProductId(404)).await.unwrap().is_none());
        assert!(storage.active_images(ProductId(404)).await.unwrap().is_empty());
    }

    #[test]
    fn timestamps_are_fixed_width() {
        let a = format_ts(at(9, 0, 0));
        let b = format_ts(at(10, 0, 0) + Duration::milliseconds(5));
        assert_eq!(a, "2026-03-14T09:00:00.000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(parse_ts(&a).unwrap(), at(9, 0, 0));
    }
}

//! SQLite implementation of the catalog repository
//!
//! Every batch runs in one transaction: a failure rolls the whole batch
//! back and is returned to the caller unretried. Re-observed products are
//! upserted on `(upc, url)` with their category lists merged.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::domain::product::{Category, CategoryStatus, Product};
use crate::domain::repositories::{CatalogRepository, PersistenceError, PersistenceResult};

#[derive(Clone)]
pub struct SqliteCatalogRepository {
    pool: Arc<SqlitePool>,
}

impl SqliteCatalogRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    pub async fn get_product(&self, upc: &str, url: &str) -> PersistenceResult<Option<Product>> {
        let row = sqlx::query(
            r"
            SELECT upc, url, name, categories, image, store_id, store_location,
                   price, mrp, availability, keyword, size, observed_at
            FROM products WHERE upc = ? AND url = ?
            ",
        )
        .bind(upc)
        .bind(url)
        .fetch_optional(&*self.pool)
        .await?;

        row.map(|row| -> PersistenceResult<Product> {
            let categories_json: String = row.try_get("categories")?;
            let categories: BTreeSet<String> =
                serde_json::from_str(&categories_json).map_err(|source| {
                    PersistenceError::Serialization {
                        upc: upc.to_string(),
                        source,
                    }
                })?;
            Ok(Product {
                upc: row.try_get("upc")?,
                url: row.try_get("url")?,
                name: row.try_get("name")?,
                categories,
                image: row.try_get("image")?,
                store_id: row.try_get::<Option<String>, _>("store_id")?.unwrap_or_default(),
                store_location: row.try_get("store_location")?,
                price: row.try_get("price")?,
                mrp: row.try_get("mrp")?,
                availability: row.try_get("availability")?,
                keyword: row.try_get::<Option<String>, _>("keyword")?.unwrap_or_default(),
                size: row.try_get("size")?,
                observed_at: row.try_get("observed_at")?,
            })
        })
        .transpose()
    }
}

fn empty_to_null(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

#[async_trait]
impl CatalogRepository for SqliteCatalogRepository {
    async fn insert_categories(&self, categories: &[Category]) -> PersistenceResult<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for category in categories {
            let status = match category.status {
                CategoryStatus::Done => Some(CategoryStatus::Done.as_str()),
                CategoryStatus::Unprocessed => None,
            };
            let result = sqlx::query(
                r"
                INSERT INTO categories (category_name, category_url, status)
                VALUES (?, ?, ?)
                ON CONFLICT(category_url) DO NOTHING
                ",
            )
            .bind(&category.name)
            .bind(&category.url)
            .bind(status)
            .execute(&mut *tx)
            .await?;
            inserted += usize::try_from(result.rows_affected()).unwrap_or(0);
        }

        tx.commit().await?;
        debug!("Inserted {} of {} categories", inserted, categories.len());
        Ok(inserted)
    }

    async fn get_pending_categories(&self) -> PersistenceResult<Vec<Category>> {
        let rows = sqlx::query(
            r"
            SELECT id, category_name, category_url, status
            FROM categories
            WHERE status IS NULL OR status != 'done'
            ORDER BY id
            ",
        )
        .fetch_all(&*self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> PersistenceResult<Category> {
                let status: Option<String> = row.try_get("status")?;
                Ok(Category {
                    id: Some(row.try_get("id")?),
                    name: row.try_get("category_name")?,
                    url: row.try_get("category_url")?,
                    status: CategoryStatus::from_db(status.as_deref()),
                })
            })
            .collect()
    }

    async fn mark_category_done(&self, category_id: i64) -> PersistenceResult<()> {
        let result = sqlx::query("UPDATE categories SET status = ? WHERE id = ?")
            .bind(CategoryStatus::Done.as_str())
            .bind(category_id)
            .execute(&*self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::CategoryNotFound(category_id));
        }
        Ok(())
    }

    async fn insert_products(&self, products: &[Product]) -> PersistenceResult<usize> {
        let mut tx = self.pool.begin().await?;

        for product in products {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT categories FROM products WHERE upc = ? AND url = ?")
                    .bind(&product.upc)
                    .bind(&product.url)
                    .fetch_optional(&mut *tx)
                    .await?;

            let serialization_error = |source: serde_json::Error| PersistenceError::Serialization {
                upc: product.upc.clone(),
                source,
            };

            let mut categories = product.categories.clone();
            if let Some(existing) = existing {
                let stored: BTreeSet<String> =
                    serde_json::from_str(&existing).map_err(serialization_error)?;
                categories.extend(stored);
            }
            let categories_json = serde_json::to_string(&categories).map_err(serialization_error)?;

            sqlx::query(
                r"
                INSERT INTO products
                (upc, url, name, categories, image, store_id, store_location,
                 price, mrp, availability, keyword, size, observed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(upc, url) DO UPDATE SET
                    name = excluded.name,
                    categories = excluded.categories,
                    image = excluded.image,
                    store_id = COALESCE(excluded.store_id, products.store_id),
                    store_location = excluded.store_location,
                    price = excluded.price,
                    mrp = excluded.mrp,
                    availability = excluded.availability,
                    keyword = COALESCE(excluded.keyword, products.keyword),
                    size = excluded.size,
                    observed_at = excluded.observed_at
                ",
            )
            .bind(&product.upc)
            .bind(&product.url)
            .bind(&product.name)
            .bind(&categories_json)
            .bind(&product.image)
            .bind(empty_to_null(&product.store_id))
            .bind(&product.store_location)
            .bind(&product.price)
            .bind(&product.mrp)
            .bind(&product.availability)
            .bind(empty_to_null(&product.keyword))
            .bind(&product.size)
            .bind(product.observed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Upserted {} products", products.len());
        Ok(products.len())
    }

    async fn count_products(&self) -> PersistenceResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&*self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

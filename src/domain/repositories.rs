//! Repository interfaces for the catalog store
//!
//! The crawling core only produces to and reads from these traits; the
//! storage engine behind them is an infrastructure concern.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::product::{Category, Product};

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to serialize categories for product {upc}: {source}")]
    Serialization {
        upc: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Category {0} not found")]
    CategoryNotFound(i64),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Durable store for the category work queue and extracted products.
///
/// Batch operations are all-or-nothing: a failed batch is rolled back and
/// the error is returned to the caller unretried.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Insert categories, ignoring ones whose URL is already queued
    async fn insert_categories(&self, categories: &[Category]) -> PersistenceResult<usize>;

    /// Categories whose status is not `done`, in insertion order
    async fn get_pending_categories(&self) -> PersistenceResult<Vec<Category>>;

    async fn mark_category_done(&self, category_id: i64) -> PersistenceResult<()>;

    /// Upsert products keyed by (upc, url)
    async fn insert_products(&self, products: &[Product]) -> PersistenceResult<usize>;

    async fn count_products(&self) -> PersistenceResult<u64>;
}

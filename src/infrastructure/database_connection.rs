// Database connection and pool management
// This module handles SQLite database connections using sqlx

use std::path::Path;

use anyhow::Result;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use tracing::info;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        let db_path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);

        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if !Path::new(db_path).exists() {
                tokio::fs::File::create(db_path).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        info!("🗄️ Connected to catalog database: {}", database_url);
        Ok(Self { pool })
    }

    /// Single-connection in-memory database, for tests and dry runs
    pub async fn in_memory() -> Result<Self> {
        // Every pooled connection to :memory: would be a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the catalog tables if they do not exist yet. Never alters or
    /// drops existing tables.
    pub async fn ensure_schema(&self) -> Result<()> {
        let create_categories_sql = r"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category_name TEXT NOT NULL,
                category_url TEXT NOT NULL UNIQUE,
                status TEXT
            )
        ";

        let create_products_sql = r"
            CREATE TABLE IF NOT EXISTS products (
                upc TEXT NOT NULL,
                url TEXT NOT NULL,
                name TEXT NOT NULL,
                categories TEXT NOT NULL DEFAULT '[]',
                image TEXT NOT NULL,
                store_id TEXT,
                store_location TEXT NOT NULL,
                price TEXT NOT NULL,
                mrp TEXT NOT NULL,
                availability TEXT NOT NULL,
                keyword TEXT,
                size TEXT NOT NULL,
                observed_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (upc, url)
            )
        ";

        let create_indexes_sql = r"
            CREATE INDEX IF NOT EXISTS idx_categories_status ON categories (status);
            CREATE INDEX IF NOT EXISTS idx_products_keyword ON products (keyword);
        ";

        sqlx::query(create_categories_sql).execute(&self.pool).await?;
        sqlx::query(create_products_sql).execute(&self.pool).await?;
        sqlx::raw_sql(create_indexes_sql).execute(&self.pool).await?;

        Ok(())
    }
}

//! Catalog Crawler - incremental retail catalog acquisition
//!
//! Drives a WebDriver session through category listings and search results,
//! extracts structured product records and stores them in SQLite.

pub mod crawling;
pub mod domain;
pub mod infrastructure;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crawling::{CatalogWalker, CrawlingOrchestrator, ItemExtractor, PaginationEngine};
pub use domain::{BrowsingSession, CatalogRepository, Category, Product};

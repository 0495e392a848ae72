//! Domain module - catalog entities and the contracts the crawler depends on
//!
//! - `product`: categories and product records
//! - `session`: the browsing-context contract the crawling core drives
//! - `repositories`: the persistence contract the orchestrator writes to

pub mod product;
pub mod repositories;
pub mod session;

pub use product::{Category, CategoryStatus, Product, DEFAULT_AVAILABILITY};
pub use repositories::{CatalogRepository, PersistenceError, PersistenceResult};
pub use session::{
    Activation, BrowsingSession, ContextId, Locator, SessionError, SessionResult, WaitCondition,
};

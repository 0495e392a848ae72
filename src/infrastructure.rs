//! Infrastructure layer: configuration, logging, storage and the browser driver
//!
//! Everything here sits behind a domain contract (`BrowsingSession`,
//! `CatalogRepository`) or is plumbing used by the binary.

pub mod catalog_repository;
pub mod config;
pub mod database_connection;
pub mod locators;
pub mod logging;
pub mod webdriver_session;

pub use catalog_repository::SqliteCatalogRepository;
pub use config::{AppConfig, ConfigManager, SiteConfig, TimingConfig};
pub use database_connection::DatabaseConnection;
pub use locators::{LocatorKey, LocatorTable};
pub use logging::{get_log_directory, init_logging, init_logging_with_config};
pub use webdriver_session::WebDriverSession;

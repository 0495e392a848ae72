//! Configuration infrastructure
//!
//! Configuration is organized into sections:
//! 1. `site`: target site URLs, store id and the locator table
//! 2. `timing`: every bounded wait the crawler performs
//! 3. `webdriver`, `database`, `batch`, `logging`: plumbing
//!
//! The JSON file is the base layer; `CATALOG_`-prefixed environment
//! variables override it (`CATALOG_TIMING__PROBE_TIMEOUT_MS=8000`).

#![allow(clippy::uninlined_format_args)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use super::locators::LocatorTable;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub site: SiteConfig,
    pub timing: TimingConfig,
    pub webdriver: WebDriverConfig,
    pub database: DatabaseConfig,
    pub batch: BatchConfig,
    pub logging: LoggingConfig,
}

/// Target site settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Site root, used to resolve relative item links
    pub base_url: String,

    /// Path of the search results page
    pub search_path: String,

    /// Query parameter carrying the search keyword
    pub search_query_param: String,

    /// Store identifier attached to every product, when known
    pub store_id: Option<String>,

    /// Locators keyed by logical field name
    pub locators: LocatorTable,
}

/// Bounded waits used by the pagination engine and the item extractor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// How long to look for the "load more" control before declaring the listing expanded
    pub probe_timeout_ms: u64,

    /// How long to wait for the overlay dismissal control to become clickable
    pub dismiss_timeout_ms: u64,

    /// How long to wait for each detail-page field
    pub field_timeout_ms: u64,

    /// How long to wait for the first tile once the listing is expanded
    pub tile_timeout_ms: u64,

    /// Fixed UI-settling delay after scrolls, dismissals and context switches
    pub settle_delay_ms: u64,

    /// Polling interval of condition waits
    pub poll_interval_ms: u64,
}

/// WebDriver endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDriverConfig {
    /// URL of an already running WebDriver server (chromedriver, geckodriver)
    pub endpoint: String,

    /// "chrome" or "firefox"; selects the capability block
    pub browser: String,

    pub headless: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite URL; defaults to `<data dir>/database/catalog.db`
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Products buffered before a persistence batch is written
    pub persist_batch_size: usize,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs in the log file
    pub json_format: bool,

    pub console_output: bool,

    pub file_output: bool,

    /// Log file naming strategy: "unified" or "timestamped"
    pub file_naming_strategy: String,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,

    /// Keep only the most recent log file (delete all others)
    pub keep_only_latest: bool,

    /// Module-specific log level filters (e.g., "sqlx": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: site::BASE_URL.to_string(),
            search_path: site::SEARCH_PATH.to_string(),
            search_query_param: site::SEARCH_QUERY_PARAM.to_string(),
            store_id: None,
            locators: LocatorTable::default(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: defaults::PROBE_TIMEOUT_MS,
            dismiss_timeout_ms: defaults::DISMISS_TIMEOUT_MS,
            field_timeout_ms: defaults::FIELD_TIMEOUT_MS,
            tile_timeout_ms: defaults::TILE_TIMEOUT_MS,
            settle_delay_ms: defaults::SETTLE_DELAY_MS,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
        }
    }
}

impl TimingConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn dismiss_timeout(&self) -> Duration {
        Duration::from_millis(self.dismiss_timeout_ms)
    }

    pub fn field_timeout(&self) -> Duration {
        Duration::from_millis(self.field_timeout_ms)
    }

    pub fn tile_timeout(&self) -> Duration {
        Duration::from_millis(self.tile_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// All waits and delays collapsed to zero, for driving scripted sessions
    pub fn immediate() -> Self {
        Self {
            probe_timeout_ms: 0,
            dismiss_timeout_ms: 0,
            field_timeout_ms: 0,
            tile_timeout_ms: 0,
            settle_delay_ms: 0,
            poll_interval_ms: 0,
        }
    }
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::WEBDRIVER_ENDPOINT.to_string(),
            browser: defaults::WEBDRIVER_BROWSER.to_string(),
            headless: defaults::WEBDRIVER_HEADLESS,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            persist_batch_size: defaults::PERSIST_BATCH_SIZE,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            file_naming_strategy: defaults::LOG_FILE_NAMING_STRATEGY.to_string(),
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: defaults::LOG_AUTO_CLEANUP,
            keep_only_latest: defaults::LOG_KEEP_ONLY_LATEST,
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("sqlx".to_string(), "warn".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters.insert("fantoccini".to_string(), "info".to_string());
                filters.insert("catalog_crawler_lib".to_string(), "info".to_string());
                filters
            },
        }
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join(site::APP_DIR_NAME);

        Ok(config_dir)
    }

    /// Get application data directory
    pub fn get_app_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to get user data directory")?
            .join(site::APP_DIR_NAME);

        Ok(data_dir)
    }

    /// Configuration manager for the default per-user config file
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_dir()?.join(defaults::CONFIG_FILE_NAME);
        Ok(Self { config_path })
    }

    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    /// Load configuration, writing the defaults first if the file does not exist yet
    pub async fn load_or_initialize(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!("🎉 Configuration file not found, creating default: {:?}", self.config_path);
            self.save_config(&AppConfig::default()).await?;
        }
        self.load_config()
    }

    /// Load the file layer plus overrides from the process environment
    pub fn load_config(&self) -> Result<AppConfig> {
        self.load_layered(None)
    }

    /// Load the file layer plus overrides from `vars` instead of the process
    /// environment; keys use the same `CATALOG_SECTION__FIELD` form
    pub fn load_config_with_env<I>(&self, vars: I) -> Result<AppConfig>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.load_layered(Some(vars.into_iter().collect()))
    }

    fn load_layered(&self, env: Option<config::Map<String, String>>) -> Result<AppConfig> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(self.config_path.as_path())
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {:?}", self.config_path))?;

        let config: AppConfig = settings
            .try_deserialize()
            .context("Configuration file contains invalid settings")?;

        info!("Loaded configuration from: {:?}", self.config_path);
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(config)
            .context("Failed to serialize configuration")?;

        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

impl DatabaseConfig {
    /// Configured URL, or a file under the application data directory
    pub fn resolve_url(&self) -> Result<String> {
        match &self.url {
            Some(url) if !url.trim().is_empty() => Ok(url.clone()),
            _ => {
                let path = ConfigManager::get_app_data_dir()?
                    .join("database")
                    .join(defaults::DATABASE_FILE_NAME);
                Ok(format!("sqlite://{}", path.display()))
            }
        }
    }
}

/// Target site constants
pub mod site {
    /// Directory name under the user config/data directories
    pub const APP_DIR_NAME: &str = "catalog-crawler";

    /// Site root
    pub const BASE_URL: &str = "https://www.kroger.com";

    /// Search results page
    pub const SEARCH_PATH: &str = "/search";

    /// Query parameter carrying the keyword
    pub const SEARCH_QUERY_PARAM: &str = "query";
}

/// Default configuration values
pub mod defaults {
    /// Budget for finding the "load more" control
    pub const PROBE_TIMEOUT_MS: u64 = 5_000;

    /// Budget for the overlay dismissal control
    pub const DISMISS_TIMEOUT_MS: u64 = 10_000;

    /// Budget for each detail-page field
    pub const FIELD_TIMEOUT_MS: u64 = 10_000;

    /// Budget for the first tile of an expanded listing
    pub const TILE_TIMEOUT_MS: u64 = 10_000;

    /// UI-settling micro-delay
    pub const SETTLE_DELAY_MS: u64 = 1_000;

    pub const POLL_INTERVAL_MS: u64 = 250;

    pub const WEBDRIVER_ENDPOINT: &str = "http://localhost:4444";
    pub const WEBDRIVER_BROWSER: &str = "chrome";
    pub const WEBDRIVER_HEADLESS: bool = false;

    /// One product per batch, so a crash loses only items not yet yielded
    pub const PERSIST_BATCH_SIZE: usize = 1;

    pub const CONFIG_FILE_NAME: &str = "config.json";
    pub const DATABASE_FILE_NAME: &str = "catalog.db";
    pub const ENV_PREFIX: &str = "CATALOG";

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_JSON_FORMAT: bool = false;
    pub const LOG_CONSOLE_OUTPUT: bool = true;
    pub const LOG_FILE_OUTPUT: bool = true;
    pub const LOG_FILE_NAMING_STRATEGY: &str = "unified";
    pub const LOG_MAX_FILES: u32 = 5;
    pub const LOG_AUTO_CLEANUP: bool = true;
    pub const LOG_KEEP_ONLY_LATEST: bool = false;
}

/// URL building helper functions
pub mod utils {
    use url::Url;

    use super::SiteConfig;

    /// Search results URL with the keyword form-encoded (`mouth wash` -> `mouth+wash`)
    pub fn search_url(site: &SiteConfig, keyword: &str) -> Result<String, url::ParseError> {
        let mut url = Url::parse(&site.base_url)?.join(&site.search_path)?;
        url.query_pairs_mut()
            .clear()
            .append_pair(&site.search_query_param, keyword);
        Ok(url.into())
    }

    /// Resolve a possibly relative item link against the site root
    pub fn resolve_url(site: &SiteConfig, href: &str) -> Result<String, url::ParseError> {
        Ok(Url::parse(&site.base_url)?.join(href)?.into())
    }
}

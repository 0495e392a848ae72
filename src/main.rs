//! Catalog Crawler CLI
//!
//! Commands:
//! - `catalog-crawler import <file>` - queue categories from a JSON file
//! - `catalog-crawler categories` - walk every pending category
//! - `catalog-crawler search <keyword>` - walk the search results for a keyword

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use catalog_crawler_lib::crawling::{CatalogWalker, CrawlingOrchestrator, OrchestratorConfig, RunReport};
use catalog_crawler_lib::domain::Category;
use catalog_crawler_lib::infrastructure::logging::{init_logging_with_config, log_system_info};
use catalog_crawler_lib::infrastructure::{
    AppConfig, ConfigManager, DatabaseConnection, SqliteCatalogRepository, WebDriverSession,
};

/// Incremental catalog crawler for category listings and search results
#[derive(Parser)]
#[command(name = "catalog-crawler")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file path (defaults to the per-user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue categories from a JSON array of {"name", "url"} objects
    Import {
        file: PathBuf,
    },

    /// Walk every category not yet marked done
    Categories,

    /// Walk the search results for a keyword
    Search {
        keyword: String,
    },
}

async fn load_config(path: Option<PathBuf>) -> Result<AppConfig> {
    let manager = match path {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };
    manager.load_or_initialize().await
}

async fn open_orchestrator(config: &AppConfig) -> Result<CrawlingOrchestrator<SqliteCatalogRepository>> {
    let database_url = config.database.resolve_url()?;
    let database = DatabaseConnection::new(&database_url).await?;
    database.ensure_schema().await?;

    let repository = Arc::new(SqliteCatalogRepository::new(Arc::new(database.pool().clone())));
    let walker = CatalogWalker::new(&config.site, &config.timing);
    Ok(CrawlingOrchestrator::new(walker, repository, OrchestratorConfig::from(config)))
}

/// Cancel the token on the first Ctrl-C; in-flight items finish, nothing new starts
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, finishing the current item and stopping");
            token.cancel();
        }
    });
    cancel
}

fn print_report(report: &RunReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config).await?;
    init_logging_with_config(&config.logging)?;
    log_system_info();

    let orchestrator = open_orchestrator(&config).await?;

    match cli.command {
        Commands::Import { file } => {
            let content = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let categories: Vec<Category> = serde_json::from_str(&content)
                .with_context(|| format!("{} is not a JSON array of categories", file.display()))?;
            let inserted = orchestrator.import_categories(&categories).await?;
            println!("Queued {inserted} new categories");
        }
        Commands::Categories => {
            let cancel = cancel_on_ctrl_c();
            let mut session = WebDriverSession::connect(&config.webdriver, &config.timing).await?;
            let result = orchestrator.run_pending_categories(&mut session, &cancel).await;
            session.quit().await?;
            print_report(&result?)?;
        }
        Commands::Search { keyword } => {
            let cancel = cancel_on_ctrl_c();
            let mut session = WebDriverSession::connect(&config.webdriver, &config.timing).await?;
            let result = orchestrator.run_search(&mut session, &keyword, &cancel).await;
            session.quit().await?;
            print_report(&result?)?;
        }
    }

    info!("Done");
    Ok(())
}

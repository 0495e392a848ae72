//! # Crawling Orchestrator
//!
//! Sequences listing walks over one browsing session and hands every
//! extracted product to the catalog repository. Category completion is
//! recorded here, never inside the walk.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::product::{Category, Product};
use crate::domain::repositories::{CatalogRepository, PersistenceError};
use crate::domain::session::BrowsingSession;
use crate::infrastructure::config::AppConfig;

use super::errors::PaginationFailure;
use super::walker::{CatalogWalker, ListingWalk, WalkSummary};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    /// The browsing session can no longer be driven; the run cannot continue
    #[error("Browsing session lost while processing {url}: {reason}")]
    SessionLost { url: String, reason: String },
}

/// Orchestrator settings taken from the application config
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Products buffered before one repository batch is written
    pub persist_batch_size: usize,
    /// Attached to every product when set
    pub store_id: Option<String>,
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            persist_batch_size: config.batch.persist_batch_size.max(1),
            store_id: config.site.store_id.clone(),
        }
    }
}

/// Outcome of one orchestrated run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub categories_completed: usize,
    pub categories_failed: usize,
    pub products_saved: usize,
    pub items_skipped: usize,
    pub cancelled: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

pub struct CrawlingOrchestrator<R: CatalogRepository> {
    walker: CatalogWalker,
    repository: Arc<R>,
    config: OrchestratorConfig,
}

impl<R: CatalogRepository> CrawlingOrchestrator<R> {
    pub fn new(walker: CatalogWalker, repository: Arc<R>, config: OrchestratorConfig) -> Self {
        Self {
            walker,
            repository,
            config,
        }
    }

    /// Queue categories produced by an upstream discovery step
    pub async fn import_categories(&self, categories: &[Category]) -> Result<usize, OrchestratorError> {
        let inserted = self.repository.insert_categories(categories).await?;
        info!("📥 Queued {} new categories ({} submitted)", inserted, categories.len());
        Ok(inserted)
    }

    /// Walk every category whose status is not `done`.
    ///
    /// A category is marked done only after its walk finished without a
    /// pagination failure, cancellation or session loss. A failed listing is
    /// logged and the run moves on; a lost session or a persistence failure
    /// ends the run with an error.
    pub async fn run_pending_categories<S: BrowsingSession>(
        &self,
        session: &mut S,
        cancel: &CancellationToken,
    ) -> Result<RunReport, OrchestratorError> {
        let started = Instant::now();
        let mut report = RunReport {
            run_id: Uuid::new_v4().to_string(),
            ..RunReport::default()
        };

        let categories = self.repository.get_pending_categories().await?;
        info!("🚀 Run {} starting: {} pending categories", report.run_id, categories.len());

        for (index, category) in categories.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            info!("📂 [{}/{}] Processing category: {}", index + 1, categories.len(), category.name);

            let walk = match self.walker.walk_category(session, category, cancel.clone()).await {
                Ok(walk) => walk,
                Err(failure) => {
                    if self.absorb_pagination_failure(failure, &mut report)? {
                        break;
                    }
                    continue;
                }
            };

            let summary = self.drain(walk, &mut report).await?;
            if summary.cancelled {
                report.cancelled = true;
                break;
            }

            match category.id {
                Some(id) => self.repository.mark_category_done(id).await?,
                None => warn!("Category {} has no id; cannot record completion", category.name),
            }
            report.categories_completed += 1;
        }

        report.elapsed = started.elapsed();
        log_report(&report);
        Ok(report)
    }

    /// Walk the search results for `keyword`
    pub async fn run_search<S: BrowsingSession>(
        &self,
        session: &mut S,
        keyword: &str,
        cancel: &CancellationToken,
    ) -> Result<RunReport, OrchestratorError> {
        let started = Instant::now();
        let mut report = RunReport {
            run_id: Uuid::new_v4().to_string(),
            ..RunReport::default()
        };
        info!("🚀 Run {} starting: search for '{}'", report.run_id, keyword);

        match self.walker.walk_search(session, keyword, cancel.clone()).await {
            Ok(walk) => {
                let summary = self.drain(walk, &mut report).await?;
                report.cancelled = summary.cancelled;
            }
            Err(failure) => {
                self.absorb_pagination_failure(failure, &mut report)?;
            }
        }

        report.elapsed = started.elapsed();
        log_report(&report);
        Ok(report)
    }

    /// Record a failed listing. Returns `true` when the run should stop.
    fn absorb_pagination_failure(
        &self,
        failure: PaginationFailure,
        report: &mut RunReport,
    ) -> Result<bool, OrchestratorError> {
        if failure.is_fatal() {
            return Err(OrchestratorError::SessionLost {
                url: failure.listing_url().to_string(),
                reason: failure.to_string(),
            });
        }
        if failure.is_cancelled() {
            report.cancelled = true;
            return Ok(true);
        }
        error!("❌ {}", failure);
        report.categories_failed += 1;
        Ok(false)
    }

    /// Pull every item out of the walk, persisting in batches
    async fn drain<S: BrowsingSession>(
        &self,
        mut walk: ListingWalk<'_, S>,
        report: &mut RunReport,
    ) -> Result<WalkSummary, OrchestratorError> {
        let mut batch: Vec<Product> = Vec::with_capacity(self.config.persist_batch_size);

        while let Some(item) = walk.next().await {
            match item {
                Ok(product) => {
                    batch.push(self.finish_product(product));
                    if batch.len() >= self.config.persist_batch_size {
                        report.products_saved += self.flush(&mut batch).await?;
                    }
                }
                Err(e) if e.fatal => {
                    // Items read so far are still valid
                    report.products_saved += self.flush(&mut batch).await?;
                    return Err(OrchestratorError::SessionLost {
                        url: e.item_url,
                        reason: e.reason,
                    });
                }
                Err(_) => report.items_skipped += 1,
            }
        }

        report.products_saved += self.flush(&mut batch).await?;
        Ok(walk.into_summary())
    }

    fn finish_product(&self, product: Product) -> Product {
        match &self.config.store_id {
            Some(store_id) => product.with_store_id(store_id.clone()),
            None => product,
        }
    }

    async fn flush(&self, batch: &mut Vec<Product>) -> Result<usize, OrchestratorError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let saved = self.repository.insert_products(batch).await?;
        batch.clear();
        Ok(saved)
    }
}

fn log_report(report: &RunReport) {
    info!(
        "🏁 Run {} finished in {:.1?}: {} categories done, {} failed, {} products saved, {} items skipped{}",
        report.run_id,
        report.elapsed,
        report.categories_completed,
        report.categories_failed,
        report.products_saved,
        report.items_skipped,
        if report.cancelled { " (cancelled)" } else { "" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::Activation;
    use crate::infrastructure::config::{SiteConfig, TimingConfig};
    use crate::infrastructure::locators::LocatorKey;
    use crate::test_utils::{ProductPage, ScriptedSession, ScriptedTile, TestDatabase};

    const BASE: &str = "https://www.kroger.com";
    const DAIRY: &str = "https://www.kroger.com/pl/dairy/01";
    const BAKERY: &str = "https://www.kroger.com/pl/bakery/02";

    fn orchestrator<R: CatalogRepository>(repository: Arc<R>, batch: usize) -> CrawlingOrchestrator<R> {
        CrawlingOrchestrator::new(
            CatalogWalker::new(&SiteConfig::default(), &TimingConfig::immediate()),
            repository,
            OrchestratorConfig {
                persist_batch_size: batch,
                store_id: Some("01400943".to_string()),
            },
        )
    }

    fn two_category_session() -> ScriptedSession {
        ScriptedSession::new()
            .with_listing(
                DAIRY,
                vec![
                    ScriptedTile::linked("Milk", "/p/milk/1"),
                    ScriptedTile::linked("Butter", "/p/butter/2"),
                ],
            )
            .with_listing(BAKERY, vec![ScriptedTile::linked("Bread", "/p/bread/3")])
            .with_product_page(&format!("{BASE}/p/milk/1"), ProductPage::new("Milk", "1", "$4.00"))
            .with_product_page(
                &format!("{BASE}/p/butter/2"),
                ProductPage::new("Butter", "2", "$5.00").without(LocatorKey::ItemSize),
            )
            .with_product_page(&format!("{BASE}/p/bread/3"), ProductPage::new("Bread", "3", "$2.50"))
    }

    #[tokio::test]
    async fn pending_categories_are_walked_saved_and_marked_done() {
        let db = TestDatabase::new().await.unwrap();
        let repository = db.repository();
        let orchestrator = orchestrator(repository.clone(), 1);
        orchestrator
            .import_categories(&[Category::new("Dairy", DAIRY), Category::new("Bakery", BAKERY)])
            .await
            .unwrap();

        let mut session = two_category_session();
        let report = orchestrator
            .run_pending_categories(&mut session, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.categories_completed, 2);
        assert_eq!(report.products_saved, 2);
        assert_eq!(report.items_skipped, 1);
        assert!(repository.get_pending_categories().await.unwrap().is_empty());

        let milk = repository
            .get_product("1", &format!("{BASE}/p/milk/1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(milk.store_id, "01400943");
        assert!(milk.categories.contains("Dairy"));
    }

    #[tokio::test]
    async fn failed_listing_is_not_marked_done_and_run_continues() {
        let db = TestDatabase::new().await.unwrap();
        let repository = db.repository();
        let orchestrator = orchestrator(repository.clone(), 10);
        orchestrator
            .import_categories(&[Category::new("Dairy", DAIRY), Category::new("Bakery", BAKERY)])
            .await
            .unwrap();

        let mut session = two_category_session()
            .with_load_more(1)
            .with_click_outcomes([Activation::Intercepted])
            .without_dismiss_control();
        let report = orchestrator
            .run_pending_categories(&mut session, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.categories_failed, 1);
        assert_eq!(report.categories_completed, 1);
        let pending = repository.get_pending_categories().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, "Dairy");
    }

    #[tokio::test]
    async fn lost_session_aborts_the_run() {
        let db = TestDatabase::new().await.unwrap();
        let repository = db.repository();
        let orchestrator = orchestrator(repository.clone(), 1);
        orchestrator
            .import_categories(&[Category::new("Dairy", DAIRY)])
            .await
            .unwrap();

        let mut session = two_category_session().failing_navigation();
        let err = orchestrator
            .run_pending_categories(&mut session, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::SessionLost { .. }));
        assert_eq!(repository.get_pending_categories().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_run_marks_nothing_done() {
        let db = TestDatabase::new().await.unwrap();
        let repository = db.repository();
        let orchestrator = orchestrator(repository.clone(), 1);
        orchestrator
            .import_categories(&[Category::new("Dairy", DAIRY)])
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut session = two_category_session();
        let report = orchestrator
            .run_pending_categories(&mut session, &cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.categories_completed, 0);
        assert_eq!(repository.get_pending_categories().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn search_run_saves_products_with_keyword() {
        let db = TestDatabase::new().await.unwrap();
        let repository = db.repository();
        let orchestrator = orchestrator(repository.clone(), 5);

        let mut session = ScriptedSession::new()
            .with_listing(
                "https://www.kroger.com/search?query=milk",
                vec![ScriptedTile::linked("Milk", "/p/milk/1")],
            )
            .with_product_page(&format!("{BASE}/p/milk/1"), ProductPage::new("Milk", "1", "$4.00"));

        let report = orchestrator
            .run_search(&mut session, "milk", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.products_saved, 1);
        let milk = repository
            .get_product("1", &format!("{BASE}/p/milk/1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(milk.keyword, "milk");
        assert!(milk.categories.is_empty());
    }
}

//! Catalog walker
//!
//! Expands a listing, enumerates its tiles, then extracts items one at a
//! time as the caller pulls them. Pagination always finishes before the
//! first extraction; extraction never overlaps another extraction.

use std::collections::VecDeque;
use std::time::Duration;

use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::product::{Category, Product};
use crate::domain::session::{BrowsingSession, Locator, SessionError, WaitCondition};
use crate::infrastructure::config::{SiteConfig, TimingConfig, utils};
use crate::infrastructure::locators::LocatorKey;

use super::errors::{ExtractionError, PaginationFailure};
use super::item_extractor::ItemExtractor;
use super::pagination::PaginationEngine;
use super::state::ListingState;

/// Where a listing came from; decides what gets attached to each record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkContext {
    /// Category walk: the category name is added to `categories`
    Category(String),
    /// Search walk: the keyword is set, `categories` stays empty
    Search(String),
}

impl WalkContext {
    pub fn label(&self) -> &str {
        match self {
            Self::Category(name) | Self::Search(name) => name,
        }
    }

    fn attach(&self, product: Product) -> Product {
        match self {
            Self::Category(name) => product.with_category(name.clone()),
            Self::Search(keyword) => product.with_keyword(keyword.clone()),
        }
    }
}

/// Counters for one listing walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkSummary {
    pub listing: ListingState,
    /// Tiles with a resolvable item link
    pub items_found: usize,
    /// Tiles skipped because they carried no item link
    pub tiles_without_link: usize,
    pub items_yielded: usize,
    pub items_failed: usize,
    pub cancelled: bool,
    /// Stopped early because the session became unusable
    pub halted: bool,
}

impl WalkSummary {
    /// Every item was attempted and the session survived
    pub fn is_complete(&self) -> bool {
        !self.cancelled && !self.halted
    }
}

#[derive(Debug, Clone)]
pub struct CatalogWalker {
    engine: PaginationEngine,
    extractor: ItemExtractor,
    site: SiteConfig,
    tile: Locator,
    tile_link: Locator,
    tile_title: Locator,
    tile_timeout: Duration,
}

impl CatalogWalker {
    pub fn new(site: &SiteConfig, timing: &TimingConfig) -> Self {
        Self {
            engine: PaginationEngine::new(site, timing),
            extractor: ItemExtractor::new(site, timing),
            site: site.clone(),
            tile: site.locators.get(LocatorKey::Tile),
            tile_link: site.locators.get(LocatorKey::TileLink),
            tile_title: site.locators.get(LocatorKey::TileTitle),
            tile_timeout: timing.tile_timeout(),
        }
    }

    pub async fn walk_category<'s, S: BrowsingSession>(
        &self,
        session: &'s mut S,
        category: &Category,
        cancel: CancellationToken,
    ) -> Result<ListingWalk<'s, S>, PaginationFailure> {
        self.walk_listing(session, WalkContext::Category(category.name.clone()), &category.url, cancel)
            .await
    }

    pub async fn walk_search<'s, S: BrowsingSession>(
        &self,
        session: &'s mut S,
        keyword: &str,
        cancel: CancellationToken,
    ) -> Result<ListingWalk<'s, S>, PaginationFailure> {
        let listing_url = utils::search_url(&self.site, keyword).map_err(|e| {
            PaginationFailure::session(keyword, SessionError::Command(format!("invalid search URL: {e}")))
        })?;
        self.walk_listing(session, WalkContext::Search(keyword.to_string()), &listing_url, cancel)
            .await
    }

    /// Expand `listing_url` and enumerate its items.
    ///
    /// Pagination failures are returned here, before any item is read.
    /// The returned walk extracts lazily, one item per `next()`.
    pub async fn walk_listing<'s, S: BrowsingSession>(
        &self,
        session: &'s mut S,
        context: WalkContext,
        listing_url: &str,
        cancel: CancellationToken,
    ) -> Result<ListingWalk<'s, S>, PaginationFailure> {
        info!("🛒 Walking {} ({})", context.label(), listing_url);
        let listing = self.engine.expand_listing(session, listing_url, &cancel).await?;
        let (item_urls, tiles_without_link) = self
            .enumerate_items(session, listing_url)
            .await
            .map_err(|e| PaginationFailure::session(listing_url, e))?;
        info!("🔎 {} items found on {}", item_urls.len(), listing_url);
        let items_found = item_urls.len();

        Ok(ListingWalk {
            session,
            extractor: self.extractor.clone(),
            context,
            pending: item_urls.into(),
            cancel,
            summary: WalkSummary {
                listing,
                items_found,
                tiles_without_link,
                items_yielded: 0,
                items_failed: 0,
                cancelled: false,
                halted: false,
            },
        })
    }

    /// Item URLs in on-page tile order, plus the number of tiles without a link
    async fn enumerate_items<S: BrowsingSession>(
        &self,
        session: &mut S,
        listing_url: &str,
    ) -> Result<(Vec<String>, usize), SessionError> {
        match session
            .find_element(&self.tile, WaitCondition::Visible, self.tile_timeout)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_timeout() => {
                warn!("No item tiles appeared on {}", listing_url);
                return Ok((Vec::new(), 0));
            }
            Err(e) => return Err(e),
        }

        let tiles = session.find_elements(&self.tile).await?;
        let mut urls = Vec::with_capacity(tiles.len());
        let mut unlinked = 0;

        for (index, tile) in tiles.iter().enumerate() {
            if let Ok(title) = session.find_within(tile, &self.tile_title).await {
                if let Ok(text) = session.text(&title).await {
                    debug!("Tile {}: {}", index + 1, text.trim());
                }
            }

            let href = match session.find_within(tile, &self.tile_link).await {
                Ok(link) => session.attribute(&link, "href").await?,
                Err(e) if e.is_timeout() => None,
                Err(e) => return Err(e),
            };
            let resolved = href.and_then(|href| match utils::resolve_url(&self.site, &href) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!("Tile {} has an unusable link '{}': {}", index + 1, href, e);
                    None
                }
            });

            match resolved {
                Some(url) => urls.push(url),
                None => {
                    warn!("Skipping tile {} on {}: no item link", index + 1, listing_url);
                    unlinked += 1;
                }
            }
        }

        Ok((urls, unlinked))
    }
}

/// One non-restartable traversal of an expanded listing
pub struct ListingWalk<'s, S: BrowsingSession> {
    session: &'s mut S,
    extractor: ItemExtractor,
    context: WalkContext,
    pending: VecDeque<String>,
    cancel: CancellationToken,
    summary: WalkSummary,
}

impl<'s, S: BrowsingSession> ListingWalk<'s, S> {
    pub fn context(&self) -> &WalkContext {
        &self.context
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn summary(&self) -> &WalkSummary {
        &self.summary
    }

    /// Extract the next item in tile order.
    ///
    /// A failed item comes back as `Some(Err(_))` and the walk moves on to
    /// the next tile; `None` once the tiles are exhausted, the token is
    /// cancelled, or the session has become unusable.
    pub async fn next(&mut self) -> Option<Result<Product, ExtractionError>> {
        if self.summary.halted {
            return None;
        }
        if self.cancel.is_cancelled() {
            if !self.pending.is_empty() && !self.summary.cancelled {
                warn!("🛑 Walk of {} cancelled with {} items left", self.context.label(), self.pending.len());
            }
            self.summary.cancelled = true;
            return None;
        }

        let item_url = self.pending.pop_front()?;
        match self.extractor.extract_item(&mut *self.session, &item_url).await {
            Ok(product) => {
                self.summary.items_yielded += 1;
                Some(Ok(self.context.attach(product)))
            }
            Err(e) => {
                self.summary.items_failed += 1;
                if e.fatal {
                    self.summary.halted = true;
                    error!("❌ Session lost while extracting {}: {}", item_url, e.reason);
                } else {
                    warn!("⚠️ Skipping {}: {}", item_url, e);
                }
                Some(Err(e))
            }
        }
    }

    /// Consume the walk as a stream of extraction results
    pub fn into_stream(self) -> impl Stream<Item = Result<Product, ExtractionError>> + 's {
        futures::stream::unfold(self, |mut walk| async move {
            walk.next().await.map(|item| (item, walk))
        })
    }

    pub fn into_summary(self) -> WalkSummary {
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::Activation;
    use crate::test_utils::{ProductPage, ScriptedSession, ScriptedTile};
    use futures::StreamExt;

    const LISTING: &str = "https://www.kroger.com/pl/dairy/01";
    const BASE: &str = "https://www.kroger.com";

    fn walker() -> CatalogWalker {
        CatalogWalker::new(&SiteConfig::default(), &TimingConfig::immediate())
    }

    fn five_item_session() -> ScriptedSession {
        let tiles = (1..=5)
            .map(|i| ScriptedTile::linked(&format!("Item {i}"), &format!("/p/item-{i}/{i}")))
            .collect();
        let mut session = ScriptedSession::new().with_listing(LISTING, tiles).with_load_more(2);
        for i in 1..=5 {
            session = session.with_product_page(
                &format!("{BASE}/p/item-{i}/{i}"),
                ProductPage::new(&format!("Item {i}"), &i.to_string(), "$1.00"),
            );
        }
        session
    }

    #[tokio::test]
    async fn category_walk_yields_in_tile_order_with_category_attached() {
        let mut session = five_item_session();
        let category = Category::new("Dairy", LISTING);
        let mut walk = walker()
            .walk_category(&mut session, &category, CancellationToken::new())
            .await
            .unwrap();

        let mut names = Vec::new();
        while let Some(item) = walk.next().await {
            let product = item.unwrap();
            assert!(product.categories.contains("Dairy"));
            assert!(product.keyword.is_empty());
            names.push(product.name);
        }

        assert_eq!(names, (1..=5).map(|i| format!("Item {i}")).collect::<Vec<_>>());
        let summary = walk.summary();
        assert!(summary.is_complete());
        assert_eq!(summary.listing.triggers, 2);
        assert_eq!(summary.items_yielded, 5);
    }

    #[tokio::test]
    async fn one_failing_item_is_skipped_and_reported_once() {
        let mut session = five_item_session().with_product_page(
            &format!("{BASE}/p/item-3/3"),
            ProductPage::new("Item 3", "3", "$1.00").without(LocatorKey::ItemSize),
        );
        let walk = walker()
            .walk_listing(&mut session, WalkContext::Category("Dairy".into()), LISTING, CancellationToken::new())
            .await
            .unwrap();

        let results: Vec<_> = walk.into_stream().collect().await;
        let yielded: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).map(|p| p.upc.clone()).collect();
        let errors: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();

        assert_eq!(yielded, vec!["1", "2", "4", "5"]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].item_url, format!("{BASE}/p/item-3/3"));
        assert_eq!(session.open_context_count(), 1);
    }

    #[tokio::test]
    async fn two_walks_over_the_same_listing_yield_the_same_order() {
        let mut orders = Vec::new();
        for _ in 0..2 {
            let mut session = five_item_session();
            let walk = walker()
                .walk_listing(&mut session, WalkContext::Category("Dairy".into()), LISTING, CancellationToken::new())
                .await
                .unwrap();
            let urls: Vec<String> = walk.into_stream().map(|r| r.unwrap().url).collect().await;
            orders.push(urls);
        }
        assert_eq!(orders[0], orders[1]);
    }

    #[tokio::test]
    async fn search_walk_sets_keyword_and_leaves_categories_empty() {
        let search_url = "https://www.kroger.com/search?query=whole+milk";
        let mut session = ScriptedSession::new()
            .with_listing(search_url, vec![ScriptedTile::linked("Milk", "/p/milk/1")])
            .with_product_page(&format!("{BASE}/p/milk/1"), ProductPage::new("Milk", "1", "$4.00"));

        let mut walk = walker()
            .walk_search(&mut session, "whole milk", CancellationToken::new())
            .await
            .unwrap();

        let product = walk.next().await.unwrap().unwrap();
        assert_eq!(product.keyword, "whole milk");
        assert!(product.categories.is_empty());
        assert!(walk.next().await.is_none());
    }

    #[tokio::test]
    async fn tiles_without_links_are_skipped() {
        let mut session = ScriptedSession::new()
            .with_listing(
                LISTING,
                vec![
                    ScriptedTile::linked("Milk", "/p/milk/1"),
                    ScriptedTile::unlinked("Sponsored"),
                ],
            )
            .with_product_page(&format!("{BASE}/p/milk/1"), ProductPage::new("Milk", "1", "$4.00"));

        let walk = walker()
            .walk_listing(&mut session, WalkContext::Category("Dairy".into()), LISTING, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(walk.summary().items_found, 1);
        assert_eq!(walk.summary().tiles_without_link, 1);
    }

    #[tokio::test]
    async fn extraction_is_lazy_and_stops_on_cancel() {
        let mut session = five_item_session();
        let cancel = CancellationToken::new();
        let mut walk = walker()
            .walk_listing(&mut session, WalkContext::Category("Dairy".into()), LISTING, cancel.clone())
            .await
            .unwrap();

        assert_eq!(walk.remaining(), 5);
        assert!(walk.next().await.unwrap().is_ok());
        cancel.cancel();
        assert!(walk.next().await.is_none());

        let summary = walk.into_summary();
        assert!(summary.cancelled);
        assert_eq!(summary.items_yielded, 1);
        assert_eq!(session.contexts_opened(), 1);
    }

    #[tokio::test]
    async fn pagination_failure_is_returned_before_any_extraction() {
        let mut session = five_item_session()
            .with_click_outcomes([Activation::Stale, Activation::Stale]);

        let failure = walker()
            .walk_listing(&mut session, WalkContext::Category("Dairy".into()), LISTING, CancellationToken::new())
            .await
            .err();

        assert!(matches!(failure, Some(PaginationFailure::RepeatedStaleReference { .. })));
        assert_eq!(session.contexts_opened(), 0);
    }

    #[tokio::test]
    async fn empty_listing_yields_nothing() {
        let mut session = ScriptedSession::new().with_listing(LISTING, Vec::new());
        let mut walk = walker()
            .walk_listing(&mut session, WalkContext::Category("Dairy".into()), LISTING, CancellationToken::new())
            .await
            .unwrap();

        assert!(walk.next().await.is_none());
        assert!(walk.summary().is_complete());
    }
}

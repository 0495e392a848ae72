//! Test utilities for the catalog crawler
//!
//! [`ScriptedSession`] is an in-memory [`BrowsingSession`]: listings and
//! product pages are declared up front, load-more clicks follow a script,
//! and every call is recorded so tests can assert on the exact sequence.
//! Pages are recognized by the default locator table.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::session::{
    Activation, BrowsingSession, ContextId, Locator, SessionError, SessionResult, WaitCondition,
};
use crate::infrastructure::catalog_repository::SqliteCatalogRepository;
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::locators::{LocatorKey, LocatorTable};

/// In-memory database with the catalog schema applied
pub struct TestDatabase {
    pub connection: DatabaseConnection,
}

impl TestDatabase {
    pub async fn new() -> Result<Self> {
        let connection = DatabaseConnection::in_memory().await?;
        connection.ensure_schema().await?;
        Ok(Self { connection })
    }

    pub fn repository(&self) -> Arc<SqliteCatalogRepository> {
        Arc::new(SqliteCatalogRepository::new(Arc::new(self.connection.pool().clone())))
    }
}

/// One tile on a scripted listing
#[derive(Debug, Clone)]
pub struct ScriptedTile {
    pub title: String,
    pub href: Option<String>,
}

impl ScriptedTile {
    pub fn linked(title: &str, href: &str) -> Self {
        Self {
            title: title.to_string(),
            href: Some(href.to_string()),
        }
    }

    /// A tile without an item link, like a sponsored banner
    pub fn unlinked(title: &str) -> Self {
        Self {
            title: title.to_string(),
            href: None,
        }
    }
}

/// A scripted product detail page
#[derive(Debug, Clone)]
pub struct ProductPage {
    present: HashSet<LocatorKey>,
    texts: HashMap<LocatorKey, String>,
    attributes: HashMap<(LocatorKey, String), String>,
}

impl ProductPage {
    /// A complete page: image at `https://img.example/<upc>.jpg`, aisle 12, one gallon
    pub fn new(name: &str, upc: &str, price_label: &str) -> Self {
        let present = [
            LocatorKey::ProductName,
            LocatorKey::ProductUpc,
            LocatorKey::ProductImage,
            LocatorKey::StoreLocation,
            LocatorKey::ItemSize,
            LocatorKey::PriceLabel,
        ]
        .into_iter()
        .collect();

        let texts = HashMap::from([
            (LocatorKey::ProductName, name.to_string()),
            (LocatorKey::ProductUpc, format!("UPC: {upc}")),
            (LocatorKey::StoreLocation, "Located in Aisle 12".to_string()),
            (LocatorKey::ItemSize, "1 gal".to_string()),
        ]);

        let attributes = HashMap::from([
            (
                (LocatorKey::ProductImage, "src".to_string()),
                format!("https://img.example/{upc}.jpg"),
            ),
            (
                (LocatorKey::PriceLabel, "aria-label".to_string()),
                price_label.to_string(),
            ),
        ]);

        Self {
            present,
            texts,
            attributes,
        }
    }

    /// Remove the element for `key` from the page
    #[must_use]
    pub fn without(mut self, key: LocatorKey) -> Self {
        self.present.remove(&key);
        self
    }

    /// Keep the element for `key` but drop all of its attributes
    #[must_use]
    pub fn without_attribute(mut self, key: LocatorKey) -> Self {
        self.attributes.retain(|(k, _), _| *k != key);
        self
    }
}

/// Element handle of the scripted session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedElement {
    pub key: LocatorKey,
    /// URL of the page the element lives on
    pub page: String,
    /// Tile position, for tiles and their children
    pub tile: Option<usize>,
}

/// A recorded session call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Navigate(String),
    Find(LocatorKey),
    FindAll(LocatorKey),
    Open(String),
    Close,
    SwitchToRecent,
    SwitchTo(ContextId),
    Scroll(LocatorKey),
    Activate(LocatorKey),
}

pub struct ScriptedSession {
    locators: LocatorTable,
    listings: HashMap<String, Vec<ScriptedTile>>,
    pages: HashMap<String, ProductPage>,
    contexts: Vec<(ContextId, String)>,
    active: Option<ContextId>,
    next_context: usize,
    contexts_opened: usize,
    load_more_remaining: usize,
    click_outcomes: VecDeque<Activation>,
    dismiss_available: bool,
    vanish_on_stale: bool,
    fail_navigation: bool,
    fail_open: HashSet<String>,
    fail_next_switch: bool,
    fail_close: bool,
    calls: Vec<Call>,
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSession {
    /// One blank context, no pages
    pub fn new() -> Self {
        let origin = ContextId("ctx-0".to_string());
        Self {
            locators: LocatorTable::default(),
            listings: HashMap::new(),
            pages: HashMap::new(),
            contexts: vec![(origin.clone(), "about:blank".to_string())],
            active: Some(origin),
            next_context: 1,
            contexts_opened: 0,
            load_more_remaining: 0,
            click_outcomes: VecDeque::new(),
            dismiss_available: true,
            vanish_on_stale: false,
            fail_navigation: false,
            fail_open: HashSet::new(),
            fail_next_switch: false,
            fail_close: false,
            calls: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_listing(mut self, url: &str, tiles: Vec<ScriptedTile>) -> Self {
        self.listings.insert(url.to_string(), tiles);
        self
    }

    #[must_use]
    pub fn with_product_page(mut self, url: &str, page: ProductPage) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    /// Number of successful load-more clicks before the control disappears
    #[must_use]
    pub fn with_load_more(mut self, loads: usize) -> Self {
        self.load_more_remaining = loads;
        self
    }

    /// Outcomes of the next load-more clicks; clicks beyond the script succeed
    #[must_use]
    pub fn with_click_outcomes(mut self, outcomes: impl IntoIterator<Item = Activation>) -> Self {
        self.click_outcomes.extend(outcomes);
        self
    }

    #[must_use]
    pub fn without_dismiss_control(mut self) -> Self {
        self.dismiss_available = false;
        self
    }

    /// A stale click also removes the load-more control from the page
    #[must_use]
    pub fn vanishing_load_more_on_stale(mut self) -> Self {
        self.vanish_on_stale = true;
        self
    }

    /// Navigation fails as if the browser had gone away
    #[must_use]
    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    #[must_use]
    pub fn failing_open(mut self, url: &str) -> Self {
        self.fail_open.insert(url.to_string());
        self
    }

    /// The next switch to the newest context fails once
    #[must_use]
    pub fn failing_first_switch(mut self) -> Self {
        self.fail_next_switch = true;
        self
    }

    /// Closing a context is rejected, as when an alert is open in it
    #[must_use]
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn activation_count(&self, key: LocatorKey) -> usize {
        self.calls
            .iter()
            .filter(|call| **call == Call::Activate(key))
            .count()
    }

    pub fn active_context(&self) -> Option<ContextId> {
        self.active.clone()
    }

    pub fn open_context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Auxiliary contexts opened so far
    pub fn contexts_opened(&self) -> usize {
        self.contexts_opened
    }

    fn key_of(&self, locator: &Locator) -> Option<LocatorKey> {
        LocatorKey::ALL
            .into_iter()
            .find(|key| self.locators.get(*key) == *locator)
    }

    fn active_url(&self) -> SessionResult<String> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| SessionError::NoSuchContext("no active context".to_string()))?;
        self.contexts
            .iter()
            .find(|(id, _)| id == active)
            .map(|(_, url)| url.clone())
            .ok_or_else(|| SessionError::NoSuchContext(active.to_string()))
    }

    fn element(key: LocatorKey, page: &str, tile: Option<usize>) -> ScriptedElement {
        ScriptedElement {
            key,
            page: page.to_string(),
            tile,
        }
    }

    fn tile(&self, element: &ScriptedElement) -> SessionResult<&ScriptedTile> {
        element
            .tile
            .and_then(|index| self.listings.get(&element.page)?.get(index))
            .ok_or(SessionError::StaleElement)
    }
}

#[async_trait]
impl BrowsingSession for ScriptedSession {
    type Element = ScriptedElement;

    async fn navigate(&mut self, url: &str) -> SessionResult<()> {
        self.calls.push(Call::Navigate(url.to_string()));
        if self.fail_navigation {
            return Err(SessionError::Driver("browser closed".to_string()));
        }
        let active = self
            .active
            .clone()
            .ok_or_else(|| SessionError::NoSuchContext("no active context".to_string()))?;
        for (id, current) in &mut self.contexts {
            if *id == active {
                *current = url.to_string();
            }
        }
        Ok(())
    }

    async fn find_element(
        &mut self,
        locator: &Locator,
        _condition: WaitCondition,
        timeout: Duration,
    ) -> SessionResult<ScriptedElement> {
        let key = self
            .key_of(locator)
            .ok_or_else(|| SessionError::timeout(locator, timeout))?;
        self.calls.push(Call::Find(key));
        let url = self.active_url()?;

        let found = match key {
            LocatorKey::LoadMore => self.listings.contains_key(&url) && self.load_more_remaining > 0,
            LocatorKey::DismissOverlay => self.listings.contains_key(&url) && self.dismiss_available,
            LocatorKey::Tile => self.listings.get(&url).is_some_and(|tiles| !tiles.is_empty()),
            _ => self
                .pages
                .get(&url)
                .is_some_and(|page| page.present.contains(&key)),
        };

        if found {
            let tile = (key == LocatorKey::Tile).then_some(0);
            Ok(Self::element(key, &url, tile))
        } else {
            Err(SessionError::timeout(locator, timeout))
        }
    }

    async fn find_elements(&mut self, locator: &Locator) -> SessionResult<Vec<ScriptedElement>> {
        let Some(key) = self.key_of(locator) else {
            return Ok(Vec::new());
        };
        self.calls.push(Call::FindAll(key));
        let url = self.active_url()?;

        if key != LocatorKey::Tile {
            return Ok(Vec::new());
        }
        let count = self.listings.get(&url).map_or(0, Vec::len);
        Ok((0..count)
            .map(|index| Self::element(LocatorKey::Tile, &url, Some(index)))
            .collect())
    }

    async fn find_within(
        &mut self,
        parent: &ScriptedElement,
        locator: &Locator,
    ) -> SessionResult<ScriptedElement> {
        let not_found = || SessionError::timeout(locator, Duration::ZERO);
        let key = self.key_of(locator).ok_or_else(not_found)?;
        let tile = self.tile(parent)?;

        let found = match key {
            LocatorKey::TileTitle => true,
            LocatorKey::TileLink => tile.href.is_some(),
            _ => false,
        };
        if found {
            Ok(Self::element(key, &parent.page, parent.tile))
        } else {
            Err(not_found())
        }
    }

    async fn text(&mut self, element: &ScriptedElement) -> SessionResult<String> {
        if element.key == LocatorKey::TileTitle {
            return Ok(self.tile(element)?.title.clone());
        }
        Ok(self
            .pages
            .get(&element.page)
            .and_then(|page| page.texts.get(&element.key))
            .cloned()
            .unwrap_or_default())
    }

    async fn attribute(&mut self, element: &ScriptedElement, name: &str) -> SessionResult<Option<String>> {
        if element.key == LocatorKey::TileLink && name == "href" {
            return Ok(self.tile(element)?.href.clone());
        }
        Ok(self
            .pages
            .get(&element.page)
            .and_then(|page| page.attributes.get(&(element.key, name.to_string())))
            .cloned())
    }

    async fn open_in_new_context(&mut self, url: &str) -> SessionResult<()> {
        self.calls.push(Call::Open(url.to_string()));
        if self.fail_open.contains(url) {
            return Err(SessionError::Command("popup blocked".to_string()));
        }
        let id = ContextId(format!("ctx-{}", self.next_context));
        self.next_context += 1;
        self.contexts_opened += 1;
        self.contexts.push((id, url.to_string()));
        Ok(())
    }

    async fn close_current_context(&mut self) -> SessionResult<()> {
        self.calls.push(Call::Close);
        if self.fail_close {
            return Err(SessionError::Command("unexpected alert open".to_string()));
        }
        let active = self
            .active
            .take()
            .ok_or_else(|| SessionError::NoSuchContext("no active context".to_string()))?;
        self.contexts.retain(|(id, _)| *id != active);
        Ok(())
    }

    async fn switch_to_most_recent_context(&mut self) -> SessionResult<()> {
        self.calls.push(Call::SwitchToRecent);
        if self.fail_next_switch {
            self.fail_next_switch = false;
            return Err(SessionError::Command("window not ready".to_string()));
        }
        let newest = self
            .contexts
            .last()
            .map(|(id, _)| id.clone())
            .ok_or_else(|| SessionError::NoSuchContext("no open contexts".to_string()))?;
        self.active = Some(newest);
        Ok(())
    }

    async fn current_context(&mut self) -> SessionResult<ContextId> {
        self.active
            .clone()
            .ok_or_else(|| SessionError::NoSuchContext("no active context".to_string()))
    }

    async fn switch_to_context(&mut self, context: &ContextId) -> SessionResult<()> {
        self.calls.push(Call::SwitchTo(context.clone()));
        if self.contexts.iter().any(|(id, _)| id == context) {
            self.active = Some(context.clone());
            Ok(())
        } else {
            Err(SessionError::NoSuchContext(context.to_string()))
        }
    }

    async fn scroll_into_view(&mut self, element: &ScriptedElement) -> SessionResult<()> {
        self.calls.push(Call::Scroll(element.key));
        Ok(())
    }

    async fn activate(&mut self, element: &ScriptedElement) -> SessionResult<Activation> {
        self.calls.push(Call::Activate(element.key));
        if element.key != LocatorKey::LoadMore {
            return Ok(Activation::Activated);
        }

        let outcome = self.click_outcomes.pop_front().unwrap_or(Activation::Activated);
        match outcome {
            Activation::Activated => {
                self.load_more_remaining = self.load_more_remaining.saturating_sub(1);
            }
            Activation::Stale if self.vanish_on_stale => self.load_more_remaining = 0,
            _ => {}
        }
        Ok(outcome)
    }
}

//! Item extractor
//!
//! Reads one item's detail page in an isolated browsing context. The
//! listing context stays untouched: it is remembered before the tab is
//! opened and restored on every exit path, success or failure.

use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::domain::product::{DEFAULT_AVAILABILITY, Product};
use crate::domain::session::{BrowsingSession, ContextId, Locator, SessionError, WaitCondition};
use crate::infrastructure::config::{SiteConfig, TimingConfig};
use crate::infrastructure::locators::LocatorKey;

use super::errors::{ExtractionError, ItemField};
use super::field_parser::{LOCATION_PREFIX, UPC_PREFIX, parse_price, strip_label_prefix};

/// An auxiliary context opened for one item.
///
/// `release` must run on every exit path; it closes the auxiliary context
/// if it became active and switches back to `origin`.
struct IsolatedContext {
    origin: ContextId,
    opened: bool,
}

impl IsolatedContext {
    async fn acquire<S: BrowsingSession>(session: &mut S) -> Result<Self, SessionError> {
        Ok(Self {
            origin: session.current_context().await?,
            opened: false,
        })
    }

    async fn open<S: BrowsingSession>(
        &mut self,
        session: &mut S,
        url: &str,
        settle_delay: Duration,
    ) -> Result<(), SessionError> {
        session.open_in_new_context(url).await?;
        self.opened = true;
        // UI-settling pause, not a network wait
        sleep(settle_delay).await;
        session.switch_to_most_recent_context().await
    }

    async fn release<S: BrowsingSession>(self, session: &mut S) -> Result<(), SessionError> {
        let closed = if self.opened {
            Self::close_auxiliary(session, &self.origin).await
        } else {
            Ok(())
        };
        // Switch back even when closing failed; the first error wins
        let restored = session.switch_to_context(&self.origin).await;
        closed.and(restored)
    }

    async fn close_auxiliary<S: BrowsingSession>(
        session: &mut S,
        origin: &ContextId,
    ) -> Result<(), SessionError> {
        let mut active = session.current_context().await.ok();
        if active.as_ref() == Some(origin) {
            // The switch never happened; the new tab is still open behind us
            session.switch_to_most_recent_context().await?;
            active = session.current_context().await.ok();
        }
        if active.as_ref() != Some(origin) {
            session.close_current_context().await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ItemExtractor {
    name: Locator,
    upc: Locator,
    image: Locator,
    store_location: Locator,
    size: Locator,
    price_label: Locator,
    field_timeout: Duration,
    settle_delay: Duration,
}

impl ItemExtractor {
    pub fn new(site: &SiteConfig, timing: &TimingConfig) -> Self {
        let locators = &site.locators;
        Self {
            name: locators.get(LocatorKey::ProductName),
            upc: locators.get(LocatorKey::ProductUpc),
            image: locators.get(LocatorKey::ProductImage),
            store_location: locators.get(LocatorKey::StoreLocation),
            size: locators.get(LocatorKey::ItemSize),
            price_label: locators.get(LocatorKey::PriceLabel),
            field_timeout: timing.field_timeout(),
            settle_delay: timing.settle_delay(),
        }
    }

    /// Extract one item from its detail page.
    ///
    /// Opens exactly one auxiliary context and closes it again; the context
    /// active before the call is active after it, whatever the outcome.
    /// `store_id`, `keyword` and `categories` are left for the caller.
    pub async fn extract_item<S: BrowsingSession>(
        &self,
        session: &mut S,
        item_url: &str,
    ) -> Result<Product, ExtractionError> {
        let context_error = |e: &SessionError| ExtractionError::from_session(ItemField::Context, item_url, e);

        let mut isolated = IsolatedContext::acquire(session)
            .await
            .map_err(|e| context_error(&e))?;

        let extracted = match isolated.open(session, item_url, self.settle_delay).await {
            Ok(()) => self.read_fields(session, item_url).await,
            Err(e) => Err(context_error(&e)),
        };

        let released = isolated.release(session).await;
        sleep(self.settle_delay).await;

        match (extracted, released) {
            (result, Ok(())) => result,
            (result, Err(e)) => {
                if let Err(extraction) = &result {
                    warn!("Extraction of {} failed before restore: {}", item_url, extraction);
                }
                Err(context_error(&e))
            }
        }
    }

    async fn read_fields<S: BrowsingSession>(
        &self,
        session: &mut S,
        item_url: &str,
    ) -> Result<Product, ExtractionError> {
        let name = self.read_text(session, &self.name, ItemField::Name, item_url).await?;
        let upc = self.read_text(session, &self.upc, ItemField::Upc, item_url).await?;
        let image = self
            .read_attribute(session, &self.image, "src", ItemField::Image, item_url)
            .await?;
        let store_location = self
            .read_text(session, &self.store_location, ItemField::StoreLocation, item_url)
            .await?;
        let size = self.read_text(session, &self.size, ItemField::Size, item_url).await?;
        let raw_price_label = self
            .read_attribute(session, &self.price_label, "aria-label", ItemField::Price, item_url)
            .await?;

        let (price, mrp) = parse_price(&raw_price_label)
            .map_err(|e| ExtractionError::new(ItemField::Price, item_url, e.to_string()))?;

        let product = Product {
            upc: strip_label_prefix(&upc, UPC_PREFIX),
            url: item_url.to_string(),
            name,
            categories: Default::default(),
            image,
            store_id: String::new(),
            store_location: strip_label_prefix(&store_location, LOCATION_PREFIX),
            price,
            mrp,
            availability: DEFAULT_AVAILABILITY.to_string(),
            keyword: String::new(),
            size,
            observed_at: Utc::now(),
        };
        debug!("Extracted {} ({}) at {}", product.name, product.upc, product.price);
        Ok(product)
    }

    async fn locate<S: BrowsingSession>(
        &self,
        session: &mut S,
        locator: &Locator,
        field: ItemField,
        item_url: &str,
    ) -> Result<S::Element, ExtractionError> {
        session
            .find_element(locator, WaitCondition::Present, self.field_timeout)
            .await
            .map_err(|e| ExtractionError::from_session(field, item_url, &e))
    }

    async fn read_text<S: BrowsingSession>(
        &self,
        session: &mut S,
        locator: &Locator,
        field: ItemField,
        item_url: &str,
    ) -> Result<String, ExtractionError> {
        let element = self.locate(session, locator, field, item_url).await?;
        session
            .text(&element)
            .await
            .map_err(|e| ExtractionError::from_session(field, item_url, &e))
    }

    async fn read_attribute<S: BrowsingSession>(
        &self,
        session: &mut S,
        locator: &Locator,
        attribute: &str,
        field: ItemField,
        item_url: &str,
    ) -> Result<String, ExtractionError> {
        let element = self.locate(session, locator, field, item_url).await?;
        session
            .attribute(&element, attribute)
            .await
            .map_err(|e| ExtractionError::from_session(field, item_url, &e))?
            .ok_or_else(|| {
                let missing = SessionError::MissingAttribute {
                    locator: locator.to_string(),
                    attribute: attribute.to_string(),
                };
                ExtractionError::from_session(field, item_url, &missing)
            })
    }
}

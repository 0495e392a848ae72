//! Site locator table
//!
//! Every site-specific selector the crawler uses lives here, keyed by the
//! logical field it locates. A markup change on the site is a change to
//! this table (or to the `site.locators` config section), never to the
//! pagination or extraction logic.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::session::Locator;

/// Logical names of the elements the crawler locates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorKey {
    /// "Load more" control at the bottom of a listing
    LoadMore,
    /// Dismiss button of the feedback prompt overlay
    DismissOverlay,
    /// Item tile within a listing
    Tile,
    /// Link to the item detail page, inside a tile
    TileLink,
    /// Item title, inside a tile
    TileTitle,
    ProductName,
    ProductUpc,
    ProductImage,
    StoreLocation,
    ItemSize,
    /// Element whose `aria-label` holds the price text
    PriceLabel,
}

impl LocatorKey {
    pub const ALL: [LocatorKey; 11] = [
        Self::LoadMore,
        Self::DismissOverlay,
        Self::Tile,
        Self::TileLink,
        Self::TileTitle,
        Self::ProductName,
        Self::ProductUpc,
        Self::ProductImage,
        Self::StoreLocation,
        Self::ItemSize,
        Self::PriceLabel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadMore => "load_more",
            Self::DismissOverlay => "dismiss_overlay",
            Self::Tile => "tile",
            Self::TileLink => "tile_link",
            Self::TileTitle => "tile_title",
            Self::ProductName => "product_name",
            Self::ProductUpc => "product_upc",
            Self::ProductImage => "product_image",
            Self::StoreLocation => "store_location",
            Self::ItemSize => "item_size",
            Self::PriceLabel => "price_label",
        }
    }

    /// Built-in locator for the target site
    pub fn default_locator(&self) -> Locator {
        match self {
            Self::LoadMore => Locator::css(".LoadMore__load-more-button"),
            Self::DismissOverlay => Locator::xpath("//button[contains(text(), 'No, thanks')]"),
            Self::Tile => Locator::css(".ProductCard"),
            Self::TileLink => Locator::css("a"),
            Self::TileTitle => Locator::css(".text-primary"),
            Self::ProductName => Locator::css("[data-testid='product-details-name']"),
            Self::ProductUpc => Locator::css("[data-testid='product-details-upc']"),
            Self::ProductImage => Locator::css(".ProductImages-image"),
            Self::StoreLocation => Locator::css("[data-testid='product-details-location']"),
            Self::ItemSize => Locator::css("[data-testid='product-details-item-unit']"),
            Self::PriceLabel => Locator::css("[data-testid='product-item-unit-price']"),
        }
    }
}

impl fmt::Display for LocatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Locators keyed by logical field name.
///
/// Entries missing from a configured table fall back to the built-in
/// site defaults, so a config file only needs to list what changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocatorTable {
    entries: BTreeMap<LocatorKey, Locator>,
}

impl Default for LocatorTable {
    fn default() -> Self {
        Self {
            entries: LocatorKey::ALL
                .iter()
                .map(|key| (*key, key.default_locator()))
                .collect(),
        }
    }
}

impl LocatorTable {
    /// Table with no overrides; every lookup resolves to the site default
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: LocatorKey) -> Locator {
        self.entries
            .get(&key)
            .cloned()
            .unwrap_or_else(|| key.default_locator())
    }

    #[must_use]
    pub fn with_override(mut self, key: LocatorKey, locator: Locator) -> Self {
        self.entries.insert(key, locator);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_covers_every_key() {
        let table = LocatorTable::default();
        for key in LocatorKey::ALL {
            assert_eq!(table.get(key), key.default_locator(), "{key}");
        }
    }

    #[test]
    fn partial_table_falls_back_to_defaults() {
        let json = r#"{"load_more": {"strategy": "css", "value": "button.more"}}"#;
        let table: LocatorTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.get(LocatorKey::LoadMore), Locator::css("button.more"));
        assert_eq!(table.get(LocatorKey::Tile), Locator::css(".ProductCard"));
    }

    #[test]
    fn override_replaces_single_entry() {
        let table = LocatorTable::empty().with_override(LocatorKey::PriceLabel, Locator::css(".price"));
        assert_eq!(table.get(LocatorKey::PriceLabel), Locator::css(".price"));
        assert_eq!(table.get(LocatorKey::ProductName), LocatorKey::ProductName.default_locator());
    }
}

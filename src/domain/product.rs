//! Catalog entities: categories to walk and the products extracted from them.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Availability recorded for every extracted item.
///
/// The detail page carries no stock signal at the point of extraction, and
/// out-of-stock items are not rendered as clickable tiles.
pub const DEFAULT_AVAILABILITY: &str = "in stock";

/// Processing status of a category in the work queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CategoryStatus {
    #[default]
    Unprocessed,
    Done,
}

impl CategoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::Done => "done",
        }
    }

    /// Stored rows may carry NULL or legacy values; anything but "done" is pending.
    pub fn from_db(value: Option<&str>) -> Self {
        match value {
            Some("done") => Self::Done,
            _ => Self::Unprocessed,
        }
    }
}

impl fmt::Display for CategoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A category listing discovered upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Database id; `None` until the category has been stored
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub status: CategoryStatus,
}

impl Category {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            url: url.into(),
            status: CategoryStatus::Unprocessed,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == CategoryStatus::Done
    }
}

/// One observation of an item detail page.
///
/// Created by the item extractor. Only the caller-owned fields
/// (`categories`, `keyword`, `store_id`) are filled in after extraction,
/// through the `with_*` builders, before the record is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub upc: String,
    pub url: String,
    pub name: String,
    /// Every listing context the item was observed under; sorted for a stable serialized order
    pub categories: BTreeSet<String>,
    pub image: String,
    pub store_id: String,
    pub store_location: String,
    pub price: String,
    pub mrp: String,
    pub availability: String,
    pub keyword: String,
    pub size: String,
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

impl Product {
    /// Attach the listing context (category name) the item was found under
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.insert(category.into());
        self
    }

    /// Attach the search keyword that produced the item
    #[must_use]
    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = keyword.into();
        self
    }

    #[must_use]
    pub fn with_store_id(mut self, store_id: impl Into<String>) -> Self {
        self.store_id = store_id.into();
        self
    }

    pub fn is_marked_down(&self) -> bool {
        self.price != self.mrp
    }

    /// Categories as the ordered list written to storage
    pub fn categories_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.categories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Product {
        Product {
            upc: "0001111041700".into(),
            url: "https://www.kroger.com/p/milk/0001111041700".into(),
            name: "Whole Milk".into(),
            categories: BTreeSet::new(),
            image: "https://img/milk.jpg".into(),
            store_id: String::new(),
            store_location: "Aisle 12".into(),
            price: "$2.99".into(),
            mrp: "$3.49".into(),
            availability: DEFAULT_AVAILABILITY.into(),
            keyword: String::new(),
            size: "1 gal".into(),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn categories_serialize_as_sorted_list() {
        let product = sample().with_category("Produce").with_category("Dairy").with_category("Produce");
        assert_eq!(product.categories_json().unwrap(), r#"["Dairy","Produce"]"#);
    }

    #[test]
    fn markdown_detection() {
        assert!(sample().is_marked_down());
        let mut plain = sample();
        plain.mrp = plain.price.clone();
        assert!(!plain.is_marked_down());
    }

    #[test]
    fn category_status_from_db_treats_null_as_pending() {
        assert_eq!(CategoryStatus::from_db(None), CategoryStatus::Unprocessed);
        assert_eq!(CategoryStatus::from_db(Some("in_progress")), CategoryStatus::Unprocessed);
        assert_eq!(CategoryStatus::from_db(Some("done")), CategoryStatus::Done);
    }
}

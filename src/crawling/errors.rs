//! Error taxonomy of the crawling core
//!
//! - [`ExtractionError`]: one item could not be read; the walk skips it.
//! - [`PaginationFailure`]: a listing could not be expanded; the walk fails
//!   and the caller must not mark the category done.
//! - [`PriceLabelError`]: a price label that does not split as expected.

use std::fmt;

use thiserror::Error;

use crate::domain::session::SessionError;

/// Fields read from an item detail page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemField {
    /// Switching into or out of the isolated context
    Context,
    Name,
    Upc,
    Image,
    StoreLocation,
    Size,
    Price,
}

impl ItemField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::Name => "name",
            Self::Upc => "upc",
            Self::Image => "image",
            Self::StoreLocation => "store_location",
            Self::Size => "size",
            Self::Price => "price",
        }
    }
}

impl fmt::Display for ItemField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceLabelError {
    #[error("Price label is empty")]
    Empty,

    #[error("Marked-down price label '{label}' split into {tokens} tokens, expected 2")]
    UnexpectedTokens { label: String, tokens: usize },
}

/// Failure to extract one item
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to extract '{field}' from {item_url}: {reason}")]
pub struct ExtractionError {
    pub field: ItemField,
    pub item_url: String,
    pub reason: String,
    /// Set when the driver itself failed, which makes the whole run unusable
    pub fatal: bool,
}

impl ExtractionError {
    pub fn new(field: ItemField, item_url: &str, reason: impl Into<String>) -> Self {
        Self {
            field,
            item_url: item_url.to_string(),
            reason: reason.into(),
            fatal: false,
        }
    }

    pub fn from_session(field: ItemField, item_url: &str, error: &SessionError) -> Self {
        Self {
            field,
            item_url: item_url.to_string(),
            reason: error.to_string(),
            fatal: error.is_fatal(),
        }
    }
}

/// Failure to drive a listing to full expansion
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaginationFailure {
    #[error("Overlay on {listing_url} intercepted the load-more click and no dismissal control appeared")]
    OverlayNotDismissed { listing_url: String },

    #[error("Load-more click on {listing_url} was intercepted again after dismissing the overlay")]
    RepeatedInterception { listing_url: String },

    #[error("Load-more control on {listing_url} went stale again after reacquiring it")]
    RepeatedStaleReference { listing_url: String },

    #[error("Walk of {listing_url} was cancelled")]
    Cancelled { listing_url: String },

    #[error("Session failure on {listing_url}: {source}")]
    Session {
        listing_url: String,
        #[source]
        source: SessionError,
    },
}

impl PaginationFailure {
    pub fn session(listing_url: &str, source: SessionError) -> Self {
        Self::Session {
            listing_url: listing_url.to_string(),
            source,
        }
    }

    pub fn listing_url(&self) -> &str {
        match self {
            Self::OverlayNotDismissed { listing_url }
            | Self::RepeatedInterception { listing_url }
            | Self::RepeatedStaleReference { listing_url }
            | Self::Cancelled { listing_url }
            | Self::Session { listing_url, .. } => listing_url,
        }
    }

    /// The session is unusable; the run must stop rather than move on to the next listing
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Session { source, .. } if source.is_fatal())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

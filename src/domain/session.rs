//! Browsing-context contract
//!
//! The crawling core talks to the browser only through [`BrowsingSession`].
//! A session has exactly one active context (tab/window) at a time; the
//! session owns that pointer and every operation acts on it.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How an element is located on the page
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "value", rename_all = "lowercase")]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Self::XPath(expression.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(selector) => write!(f, "css={selector}"),
            Self::XPath(expression) => write!(f, "xpath={expression}"),
        }
    }
}

/// Condition an element must satisfy before a bounded wait succeeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    /// Attached to the DOM
    Present,
    /// Attached and displayed
    Visible,
    /// Displayed and enabled
    Clickable,
}

/// Opaque identifier of a browsing context (tab or window handle)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub String);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of activating (clicking) an element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Activated,
    /// Another element (an overlay dialog) received the click
    Intercepted,
    /// The element reference was invalidated by a DOM mutation
    Stale,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Timed out after {waited:?} waiting for {locator}")]
    Timeout { locator: String, waited: Duration },

    #[error("Element {locator} has no attribute '{attribute}'")]
    MissingAttribute { locator: String, attribute: String },

    #[error("Browsing context {0} does not exist")]
    NoSuchContext(String),

    #[error("Element reference is stale")]
    StaleElement,

    /// A single command was rejected; the session itself is still usable
    #[error("WebDriver command failed: {0}")]
    Command(String),

    /// The driver itself failed; the session may be unusable
    #[error("WebDriver failure: {0}")]
    Driver(String),
}

impl SessionError {
    pub fn timeout(locator: &Locator, waited: Duration) -> Self {
        Self::Timeout {
            locator: locator.to_string(),
            waited,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Errors that mean the hosting session can no longer be driven
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Driver(_))
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Capability surface the crawling core requires from a browser session
#[async_trait]
pub trait BrowsingSession: Send {
    /// Handle to an element found in the active context
    type Element: Clone + Send + Sync;

    /// Load `url` in the active context
    async fn navigate(&mut self, url: &str) -> SessionResult<()>;

    /// Wait at most `timeout` for an element matching `locator` to satisfy `condition`
    async fn find_element(
        &mut self,
        locator: &Locator,
        condition: WaitCondition,
        timeout: Duration,
    ) -> SessionResult<Self::Element>;

    /// All elements currently matching `locator`, in document order, without waiting
    async fn find_elements(&mut self, locator: &Locator) -> SessionResult<Vec<Self::Element>>;

    /// First descendant of `parent` matching `locator`, without waiting
    async fn find_within(
        &mut self,
        parent: &Self::Element,
        locator: &Locator,
    ) -> SessionResult<Self::Element>;

    /// Visible text of an element
    async fn text(&mut self, element: &Self::Element) -> SessionResult<String>;

    /// Attribute value of an element; `None` when the attribute is absent
    async fn attribute(&mut self, element: &Self::Element, name: &str) -> SessionResult<Option<String>>;

    /// Open `url` in a new auxiliary context without switching to it
    async fn open_in_new_context(&mut self, url: &str) -> SessionResult<()>;

    /// Close the active context; the active pointer is left dangling until a switch
    async fn close_current_context(&mut self) -> SessionResult<()>;

    /// Make the most recently opened context the active one
    async fn switch_to_most_recent_context(&mut self) -> SessionResult<()>;

    /// Identifier of the active context
    async fn current_context(&mut self) -> SessionResult<ContextId>;

    /// Make `context` the active one
    async fn switch_to_context(&mut self, context: &ContextId) -> SessionResult<()>;

    /// Smoothly scroll the element into view, aligned to the end of the viewport
    async fn scroll_into_view(&mut self, element: &Self::Element) -> SessionResult<()>;

    /// Click the element, classifying the two known transient failures
    async fn activate(&mut self, element: &Self::Element) -> SessionResult<Activation>;
}

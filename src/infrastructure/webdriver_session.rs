//! WebDriver-backed browsing session
//!
//! Implements [`BrowsingSession`] over a fantoccini client connected to an
//! already running WebDriver server. Auxiliary contexts are browser tabs.

#![allow(clippy::uninlined_format_args)]

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::error::{CmdError, ErrorStatus};
use fantoccini::wd::WindowHandle;
use fantoccini::{Client, ClientBuilder};
use serde_json::{Map, Value, json};
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::domain::session::{
    Activation, BrowsingSession, ContextId, Locator, SessionError, SessionResult, WaitCondition,
};
use crate::infrastructure::config::{TimingConfig, WebDriverConfig};

const OPEN_IN_NEW_TAB_SCRIPT: &str = "window.open(arguments[0], '_blank');";
const SCROLL_INTO_VIEW_SCRIPT: &str =
    "arguments[0].scrollIntoView({behavior: 'smooth', block: 'end'});";

pub struct WebDriverSession {
    client: Client,
    poll_interval: Duration,
}

fn driver_locator(locator: &Locator) -> fantoccini::Locator<'_> {
    match locator {
        Locator::Css(selector) => fantoccini::Locator::Css(selector),
        Locator::XPath(expression) => fantoccini::Locator::XPath(expression),
    }
}

fn error_status(err: &CmdError) -> Option<&ErrorStatus> {
    match err {
        CmdError::Standard(wd) => Some(&wd.error),
        _ => None,
    }
}

/// Classify a driver error; only a lost connection or session is fatal
fn map_cmd_error(err: CmdError) -> SessionError {
    match &err {
        CmdError::Standard(wd) => match wd.error {
            ErrorStatus::StaleElementReference => SessionError::StaleElement,
            ErrorStatus::NoSuchWindow => SessionError::NoSuchContext(err.to_string()),
            ErrorStatus::InvalidSessionId | ErrorStatus::SessionNotCreated => {
                SessionError::Driver(err.to_string())
            }
            _ => SessionError::Command(err.to_string()),
        },
        CmdError::Lost(_) | CmdError::Failed(_) | CmdError::FailedC(_) => {
            SessionError::Driver(err.to_string())
        }
        // Malformed replies and bad arguments fail one command, not the session
        _ => SessionError::Command(err.to_string()),
    }
}

fn capabilities(config: &WebDriverConfig) -> Map<String, Value> {
    let mut caps = Map::new();
    match config.browser.as_str() {
        "firefox" => {
            let args: Vec<&str> = if config.headless { vec!["-headless"] } else { vec![] };
            caps.insert("browserName".into(), json!("firefox"));
            caps.insert("moz:firefoxOptions".into(), json!({ "args": args }));
        }
        _ => {
            let mut args = vec!["--disable-notifications", "--start-maximized"];
            if config.headless {
                args.push("--headless=new");
            }
            caps.insert("browserName".into(), json!("chrome"));
            caps.insert("goog:chromeOptions".into(), json!({ "args": args }));
        }
    }
    caps
}

impl WebDriverSession {
    /// Connect to the configured WebDriver endpoint and open a browser session
    pub async fn connect(config: &WebDriverConfig, timing: &TimingConfig) -> Result<Self> {
        info!("🔗 Connecting to WebDriver at {} ({})", config.endpoint, config.browser);
        let client = ClientBuilder::native()
            .capabilities(capabilities(config))
            .connect(&config.endpoint)
            .await
            .with_context(|| format!("Failed to connect to WebDriver at {}", config.endpoint))?;
        info!("✅ WebDriver session established");

        Ok(Self {
            client,
            poll_interval: timing.poll_interval().max(Duration::from_millis(10)),
        })
    }

    /// End the browser session
    pub async fn quit(self) -> Result<()> {
        self.client
            .close()
            .await
            .context("Failed to close WebDriver session")
    }

    async fn satisfies(&self, element: &Element, condition: WaitCondition) -> SessionResult<bool> {
        match condition {
            WaitCondition::Present => Ok(true),
            WaitCondition::Visible => element.is_displayed().await.map_err(map_cmd_error),
            WaitCondition::Clickable => Ok(element.is_displayed().await.map_err(map_cmd_error)?
                && element.is_enabled().await.map_err(map_cmd_error)?),
        }
    }

    /// Poll until the first matching element satisfies `condition`
    async fn poll_for(
        &self,
        locator: &Locator,
        condition: WaitCondition,
        timeout: Duration,
    ) -> SessionResult<Element> {
        let deadline = Instant::now() + timeout;
        loop {
            let candidates = self
                .client
                .find_all(driver_locator(locator))
                .await
                .map_err(map_cmd_error)?;
            for candidate in candidates {
                match self.satisfies(&candidate, condition).await {
                    Ok(true) => return Ok(candidate),
                    // Re-rendered between lookup and check; try the next poll
                    Ok(false) | Err(SessionError::StaleElement) => {}
                    Err(e) => return Err(e),
                }
            }
            if Instant::now() >= deadline {
                return Err(SessionError::timeout(locator, timeout));
            }
            sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl BrowsingSession for WebDriverSession {
    type Element = Element;

    async fn navigate(&mut self, url: &str) -> SessionResult<()> {
        debug!("Navigating to {}", url);
        self.client.goto(url).await.map_err(map_cmd_error)
    }

    async fn find_element(
        &mut self,
        locator: &Locator,
        condition: WaitCondition,
        timeout: Duration,
    ) -> SessionResult<Element> {
        match condition {
            WaitCondition::Present => self
                .client
                .wait()
                .at_most(timeout)
                .every(self.poll_interval)
                .for_element(driver_locator(locator))
                .await
                .map_err(|err| match err {
                    CmdError::WaitTimeout => SessionError::timeout(locator, timeout),
                    other => map_cmd_error(other),
                }),
            WaitCondition::Visible | WaitCondition::Clickable => {
                self.poll_for(locator, condition, timeout).await
            }
        }
    }

    async fn find_elements(&mut self, locator: &Locator) -> SessionResult<Vec<Element>> {
        self.client
            .find_all(driver_locator(locator))
            .await
            .map_err(map_cmd_error)
    }

    async fn find_within(&mut self, parent: &Element, locator: &Locator) -> SessionResult<Element> {
        parent
            .find(driver_locator(locator))
            .await
            .map_err(|err| {
                if err.is_no_such_element() {
                    SessionError::timeout(locator, Duration::ZERO)
                } else {
                    map_cmd_error(err)
                }
            })
    }

    async fn text(&mut self, element: &Element) -> SessionResult<String> {
        element.text().await.map_err(map_cmd_error)
    }

    async fn attribute(&mut self, element: &Element, name: &str) -> SessionResult<Option<String>> {
        element.attr(name).await.map_err(map_cmd_error)
    }

    async fn open_in_new_context(&mut self, url: &str) -> SessionResult<()> {
        self.client
            .execute(OPEN_IN_NEW_TAB_SCRIPT, vec![json!(url)])
            .await
            .map(|_| ())
            .map_err(map_cmd_error)
    }

    async fn close_current_context(&mut self) -> SessionResult<()> {
        self.client.close_window().await.map_err(map_cmd_error)
    }

    async fn switch_to_most_recent_context(&mut self) -> SessionResult<()> {
        let handles = self.client.windows().await.map_err(map_cmd_error)?;
        let newest = handles
            .into_iter()
            .last()
            .ok_or_else(|| SessionError::NoSuchContext("no open windows".to_string()))?;
        self.client
            .switch_to_window(newest)
            .await
            .map_err(map_cmd_error)
    }

    async fn current_context(&mut self) -> SessionResult<ContextId> {
        let handle = self.client.window().await.map_err(map_cmd_error)?;
        Ok(ContextId(String::from(handle)))
    }

    async fn switch_to_context(&mut self, context: &ContextId) -> SessionResult<()> {
        let handle = WindowHandle::try_from(context.0.clone())
            .map_err(|_| SessionError::NoSuchContext(context.to_string()))?;
        self.client
            .switch_to_window(handle)
            .await
            .map_err(map_cmd_error)
    }

    async fn scroll_into_view(&mut self, element: &Element) -> SessionResult<()> {
        let argument = serde_json::to_value(element)
            .map_err(|e| SessionError::Command(format!("Failed to serialize element: {}", e)))?;
        self.client
            .execute(SCROLL_INTO_VIEW_SCRIPT, vec![argument])
            .await
            .map(|_| ())
            .map_err(map_cmd_error)
    }

    async fn activate(&mut self, element: &Element) -> SessionResult<Activation> {
        match element.click().await {
            Ok(()) => Ok(Activation::Activated),
            Err(err) => match error_status(&err) {
                Some(ErrorStatus::ElementClickIntercepted) => Ok(Activation::Intercepted),
                Some(ErrorStatus::StaleElementReference) => Ok(Activation::Stale),
                _ => Err(map_cmd_error(err)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fantoccini::error::WebDriver as WebDriverError;

    fn standard(status: ErrorStatus) -> CmdError {
        CmdError::Standard(WebDriverError::new(status, "from driver"))
    }

    #[test]
    fn malformed_replies_fail_the_command_only() {
        let not_json = map_cmd_error(CmdError::NotJson("<html>502</html>".into()));
        assert!(matches!(not_json, SessionError::Command(_)));
        assert!(!not_json.is_fatal());

        let not_w3c = map_cmd_error(CmdError::NotW3C(json!({ "status": 13 })));
        assert!(!not_w3c.is_fatal());

        let argument = map_cmd_error(CmdError::InvalidArgument("selector".into(), "empty".into()));
        assert!(!argument.is_fatal());
        assert!(!map_cmd_error(CmdError::WaitTimeout).is_fatal());
    }

    #[test]
    fn lost_connection_and_dead_session_are_fatal() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(matches!(map_cmd_error(CmdError::Lost(reset)), SessionError::Driver(_)));
        assert!(map_cmd_error(standard(ErrorStatus::InvalidSessionId)).is_fatal());
        assert!(map_cmd_error(standard(ErrorStatus::SessionNotCreated)).is_fatal());
    }

    #[test]
    fn standard_statuses_map_to_session_errors() {
        assert!(matches!(
            map_cmd_error(standard(ErrorStatus::StaleElementReference)),
            SessionError::StaleElement
        ));
        assert!(matches!(
            map_cmd_error(standard(ErrorStatus::NoSuchWindow)),
            SessionError::NoSuchContext(_)
        ));
        let missing = map_cmd_error(standard(ErrorStatus::NoSuchElement));
        assert!(matches!(missing, SessionError::Command(_)));
        assert!(!missing.is_fatal());
    }

    #[test]
    fn chrome_capabilities_carry_headless_flag() {
        let config = WebDriverConfig {
            headless: true,
            ..WebDriverConfig::default()
        };
        let caps = capabilities(&config);
        let args = &caps["goog:chromeOptions"]["args"];
        assert!(args.as_array().unwrap().contains(&json!("--headless=new")));
        assert_eq!(caps["browserName"], json!("chrome"));
    }

    #[test]
    fn firefox_capabilities_use_moz_options() {
        let config = WebDriverConfig {
            browser: "firefox".into(),
            headless: false,
            ..WebDriverConfig::default()
        };
        let caps = capabilities(&config);
        assert_eq!(caps["moz:firefoxOptions"]["args"], json!([]));
    }

    #[test]
    fn driver_locator_keeps_strategy() {
        let css = Locator::css(".ProductCard");
        assert!(matches!(driver_locator(&css), fantoccini::Locator::Css(".ProductCard")));
        let xpath = Locator::xpath("//button");
        assert!(matches!(driver_locator(&xpath), fantoccini::Locator::XPath("//button")));
    }
}

//! Pagination engine
//!
//! Drives a listing page to full expansion by repeatedly triggering its
//! "load more" control. Two transient failures get a targeted recovery:
//!
//! - click intercepted by an overlay: dismiss the overlay, retry the click
//! - control reference gone stale: locate the control again, retry the click
//!
//! Each recovery may run at most once per load-more cycle. A second
//! occurrence within the same cycle fails the listing instead of looping.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::session::{Activation, BrowsingSession, Locator, SessionError, WaitCondition};
use crate::infrastructure::config::{SiteConfig, TimingConfig};
use crate::infrastructure::locators::LocatorKey;

use super::errors::PaginationFailure;
use super::state::{ListingPhase, ListingState};

/// Outcome of one load-more cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Triggered,
    /// The control vanished while recovering; nothing left to load
    Exhausted,
}

/// Recoveries already spent in the current cycle
#[derive(Debug, Default)]
struct CycleRecovery {
    dismissed: bool,
    reacquired: bool,
}

#[derive(Debug, Clone)]
pub struct PaginationEngine {
    load_more: Locator,
    dismiss_overlay: Locator,
    tile: Locator,
    probe_timeout: Duration,
    dismiss_timeout: Duration,
    settle_delay: Duration,
}

impl PaginationEngine {
    pub fn new(site: &SiteConfig, timing: &TimingConfig) -> Self {
        Self {
            load_more: site.locators.get(LocatorKey::LoadMore),
            dismiss_overlay: site.locators.get(LocatorKey::DismissOverlay),
            tile: site.locators.get(LocatorKey::Tile),
            probe_timeout: timing.probe_timeout(),
            dismiss_timeout: timing.dismiss_timeout(),
            settle_delay: timing.settle_delay(),
        }
    }

    /// Navigate to `listing_url` and trigger "load more" until the control is gone.
    ///
    /// Returns the terminal state; the listing's full tile set is present in
    /// the active context when this returns `Ok`. The token is checked at the
    /// top of every load-more cycle.
    pub async fn expand_listing<S: BrowsingSession>(
        &self,
        session: &mut S,
        listing_url: &str,
        cancel: &CancellationToken,
    ) -> Result<ListingState, PaginationFailure> {
        let failed = |e: SessionError| PaginationFailure::session(listing_url, e);
        let mut state = ListingState::new(listing_url);

        session.navigate(listing_url).await.map_err(failed)?;

        loop {
            if cancel.is_cancelled() {
                warn!("🛑 Expansion of {} cancelled after {} loads", listing_url, state.triggers);
                return Err(PaginationFailure::Cancelled {
                    listing_url: listing_url.to_string(),
                });
            }

            state.enter(ListingPhase::ProbeLoadMore);
            let Some(control) = self.probe(session).await.map_err(failed)? else {
                debug!("No load-more control on {}", listing_url);
                break;
            };

            state.enter(ListingPhase::TriggerLoadMore);
            match self.run_cycle(session, control, &mut state).await? {
                CycleOutcome::Triggered => state.record_trigger(),
                CycleOutcome::Exhausted => break,
            }
        }

        let tiles = session.find_elements(&self.tile).await.map_err(failed)?;
        state.finish(tiles.len());
        info!(
            "📄 Listing expanded: {} ({} loads, {} tiles)",
            listing_url, state.triggers, state.item_count
        );
        Ok(state)
    }

    /// Bounded wait for the load-more control; `None` once the listing has no more pages
    async fn probe<S: BrowsingSession>(
        &self,
        session: &mut S,
    ) -> Result<Option<S::Element>, SessionError> {
        match session
            .find_element(&self.load_more, WaitCondition::Visible, self.probe_timeout)
            .await
        {
            Ok(control) => Ok(Some(control)),
            Err(e) if e.is_timeout() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Scroll the control into view and click it. A reference that goes
    /// stale while scrolling counts as a stale click.
    async fn scroll_and_activate<S: BrowsingSession>(
        &self,
        session: &mut S,
        control: &S::Element,
    ) -> Result<Activation, SessionError> {
        match session.scroll_into_view(control).await {
            Ok(()) => {}
            Err(SessionError::StaleElement) => return Ok(Activation::Stale),
            Err(e) => return Err(e),
        }
        sleep(self.settle_delay).await;
        session.activate(control).await
    }

    async fn run_cycle<S: BrowsingSession>(
        &self,
        session: &mut S,
        mut control: S::Element,
        state: &mut ListingState,
    ) -> Result<CycleOutcome, PaginationFailure> {
        let listing_url = state.listing_url.clone();
        let failed = |e: SessionError| PaginationFailure::session(&listing_url, e);
        let mut recovery = CycleRecovery::default();
        let mut outcome = self
            .scroll_and_activate(session, &control)
            .await
            .map_err(failed)?;

        loop {
            match outcome {
                Activation::Activated => return Ok(CycleOutcome::Triggered),
                Activation::Intercepted => {
                    if recovery.dismissed {
                        return Err(PaginationFailure::RepeatedInterception {
                            listing_url: listing_url.clone(),
                        });
                    }
                    recovery.dismissed = true;
                    state.enter(ListingPhase::DismissOverlay);
                    info!("💬 Overlay intercepted load-more on {}, dismissing it", listing_url);
                    self.dismiss_overlay(session, &listing_url).await?;
                    outcome = session.activate(&control).await.map_err(failed)?;
                }
                Activation::Stale => {
                    if recovery.reacquired {
                        return Err(PaginationFailure::RepeatedStaleReference {
                            listing_url: listing_url.clone(),
                        });
                    }
                    recovery.reacquired = true;
                    state.enter(ListingPhase::Reacquire);
                    debug!("Load-more control went stale on {}, reacquiring", listing_url);
                    let Some(fresh) = self.probe(session).await.map_err(failed)? else {
                        return Ok(CycleOutcome::Exhausted);
                    };
                    control = fresh;
                    outcome = self
                        .scroll_and_activate(session, &control)
                        .await
                        .map_err(failed)?;
                }
            }
        }
    }

    async fn dismiss_overlay<S: BrowsingSession>(
        &self,
        session: &mut S,
        listing_url: &str,
    ) -> Result<(), PaginationFailure> {
        let not_dismissed = || PaginationFailure::OverlayNotDismissed {
            listing_url: listing_url.to_string(),
        };

        let button = match session
            .find_element(&self.dismiss_overlay, WaitCondition::Clickable, self.dismiss_timeout)
            .await
        {
            Ok(button) => button,
            Err(e) if e.is_timeout() => return Err(not_dismissed()),
            Err(e) => return Err(PaginationFailure::session(listing_url, e)),
        };

        match session.activate(&button).await {
            Ok(Activation::Activated) => {}
            Ok(_) => return Err(not_dismissed()),
            Err(e) => return Err(PaginationFailure::session(listing_url, e)),
        }
        sleep(self.settle_delay).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawling::state::LastError;
    use crate::test_utils::{Call, ScriptedSession, ScriptedTile};

    const LISTING: &str = "https://www.kroger.com/pl/dairy/01";

    fn engine() -> PaginationEngine {
        PaginationEngine::new(&SiteConfig::default(), &TimingConfig::immediate())
    }

    fn session(loads: usize) -> ScriptedSession {
        ScriptedSession::new()
            .with_listing(LISTING, vec![ScriptedTile::linked("Milk", "/p/milk/1")])
            .with_load_more(loads)
    }

    #[tokio::test]
    async fn listing_without_load_more_expands_after_one_probe() {
        let mut session = session(0);
        let state = engine()
            .expand_listing(&mut session, LISTING, &CancellationToken::new())
            .await
            .unwrap();

        assert!(state.expanded);
        assert_eq!(state.probes, 1);
        assert_eq!(state.triggers, 0);
        assert_eq!(state.item_count, 1);
        assert_eq!(session.activation_count(LocatorKey::LoadMore), 0);
    }

    #[tokio::test]
    async fn chain_of_loads_ends_with_one_empty_probe() {
        for loads in [1, 3, 7] {
            let mut session = session(loads);
            let state = engine()
                .expand_listing(&mut session, LISTING, &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(state.triggers as usize, loads);
            assert_eq!(state.probes as usize, loads + 1);
            assert_eq!(state.last_error, LastError::None);
            assert_eq!(session.activation_count(LocatorKey::LoadMore), loads);
        }
    }

    #[tokio::test]
    async fn single_interception_dismisses_once_and_retries_once() {
        let mut session = session(2).with_click_outcomes([Activation::Intercepted]);
        let state = engine()
            .expand_listing(&mut session, LISTING, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state.triggers, 2);
        assert_eq!(state.overlay_dismissals, 1);
        assert_eq!(state.last_error, LastError::Intercepted);
        assert_eq!(session.activation_count(LocatorKey::DismissOverlay), 1);
        // one intercepted click, its retry, and the second page's click
        assert_eq!(session.activation_count(LocatorKey::LoadMore), 3);

        let calls = session.calls();
        let dismiss_at = calls
            .iter()
            .position(|c| *c == Call::Activate(LocatorKey::DismissOverlay))
            .unwrap();
        assert_eq!(calls[dismiss_at + 1], Call::Activate(LocatorKey::LoadMore));
    }

    #[tokio::test]
    async fn second_interception_in_same_cycle_is_fatal() {
        let mut session =
            session(2).with_click_outcomes([Activation::Intercepted, Activation::Intercepted]);
        let err = engine()
            .expand_listing(&mut session, LISTING, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            PaginationFailure::RepeatedInterception {
                listing_url: LISTING.to_string()
            }
        );
        assert_eq!(session.activation_count(LocatorKey::DismissOverlay), 1);
    }

    #[tokio::test]
    async fn interceptions_in_separate_cycles_each_recover() {
        let mut session = session(2).with_click_outcomes([
            Activation::Intercepted,
            Activation::Activated,
            Activation::Intercepted,
            Activation::Activated,
        ]);
        let state = engine()
            .expand_listing(&mut session, LISTING, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state.triggers, 2);
        assert_eq!(state.overlay_dismissals, 2);
    }

    #[tokio::test]
    async fn missing_dismiss_control_fails_the_listing() {
        let mut session = session(1)
            .with_click_outcomes([Activation::Intercepted])
            .without_dismiss_control();
        let err = engine()
            .expand_listing(&mut session, LISTING, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PaginationFailure::OverlayNotDismissed { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn stale_control_is_reacquired_once() {
        let mut session = session(1).with_click_outcomes([Activation::Stale]);
        let state = engine()
            .expand_listing(&mut session, LISTING, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state.triggers, 1);
        assert_eq!(state.reacquisitions, 1);
        assert_eq!(state.last_error, LastError::Stale);
        assert_eq!(session.activation_count(LocatorKey::LoadMore), 2);
    }

    #[tokio::test]
    async fn second_staleness_in_same_cycle_is_fatal() {
        let mut session = session(1).with_click_outcomes([Activation::Stale, Activation::Stale]);
        let err = engine()
            .expand_listing(&mut session, LISTING, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PaginationFailure::RepeatedStaleReference { .. }));
    }

    #[tokio::test]
    async fn stale_after_dismissal_uses_the_reacquire_branch() {
        let mut session =
            session(1).with_click_outcomes([Activation::Intercepted, Activation::Stale]);
        let state = engine()
            .expand_listing(&mut session, LISTING, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state.overlay_dismissals, 1);
        assert_eq!(state.reacquisitions, 1);
        assert_eq!(state.triggers, 1);
    }

    #[tokio::test]
    async fn control_gone_on_reacquire_means_expanded() {
        let mut session = session(1)
            .with_click_outcomes([Activation::Stale])
            .vanishing_load_more_on_stale();
        let state = engine()
            .expand_listing(&mut session, LISTING, &CancellationToken::new())
            .await
            .unwrap();

        assert!(state.expanded);
        assert_eq!(state.triggers, 0);
        assert_eq!(state.reacquisitions, 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_the_next_cycle() {
        let mut session = session(3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine()
            .expand_listing(&mut session, LISTING, &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(session.activation_count(LocatorKey::LoadMore), 0);
    }

    #[tokio::test]
    async fn driver_failure_is_fatal() {
        let mut session = session(1).failing_navigation();
        let err = engine()
            .expand_listing(&mut session, LISTING, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_fatal());
    }
}

//! # Listing State
//!
//! Per-run state of the pagination engine. Created when a listing walk
//! starts, advanced by every load-more cycle, discarded when the run ends.

use serde::{Deserialize, Serialize};

/// Phases of the load-more state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingPhase {
    Start,
    ProbeLoadMore,
    TriggerLoadMore,
    DismissOverlay,
    Reacquire,
    Expanded,
}

/// Last transient failure observed during the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LastError {
    #[default]
    None,
    Intercepted,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingState {
    pub listing_url: String,
    pub phase: ListingPhase,
    pub expanded: bool,
    /// Tiles present once the listing is expanded
    pub item_count: usize,
    pub last_error: LastError,
    /// Probes for the load-more control, including the final one that found nothing
    pub probes: u32,
    /// Load-more activations that succeeded
    pub triggers: u32,
    pub overlay_dismissals: u32,
    pub reacquisitions: u32,
}

impl ListingState {
    pub fn new(listing_url: impl Into<String>) -> Self {
        Self {
            listing_url: listing_url.into(),
            phase: ListingPhase::Start,
            expanded: false,
            item_count: 0,
            last_error: LastError::None,
            probes: 0,
            triggers: 0,
            overlay_dismissals: 0,
            reacquisitions: 0,
        }
    }

    pub fn enter(&mut self, phase: ListingPhase) {
        tracing::trace!(listing = %self.listing_url, from = ?self.phase, to = ?phase, "listing transition");
        self.phase = phase;
        match phase {
            ListingPhase::ProbeLoadMore => self.probes += 1,
            ListingPhase::DismissOverlay => {
                self.last_error = LastError::Intercepted;
                self.overlay_dismissals += 1;
            }
            ListingPhase::Reacquire => {
                self.last_error = LastError::Stale;
                self.reacquisitions += 1;
            }
            _ => {}
        }
    }

    pub fn record_trigger(&mut self) {
        self.triggers += 1;
    }

    pub fn finish(&mut self, item_count: usize) {
        self.enter(ListingPhase::Expanded);
        self.expanded = true;
        self.item_count = item_count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_update_counters() {
        let mut state = ListingState::new("https://x/c/dairy");
        state.enter(ListingPhase::ProbeLoadMore);
        state.enter(ListingPhase::TriggerLoadMore);
        state.enter(ListingPhase::DismissOverlay);
        state.record_trigger();
        state.enter(ListingPhase::ProbeLoadMore);
        state.finish(24);

        assert_eq!(state.probes, 2);
        assert_eq!(state.triggers, 1);
        assert_eq!(state.overlay_dismissals, 1);
        assert_eq!(state.last_error, LastError::Intercepted);
        assert!(state.expanded);
        assert_eq!(state.item_count, 24);
        assert_eq!(state.phase, ListingPhase::Expanded);
    }
}

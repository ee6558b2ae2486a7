//! UTXO set synchronization for one party
//!
//! Decides when a fetch is due and whether its result is published. The
//! published set follows the head's visibility:
//!
//! | transition                    | action                              |
//! |-------------------------------|-------------------------------------|
//! | into visible-open             | fetch now, start steady polling     |
//! | into `Closed`                 | fetch once, stop polling            |
//! | visible-open to not `Closed`  | discard the set                     |
//! | out of `Closed`               | keep the set                        |
//! | `Open` <-> `SnapshotConfirmed`| nothing                             |

use super::guard::{FetchGuard, FetchTicket};
use super::reconciler::Transition;
use crate::config::PanelConfig;
use crate::error::NodeResult;
use crate::events::HeadTag;
use crate::metrics;
use crate::state::UtxoSet;

use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Hidden,
    Open,
    Closed,
}

impl Visibility {
    pub fn of(tag: Option<HeadTag>) -> Self {
        match tag {
            Some(t) if t.is_visible_open() => Visibility::Open,
            Some(HeadTag::Closed) => Visibility::Closed,
            _ => Visibility::Hidden,
        }
    }
}

/// True when the transition moves the head into visible-open
pub fn enters_visible_open(transition: &Transition) -> bool {
    Visibility::of(transition.previous) != Visibility::Open
        && Visibility::of(transition.current) == Visibility::Open
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Idle,
    Fetch(FetchTicket),
    /// The published set was dropped
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Published(UtxoSet),
    /// Same content as the published set
    Unchanged,
    /// Superseded or invalidated; the result was dropped
    Stale,
    Failed(crate::error::NodeError),
}

#[derive(Debug)]
pub struct UtxoSynchronizer {
    party: String,
    guard: FetchGuard,
    visibility: Visibility,
    published: Option<UtxoSet>,
    burst_count: u32,
    burst_remaining: u32,
    closed_fetch_pending: bool,
}

impl UtxoSynchronizer {
    pub fn new(party: &str, config: &PanelConfig) -> Self {
        Self {
            party: party.to_string(),
            guard: FetchGuard::new(config.fetch_debounce(), config.stuck_fetch_timeout()),
            visibility: Visibility::Hidden,
            published: None,
            burst_count: config.burst_count,
            burst_remaining: 0,
            closed_fetch_pending: false,
        }
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn published(&self) -> Option<&UtxoSet> {
        self.published.as_ref()
    }

    pub fn burst_active(&self) -> bool {
        self.burst_remaining > 0
    }

    pub fn on_transition(&mut self, transition: Transition, now: Instant) -> SyncAction {
        let from = Visibility::of(transition.previous);
        let to = Visibility::of(transition.current);
        self.visibility = to;

        match (from, to) {
            (Visibility::Open, Visibility::Open) | (Visibility::Closed, Visibility::Closed) => {
                SyncAction::Idle
            }
            (_, Visibility::Open) => {
                self.closed_fetch_pending = false;
                self.begin(now).map_or(SyncAction::Idle, SyncAction::Fetch)
            }
            (_, Visibility::Closed) => {
                self.burst_remaining = 0;
                match self.begin(now) {
                    Some(ticket) => SyncAction::Fetch(ticket),
                    None => {
                        self.closed_fetch_pending = true;
                        SyncAction::Idle
                    }
                }
            }
            (Visibility::Open, Visibility::Hidden) => {
                self.burst_remaining = 0;
                self.guard.invalidate();
                debug!("Head for {} left open, discarding UTXO set", self.party);
                if self.published.take().is_some() {
                    SyncAction::Discarded
                } else {
                    SyncAction::Idle
                }
            }
            (_, Visibility::Hidden) => {
                self.closed_fetch_pending = false;
                SyncAction::Idle
            }
        }
    }

    /// Steady poll tick. Skipped while a refresh burst is running.
    pub fn on_steady_tick(&mut self, now: Instant) -> Option<FetchTicket> {
        match self.visibility {
            Visibility::Open if !self.burst_active() => self.begin(now),
            Visibility::Closed if self.closed_fetch_pending => {
                let ticket = self.begin(now)?;
                self.closed_fetch_pending = false;
                Some(ticket)
            }
            _ => None,
        }
    }

    /// Start a refresh burst after a transfer: one fetch now and one per
    /// burst tick. Ignored unless the head is visible-open.
    pub fn start_burst(&mut self, now: Instant) -> Option<FetchTicket> {
        if self.visibility != Visibility::Open {
            debug!("Ignoring refresh burst for {}: head not open", self.party);
            return None;
        }
        self.burst_remaining = self.burst_count;
        self.begin(now)
    }

    pub fn on_burst_tick(&mut self, now: Instant) -> Option<FetchTicket> {
        if self.burst_remaining == 0 {
            return None;
        }
        self.burst_remaining -= 1;
        if self.visibility == Visibility::Open {
            self.begin(now)
        } else {
            None
        }
    }

    pub fn complete(&mut self, ticket: &FetchTicket, result: NodeResult<UtxoSet>) -> FetchOutcome {
        if !self.guard.complete(ticket) {
            return FetchOutcome::Stale;
        }

        let set = match result {
            Ok(set) => set,
            Err(e) => return FetchOutcome::Failed(e),
        };

        if self.visibility == Visibility::Hidden {
            return FetchOutcome::Stale;
        }

        if matches!(&self.published, Some(current) if current.same_content(&set)) {
            return FetchOutcome::Unchanged;
        }

        self.published = Some(set.clone());
        FetchOutcome::Published(set)
    }

    fn begin(&mut self, now: Instant) -> Option<FetchTicket> {
        match self.guard.try_begin(now) {
            Some(ticket) => {
                if ticket.replaced_stuck {
                    warn!("UTXO fetch for {} stuck, clearing in-flight guard", self.party);
                    metrics::record_fetch_force_cleared(&self.party);
                }
                Some(ticket)
            }
            None => {
                debug!("UTXO fetch for {} suppressed: fetch in flight", self.party);
                metrics::record_fetch_suppressed(&self.party);
                None
            }
        }
    }
}

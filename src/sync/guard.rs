//! In-flight guard for UTXO fetches
//!
//! Requests arriving within the debounce window of an outstanding fetch are
//! suppressed. Once the outstanding fetch is older than the debounce window a
//! duplicate is allowed, and past the stuck timeout the guard is force-cleared,
//! so a fetch that never completes cannot stall refreshes.
//!
//! Every fetch carries a monotonically increasing ticket id. A completion is
//! applied only if no newer fetch has completed before it, and never after
//! the guard was invalidated.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub id: u64,
    pub started_at: Instant,
    /// An outstanding fetch older than the stuck timeout was abandoned
    pub replaced_stuck: bool,
}

#[derive(Debug)]
pub struct FetchGuard {
    debounce: Duration,
    stuck_timeout: Duration,
    next_id: u64,
    /// Newest outstanding fetch, if any
    in_flight: Option<(u64, Instant)>,
    /// Completions with an id at or below this are discarded
    applied_through: u64,
}

impl FetchGuard {
    pub fn new(debounce: Duration, stuck_timeout: Duration) -> Self {
        Self {
            debounce,
            stuck_timeout,
            next_id: 0,
            in_flight: None,
            applied_through: 0,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Ask to start a fetch. `None` means the request is suppressed.
    pub fn try_begin(&mut self, now: Instant) -> Option<FetchTicket> {
        let mut replaced_stuck = false;

        if let Some((_, started_at)) = self.in_flight {
            let age = now.saturating_duration_since(started_at);
            if age >= self.stuck_timeout {
                replaced_stuck = true;
            } else if age < self.debounce {
                return None;
            }
        }

        self.next_id += 1;
        self.in_flight = Some((self.next_id, now));
        Some(FetchTicket {
            id: self.next_id,
            started_at: now,
            replaced_stuck,
        })
    }

    /// Settle a fetch. Returns `false` if its result must be discarded.
    pub fn complete(&mut self, ticket: &FetchTicket) -> bool {
        if matches!(self.in_flight, Some((id, _)) if id == ticket.id) {
            self.in_flight = None;
        }

        if ticket.id <= self.applied_through {
            return false;
        }
        self.applied_through = ticket.id;
        true
    }

    /// Discard every outstanding fetch
    pub fn invalidate(&mut self) {
        self.in_flight = None;
        self.applied_through = self.next_id;
    }
}

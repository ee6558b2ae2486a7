//! Poll/push status arbitration
//!
//! Two sources report a party's head status: the periodic poll and the push
//! channel. The poll is ground truth and always wins. A push is accepted
//! unless a fresh poll says the head is `Open` and the push disagrees; a
//! late push from before the head opened would otherwise flip the display
//! back to an earlier state.

use crate::events::{HeadStatus, HeadTag};

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    Poll,
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

/// Decide whether an incoming status may replace the canonical one.
///
/// `poll_age` is the time since the last completed poll, `None` if no poll
/// has completed yet.
pub fn arbitrate(
    canonical: Option<&HeadStatus>,
    incoming: Option<&HeadStatus>,
    source: StatusSource,
    poll_age: Option<Duration>,
    stale_window: Duration,
) -> Verdict {
    if source == StatusSource::Poll {
        return Verdict::Accept;
    }

    let canonical_tag = canonical.map(|s| s.tag);
    let incoming_tag = incoming.map(|s| s.tag);
    if canonical_tag == incoming_tag {
        return Verdict::Accept;
    }

    let poll_is_fresh = matches!(poll_age, Some(age) if age < stale_window);
    if poll_is_fresh && canonical_tag == Some(HeadTag::Open) {
        return Verdict::Reject;
    }

    Verdict::Accept
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: Option<HeadTag>,
    pub current: Option<HeadTag>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    /// Identical to the canonical status; nothing to publish
    Unchanged,
    Rejected,
    Updated {
        status: Option<HeadStatus>,
        /// Set only when the tag changed
        transition: Option<Transition>,
    },
}

/// Canonical status holder for one party. `None` is the disconnected state.
#[derive(Debug)]
pub struct Reconciler {
    canonical: Option<HeadStatus>,
    last_poll_at: Option<Instant>,
    stale_window: Duration,
}

impl Reconciler {
    pub fn new(stale_window: Duration) -> Self {
        Self {
            canonical: None,
            last_poll_at: None,
            stale_window,
        }
    }

    pub fn canonical(&self) -> Option<&HeadStatus> {
        self.canonical.as_ref()
    }

    pub fn tag(&self) -> Option<HeadTag> {
        self.canonical.as_ref().map(|s| s.tag)
    }

    pub fn apply_poll(&mut self, status: Option<HeadStatus>, now: Instant) -> Reconciled {
        self.last_poll_at = Some(now);
        self.replace(status)
    }

    pub fn apply_push(&mut self, status: HeadStatus, now: Instant) -> Reconciled {
        let poll_age = self.last_poll_at.map(|at| now.saturating_duration_since(at));
        match arbitrate(
            self.canonical.as_ref(),
            Some(&status),
            StatusSource::Push,
            poll_age,
            self.stale_window,
        ) {
            Verdict::Accept => self.replace(Some(status)),
            Verdict::Reject => Reconciled::Rejected,
        }
    }

    fn replace(&mut self, status: Option<HeadStatus>) -> Reconciled {
        if self.canonical == status {
            return Reconciled::Unchanged;
        }

        let previous = self.tag();
        let current = status.as_ref().map(|s| s.tag);
        self.canonical = status.clone();

        Reconciled::Updated {
            status,
            transition: (previous != current).then_some(Transition { previous, current }),
        }
    }
}

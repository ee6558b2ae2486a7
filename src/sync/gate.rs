//! Head-wide action gating

use crate::events::{HeadStatus, HeadTag};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which head-wide actions a viewer may start right now
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionAvailability {
    pub init: bool,
    pub close: bool,
    pub fanout: bool,
}

/// Derive action availability from every tracked party's canonical status.
///
/// An unreachable party (`None`) blocks every action. With no parties at all
/// nothing is available. Fanout needs every party closed and the latest known
/// contestation deadline behind `now`; without any known deadline it stays
/// disabled.
pub fn action_availability<'a, I>(statuses: I, now: DateTime<Utc>) -> ActionAvailability
where
    I: IntoIterator<Item = Option<&'a HeadStatus>>,
{
    let statuses: Vec<Option<&HeadStatus>> = statuses.into_iter().collect();
    if statuses.is_empty() {
        return ActionAvailability::default();
    }

    let all_tagged = |tag: HeadTag| statuses.iter().all(|s| matches!(s, Some(s) if s.tag == tag));

    let init = all_tagged(HeadTag::Idle);
    let close = all_tagged(HeadTag::Open);

    let fanout = all_tagged(HeadTag::Closed)
        && statuses
            .iter()
            .filter_map(|s| s.and_then(|s| s.contestation_deadline))
            .max()
            .map(|deadline| deadline <= now)
            .unwrap_or(false);

    ActionAvailability {
        init,
        close,
        fanout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_no_parties_disables_everything() {
        let availability = action_availability(std::iter::empty(), Utc::now());
        assert_eq!(availability, ActionAvailability::default());
    }

    #[test]
    fn test_init_requires_every_party_idle() {
        let idle = HeadStatus::new(HeadTag::Idle);
        let open = HeadStatus::new(HeadTag::Open);
        let now = Utc::now();

        assert!(action_availability([Some(&idle), Some(&idle)], now).init);
        assert!(!action_availability([Some(&idle), Some(&open)], now).init);
        assert!(!action_availability([Some(&idle), None], now).init);
    }

    #[test]
    fn test_close_requires_every_party_open() {
        let open = HeadStatus::new(HeadTag::Open);
        let confirmed = HeadStatus::new(HeadTag::SnapshotConfirmed);
        let now = Utc::now();

        let availability = action_availability([Some(&open), Some(&open)], now);
        assert!(availability.close);
        assert!(!availability.init);
        assert!(!availability.fanout);

        assert!(!action_availability([Some(&open), Some(&confirmed)], now).close);
    }

    #[test]
    fn test_fanout_waits_for_latest_deadline() {
        let now = Utc::now();
        let early = HeadStatus::new(HeadTag::Closed).with_deadline(now - Duration::seconds(30));
        let late = HeadStatus::new(HeadTag::Closed).with_deadline(now + Duration::seconds(30));

        assert!(!action_availability([Some(&early), Some(&late)], now).fanout);
        assert!(action_availability([Some(&early), Some(&late)], now + Duration::seconds(31)).fanout);
    }

    #[test]
    fn test_fanout_without_deadline_is_disabled() {
        let closed = HeadStatus::new(HeadTag::Closed);
        assert!(!action_availability([Some(&closed)], Utc::now()).fanout);
    }

    #[test]
    fn test_fanout_with_partial_deadlines_uses_known_ones() {
        let now = Utc::now();
        let with_deadline =
            HeadStatus::new(HeadTag::Closed).with_deadline(now - Duration::seconds(1));
        let without = HeadStatus::new(HeadTag::Closed);
        assert!(action_availability([Some(&with_deadline), Some(&without)], now).fanout);
    }
}

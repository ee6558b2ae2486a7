//! Periodic status query with a busy flag
//!
//! At most one status query per party is outstanding. A tick that lands while
//! the previous query is still running is dropped, not queued.

use super::HeadNode;
use crate::error::NodeError;
use crate::events::HeadStatus;

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Result of one status query
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// `None` means the node could not be reached
    Status(Option<HeadStatus>),
    /// The node answered with something other than a status
    Failed(NodeError),
}

#[derive(Clone)]
pub struct StatusPoller {
    party: String,
    node: Arc<dyn HeadNode>,
    busy: Arc<AtomicBool>,
}

/// Clears the busy flag when the query finishes or is dropped
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl StatusPoller {
    pub fn new(party: &str, node: Arc<dyn HeadNode>) -> Self {
        Self {
            party: party.to_string(),
            node,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Start a query unless one is already outstanding
    pub fn try_poll(&self) -> Option<BoxFuture<'static, PollOutcome>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Status poll for {} skipped: previous query still running", self.party);
            return None;
        }

        let guard = BusyGuard(self.busy.clone());
        let node = self.node.clone();
        Some(
            async move {
                let _guard = guard;
                match node.query_status().await {
                    Ok(status) => PollOutcome::Status(status),
                    Err(e) if e.is_connectivity() => PollOutcome::Status(None),
                    Err(e) => PollOutcome::Failed(e),
                }
            }
            .boxed(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::HeadTag;
    use crate::node::MockHeadNode;

    #[tokio::test]
    async fn test_busy_poll_is_dropped() {
        let mut node = MockHeadNode::new();
        node.expect_query_status()
            .times(1)
            .returning(|| Ok(Some(HeadStatus::new(HeadTag::Idle))));
        let poller = StatusPoller::new("alice", Arc::new(node));

        let first = poller.try_poll().expect("first poll starts");
        assert!(poller.is_busy());
        assert!(poller.try_poll().is_none());

        assert_eq!(
            first.await,
            PollOutcome::Status(Some(HeadStatus::new(HeadTag::Idle)))
        );
        assert!(!poller.is_busy());
    }

    #[tokio::test]
    async fn test_connectivity_failure_reads_as_disconnected() {
        let mut node = MockHeadNode::new();
        node.expect_query_status()
            .returning(|| Err(NodeError::Unreachable("connection refused".into())));
        let poller = StatusPoller::new("alice", Arc::new(node));

        let outcome = poller.try_poll().unwrap().await;
        assert_eq!(outcome, PollOutcome::Status(None));
    }

    #[tokio::test]
    async fn test_malformed_status_is_a_failure() {
        let mut node = MockHeadNode::new();
        node.expect_query_status()
            .returning(|| Err(NodeError::Malformed("not a status".into())));
        let poller = StatusPoller::new("alice", Arc::new(node));

        let outcome = poller.try_poll().unwrap().await;
        assert!(matches!(outcome, PollOutcome::Failed(NodeError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_dropped_query_releases_flag() {
        let mut node = MockHeadNode::new();
        node.expect_query_status().returning(|| Ok(None));
        let poller = StatusPoller::new("alice", Arc::new(node));

        let pending = poller.try_poll().unwrap();
        drop(pending);
        assert!(!poller.is_busy());
    }
}

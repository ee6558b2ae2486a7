//! Push-event subscriber
//!
//! Keeps the push channel to one party's node open and forwards every
//! normalized status to the party worker. Reconnects with exponential backoff
//! and gives up after a bounded number of consecutive failures; polling keeps
//! the party correct without it.

use super::HeadNode;
use crate::config::SubscriberConfig;
use crate::events::HeadStatus;
use crate::metrics;

use futures::StreamExt;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub struct EventSubscriber {
    party: String,
    node: Arc<dyn HeadNode>,
    config: SubscriberConfig,
}

impl EventSubscriber {
    pub fn new(party: &str, node: Arc<dyn HeadNode>, config: SubscriberConfig) -> Self {
        Self {
            party: party.to_string(),
            node,
            config,
        }
    }

    /// Run until the worker goes away or reconnects are exhausted
    pub async fn run(self, push_tx: mpsc::Sender<HeadStatus>) {
        let mut failures: u32 = 0;

        loop {
            match self.node.subscribe_events().await {
                Ok(mut stream) => {
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(status) => {
                                // Only a channel that delivered something counts as healthy
                                failures = 0;
                                if push_tx.send(status).await.is_err() {
                                    debug!("Worker for {} gone, closing push channel", self.party);
                                    return;
                                }
                            }
                            Err(e) => {
                                warn!(reason = %e, party = %self.party, "Push channel dropped");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    debug!(reason = %e, party = %self.party, "Push channel connect failed");
                }
            }

            if push_tx.is_closed() {
                return;
            }

            failures += 1;
            if failures > self.config.max_reconnect_attempts {
                warn!(
                    "Giving up on push channel for {} after {} attempts, relying on polling",
                    self.party, failures
                );
                return;
            }

            let delay = backoff_delay(failures, &self.config);
            info!(
                "Reconnecting push channel for {} in {:?} (attempt {})",
                self.party, delay, failures
            );
            metrics::record_subscriber_reconnect(&self.party);
            sleep(delay).await;
        }
    }
}

/// Delay before reconnect attempt `attempt` (1-based): doubling from the
/// initial backoff, capped, plus up to 10% jitter
pub fn backoff_delay(attempt: u32, config: &SubscriberConfig) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let base_ms = config
        .initial_backoff_ms
        .saturating_mul(1u64 << exponent)
        .min(config.max_backoff_ms);
    let jitter_ms = rand::thread_rng().gen_range(0..=base_ms / 10);
    Duration::from_millis(base_ms + jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;
    use crate::events::HeadTag;
    use crate::node::MockHeadNode;

    fn config(max_reconnect_attempts: u32) -> SubscriberConfig {
        SubscriberConfig {
            max_reconnect_attempts,
            initial_backoff_ms: 500,
            max_backoff_ms: 4_000,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = config(10);
        let first = backoff_delay(1, &config);
        assert!(first >= Duration::from_millis(500) && first <= Duration::from_millis(550));

        let third = backoff_delay(3, &config);
        assert!(third >= Duration::from_millis(2_000) && third <= Duration::from_millis(2_200));

        let capped = backoff_delay(30, &config);
        assert!(capped >= Duration::from_millis(4_000) && capped <= Duration::from_millis(4_400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_are_bounded() {
        let mut node = MockHeadNode::new();
        node.expect_subscribe_events()
            .times(3)
            .returning(|| Err(NodeError::Unreachable("refused".into())));

        let (tx, _rx) = mpsc::channel(8);
        EventSubscriber::new("alice", Arc::new(node), config(2))
            .run(tx)
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_streams_count_as_failures() {
        let mut node = MockHeadNode::new();
        node.expect_subscribe_events()
            .times(3)
            .returning(|| Ok(futures::stream::empty().boxed()));

        let (tx, _rx) = mpsc::channel(8);
        let started = tokio::time::Instant::now();
        let finished = tokio::time::timeout(
            Duration::from_secs(600),
            EventSubscriber::new("alice", Arc::new(node), config(2)).run(tx),
        )
        .await;

        assert!(finished.is_ok());
        // Backoff grows between attempts: 500ms then 1s, plus jitter
        assert!(started.elapsed() >= Duration::from_millis(1_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivered_status_resets_failures() {
        let mut node = MockHeadNode::new();
        let mut seq = mockall::Sequence::new();
        node.expect_subscribe_events()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(futures::stream::empty().boxed()));
        node.expect_subscribe_events()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| {
                Ok(futures::stream::iter(vec![Ok(HeadStatus::new(HeadTag::Open))]).boxed())
            });
        node.expect_subscribe_events()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(NodeError::Unreachable("refused".into())));

        let (tx, mut rx) = mpsc::channel(8);
        EventSubscriber::new("alice", Arc::new(node), config(1))
            .run(tx)
            .await;

        assert_eq!(rx.recv().await.unwrap().tag, HeadTag::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_statuses_are_forwarded() {
        let mut node = MockHeadNode::new();
        node.expect_subscribe_events().times(1).returning(|| {
            let items = vec![
                Ok(HeadStatus::new(HeadTag::Initializing)),
                Ok(HeadStatus::new(HeadTag::Open)),
            ];
            Ok(futures::stream::iter(items).boxed())
        });

        let (tx, mut rx) = mpsc::channel(8);
        EventSubscriber::new("alice", Arc::new(node), config(0))
            .run(tx)
            .await;

        assert_eq!(rx.recv().await.unwrap().tag, HeadTag::Initializing);
        assert_eq!(rx.recv().await.unwrap().tag, HeadTag::Open);
        assert!(rx.recv().await.is_none());
    }
}

//! Commit flow with a single delayed retry
//!
//! Right after a head starts initializing, the node may reject commits with a
//! script error until its on-chain state settles. Such a rejection is retried
//! exactly once after a fixed delay. Any other failure, and any failure of the
//! retry, is final.

use crate::error::{ErrorClass, PanelError, PanelResult};
use crate::metrics;
use crate::node::{HeadNode, TxId};
use crate::state::{
    ErrorBoard, OperationKind, TransactionKind, TransactionLog, TransactionLogEntry,
    TransactionStatus, UtxoRef,
};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

pub struct CommitFlow {
    log: Arc<TransactionLog>,
    errors: Arc<ErrorBoard>,
    retry_delay: Duration,
}

impl CommitFlow {
    pub fn new(log: Arc<TransactionLog>, errors: Arc<ErrorBoard>, retry_delay: Duration) -> Self {
        Self {
            log,
            errors,
            retry_delay,
        }
    }

    pub async fn submit(
        &self,
        party: &str,
        node: &dyn HeadNode,
        utxo_ref: UtxoRef,
    ) -> PanelResult<TxId> {
        self.errors.dismiss(party, OperationKind::Commit);

        let entry =
            TransactionLogEntry::submitted(TransactionKind::Commit, party, party, utxo_ref.clone());
        let entry_id = self.log.append(entry).await;
        info!("Submitting commit of {} for {}", utxo_ref, party);

        let result = match node.submit_commit(&utxo_ref).await {
            Err(e) if e.class() == ErrorClass::ScriptNotReady => {
                info!(
                    "Commit for {} not accepted yet, retrying in {:?}",
                    party, self.retry_delay
                );
                metrics::record_submission("commit", "retried");
                self.log
                    .update(entry_id, TransactionStatus::Pending, None, None)
                    .await;
                sleep(self.retry_delay).await;
                self.log
                    .update(entry_id, TransactionStatus::Submitted, None, None)
                    .await;
                node.submit_commit(&utxo_ref).await
            }
            other => other,
        };

        match result {
            Ok(tx_id) => {
                metrics::record_submission("commit", "accepted");
                info!("Commit {} accepted for {}", tx_id, party);
                self.log
                    .update(
                        entry_id,
                        TransactionStatus::Success,
                        Some(tx_id.to_string()),
                        None,
                    )
                    .await;
                Ok(tx_id)
            }
            Err(e) => {
                metrics::record_submission("commit", "failed");
                warn!(reason = %e, party = %party, "Commit failed");
                let record = self.errors.raise(party, OperationKind::Commit, e.raw_message());
                self.log
                    .update(entry_id, TransactionStatus::Error, None, Some(record.message))
                    .await;
                Err(PanelError::Node {
                    party: party.to_string(),
                    source: e,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;
    use crate::events::PanelEvent;
    use crate::node::MockHeadNode;
    use mockall::Sequence;
    use tokio::sync::broadcast;
    use tokio::time::Instant;

    const SCRIPT_ERROR: &str = "ScriptFailedInWallet: redeemer evaluation failed";

    fn flow() -> (CommitFlow, Arc<TransactionLog>, Arc<ErrorBoard>) {
        let (event_tx, _) = broadcast::channel::<PanelEvent>(64);
        let log = Arc::new(TransactionLog::new(event_tx.clone()));
        let errors = Arc::new(ErrorBoard::new(event_tx));
        let flow = CommitFlow::new(log.clone(), errors.clone(), Duration::from_secs(3));
        (flow, log, errors)
    }

    #[tokio::test(start_paused = true)]
    async fn test_script_error_retries_once_after_delay() {
        let mut node = MockHeadNode::new();
        let mut seq = Sequence::new();
        node.expect_submit_commit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(NodeError::Rejected(SCRIPT_ERROR.into())));
        node.expect_submit_commit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(TxId("commit-1".to_string())));

        let (flow, log, errors) = flow();
        let started = Instant::now();
        let tx_id = flow
            .submit("alice", &node, "aa#0".parse().unwrap())
            .await
            .unwrap();

        assert_eq!(tx_id, TxId("commit-1".to_string()));
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(log.entries().await[0].status, TransactionStatus::Success);
        assert!(errors.get("alice", OperationKind::Commit).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_script_error_is_terminal() {
        let mut node = MockHeadNode::new();
        node.expect_submit_commit()
            .times(2)
            .returning(|_| Err(NodeError::Rejected(SCRIPT_ERROR.into())));

        let (flow, log, errors) = flow();
        let err = flow
            .submit("alice", &node, "aa#0".parse().unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, PanelError::Node { .. }));
        assert_eq!(log.entries().await[0].status, TransactionStatus::Error);
        let record = errors.get("alice", OperationKind::Commit).unwrap();
        assert_eq!(record.class, ErrorClass::ScriptNotReady);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let mut node = MockHeadNode::new();
        node.expect_submit_commit()
            .times(1)
            .returning(|_| Err(NodeError::Rejected("NotEnoughFunds for fee".into())));

        let (flow, log, errors) = flow();
        let started = Instant::now();
        flow.submit("alice", &node, "aa#0".parse().unwrap())
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(log.entries().await[0].status, TransactionStatus::Error);
        assert_eq!(
            errors.get("alice", OperationKind::Commit).unwrap().class,
            ErrorClass::InsufficientFunds
        );
    }
}

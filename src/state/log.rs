//! In-memory transaction log
//!
//! Records every transfer and commit the panel submits. Entries move forward
//! through [`TransactionStatus`] and are never resurrected once terminal.
//! Every append and status change is announced on the panel event channel.

use crate::events::PanelEvent;
use crate::state::UtxoRef;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_ENTRIES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Submitted,
    /// Waiting on an automatic retry
    Pending,
    /// Accepted by the node, not yet reflected in a snapshot
    Confirmed,
    Success,
    Error,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Success | TransactionStatus::Error)
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match (self, next) {
            (Submitted, Pending | Confirmed | Success | Error) => true,
            (Pending, Submitted | Confirmed | Success | Error) => true,
            (Confirmed, Success | Error) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Transfer,
    Commit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: TransactionKind,
    pub from_party: String,
    pub to_party: String,
    pub utxo_ref: UtxoRef,
    pub status: TransactionStatus,
    pub tx_id: Option<String>,
    pub error: Option<String>,
}

impl TransactionLogEntry {
    pub fn submitted(
        kind: TransactionKind,
        from_party: &str,
        to_party: &str,
        utxo_ref: UtxoRef,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            from_party: from_party.to_string(),
            to_party: to_party.to_string(),
            utxo_ref,
            status: TransactionStatus::Submitted,
            tx_id: None,
            error: None,
        }
    }
}

/// Append-only log of submitted transactions
pub struct TransactionLog {
    entries: RwLock<VecDeque<TransactionLogEntry>>,
    event_tx: broadcast::Sender<PanelEvent>,
}

impl TransactionLog {
    pub fn new(event_tx: broadcast::Sender<PanelEvent>) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            event_tx,
        }
    }

    /// Record a new entry and return its id
    pub async fn append(&self, entry: TransactionLogEntry) -> Uuid {
        let id = entry.id;
        let mut entries = self.entries.write().await;
        if entries.len() >= MAX_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
        drop(entries);

        debug!("Transaction {} logged for {}", id, entry.from_party);
        let _ = self.event_tx.send(PanelEvent::TransactionLogged(entry));
        id
    }

    /// Move an entry forward. Illegal transitions are refused.
    pub async fn update(
        &self,
        id: Uuid,
        status: TransactionStatus,
        tx_id: Option<String>,
        error: Option<String>,
    ) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.iter_mut().find(|e| e.id == id) else {
            return false;
        };

        if !entry.status.can_transition_to(status) {
            warn!(
                "Refusing transaction {} transition {:?} -> {:?}",
                id, entry.status, status
            );
            return false;
        }

        entry.status = status;
        entry.timestamp = Utc::now();
        if tx_id.is_some() {
            entry.tx_id = tx_id;
        }
        entry.error = error;
        let snapshot = entry.clone();
        drop(entries);

        let _ = self.event_tx.send(PanelEvent::TransactionLogged(snapshot));
        true
    }

    pub async fn get(&self, id: Uuid) -> Option<TransactionLogEntry> {
        self.entries.read().await.iter().find(|e| e.id == id).cloned()
    }

    /// All entries, oldest first
    pub async fn entries(&self) -> Vec<TransactionLogEntry> {
        self.entries.read().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> (TransactionLog, broadcast::Receiver<PanelEvent>) {
        let (tx, rx) = broadcast::channel(16);
        (TransactionLog::new(tx), rx)
    }

    #[test]
    fn test_status_transitions() {
        use TransactionStatus::*;
        assert!(Submitted.can_transition_to(Success));
        assert!(Submitted.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Error));
        assert!(Confirmed.can_transition_to(Success));
        assert!(!Success.can_transition_to(Submitted));
        assert!(!Error.can_transition_to(Pending));
        assert!(!Confirmed.can_transition_to(Pending));
    }

    #[tokio::test]
    async fn test_terminal_entries_are_not_resurrected() {
        let (log, mut rx) = log();
        let entry = TransactionLogEntry::submitted(
            TransactionKind::Transfer,
            "alice",
            "bob",
            "aa#0".parse().unwrap(),
        );
        let id = log.append(entry).await;
        assert!(matches!(rx.recv().await, Ok(PanelEvent::TransactionLogged(_))));

        assert!(log
            .update(id, TransactionStatus::Error, None, Some("boom".into()))
            .await);
        assert!(!log.update(id, TransactionStatus::Success, None, None).await);

        let stored = log.get(id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Error);
        assert_eq!(stored.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_log_is_bounded() {
        let (log, _rx) = log();
        for i in 0..(MAX_ENTRIES + 5) {
            let entry = TransactionLogEntry::submitted(
                TransactionKind::Commit,
                "alice",
                "alice",
                format!("aa#{}", i).parse().unwrap(),
            );
            log.append(entry).await;
        }
        let entries = log.entries().await;
        assert_eq!(entries.len(), MAX_ENTRIES);
        assert_eq!(entries[0].utxo_ref.as_str(), "aa#5");
    }
}

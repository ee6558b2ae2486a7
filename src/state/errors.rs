//! Per-party error board
//!
//! Holds at most one error per `(party, operation kind)`. An error stays until
//! the viewer dismisses it, a newer error of the same kind replaces it, or the
//! next success of the same kind clears it. Successes of other kinds leave it
//! alone.

use crate::error::{ErrorClass, PanelError};
use crate::events::PanelEvent;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    StatusQuery,
    UtxoFetch,
    Transfer,
    Commit,
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::StatusQuery => "status_query",
            OperationKind::UtxoFetch => "utxo_fetch",
            OperationKind::Transfer => "transfer",
            OperationKind::Commit => "commit",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperationKind {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status_query" => Ok(OperationKind::StatusQuery),
            "utxo_fetch" => Ok(OperationKind::UtxoFetch),
            "transfer" => Ok(OperationKind::Transfer),
            "commit" => Ok(OperationKind::Commit),
            other => Err(PanelError::InvalidRequest(format!(
                "Unknown operation kind {:?}",
                other
            ))),
        }
    }
}

/// An error as shown on a party's card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyErrorRecord {
    pub kind: OperationKind,
    pub class: ErrorClass,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

pub struct ErrorBoard {
    errors: DashMap<(String, OperationKind), PartyErrorRecord>,
    event_tx: broadcast::Sender<PanelEvent>,
}

impl ErrorBoard {
    pub fn new(event_tx: broadcast::Sender<PanelEvent>) -> Self {
        Self {
            errors: DashMap::new(),
            event_tx,
        }
    }

    /// Record an error from raw node text, replacing any earlier one of the same kind
    pub fn raise(&self, party: &str, kind: OperationKind, raw: &str) -> PartyErrorRecord {
        let class = ErrorClass::classify(raw);
        let record = PartyErrorRecord {
            kind,
            class,
            message: class.user_message(raw),
            raised_at: Utc::now(),
        };

        debug!("Error raised for {} ({}): {}", party, kind, record.message);
        self.errors
            .insert((party.to_string(), kind), record.clone());
        let _ = self.event_tx.send(PanelEvent::ErrorRaised {
            party: party.to_string(),
            error: record.clone(),
        });
        record
    }

    /// A success of `kind` clears the error of that same kind only
    pub fn clear_on_success(&self, party: &str, kind: OperationKind) {
        self.clear(party, kind);
    }

    /// Viewer dismissal
    pub fn dismiss(&self, party: &str, kind: OperationKind) -> bool {
        self.clear(party, kind)
    }

    fn clear(&self, party: &str, kind: OperationKind) -> bool {
        let removed = self.errors.remove(&(party.to_string(), kind)).is_some();
        if removed {
            let _ = self.event_tx.send(PanelEvent::ErrorCleared {
                party: party.to_string(),
                kind,
            });
        }
        removed
    }

    pub fn get(&self, party: &str, kind: OperationKind) -> Option<PartyErrorRecord> {
        self.errors
            .get(&(party.to_string(), kind))
            .map(|r| r.value().clone())
    }

    pub fn for_party(&self, party: &str) -> Vec<PartyErrorRecord> {
        let mut records: Vec<_> = self
            .errors
            .iter()
            .filter(|e| e.key().0 == party)
            .map(|e| e.value().clone())
            .collect();
        records.sort_by_key(|r| r.raised_at);
        records
    }

    /// Drop everything held for a party that is no longer tracked
    pub fn remove_party(&self, party: &str) {
        self.errors.retain(|(p, _), _| p != party);
    }
}

//! Head lifecycle types and node message normalization
//!
//! Nodes report head state in several shapes: greetings carrying a
//! `headStatus`, lifecycle messages such as `HeadIsOpen`, or a bare status
//! object whose fields may sit under a `contents` wrapper. Everything is
//! normalized here into a single [`HeadStatus`] so nothing downstream has to
//! probe for fields.

use crate::state::{OperationKind, PartyErrorRecord, TransactionLogEntry, UtxoRef, UtxoSet};
use crate::sync::ActionAvailability;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Discriminant of the head's lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeadTag {
    Idle,
    Initial,
    Initializing,
    Open,
    SnapshotConfirmed,
    Closed,
    Finalized,
}

impl HeadTag {
    /// `SnapshotConfirmed` counts as `Open` for every UTXO visibility decision
    pub fn is_visible_open(&self) -> bool {
        matches!(self, HeadTag::Open | HeadTag::SnapshotConfirmed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            HeadTag::Idle => "Idle",
            HeadTag::Initial => "Initial",
            HeadTag::Initializing => "Initializing",
            HeadTag::Open => "Open",
            HeadTag::SnapshotConfirmed => "SnapshotConfirmed",
            HeadTag::Closed => "Closed",
            HeadTag::Finalized => "Finalized",
        }
    }

    /// Parse a status name as reported by a status query or a greeting
    pub fn from_status_name(name: &str) -> Option<Self> {
        match name {
            "Idle" => Some(HeadTag::Idle),
            "Initial" => Some(HeadTag::Initial),
            "Initializing" => Some(HeadTag::Initializing),
            "Open" => Some(HeadTag::Open),
            "SnapshotConfirmed" => Some(HeadTag::SnapshotConfirmed),
            "Closed" | "FanoutPossible" => Some(HeadTag::Closed),
            "Finalized" | "Final" => Some(HeadTag::Finalized),
            _ => None,
        }
    }

    /// Parse a lifecycle message tag from the push channel
    pub fn from_message_tag(tag: &str) -> Option<Self> {
        match tag {
            "HeadIsInitializing" => Some(HeadTag::Initializing),
            "HeadIsOpen" => Some(HeadTag::Open),
            "SnapshotConfirmed" => Some(HeadTag::SnapshotConfirmed),
            "HeadIsClosed" | "HeadIsContested" | "ReadyToFanout" => Some(HeadTag::Closed),
            "HeadIsFinalized" => Some(HeadTag::Finalized),
            "HeadIsAborted" => Some(HeadTag::Idle),
            _ => None,
        }
    }
}

impl fmt::Display for HeadTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Canonical head state for one party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadStatus {
    pub tag: HeadTag,
    pub pending_commits: u32,
    pub committed_refs: BTreeSet<UtxoRef>,
    pub contestation_deadline: Option<DateTime<Utc>>,
}

impl HeadStatus {
    pub fn new(tag: HeadTag) -> Self {
        Self {
            tag,
            pending_commits: 0,
            committed_refs: BTreeSet::new(),
            contestation_deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.contestation_deadline = Some(deadline);
        self
    }

    pub fn with_pending_commits(mut self, pending: u32) -> Self {
        self.pending_commits = pending;
        self
    }

    /// Normalize any status-bearing node payload. Returns `None` for messages
    /// that say nothing about the head's lifecycle.
    pub fn from_node_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let tag = match obj.get("tag").and_then(Value::as_str) {
            Some("Greetings") => obj
                .get("headStatus")
                .and_then(Value::as_str)
                .and_then(HeadTag::from_status_name)?,
            Some(name) => {
                HeadTag::from_message_tag(name).or_else(|| HeadTag::from_status_name(name))?
            }
            None => match obj.get("headStatus").and_then(Value::as_str) {
                Some(name) => HeadTag::from_status_name(name)?,
                // Untagged wrapper: the status lives entirely under `contents`
                None => return obj.get("contents").and_then(Self::from_node_value),
            },
        };

        let body = match obj.get("contents") {
            Some(contents) if contents.is_object() => contents,
            _ => value,
        };

        Some(Self {
            tag,
            pending_commits: pending_commits(body),
            committed_refs: committed_refs(body),
            contestation_deadline: contestation_deadline(body),
        })
    }
}

fn pending_commits(body: &Value) -> u32 {
    match body.get("pendingCommits") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as u32,
        Some(Value::Array(parties)) => parties.len() as u32,
        _ => 0,
    }
}

fn committed_refs(body: &Value) -> BTreeSet<UtxoRef> {
    let parse = |s: &str| s.parse::<UtxoRef>().ok();
    match body.get("committed").or_else(|| body.get("committedRefs")) {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).filter_map(parse).collect(),
        // Committed UTXO maps are keyed by reference
        Some(Value::Object(map)) => map
            .iter()
            .flat_map(|(key, inner)| match inner {
                Value::Object(nested) if parse(key.as_str()).is_none() => {
                    nested.keys().filter_map(|k| parse(k.as_str())).collect::<Vec<_>>()
                }
                _ => parse(key.as_str()).into_iter().collect(),
            })
            .collect(),
        _ => BTreeSet::new(),
    }
}

fn contestation_deadline(body: &Value) -> Option<DateTime<Utc>> {
    body.get("contestationDeadline")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

/// Notifications the panel emits to the rest of the application
#[derive(Debug, Clone)]
pub enum PanelEvent {
    /// The party's tag changed. `None` means the node is unreachable.
    StatusTransition {
        party: String,
        previous: Option<HeadTag>,
        current: Option<HeadTag>,
    },
    /// Any accepted change to the canonical status, including same-tag updates
    StatusChanged {
        party: String,
        status: Option<HeadStatus>,
    },
    /// `None` means the set is unknown (discarded or never fetched)
    UtxoSetChanged {
        party: String,
        utxos: Option<UtxoSet>,
    },
    ActionsChanged(ActionAvailability),
    TransactionLogged(TransactionLogEntry),
    ErrorRaised {
        party: String,
        error: PartyErrorRecord,
    },
    ErrorCleared {
        party: String,
        kind: OperationKind,
    },
}

impl PanelEvent {
    /// Get event name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            PanelEvent::StatusTransition { .. } => "status_transition",
            PanelEvent::StatusChanged { .. } => "status_changed",
            PanelEvent::UtxoSetChanged { .. } => "utxo_set_changed",
            PanelEvent::ActionsChanged(_) => "actions_changed",
            PanelEvent::TransactionLogged(_) => "transaction_logged",
            PanelEvent::ErrorRaised { .. } => "error_raised",
            PanelEvent::ErrorCleared { .. } => "error_cleared",
        }
    }

    /// Party the event concerns, if any
    pub fn party(&self) -> Option<&str> {
        match self {
            PanelEvent::StatusTransition { party, .. }
            | PanelEvent::StatusChanged { party, .. }
            | PanelEvent::UtxoSetChanged { party, .. }
            | PanelEvent::ErrorRaised { party, .. }
            | PanelEvent::ErrorCleared { party, .. } => Some(party),
            PanelEvent::TransactionLogged(entry) => Some(&entry.from_party),
            PanelEvent::ActionsChanged(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_greetings_status() {
        let status = HeadStatus::from_node_value(&json!({
            "tag": "Greetings",
            "me": {"vkey": "abc"},
            "headStatus": "Open",
        }))
        .unwrap();
        assert_eq!(status, HeadStatus::new(HeadTag::Open));
    }

    #[test]
    fn test_lifecycle_messages() {
        let closed = HeadStatus::from_node_value(&json!({
            "tag": "HeadIsClosed",
            "snapshotNumber": 3,
            "contestationDeadline": "2026-01-01T00:00:00Z",
        }))
        .unwrap();
        assert_eq!(closed.tag, HeadTag::Closed);
        assert!(closed.contestation_deadline.is_some());

        let confirmed = HeadStatus::from_node_value(&json!({"tag": "SnapshotConfirmed"})).unwrap();
        assert_eq!(confirmed.tag, HeadTag::SnapshotConfirmed);
        assert!(confirmed.tag.is_visible_open());

        let aborted = HeadStatus::from_node_value(&json!({"tag": "HeadIsAborted"})).unwrap();
        assert_eq!(aborted.tag, HeadTag::Idle);
    }

    #[test]
    fn test_contents_wrapper_is_flattened() {
        let nested = HeadStatus::from_node_value(&json!({
            "tag": "Initial",
            "contents": {
                "pendingCommits": ["alice", "bob"],
                "committed": {"alice": {"aa11#0": {"address": "addr"}}},
            }
        }))
        .unwrap();
        assert_eq!(nested.tag, HeadTag::Initial);
        assert_eq!(nested.pending_commits, 2);
        assert!(nested.committed_refs.contains(&"aa11#0".parse().unwrap()));

        let untagged = HeadStatus::from_node_value(&json!({
            "contents": {"tag": "Open", "pendingCommits": 0}
        }))
        .unwrap();
        assert_eq!(untagged.tag, HeadTag::Open);
    }

    #[test]
    fn test_irrelevant_messages_are_ignored() {
        assert!(HeadStatus::from_node_value(&json!({"tag": "PeerConnected", "peer": "x"})).is_none());
        assert!(HeadStatus::from_node_value(&json!("Open")).is_none());
    }
}

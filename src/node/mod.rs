//! Node module - access to one party's protocol node
//!
//! This module provides:
//! - The [`HeadNode`] capability trait the engine consumes
//! - An HTTP + WebSocket implementation of it
//! - The status poller with its busy flag
//! - The push-event subscriber with reconnect backoff

pub mod http;
pub mod poller;
pub mod subscriber;

pub use http::HttpHeadNode;
pub use poller::{PollOutcome, StatusPoller};
pub use subscriber::EventSubscriber;

use crate::error::NodeResult;
use crate::events::HeadStatus;
use crate::state::{UtxoRef, UtxoSet};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Push channel: normalized statuses until the connection drops
pub type EventStream = BoxStream<'static, NodeResult<HeadStatus>>;

/// Transaction id returned by a successful submission
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(pub String);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capabilities of one party's node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HeadNode: Send + Sync {
    /// Current head status. `Ok(None)` means the node is unreachable.
    async fn query_status(&self) -> NodeResult<Option<HeadStatus>>;

    /// Open the push channel
    async fn subscribe_events(&self) -> NodeResult<EventStream>;

    async fn fetch_utxo_set(&self) -> NodeResult<UtxoSet>;

    async fn submit_transfer(
        &self,
        from: &UtxoRef,
        to_address: &str,
        amount: u64,
    ) -> NodeResult<TxId>;

    async fn submit_commit(&self, utxo_ref: &UtxoRef) -> NodeResult<TxId>;
}

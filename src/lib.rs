//! Headwatch - head-state synchronization for multi-party payment-channel panels
//!
//! Tracks each party's view of a shared head: its lifecycle status, merged
//! from polling and push events, and its UTXO set, kept fresh while the head
//! is open. Transfers and commits are submitted through the party's node and
//! recorded in a transaction log.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod node;
pub mod panel;
pub mod state;
pub mod sync;
pub mod tx;

pub use config::Settings;
pub use error::{NodeError, NodeResult, PanelError, PanelResult};
pub use events::{HeadStatus, HeadTag, PanelEvent};
pub use node::{HeadNode, HttpHeadNode, TxId};
pub use panel::Panel;

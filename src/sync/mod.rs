//! Synchronization engine
//!
//! Handles:
//! - Poll/push arbitration of each party's head status
//! - UTXO set fetching with an in-flight guard
//! - Head-wide action gating
//! - The per-party worker that drives all of it

pub mod gate;
pub mod guard;
pub mod reconciler;
pub mod synchronizer;
pub mod worker;

pub use gate::{action_availability, ActionAvailability};
pub use guard::{FetchGuard, FetchTicket};
pub use reconciler::{arbitrate, Reconciled, Reconciler, StatusSource, Transition, Verdict};
pub use synchronizer::{FetchOutcome, SyncAction, UtxoSynchronizer, Visibility};
pub use worker::{PartyCommand, PartyHandle, PartyView};

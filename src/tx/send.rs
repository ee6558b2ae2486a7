//! Transfer lifecycle
//!
//! A transfer moves through:
//! - validation against the sender's published UTXO set (no network call)
//! - marking the input as sending, which hides it from spendable listings
//! - submission to the sender's node
//! - a refresh burst on both parties once the node accepts it
//! - settlement when a fetched set no longer holds the input, or expiry
//!   when the head leaves the open state first
//!
//! A failed submission releases the input straight away.

use crate::error::{PanelError, PanelResult};
use crate::events::HeadTag;
use crate::metrics;
use crate::node::TxId;
use crate::state::{
    ErrorBoard, OperationKind, TransactionKind, TransactionLog, TransactionLogEntry,
    TransactionStatus, Utxo, UtxoRef, UtxoSet,
};
use crate::sync::{PartyHandle, PartyView, Visibility};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub from_party: String,
    pub to_party: String,
    pub utxo_ref: String,
    pub amount: u64,
}

/// An input currently being spent
#[derive(Debug, Clone)]
struct SendingMark {
    party: String,
    entry_id: Uuid,
    /// The node accepted the transfer
    accepted: bool,
}

pub struct SendLifecycle {
    sending: DashMap<UtxoRef, SendingMark>,
    log: Arc<TransactionLog>,
    errors: Arc<ErrorBoard>,
}

impl SendLifecycle {
    pub fn new(log: Arc<TransactionLog>, errors: Arc<ErrorBoard>) -> Self {
        Self {
            sending: DashMap::new(),
            log,
            errors,
        }
    }

    pub fn is_sending(&self, utxo_ref: &UtxoRef) -> bool {
        self.sending.contains_key(utxo_ref)
    }

    pub fn sending_for(&self, party: &str) -> HashSet<UtxoRef> {
        self.sending
            .iter()
            .filter(|m| m.value().party == party)
            .map(|m| m.key().clone())
            .collect()
    }

    /// Entries of `set` that are not being spent
    pub fn spendable(&self, party: &str, set: &UtxoSet) -> Vec<Utxo> {
        set.spendable(&self.sending_for(party))
    }

    /// Check a transfer without side effects
    pub fn validate(
        &self,
        from: &PartyHandle,
        to: &PartyHandle,
        utxo_ref: &UtxoRef,
        amount: u64,
    ) -> PanelResult<()> {
        if from.name() == to.name() {
            return Err(PanelError::InvalidRequest(
                "Sender and recipient must be different parties".to_string(),
            ));
        }
        if amount == 0 {
            return Err(PanelError::InvalidRequest(
                "Amount must be greater than zero".to_string(),
            ));
        }

        let not_spendable = || PanelError::UtxoNotSpendable {
            party: from.name().to_string(),
            utxo_ref: utxo_ref.to_string(),
        };

        let utxos = from.utxos().ok_or_else(not_spendable)?;
        let utxo = utxos.get(utxo_ref).ok_or_else(not_spendable)?;
        if self.is_sending(utxo_ref) {
            return Err(not_spendable());
        }

        let available = utxo.lovelace();
        if amount > available {
            return Err(PanelError::InvalidRequest(format!(
                "Amount {} exceeds the {} lovelace held by {}",
                amount, available, utxo_ref
            )));
        }

        Ok(())
    }

    pub async fn submit(
        &self,
        from: &PartyHandle,
        to: &PartyHandle,
        utxo_ref: UtxoRef,
        amount: u64,
    ) -> PanelResult<TxId> {
        self.validate(from, to, &utxo_ref, amount)?;

        let entry = TransactionLogEntry::submitted(
            TransactionKind::Transfer,
            from.name(),
            to.name(),
            utxo_ref.clone(),
        );
        let entry_id = entry.id;

        match self.sending.entry(utxo_ref.clone()) {
            Entry::Occupied(_) => {
                return Err(PanelError::UtxoNotSpendable {
                    party: from.name().to_string(),
                    utxo_ref: utxo_ref.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(SendingMark {
                    party: from.name().to_string(),
                    entry_id,
                    accepted: false,
                });
            }
        }

        self.errors.dismiss(from.name(), OperationKind::Transfer);
        self.log.append(entry).await;
        info!(
            "Submitting transfer of {} from {} to {} spending {}",
            amount,
            from.name(),
            to.name(),
            utxo_ref
        );

        let started = Instant::now();
        let result = from
            .node()
            .submit_transfer(&utxo_ref, to.address(), amount)
            .await;
        metrics::record_submission_latency("transfer", started.elapsed().as_secs_f64());

        match result {
            Ok(tx_id) => {
                metrics::record_submission("transfer", "accepted");
                info!("Transfer {} accepted by {}'s node", tx_id, from.name());
                self.log
                    .update(
                        entry_id,
                        TransactionStatus::Confirmed,
                        Some(tx_id.to_string()),
                        None,
                    )
                    .await;

                if let Some(mut mark) = self.sending.get_mut(&utxo_ref) {
                    mark.accepted = true;
                }
                let already_spent = from.utxos().map_or(false, |set| !set.contains(&utxo_ref));
                if already_spent {
                    self.settle(&utxo_ref).await;
                }

                for party in [from, to] {
                    if !party.request_burst() {
                        warn!("Worker for {} is gone, no refresh burst", party.name());
                    }
                }
                Ok(tx_id)
            }
            Err(e) => {
                metrics::record_submission("transfer", "failed");
                warn!(reason = %e, party = %from.name(), "Transfer failed");
                self.sending.remove(&utxo_ref);

                let record = self
                    .errors
                    .raise(from.name(), OperationKind::Transfer, e.raw_message());
                self.log
                    .update(entry_id, TransactionStatus::Error, None, Some(record.message))
                    .await;

                Err(PanelError::Node {
                    party: from.name().to_string(),
                    source: e,
                })
            }
        }
    }

    /// Settle accepted transfers against the sender's latest view.
    ///
    /// An input missing from a published set is spent. A reachable head that
    /// is no longer open or closed will never publish that set again, so its
    /// accepted transfers are expired as errors. A disconnected party keeps
    /// its marks until it reports again.
    pub async fn observe_party(&self, party: &str, view: &PartyView) {
        let accepted: Vec<UtxoRef> = self
            .sending
            .iter()
            .filter(|m| m.value().party == party && m.value().accepted)
            .map(|m| m.key().clone())
            .collect();
        if accepted.is_empty() {
            return;
        }

        match (&view.utxos, &view.status) {
            (Some(set), _) => {
                for utxo_ref in accepted.iter().filter(|r| !set.contains(r)) {
                    self.settle(utxo_ref).await;
                }
            }
            (None, Some(status)) if Visibility::of(Some(status.tag)) == Visibility::Hidden => {
                for utxo_ref in &accepted {
                    self.expire(utxo_ref, status.tag).await;
                }
            }
            _ => {}
        }
    }

    /// Drop the marks held for a party that is no longer tracked
    pub fn forget_party(&self, party: &str) {
        self.sending.retain(|_, mark| mark.party != party);
    }

    async fn expire(&self, utxo_ref: &UtxoRef, tag: HeadTag) {
        if let Some((_, mark)) = self.sending.remove(utxo_ref) {
            warn!(
                "Head for {} moved to {:?} before input {} was seen spent",
                mark.party, tag, utxo_ref
            );
            metrics::record_submission("transfer", "expired");
            self.log
                .update(
                    mark.entry_id,
                    TransactionStatus::Error,
                    None,
                    Some(format!("Head moved to {:?} before the transfer settled", tag)),
                )
                .await;
        }
    }

    async fn settle(&self, utxo_ref: &UtxoRef) {
        if let Some((_, mark)) = self.sending.remove(utxo_ref) {
            debug!("Input {} spent by {}", utxo_ref, mark.party);
            metrics::record_submission("transfer", "settled");
            self.log
                .update(mark.entry_id, TransactionStatus::Success, None, None)
                .await;
        }
    }
}

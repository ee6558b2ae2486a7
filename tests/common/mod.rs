//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::StreamExt;
use headwatch::config::{PanelConfig, SubscriberConfig};
use headwatch::node::EventStream;
use headwatch::state::{Utxo, UtxoRef, UtxoSet};
use headwatch::{HeadNode, HeadStatus, NodeError, NodeResult, PanelEvent, TxId};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::time::Instant;

/// In-memory node whose answers the test controls
#[derive(Default)]
pub struct ScriptedNode {
    status: Mutex<Option<HeadStatus>>,
    utxos: Mutex<UtxoSet>,
    push: Mutex<Option<fmpsc::UnboundedReceiver<HeadStatus>>>,
    hang_status: AtomicBool,
    hang_fetch: AtomicBool,
    status_queries: AtomicUsize,
    fetch_times: Mutex<Vec<Instant>>,
    commit_results: Mutex<VecDeque<NodeResult<TxId>>>,
    submissions: AtomicUsize,
}

impl ScriptedNode {
    pub fn new(status: Option<HeadStatus>, utxos: UtxoSet) -> Arc<Self> {
        let node = Self::default();
        *node.status.lock().unwrap() = status;
        *node.utxos.lock().unwrap() = utxos;
        Arc::new(node)
    }

    pub fn set_status(&self, status: Option<HeadStatus>) {
        *self.status.lock().unwrap() = status;
    }

    pub fn set_utxos(&self, utxos: UtxoSet) {
        *self.utxos.lock().unwrap() = utxos;
    }

    pub fn add_utxo(&self, utxo: Utxo) {
        self.utxos.lock().unwrap().insert(utxo);
    }

    /// Enable the push channel; must be called before the party is tracked
    pub fn push_channel(&self) -> fmpsc::UnboundedSender<HeadStatus> {
        let (tx, rx) = fmpsc::unbounded();
        *self.push.lock().unwrap() = Some(rx);
        tx
    }

    pub fn hang_status_queries(&self, hang: bool) {
        self.hang_status.store(hang, Ordering::SeqCst);
    }

    pub fn hang_fetches(&self, hang: bool) {
        self.hang_fetch.store(hang, Ordering::SeqCst);
    }

    pub fn script_commit(&self, result: NodeResult<TxId>) {
        self.commit_results.lock().unwrap().push_back(result);
    }

    pub fn status_queries(&self) -> usize {
        self.status_queries.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_times.lock().unwrap().len()
    }

    pub fn fetch_times(&self) -> Vec<Instant> {
        self.fetch_times.lock().unwrap().clone()
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HeadNode for ScriptedNode {
    async fn query_status(&self) -> NodeResult<Option<HeadStatus>> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        if self.hang_status.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        Ok(self.status.lock().unwrap().clone())
    }

    async fn subscribe_events(&self) -> NodeResult<EventStream> {
        match self.push.lock().unwrap().take() {
            Some(rx) => Ok(rx.map(Ok).boxed()),
            None => Err(NodeError::Unreachable("no push channel".to_string())),
        }
    }

    async fn fetch_utxo_set(&self) -> NodeResult<UtxoSet> {
        self.fetch_times.lock().unwrap().push(Instant::now());
        if self.hang_fetch.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        Ok(self.utxos.lock().unwrap().clone())
    }

    async fn submit_transfer(
        &self,
        from: &UtxoRef,
        _to_address: &str,
        _amount: u64,
    ) -> NodeResult<TxId> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst);
        let mut utxos = self.utxos.lock().unwrap();
        if !utxos.contains(from) {
            return Err(NodeError::Rejected(format!("BadInputsUTxO {}", from)));
        }
        let remaining: UtxoSet = utxos.iter().filter(|u| &u.utxo_ref != from).cloned().collect();
        *utxos = remaining;
        Ok(TxId(format!("tx-{}", n)))
    }

    async fn submit_commit(&self, _utxo_ref: &UtxoRef) -> NodeResult<TxId> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst);
        self.commit_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(TxId(format!("commit-{}", n))))
    }
}

pub fn utxo(utxo_ref: &str, address: &str, lovelace: u64) -> Utxo {
    Utxo {
        utxo_ref: utxo_ref.parse().unwrap(),
        address: address.to_string(),
        amounts: BTreeMap::from([("lovelace".to_string(), lovelace)]),
    }
}

pub fn utxo_set(utxos: Vec<Utxo>) -> UtxoSet {
    utxos.into_iter().collect()
}

/// Status polls offset from the 1s UTXO ticks so the two never coincide
pub fn panel_config() -> PanelConfig {
    PanelConfig {
        status_poll_interval_ms: 700,
        ..PanelConfig::default()
    }
}

/// No reconnects: tests that want push events enable them explicitly
pub fn subscriber_config() -> SubscriberConfig {
    SubscriberConfig {
        max_reconnect_attempts: 0,
        ..SubscriberConfig::default()
    }
}

pub async fn advance_to(start: Instant, millis: u64) {
    tokio::time::sleep_until(start + std::time::Duration::from_millis(millis)).await;
}

pub fn drain(events: &mut broadcast::Receiver<PanelEvent>) -> Vec<PanelEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

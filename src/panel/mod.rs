//! Panel service - the multi-party head control panel
//!
//! Owns one worker per tracked party plus the shared transaction log, error
//! board and send/commit flows. A background pump keeps head-wide action
//! availability current and settles transfers as fresh UTXO sets arrive.
//!
//! Must be created inside a Tokio runtime.

use crate::config::{PanelConfig, SubscriberConfig};
use crate::error::{PanelError, PanelResult};
use crate::events::{HeadStatus, PanelEvent};
use crate::node::{HeadNode, TxId};
use crate::state::{
    ErrorBoard, OperationKind, PartyErrorRecord, TransactionLog, TransactionLogEntry, Utxo,
    UtxoRef, UtxoSet,
};
use crate::sync::{action_availability, ActionAvailability, PartyHandle, PartyView};
use crate::tx::{CommitFlow, SendLifecycle, TransferRequest};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

/// Deadline checks for fanout do not depend on any event
const ACTION_RECHECK_INTERVAL: Duration = Duration::from_secs(1);

type PartyMap = DashMap<String, Arc<PartyHandle>>;

/// Everything the panel shows for one party
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartySnapshot {
    pub party: String,
    pub address: String,
    pub connected: bool,
    pub status: Option<HeadStatus>,
    pub utxos: Option<UtxoSet>,
    pub spendable: Vec<Utxo>,
    pub errors: Vec<PartyErrorRecord>,
}

pub struct Panel {
    config: PanelConfig,
    subscriber_config: SubscriberConfig,
    parties: Arc<PartyMap>,
    event_tx: broadcast::Sender<PanelEvent>,
    errors: Arc<ErrorBoard>,
    log: Arc<TransactionLog>,
    send: Arc<SendLifecycle>,
    commit: CommitFlow,
    shutdown: Arc<RwLock<bool>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Panel {
    pub fn new(config: PanelConfig, subscriber_config: SubscriberConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let errors = Arc::new(ErrorBoard::new(event_tx.clone()));
        let log = Arc::new(TransactionLog::new(event_tx.clone()));
        let send = Arc::new(SendLifecycle::new(log.clone(), errors.clone()));
        let commit = CommitFlow::new(log.clone(), errors.clone(), config.commit_retry_delay());
        let parties: Arc<PartyMap> = Arc::new(DashMap::new());
        let shutdown = Arc::new(RwLock::new(false));

        let pump = tokio::spawn(run_pump(
            parties.clone(),
            send.clone(),
            event_tx.clone(),
            shutdown.clone(),
        ));

        info!("Panel {} started", config.instance_id);

        Self {
            config,
            subscriber_config,
            parties,
            event_tx,
            errors,
            log,
            send,
            commit,
            shutdown,
            pump: Mutex::new(Some(pump)),
        }
    }

    /// Start polling and listening to a party's node
    pub fn track_party(&self, name: &str, address: &str, node: Arc<dyn HeadNode>) -> PanelResult<()> {
        match self.parties.entry(name.to_string()) {
            Entry::Occupied(_) => Err(PanelError::InvalidRequest(format!(
                "Party {} is already tracked",
                name
            ))),
            Entry::Vacant(slot) => {
                let handle = PartyHandle::spawn(
                    name,
                    address,
                    node,
                    &self.config,
                    &self.subscriber_config,
                    self.event_tx.clone(),
                    self.errors.clone(),
                );
                slot.insert(Arc::new(handle));
                crate::metrics::record_party_connected(name, false);
                info!("Tracking party {}", name);
                Ok(())
            }
        }
    }

    /// Stop a party's worker. Requests still in flight complete and are dropped.
    pub fn untrack_party(&self, name: &str) -> PanelResult<()> {
        self.parties
            .remove(name)
            .ok_or_else(|| PanelError::UnknownParty {
                party: name.to_string(),
            })?;
        self.errors.remove_party(name);
        self.send.forget_party(name);
        info!("Stopped tracking party {}", name);
        Ok(())
    }

    /// Tracked parties in display order
    pub fn parties(&self) -> Vec<String> {
        let mut names: Vec<String> = self.parties.iter().map(|p| p.key().clone()).collect();
        names.sort();
        names
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.event_tx.subscribe()
    }

    pub fn watch_party(&self, party: &str) -> PanelResult<watch::Receiver<PartyView>> {
        Ok(self.handle(party)?.watch())
    }

    /// Canonical status; `None` while the node is unreachable
    pub fn status(&self, party: &str) -> PanelResult<Option<HeadStatus>> {
        Ok(self.handle(party)?.status())
    }

    pub fn utxo_set(&self, party: &str) -> PanelResult<Option<UtxoSet>> {
        Ok(self.handle(party)?.utxos())
    }

    /// Published UTXOs minus those being spent
    pub fn spendable_utxos(&self, party: &str) -> PanelResult<Vec<Utxo>> {
        let utxos = self.handle(party)?.utxos();
        Ok(utxos
            .map(|set| self.send.spendable(party, &set))
            .unwrap_or_default())
    }

    pub fn errors(&self, party: &str) -> PanelResult<Vec<PartyErrorRecord>> {
        self.handle(party)?;
        Ok(self.errors.for_party(party))
    }

    pub fn dismiss_error(&self, party: &str, kind: OperationKind) -> PanelResult<bool> {
        self.handle(party)?;
        Ok(self.errors.dismiss(party, kind))
    }

    pub fn snapshot(&self, party: &str) -> PanelResult<PartySnapshot> {
        let handle = self.handle(party)?;
        let view = handle.view();
        let spendable = view
            .utxos
            .as_ref()
            .map(|set| self.send.spendable(party, set))
            .unwrap_or_default();

        Ok(PartySnapshot {
            party: party.to_string(),
            address: handle.address().to_string(),
            connected: view.status.is_some(),
            status: view.status,
            utxos: view.utxos,
            spendable,
            errors: self.errors.for_party(party),
        })
    }

    pub async fn transactions(&self) -> Vec<TransactionLogEntry> {
        self.log.entries().await
    }

    pub fn action_availability(&self) -> ActionAvailability {
        current_availability(&self.parties)
    }

    pub async fn submit_transfer(&self, request: TransferRequest) -> PanelResult<TxId> {
        let utxo_ref: UtxoRef = request.utxo_ref.parse()?;
        let from = self.handle(&request.from_party)?;
        let to = self.handle(&request.to_party)?;
        self.send.submit(&from, &to, utxo_ref, request.amount).await
    }

    pub async fn submit_commit(&self, party: &str, utxo_ref: &str) -> PanelResult<TxId> {
        let utxo_ref: UtxoRef = utxo_ref.parse()?;
        let handle = self.handle(party)?;
        self.commit
            .submit(party, handle.node().as_ref(), utxo_ref)
            .await
    }

    /// Stop every worker and the background pump
    pub async fn shutdown(&self) {
        info!("Shutting down panel {}", self.config.instance_id);
        *self.shutdown.write().await = true;

        if let Ok(mut pump) = self.pump.lock() {
            if let Some(pump) = pump.take() {
                pump.abort();
            }
        }
        self.parties.clear();
    }

    fn handle(&self, party: &str) -> PanelResult<Arc<PartyHandle>> {
        self.parties
            .get(party)
            .map(|h| h.value().clone())
            .ok_or_else(|| PanelError::UnknownParty {
                party: party.to_string(),
            })
    }
}

fn current_availability(parties: &PartyMap) -> ActionAvailability {
    let statuses: Vec<Option<HeadStatus>> = parties.iter().map(|p| p.value().status()).collect();
    action_availability(statuses.iter().map(Option::as_ref), Utc::now())
}

async fn observe(parties: &PartyMap, send: &SendLifecycle, party: &str) {
    let view = parties.get(party).map(|handle| handle.view());
    if let Some(view) = view {
        send.observe_party(party, &view).await;
    }
}

/// Recompute action availability on status changes and on a timer, and
/// settle transfers against the parties' latest views
async fn run_pump(
    parties: Arc<PartyMap>,
    send: Arc<SendLifecycle>,
    event_tx: broadcast::Sender<PanelEvent>,
    shutdown: Arc<RwLock<bool>>,
) {
    let mut event_rx = event_tx.subscribe();
    let mut recheck = interval(ACTION_RECHECK_INTERVAL);
    let mut current = ActionAvailability::default();

    let refresh = |current: &mut ActionAvailability| {
        let next = current_availability(&parties);
        if next != *current {
            debug!("Action availability now {:?}", next);
            *current = next;
            let event = PanelEvent::ActionsChanged(next);
            crate::metrics::record_event(&event);
            let _ = event_tx.send(event);
        }
    };

    loop {
        if *shutdown.read().await {
            break;
        }

        tokio::select! {
            event = event_rx.recv() => {
                match event {
                    Ok(PanelEvent::StatusChanged { party, .. }) => {
                        refresh(&mut current);
                        observe(&parties, &send, &party).await;
                    }
                    Ok(PanelEvent::UtxoSetChanged { party, .. }) => {
                        observe(&parties, &send, &party).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Panel pump lagged by {} events", skipped);
                        refresh(&mut current);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = recheck.tick() => refresh(&mut current),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;
    use crate::events::HeadTag;
    use crate::node::MockHeadNode;
    use tokio_test::{assert_err, assert_ok};

    fn idle_node() -> Arc<dyn HeadNode> {
        let mut node = MockHeadNode::new();
        node.expect_query_status()
            .returning(|| Ok(Some(HeadStatus::new(HeadTag::Idle))));
        node.expect_subscribe_events()
            .returning(|| Err(NodeError::Unreachable("refused".into())));
        Arc::new(node)
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_and_untrack() {
        let panel = Panel::new(PanelConfig::default(), SubscriberConfig::default());
        assert_ok!(panel.track_party("alice", "addr_test1alice", idle_node()));

        let again = panel.track_party("alice", "addr_test1alice", idle_node());
        assert!(matches!(again, Err(PanelError::InvalidRequest(_))));

        assert_ok!(panel.untrack_party("alice"));
        assert!(panel.parties().is_empty());
        assert!(matches!(
            panel.untrack_party("alice"),
            Err(PanelError::UnknownParty { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_available_when_all_idle() {
        let panel = Panel::new(PanelConfig::default(), SubscriberConfig::default());
        assert_eq!(panel.action_availability(), ActionAvailability::default());

        let mut events = panel.subscribe();
        panel.track_party("alice", "addr_test1alice", idle_node()).unwrap();
        panel.track_party("bob", "addr_test1bob", idle_node()).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(panel.action_availability().init);

        let mut saw_actions = false;
        while let Ok(event) = events.try_recv() {
            if let PanelEvent::ActionsChanged(availability) = event {
                saw_actions = availability.init;
            }
        }
        assert!(saw_actions);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_for_unknown_party_fail_fast() {
        let panel = Panel::new(PanelConfig::default(), SubscriberConfig::default());

        let err = assert_err!(panel.submit_commit("carol", "aa#0").await);
        assert!(matches!(err, PanelError::UnknownParty { .. }));

        let err = panel.submit_commit("carol", "not-a-ref").await.unwrap_err();
        assert!(matches!(err, PanelError::InvalidRequest(_)));
        assert!(panel.transactions().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_everything() {
        let panel = Panel::new(PanelConfig::default(), SubscriberConfig::default());
        panel.track_party("alice", "addr_test1alice", idle_node()).unwrap();
        panel.shutdown().await;
        assert!(panel.parties().is_empty());
    }
}

//! Per-party worker
//!
//! One task per tracked party owns that party's reconciler and synchronizer
//! and serializes everything that touches them: status poll results, push
//! statuses, UTXO fetch results, ticks and commands. Network calls run in
//! their own tasks and report back through a completion channel, so a slow
//! node never blocks the worker.
//!
//! Results that arrive after the worker stopped have nowhere to go and are
//! dropped.

use super::guard::FetchTicket;
use super::reconciler::{Reconciled, Reconciler, Transition};
use super::synchronizer::{enters_visible_open, FetchOutcome, SyncAction, UtxoSynchronizer};
use crate::config::{PanelConfig, SubscriberConfig};
use crate::error::NodeResult;
use crate::events::{HeadStatus, PanelEvent};
use crate::metrics;
use crate::node::{EventSubscriber, HeadNode, PollOutcome, StatusPoller};
use crate::state::{ErrorBoard, OperationKind, UtxoSet};

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const PUSH_CHANNEL_CAPACITY: usize = 64;
const COMMAND_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartyCommand {
    /// Refresh the UTXO set rapidly after a transfer touched this party
    StartBurst,
}

/// What the rest of the panel sees of one party
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartyView {
    /// `None` while the node is unreachable or not yet polled
    pub status: Option<HeadStatus>,
    pub utxos: Option<UtxoSet>,
}

enum Completion {
    Status(PollOutcome),
    Utxo(FetchTicket, NodeResult<UtxoSet>),
}

/// Handle to a running party worker. Dropping it stops the worker and the
/// push subscriber.
pub struct PartyHandle {
    name: String,
    address: String,
    node: Arc<dyn HeadNode>,
    view: watch::Receiver<PartyView>,
    commands: mpsc::Sender<PartyCommand>,
    tasks: Vec<JoinHandle<()>>,
}

impl PartyHandle {
    pub fn spawn(
        name: &str,
        address: &str,
        node: Arc<dyn HeadNode>,
        config: &PanelConfig,
        subscriber_config: &SubscriberConfig,
        event_tx: broadcast::Sender<PanelEvent>,
        errors: Arc<ErrorBoard>,
    ) -> Self {
        let (view_tx, view_rx) = watch::channel(PartyView::default());
        let (push_tx, push_rx) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let worker = PartyWorker {
            party: name.to_string(),
            node: node.clone(),
            poller: StatusPoller::new(name, node.clone()),
            reconciler: Reconciler::new(config.stale_push_window()),
            synchronizer: UtxoSynchronizer::new(name, config),
            config: config.clone(),
            view_tx,
            event_tx,
            errors,
        };
        let subscriber = EventSubscriber::new(name, node.clone(), subscriber_config.clone());

        let tasks = vec![
            tokio::spawn(worker.run(push_rx, cmd_rx)),
            tokio::spawn(subscriber.run(push_tx)),
        ];

        Self {
            name: name.to_string(),
            address: address.to_string(),
            node,
            view: view_rx,
            commands: cmd_tx,
            tasks,
        }
    }

    /// A handle with no worker behind it; the caller drives the view
    #[cfg(test)]
    pub(crate) fn detached(
        name: &str,
        address: &str,
        node: Arc<dyn HeadNode>,
    ) -> (Self, watch::Sender<PartyView>, mpsc::Receiver<PartyCommand>) {
        let (view_tx, view_rx) = watch::channel(PartyView::default());
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = Self {
            name: name.to_string(),
            address: address.to_string(),
            node,
            view: view_rx,
            commands: cmd_tx,
            tasks: Vec::new(),
        };
        (handle, view_tx, cmd_rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn node(&self) -> &Arc<dyn HeadNode> {
        &self.node
    }

    pub fn view(&self) -> PartyView {
        self.view.borrow().clone()
    }

    pub fn status(&self) -> Option<HeadStatus> {
        self.view.borrow().status.clone()
    }

    pub fn utxos(&self) -> Option<UtxoSet> {
        self.view.borrow().utxos.clone()
    }

    pub fn watch(&self) -> watch::Receiver<PartyView> {
        self.view.clone()
    }

    /// Ask the worker for a refresh burst. Returns `false` if it is gone.
    pub fn request_burst(&self) -> bool {
        match self.commands.try_send(PartyCommand::StartBurst) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Burst already queued for {}", self.name);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

impl Drop for PartyHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

struct PartyWorker {
    party: String,
    node: Arc<dyn HeadNode>,
    poller: StatusPoller,
    reconciler: Reconciler,
    synchronizer: UtxoSynchronizer,
    config: PanelConfig,
    view_tx: watch::Sender<PartyView>,
    event_tx: broadcast::Sender<PanelEvent>,
    errors: Arc<ErrorBoard>,
}

fn ticker(mut interval: Interval) -> Interval {
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl PartyWorker {
    async fn run(
        mut self,
        mut push_rx: mpsc::Receiver<HeadStatus>,
        mut cmd_rx: mpsc::Receiver<PartyCommand>,
    ) {
        info!("Party worker started for {}", self.party);

        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let mut status_tick = ticker(interval(self.config.status_poll_interval()));
        let utxo_period = self.config.utxo_poll_interval();
        let mut utxo_tick = ticker(interval_at(Instant::now() + utxo_period, utxo_period));
        let burst_period = self.config.burst_interval();
        let mut burst_tick = ticker(interval_at(Instant::now() + burst_period, burst_period));
        let mut push_open = true;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(PartyCommand::StartBurst) => {
                            if let Some(ticket) = self.synchronizer.start_burst(Instant::now()) {
                                self.spawn_fetch(ticket, &done_tx);
                            }
                            burst_tick.reset();
                        }
                        None => break,
                    }
                }

                _ = status_tick.tick() => {
                    if let Some(query) = self.poller.try_poll() {
                        let tx = done_tx.clone();
                        tokio::spawn(async move {
                            let _ = tx.send(Completion::Status(query.await));
                        });
                    }
                }

                status = push_rx.recv(), if push_open => {
                    match status {
                        Some(status) => self.on_push(status, &done_tx, &mut utxo_tick),
                        None => {
                            debug!("Push channel for {} closed", self.party);
                            push_open = false;
                        }
                    }
                }

                Some(done) = done_rx.recv() => {
                    match done {
                        Completion::Status(outcome) => self.on_poll(outcome, &done_tx, &mut utxo_tick),
                        Completion::Utxo(ticket, result) => self.on_fetch(ticket, result),
                    }
                }

                _ = utxo_tick.tick() => {
                    if let Some(ticket) = self.synchronizer.on_steady_tick(Instant::now()) {
                        self.spawn_fetch(ticket, &done_tx);
                    }
                }

                _ = burst_tick.tick(), if self.synchronizer.burst_active() => {
                    if let Some(ticket) = self.synchronizer.on_burst_tick(Instant::now()) {
                        self.spawn_fetch(ticket, &done_tx);
                    }
                    if !self.synchronizer.burst_active() {
                        utxo_tick.reset();
                    }
                }
            }
        }

        info!("Party worker stopped for {}", self.party);
    }

    fn on_poll(
        &mut self,
        outcome: PollOutcome,
        done_tx: &mpsc::UnboundedSender<Completion>,
        utxo_tick: &mut Interval,
    ) {
        match outcome {
            PollOutcome::Status(status) => {
                self.errors.clear_on_success(&self.party, OperationKind::StatusQuery);
                let reconciled = self.reconciler.apply_poll(status, Instant::now());
                self.apply(reconciled, done_tx, utxo_tick);
            }
            PollOutcome::Failed(e) => {
                warn!(reason = %e, party = %self.party, "Status query failed");
                self.errors
                    .raise(&self.party, OperationKind::StatusQuery, e.raw_message());
            }
        }
    }

    fn on_push(
        &mut self,
        status: HeadStatus,
        done_tx: &mpsc::UnboundedSender<Completion>,
        utxo_tick: &mut Interval,
    ) {
        let incoming = status.tag;
        let reconciled = self.reconciler.apply_push(status, Instant::now());
        if reconciled == Reconciled::Rejected {
            debug!(
                "Rejected push {} for {}: recent poll reports {:?}",
                incoming,
                self.party,
                self.reconciler.tag()
            );
            metrics::record_push_rejected(&self.party);
            return;
        }
        self.apply(reconciled, done_tx, utxo_tick);
    }

    fn apply(
        &mut self,
        reconciled: Reconciled,
        done_tx: &mpsc::UnboundedSender<Completion>,
        utxo_tick: &mut Interval,
    ) {
        let Reconciled::Updated { status, transition } = reconciled else {
            return;
        };

        self.view_tx.send_if_modified(|view| {
            if view.status == status {
                return false;
            }
            view.status = status.clone();
            true
        });
        self.emit(PanelEvent::StatusChanged {
            party: self.party.clone(),
            status,
        });

        if let Some(transition) = transition {
            self.on_transition(transition, done_tx, utxo_tick);
        }
    }

    fn on_transition(
        &mut self,
        transition: Transition,
        done_tx: &mpsc::UnboundedSender<Completion>,
        utxo_tick: &mut Interval,
    ) {
        info!(
            "Head status for {}: {:?} -> {:?}",
            self.party, transition.previous, transition.current
        );
        metrics::record_status_transition(&self.party, transition.current);
        if transition.previous.is_some() != transition.current.is_some() {
            metrics::record_party_connected(&self.party, transition.current.is_some());
        }

        self.emit(PanelEvent::StatusTransition {
            party: self.party.clone(),
            previous: transition.previous,
            current: transition.current,
        });

        if enters_visible_open(&transition) {
            utxo_tick.reset();
        }

        match self.synchronizer.on_transition(transition, Instant::now()) {
            SyncAction::Fetch(ticket) => self.spawn_fetch(ticket, done_tx),
            SyncAction::Discarded => self.publish_utxos(None),
            SyncAction::Idle => {}
        }
    }

    fn on_fetch(&mut self, ticket: FetchTicket, result: NodeResult<UtxoSet>) {
        match self.synchronizer.complete(&ticket, result) {
            FetchOutcome::Published(set) => {
                metrics::record_utxo_fetch(&self.party, "published");
                self.errors.clear_on_success(&self.party, OperationKind::UtxoFetch);
                self.publish_utxos(Some(set));
            }
            FetchOutcome::Unchanged => {
                metrics::record_utxo_fetch(&self.party, "unchanged");
                self.errors.clear_on_success(&self.party, OperationKind::UtxoFetch);
            }
            FetchOutcome::Stale => {
                metrics::record_utxo_fetch(&self.party, "stale");
                debug!("Dropped stale UTXO fetch {} for {}", ticket.id, self.party);
            }
            FetchOutcome::Failed(e) => {
                metrics::record_utxo_fetch(&self.party, "failed");
                if e.is_connectivity() {
                    debug!(reason = %e, party = %self.party, "UTXO fetch failed");
                } else {
                    warn!(reason = %e, party = %self.party, "UTXO fetch failed");
                    self.errors
                        .raise(&self.party, OperationKind::UtxoFetch, e.raw_message());
                }
            }
        }
    }

    fn publish_utxos(&mut self, utxos: Option<UtxoSet>) {
        metrics::record_utxo_set_size(&self.party, utxos.as_ref().map_or(0, |s| s.len()));
        self.view_tx.send_modify(|view| view.utxos = utxos.clone());
        self.emit(PanelEvent::UtxoSetChanged {
            party: self.party.clone(),
            utxos,
        });
    }

    fn spawn_fetch(&self, ticket: FetchTicket, done_tx: &mpsc::UnboundedSender<Completion>) {
        let node = self.node.clone();
        let tx = done_tx.clone();
        tokio::spawn(async move {
            let result = node.fetch_utxo_set().await;
            let _ = tx.send(Completion::Utxo(ticket, result));
        });
    }

    fn emit(&self, event: PanelEvent) {
        metrics::record_event(&event);
        let _ = self.event_tx.send(event);
    }
}

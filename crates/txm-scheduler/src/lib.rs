//! The policy loop scheduler (C5): a single cooperative task that drives
//! every pending transaction through its policy engine once per cycle, plus
//! the scheduler's side of the confirmation tracker interface (C6) that
//! watches submitted transactions to a terminal state.
//!
//! Grounded on `pkg/fftm/policyloop.go` of the original implementation
//! (`policyLoop`, `policyLoopCycle`, `execPolicy`, `trackSubmittedTransaction`,
//! `processPolicyAPIRequests`) and, for the task/command-channel split, on
//! the teacher's `crates/eth/src/manager.rs` (`EthDataCleanser` owning a
//! `ReceiverStream<EthCommand>` commander alongside its own event loop).

pub mod confirmation;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use txm_connector::Connector;
use txm_persistence::Persistence;
use txm_policy::{PolicyContext, PolicyEngine, PolicyUpdate};
use txm_types::{
    error::{NotFoundKind, TmError},
    retry::retry_until_cancelled,
    BlockDescriptor, ManagedTx, PageRequest, Receipt, SortDirection, TxHash, TxId, TxStatus
};

pub use confirmation::{ConfirmTrackerError, ConfirmationTracker, Notification};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub cycle_interval:      std::time::Duration,
    pub error_history_count: usize
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { cycle_interval: std::time::Duration::from_secs(5), error_history_count: 25 }
    }
}

/// The HTTP-status-shaped reply to a synchronous, policy-engine-mediated
/// request (currently just user-initiated delete): 200 once the transaction
/// has actually been removed in the same cycle, 202 if the policy engine
/// left it pending a further cycle (or never existed to begin with in an
/// inflight sense).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyApiOutcome {
    pub status: u16,
    pub tx:     Option<ManagedTx>
}

enum Command {
    Track(ManagedTx),
    Delete { tx_id: TxId, reply: oneshot::Sender<Result<PolicyApiOutcome, TmError>> },
    Suspend { tx_id: TxId, reply: oneshot::Sender<Result<(), TmError>> }
}

/// A pending transaction's in-memory companion state. `mtx` is what gets
/// persisted; the rest is scheduler-local bookkeeping that resets whenever
/// the transaction is reloaded from the store (e.g. on process restart).
struct PendingState {
    mtx:               ManagedTx,
    confirmed:         bool,
    tracking_hash:     Option<TxHash>,
    last_policy_cycle: Option<DateTime<Utc>>
}

impl PendingState {
    fn new(mtx: ManagedTx) -> Self {
        Self { mtx, confirmed: false, tracking_hash: None, last_policy_cycle: None }
    }
}

enum ExecResult {
    /// No persistence write needed this cycle.
    NoChange,
    /// `mtx` was mutated; the caller persists it. `completed` means the
    /// transaction reached a terminal state and should leave `inflight`.
    Persist { completed: bool },
    /// The policy engine (or a sync delete request) decided the transaction
    /// should be removed outright.
    Deleted
}

enum ConfirmEvent {
    Receipt { tx_id: TxId, receipt: Receipt },
    Confirmed { tx_id: TxId, blocks: Vec<BlockDescriptor> }
}

/// Handle used by the rest of the process (RPC layer, nonce allocator) to
/// talk to a running [`Scheduler`] without touching its internals directly.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands:        mpsc::Sender<Command>,
    inflight_stale:  Arc<AtomicBool>,
    inflight_update: Arc<AtomicBool>,
    wake:            Arc<tokio::sync::Notify>
}

impl SchedulerHandle {
    /// Adds a freshly created, already-persisted transaction to the active
    /// set without waiting for the next stale reload.
    pub async fn track_submitted(&self, mtx: ManagedTx) {
        let _ = self.commands.send(Command::Track(mtx)).await;
        self.inflight_update.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// User-initiated delete. Routed through the policy engine
    /// (`exec_policy(syncDelete=true)`) rather than forced directly, since an
    /// already-submitted transaction can't simply be forgotten — the engine
    /// decides whether deletion is still possible.
    pub async fn delete_transaction(&self, tx_id: TxId) -> Result<PolicyApiOutcome, TmError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Delete { tx_id, reply }).await.map_err(|_| TmError::Fatal)?;
        rx.await.map_err(|_| TmError::Fatal)?
    }

    pub async fn suspend_transaction(&self, tx_id: TxId) -> Result<(), TmError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Suspend { tx_id, reply }).await.map_err(|_| TmError::Fatal)?;
        rx.await.map_err(|_| TmError::Fatal)?
    }

    /// Forces the next cycle to reload the pending set from persistence
    /// rather than trusting the in-memory snapshot. Called by the nonce
    /// allocator on every release.
    pub fn mark_stale(&self) {
        self.inflight_stale.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }
}

/// The single task driving every pending transaction's policy cycle.
/// Transactions are kept in an in-memory snapshot (`inflight`) reconciled
/// against persistence only when [`SchedulerHandle::mark_stale`] has fired
/// since the last cycle — the coalesced-flag approach avoids a persistence
/// round trip on every tick when nothing changed.
pub struct Scheduler {
    persistence:     Arc<dyn Persistence>,
    connector:       Arc<dyn Connector>,
    policy:          Arc<dyn PolicyEngine>,
    confirm_tracker: Arc<dyn ConfirmationTracker>,
    config:          SchedulerConfig,
    inflight:        Mutex<Vec<PendingState>>,
    inflight_stale:  Arc<AtomicBool>,
    inflight_update: Arc<AtomicBool>,
    wake:            Arc<tokio::sync::Notify>,
    commands:        mpsc::Receiver<Command>,
    confirm_tx:      mpsc::Sender<ConfirmEvent>,
    confirm_rx:      mpsc::Receiver<ConfirmEvent>
}

impl Scheduler {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        connector: Arc<dyn Connector>,
        policy: Arc<dyn PolicyEngine>,
        confirm_tracker: Arc<dyn ConfirmationTracker>,
        config: SchedulerConfig
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::channel(256);
        let (confirm_tx, confirm_rx) = mpsc::channel(256);
        let inflight_stale = Arc::new(AtomicBool::new(true));
        let inflight_update = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(tokio::sync::Notify::new());
        let handle = SchedulerHandle {
            commands: tx,
            inflight_stale: inflight_stale.clone(),
            inflight_update: inflight_update.clone(),
            wake: wake.clone()
        };
        let scheduler = Self {
            persistence,
            connector,
            policy,
            confirm_tracker,
            config,
            inflight: Mutex::new(Vec::new()),
            inflight_stale,
            inflight_update,
            wake,
            commands: rx,
            confirm_tx,
            confirm_rx
        };
        (scheduler, handle)
    }

    /// Runs until `cancel` fires. Intended to be spawned as its own task.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("policy loop stopping");
                    return;
                }
                Some(cmd) = self.commands.recv() => {
                    self.handle_command(cmd, &cancel).await;
                    continue;
                }
                Some(ev) = self.confirm_rx.recv() => {
                    self.handle_confirm_event(ev);
                    continue;
                }
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.cycle_interval) => {}
            }
            self.run_cycle(&cancel).await;
        }
    }

    async fn handle_command(&mut self, cmd: Command, cancel: &CancellationToken) {
        match cmd {
            Command::Track(mtx) => self.inflight.lock().push(PendingState::new(mtx)),
            Command::Delete { tx_id, reply } => {
                let result = self.delete_one(&tx_id, cancel).await;
                let _ = reply.send(result);
            }
            Command::Suspend { tx_id, reply } => {
                let result = self.suspend_one(&tx_id).await;
                let _ = reply.send(result);
            }
        }
    }

    fn handle_confirm_event(&mut self, ev: ConfirmEvent) {
        match ev {
            ConfirmEvent::Receipt { tx_id, receipt } => {
                let mut inflight = self.inflight.lock();
                if let Some(state) = inflight.iter_mut().find(|s| s.mtx.id == tx_id) {
                    state.mtx.receipt = Some(receipt);
                    state.mtx.updated = Utc::now();
                }
            }
            ConfirmEvent::Confirmed { tx_id, blocks } => {
                let mut inflight = self.inflight.lock();
                if let Some(state) = inflight.iter_mut().find(|s| s.mtx.id == tx_id) {
                    state.confirmed = true;
                    state.mtx.confirmations = blocks;
                }
            }
        }
        self.inflight_update.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Installs (or restarts, on resubmission) a receipt/confirmed watch for
    /// `state`'s current transaction hash. Any notification error is logged
    /// and ignored — it means the tracker is shutting down, and the cycle
    /// that follows will simply retry on the next pass.
    fn track_submitted_transaction(&self, state: &mut PendingState) {
        let Some(new_hash) = state.mtx.transaction_hash.clone() else { return };

        if let Some(old_hash) = state.tracking_hash.clone() {
            if old_hash != new_hash {
                let _ = self.confirm_tracker.notify(Notification::Removed { tx_hash: old_hash });
            }
        }

        let tx_id = state.mtx.id.clone();

        let receipt_events = self.confirm_tx.clone();
        let receipt_tx_id = tx_id.clone();
        let on_receipt: Box<dyn FnMut(Receipt) + Send> = Box::new(move |receipt| {
            let _ = receipt_events.try_send(ConfirmEvent::Receipt { tx_id: receipt_tx_id.clone(), receipt });
        });

        let confirmed_events = self.confirm_tx.clone();
        let confirmed_tx_id = tx_id.clone();
        let on_confirmed: Box<dyn FnMut(Vec<BlockDescriptor>) + Send> = Box::new(move |blocks| {
            let _ = confirmed_events.try_send(ConfirmEvent::Confirmed { tx_id: confirmed_tx_id.clone(), blocks });
        });

        match self.confirm_tracker.notify(Notification::New {
            tx_id,
            tx_hash: new_hash.clone(),
            on_receipt,
            on_confirmed
        }) {
            Ok(()) => state.tracking_hash = Some(new_hash),
            Err(e) => debug!(tx_id = %state.mtx.id, error = %e, "confirmation tracker notification ignored")
        }
    }

    /// Implements `exec_policy` (§4.5): first checks for a confirmed receipt
    /// (unless this is a sync-delete request), then, if due, runs the
    /// transaction through the policy engine and re-establishes confirmation
    /// tracking if the hash being watched has drifted from the current one.
    async fn exec_policy(
        &self,
        state: &mut PendingState,
        sync_delete: bool,
        cancel: &CancellationToken
    ) -> ExecResult {
        if state.confirmed && !sync_delete {
            let succeeded = state.mtx.receipt.as_ref().map(|r| r.success).unwrap_or(false);
            state.mtx.status = if succeeded { TxStatus::Succeeded } else { TxStatus::Failed };
            if !succeeded {
                state.mtx.push_error(
                    self.config.error_history_count,
                    "receipt_failed",
                    "transaction reverted or failed on-chain"
                );
            }
            state.mtx.updated = Utc::now();
            return ExecResult::Persist { completed: true };
        }

        if !sync_delete && !cycle_due(state.last_policy_cycle, self.config.cycle_interval) {
            return ExecResult::NoChange;
        }

        let now = Utc::now();
        if sync_delete && state.mtx.delete_requested.is_none() {
            state.mtx.delete_requested = Some(now);
        }

        let ctx = PolicyContext { error_history_count: self.config.error_history_count, cancel: cancel.clone() };
        let outcome = self.policy.execute(&ctx, self.connector.as_ref(), &mut state.mtx).await;
        state.last_policy_cycle = Some(now);

        if state.mtx.first_submit.is_some()
            && state.tracking_hash.as_deref() != state.mtx.transaction_hash.as_deref()
        {
            self.track_submitted_transaction(state);
        }

        match outcome.update {
            PolicyUpdate::No => {
                if let (Some(reason), Some(err)) = (outcome.reason, outcome.error) {
                    state.mtx.push_error(self.config.error_history_count, reason, err);
                    state.mtx.updated = Utc::now();
                    ExecResult::Persist { completed: false }
                } else {
                    ExecResult::NoChange
                }
            }
            PolicyUpdate::Yes => {
                state.mtx.updated = Utc::now();
                ExecResult::Persist { completed: false }
            }
            PolicyUpdate::Delete => ExecResult::Deleted
        }
    }

    /// `exec_policy(syncDelete=true)`, replying with a `PolicyApiOutcome`:
    /// 200 if the transaction was removed synchronously in this call, 202 if
    /// the policy engine left it pending a further cycle.
    async fn delete_one(&self, tx_id: &str, cancel: &CancellationToken) -> Result<PolicyApiOutcome, TmError> {
        let existing = {
            let mut inflight = self.inflight.lock();
            inflight.iter().position(|s| s.mtx.id == tx_id).map(|pos| inflight.remove(pos))
        };
        let from_inflight = existing.is_some();

        let mut state = match existing {
            Some(s) => s,
            None => {
                let Some(mtx) = self.persistence.get_transaction_by_id(tx_id).await? else {
                    return Err(TmError::NotFound(NotFoundKind::Transaction, tx_id.to_string()));
                };
                PendingState::new(mtx)
            }
        };

        match self.exec_policy(&mut state, true, cancel).await {
            ExecResult::Deleted => {
                if let Err(e) = self.persistence.delete_transaction(tx_id).await {
                    if from_inflight {
                        self.inflight.lock().push(state);
                    }
                    return Err(e);
                }
                self.inflight_stale.store(true, Ordering::SeqCst);
                Ok(PolicyApiOutcome { status: 200, tx: Some(state.mtx) })
            }
            ExecResult::Persist { completed } => {
                if let Err(e) = self.persistence.write_transaction(&state.mtx, false).await {
                    if from_inflight {
                        self.inflight.lock().push(state);
                    }
                    return Err(e);
                }
                let tx = state.mtx.clone();
                if completed {
                    self.inflight_stale.store(true, Ordering::SeqCst);
                } else if from_inflight {
                    self.inflight.lock().push(state);
                }
                Ok(PolicyApiOutcome { status: if completed { 200 } else { 202 }, tx: Some(tx) })
            }
            ExecResult::NoChange => {
                let tx = state.mtx.clone();
                if from_inflight {
                    self.inflight.lock().push(state);
                }
                Ok(PolicyApiOutcome { status: 202, tx: Some(tx) })
            }
        }
    }

    async fn suspend_one(&self, tx_id: &str) -> Result<(), TmError> {
        {
            let mut inflight = self.inflight.lock();
            if let Some(state) = inflight.iter_mut().find(|s| s.mtx.id == tx_id) {
                state.mtx.status = TxStatus::Suspended;
            }
        }
        if let Some(mut mtx) = self.persistence.get_transaction_by_id(tx_id).await? {
            mtx.status = TxStatus::Suspended;
            self.persistence.write_transaction(&mtx, false).await?;
        }
        Ok(())
    }

    async fn run_cycle(&mut self, cancel: &CancellationToken) {
        if self.inflight_stale.swap(false, Ordering::SeqCst) {
            match self.reload_pending(cancel).await {
                Ok(rows) => *self.inflight.lock() = rows.into_iter().map(PendingState::new).collect(),
                Err(TmError::Fatal) => return,
                Err(e) => warn!(error = %e, "failed to reload pending set, keeping stale snapshot")
            }
        }
        self.inflight_update.store(false, Ordering::SeqCst);

        let ids: Vec<TxId> = self
            .inflight
            .lock()
            .iter()
            .filter(|s| s.mtx.status == TxStatus::Pending)
            .map(|s| s.mtx.id.clone())
            .collect();

        for tx_id in ids {
            let mut state = {
                let mut inflight = self.inflight.lock();
                match inflight.iter().position(|s| s.mtx.id == tx_id) {
                    Some(pos) => inflight.remove(pos),
                    None => continue
                }
            };

            match self.exec_policy(&mut state, false, cancel).await {
                ExecResult::NoChange => self.inflight.lock().push(state),
                ExecResult::Persist { completed } => {
                    if let Err(e) = self.persistence.write_transaction(&state.mtx, false).await {
                        error!(tx_id = %state.mtx.id, error = %e, "failed to persist policy update");
                        self.inflight.lock().push(state);
                        continue;
                    }
                    if completed {
                        self.inflight_stale.store(true, Ordering::SeqCst);
                    } else {
                        self.inflight.lock().push(state);
                    }
                }
                ExecResult::Deleted => {
                    if let Err(e) = self.persistence.delete_transaction(&state.mtx.id).await {
                        error!(tx_id = %state.mtx.id, error = %e, "failed to delete transaction");
                        self.inflight.lock().push(state);
                        continue;
                    }
                    self.inflight_stale.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    async fn reload_pending(&self, cancel: &CancellationToken) -> Result<Vec<ManagedTx>, TmError> {
        retry_until_cancelled("reload_pending", cancel, || {
            let persistence = self.persistence.clone();
            async move {
                let page = PageRequest::new(None, i64::MAX, SortDirection::Ascending)?;
                persistence.list_transactions_pending(page).await
            }
        })
        .await
    }
}

/// Whether a pending-tx cycle is due: the first cycle always is (`last` is
/// `None`); afterwards, only once `interval` has elapsed since the last one.
fn cycle_due(last: Option<DateTime<Utc>>, interval: std::time::Duration) -> bool {
    match last {
        None => true,
        Some(last) => {
            let elapsed = Utc::now().signed_duration_since(last);
            elapsed >= chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::zero())
        }
    }
}

//! The Engine: block lifecycle, transaction pipeline, and deferred execution.
//!
//! A block is an undo session on the store. Each transaction inside it runs
//! in a nested session, so a failing transaction leaves no trace and an
//! aborted block leaves nothing at all, deferred queue included.

use std::collections::{BTreeMap, BTreeSet};

use keystone_auth::{AuthorizationManager, AuthorizationSummary, LinkTable};
use keystone_core::{
    names, AccountName, Action, ActionName, Authority, Ed25519PublicKey, NewAccount,
    PermissionLevel, PermissionName, SignedTransaction, TimePoint, TransactionId,
};
use keystone_store::{DeferredRow, PermissionRow, StateStore};
use tracing::{debug, info, warn};

use crate::apply::{ActionHandler, ApplyContext};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::scheduler::{self, DeferredQueue, Disposition};
use crate::system;
use crate::trace::{ActionTrace, BlockSummary, ScheduleOutcome, TransactionStatus, TransactionTrace};

struct PendingBlock {
    time: TimePoint,
    traces: Vec<TransactionTrace>,
}

/// The main Engine struct.
///
/// Provides:
/// - Genesis account creation
/// - Block start, finalization and abort
/// - Transaction authorization, execution and deferral
/// - Read-only queries over permissions, links and the deferred queue
pub struct Engine<S: StateStore> {
    store: S,
    config: EngineConfig,
    handlers: BTreeMap<(AccountName, ActionName), Box<dyn ActionHandler>>,
    head_time: Option<TimePoint>,
    pending: Option<PendingBlock>,
}

impl<S: StateStore> Engine<S> {
    /// Create an engine over `store`, recording the system account if the
    /// store is fresh.
    pub fn new(store: S, config: EngineConfig) -> Result<Self> {
        if !store.account_exists(names::SYSTEM)? {
            store.create_account(names::SYSTEM, TimePoint::default())?;
        }
        info!(chain_id = %config.chain_id.to_hex(), "engine started");
        Ok(Self {
            store,
            config,
            handlers: BTreeMap::new(),
            head_time: None,
            pending: None,
        })
    }

    /// Register the handler for `code::action`, replacing any previous one.
    pub fn with_native_handler(
        mut self,
        code: AccountName,
        action: ActionName,
        handler: impl ActionHandler + 'static,
    ) -> Self {
        self.handlers.insert((code, action), Box::new(handler));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Time of the last finalized block.
    pub fn head_time(&self) -> Option<TimePoint> {
        self.head_time
    }

    pub fn pending_time(&self) -> Option<TimePoint> {
        self.pending.as_ref().map(|p| p.time)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Genesis
    // ─────────────────────────────────────────────────────────────────────────

    /// Create `name` with the given `owner` and `active` authorities,
    /// without any authorization check.
    pub fn create_account(
        &mut self,
        name: AccountName,
        owner: Authority,
        active: Authority,
    ) -> Result<()> {
        let now = self.pending_time().or(self.head_time).unwrap_or_default();
        let create = NewAccount {
            creator: names::SYSTEM,
            name,
            owner,
            active,
        };
        self.in_session(|| {
            system::create_account(&self.store, self.config.auth_config(), &create, now)
        })?;
        info!(account = %name, "created genesis account");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Blocks
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a block at `time` and run every deferred transaction that has
    /// matured by then.
    pub fn start_block(&mut self, time: TimePoint) -> Result<()> {
        if self.pending.is_some() {
            return Err(EngineError::Block("a block is already pending".into()));
        }
        if let Some(head) = self.head_time {
            if time <= head {
                return Err(EngineError::Block(format!(
                    "block time {time} does not advance past head block time {head}"
                )));
            }
        }

        self.store.begin_session()?;
        self.pending = Some(PendingBlock {
            time,
            traces: Vec::new(),
        });
        debug!(%time, "started block");

        if let Err(e) = self.prepare_block(time) {
            self.abort_block()?;
            return Err(e);
        }
        Ok(())
    }

    /// Commit the pending block.
    pub fn finalize_block(&mut self) -> Result<BlockSummary> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| EngineError::Block("no pending block to finalize".into()))?;
        self.store.squash_session()?;
        self.head_time = Some(pending.time);
        info!(time = %pending.time, transactions = pending.traces.len(), "finalized block");
        Ok(BlockSummary {
            time: pending.time,
            traces: pending.traces,
        })
    }

    /// Discard the pending block and every write made in it.
    pub fn abort_block(&mut self) -> Result<()> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| EngineError::Block("no pending block to abort".into()))?;
        self.store.undo_session()?;
        warn!(time = %pending.time, discarded = pending.traces.len(), "aborted block");
        Ok(())
    }

    /// Start and immediately finalize a block.
    pub fn produce_block(&mut self, time: TimePoint) -> Result<BlockSummary> {
        self.start_block(time)?;
        self.finalize_block()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate, authorize, and then execute or defer `trx` in the pending
    /// block.
    ///
    /// An `Err` means the transaction was rejected and left no trace.
    pub fn push_transaction(&mut self, trx: &SignedTransaction) -> Result<TransactionTrace> {
        let time = self.require_pending()?;
        let id = trx.id();

        let result = self.validate_transaction(trx, time).and_then(|keys| {
            self.in_session(|| {
                self.remember_transaction(trx, id)?;
                let declared = trx.transaction.delay_sec;
                let summary = self.authorize(trx, &keys, declared)?;
                match scheduler::decide(declared, time) {
                    Disposition::Defer { delay_until } => {
                        DeferredQueue::new(&self.store).schedule(
                            trx,
                            time,
                            delay_until,
                            self.config.deferred_trx_expiration_window,
                        )?;
                        let mut trace = TransactionTrace::new(id, TransactionStatus::Delayed, time);
                        trace.required_delay = summary.required_delay;
                        trace.delay_until = Some(delay_until);
                        Ok((trace, Vec::new()))
                    }
                    Disposition::ExecuteNow => {
                        let (mut trace, canceled) = self.apply_actions(trx, time)?;
                        trace.required_delay = summary.required_delay;
                        Ok((trace, canceled))
                    }
                }
            })
        });

        match result {
            Ok((trace, canceled)) => {
                debug!(trx = %id, status = ?trace.status, "accepted transaction");
                self.record(trace.clone(), canceled, time);
                Ok(trace)
            }
            Err(e) => {
                debug!(trx = %id, error = %e, "rejected transaction");
                Err(e)
            }
        }
    }

    /// [`push_transaction`](Self::push_transaction) with the outcome folded
    /// into one value.
    pub fn schedule_or_execute(&mut self, trx: &SignedTransaction) -> ScheduleOutcome {
        match self.push_transaction(trx) {
            Ok(trace) if trace.status == TransactionStatus::Delayed => {
                ScheduleOutcome::Delayed(trace)
            }
            Ok(trace) => ScheduleOutcome::Executed(trace),
            Err(e) => ScheduleOutcome::Rejected(e),
        }
    }

    /// Check the authorization of `trx` against current state without
    /// executing or deferring it.
    pub fn check_authorization(&self, trx: &SignedTransaction) -> Result<AuthorizationSummary> {
        let keys = trx.recover_keys(&self.config.chain_id)?;
        self.authorize(trx, &keys, trx.transaction.delay_sec)
    }

    /// The subset of `candidate_keys` that must sign `trx`.
    pub fn required_keys(
        &self,
        trx: &SignedTransaction,
        candidate_keys: &BTreeSet<Ed25519PublicKey>,
    ) -> Result<BTreeSet<Ed25519PublicKey>> {
        Ok(self.manager().required_keys(trx, candidate_keys)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get_permission(
        &self,
        account: AccountName,
        name: PermissionName,
    ) -> Result<Option<PermissionRow>> {
        Ok(self.store.find_permission(account, name)?)
    }

    /// The permission explicitly linked for `actor` on `code::action`.
    pub fn get_linked_permission(
        &self,
        actor: AccountName,
        code: AccountName,
        action: ActionName,
    ) -> Result<Option<PermissionName>> {
        Ok(LinkTable::new(&self.store).lookup_linked_permission(actor, code, action)?)
    }

    /// Deferred transactions sent by `account`.
    pub fn list_pending(&self, account: AccountName) -> Result<Vec<DeferredRow>> {
        DeferredQueue::new(&self.store).pending_for(account)
    }

    pub fn contract_row(&self, code: AccountName, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.store.get_contract_row(code, key)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn manager(&self) -> AuthorizationManager<'_, S> {
        AuthorizationManager::new(&self.store, self.config.auth_config())
    }

    fn require_pending(&self) -> Result<TimePoint> {
        self.pending_time()
            .ok_or_else(|| EngineError::Block("no pending block; call start_block first".into()))
    }

    /// Run `f` in a nested undo session, keeping its writes only on success.
    fn in_session<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.store.begin_session()?;
        match f() {
            Ok(value) => {
                self.store.squash_session()?;
                Ok(value)
            }
            Err(e) => {
                self.store.undo_session()?;
                Err(e)
            }
        }
    }

    /// Checks that need no chain state beyond the block time; returns the
    /// keys whose signatures verified.
    fn validate_transaction(
        &self,
        trx: &SignedTransaction,
        time: TimePoint,
    ) -> Result<BTreeSet<Ed25519PublicKey>> {
        let body = &trx.transaction;
        body.validate_structure()?;

        if body.expiration < time {
            return Err(EngineError::ExpiredTransaction(format!(
                "transaction expired at {}, block time is {time}",
                body.expiration
            )));
        }
        let latest = time.plus_secs(self.config.max_transaction_lifetime);
        if body.expiration > latest {
            return Err(EngineError::InvalidTransaction(format!(
                "transaction expiration {} is too far in the future; latest allowed is {latest}",
                body.expiration
            )));
        }
        if body.delay_sec > self.config.max_transaction_delay {
            return Err(EngineError::InvalidTransaction(format!(
                "declared delay of {} sec exceeds max_transaction_delay of {} sec",
                body.delay_sec, self.config.max_transaction_delay
            )));
        }

        let id = trx.id();
        if self.store.find_transaction(&id)?.is_some()
            && self.store.find_deferred_by_trx_id(&id)?.is_none()
        {
            return Err(EngineError::DuplicateTransaction(format!(
                "transaction {id} was already accepted"
            )));
        }

        Ok(trx.recover_keys(&self.config.chain_id)?)
    }

    /// Record the id of an accepted transaction until it expires. A pending
    /// deferral resubmitted as-is is already recorded.
    fn remember_transaction(&self, trx: &SignedTransaction, id: TransactionId) -> Result<()> {
        if self.store.find_transaction(&id)?.is_none() {
            self.store.insert_transaction(&id, trx.transaction.expiration)?;
        }
        Ok(())
    }

    fn authorize(
        &self,
        trx: &SignedTransaction,
        keys: &BTreeSet<Ed25519PublicKey>,
        declared_delay: u32,
    ) -> Result<AuthorizationSummary> {
        Ok(self.manager().check_authorization(
            &trx.transaction.actions,
            keys,
            &BTreeSet::<PermissionLevel>::new(),
            declared_delay,
            self.config.allow_unused_keys,
        )?)
    }

    /// Run every action in order; returns the trace and the ids of deferred
    /// transactions canceled along the way.
    fn apply_actions(
        &self,
        trx: &SignedTransaction,
        time: TimePoint,
    ) -> Result<(TransactionTrace, Vec<TransactionId>)> {
        let id = trx.id();
        let mut trace = TransactionTrace::new(id, TransactionStatus::Executed, time);
        let mut canceled = Vec::new();
        for action in &trx.transaction.actions {
            self.apply_action(action, id, time, &mut canceled)?;
            trace.actions.push(ActionTrace {
                account: action.account,
                name: action.name,
            });
        }
        Ok((trace, canceled))
    }

    fn apply_action(
        &self,
        action: &Action,
        trx_id: TransactionId,
        time: TimePoint,
        canceled: &mut Vec<TransactionId>,
    ) -> Result<()> {
        if !self.store.account_exists(action.account)? {
            return Err(EngineError::UnknownAccount(format!(
                "action {}::{} is addressed to a non-existent account",
                action.account, action.name
            )));
        }

        let mut ctx = ApplyContext::new(
            &self.store,
            action,
            trx_id,
            time,
            self.config.auth_config(),
            self.config.deferred_trx_expiration_window,
        );
        if system::is_system_action(action) {
            system::apply(&mut ctx)?;
        } else if let Some(handler) = self.handlers.get(&(action.account, action.name)) {
            handler.apply(&mut ctx)?;
        } else {
            debug!(
                code = %action.account,
                action = %action.name,
                "no handler registered; action has no effect"
            );
        }
        canceled.append(&mut ctx.canceled);
        Ok(())
    }

    fn prepare_block(&mut self, time: TimePoint) -> Result<()> {
        let purged = self.store.purge_expired_transactions(time)?;
        if purged > 0 {
            debug!(purged, "forgot expired transaction ids");
        }
        self.run_matured(time)
    }

    fn run_matured(&mut self, time: TimePoint) -> Result<()> {
        let due = DeferredQueue::new(&self.store).due(time)?;
        for row in due {
            let (trace, canceled) = self.execute_deferred(&row, time)?;
            self.record(trace, canceled, time);
        }
        Ok(())
    }

    /// Retire a matured entry and run it if it is still valid.
    ///
    /// Only store failures while retiring are returned as errors; every
    /// other failure becomes the status of the returned trace.
    fn execute_deferred(
        &self,
        row: &DeferredRow,
        time: TimePoint,
    ) -> Result<(TransactionTrace, Vec<TransactionId>)> {
        DeferredQueue::new(&self.store).retire(row)?;

        let failed = |status, error: &EngineError| {
            warn!(trx = %row.trx_id, ?status, %error, "deferred transaction failed");
            let trace = TransactionTrace::new(row.trx_id, status, time)
                .scheduled()
                .with_error(error);
            Ok((trace, Vec::new()))
        };

        if row.expiration < time {
            warn!(trx = %row.trx_id, expiration = %row.expiration, "deferred transaction expired");
            let trace =
                TransactionTrace::new(row.trx_id, TransactionStatus::Expired, time).scheduled();
            return Ok((trace, Vec::new()));
        }

        let trx = match SignedTransaction::from_bytes(&row.packed_trx) {
            Ok(trx) => trx,
            Err(e) => return failed(TransactionStatus::HardFail, &e.into()),
        };
        let keys = match trx.recover_keys(&self.config.chain_id) {
            Ok(keys) => keys,
            Err(e) => return failed(TransactionStatus::HardFail, &e.into()),
        };

        let result = self.in_session(|| {
            let summary = if scheduler::is_generated(row) {
                scheduler::authorize_generated(
                    &self.store,
                    self.config.auth_config(),
                    row.sender,
                    &trx.transaction.actions,
                    row.delay_sec(),
                )?
            } else {
                self.authorize(&trx, &keys, row.delay_sec())?
            };
            let (mut trace, canceled) = self.apply_actions(&trx, time)?;
            trace.required_delay = summary.required_delay;
            Ok((trace.scheduled(), canceled))
        });
        match result {
            Ok(applied) => {
                info!(trx = %row.trx_id, "executed deferred transaction");
                Ok(applied)
            }
            Err(e) => failed(TransactionStatus::SoftFail, &e),
        }
    }

    fn record(&mut self, trace: TransactionTrace, canceled: Vec<TransactionId>, time: TimePoint) {
        if let Some(pending) = self.pending.as_mut() {
            pending.traces.push(trace);
            pending.traces.extend(canceled.into_iter().map(|id| {
                TransactionTrace::new(id, TransactionStatus::Canceled, time).scheduled()
            }));
        }
    }
}

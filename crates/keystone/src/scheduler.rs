//! Delay Scheduler and Deferred Queue.
//!
//! A transaction that declares a delay is never executed when pushed. It is
//! stored here, keyed by `(sender, sender_id)` and indexed by maturity, and
//! runs at the first block whose time reaches `delay_until`.
//!
//! Native code may also queue transactions of its own under a sender id it
//! chooses. Those carry no signatures; they are authorized through the
//! sender's `eosio.code` permission, both when queued and when they run.

use std::collections::BTreeSet;

use keystone_auth::{AuthConfig, AuthError, AuthorizationManager, AuthorizationSummary};
use keystone_core::{
    names, AccountName, Action, PermissionLevel, SignedTransaction, TimePoint, Transaction,
    TransactionId,
};
use keystone_store::{DeferredRow, StateStore};
use tracing::{debug, info};

use crate::error::{EngineError, Result};

/// What to do with a transaction that passed authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    ExecuteNow,
    Defer { delay_until: TimePoint },
}

/// Execute now only when nothing was declared; any declared delay defers,
/// even one longer than authorization needed.
pub fn decide(declared_delay: u32, now: TimePoint) -> Disposition {
    if declared_delay == 0 {
        Disposition::ExecuteNow
    } else {
        Disposition::Defer {
            delay_until: now.plus_secs(declared_delay),
        }
    }
}

pub struct DeferredQueue<'a, S: StateStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: StateStore + ?Sized> DeferredQueue<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Queue `trx` to mature at `delay_until`, executable until
    /// `expiration_window` seconds later.
    ///
    /// The sender is the actor of the first declared authorization and the
    /// sender id is derived from the transaction id, so resubmitting the same
    /// transaction replaces its entry instead of duplicating it.
    pub fn schedule(
        &self,
        trx: &SignedTransaction,
        now: TimePoint,
        delay_until: TimePoint,
        expiration_window: u32,
    ) -> Result<DeferredRow> {
        let authorizer = first_authorization(trx)?;
        let trx_id = trx.id();
        self.enqueue(DeferredRow {
            sender: authorizer.actor,
            sender_id: trx_id.sender_id(),
            trx_id,
            authorizer,
            published: now,
            delay_until,
            expiration: delay_until.plus_secs(expiration_window),
            packed_trx: trx.to_bytes()?,
        })
    }

    /// Queue `trx` on behalf of the native code of `sender`, under the
    /// `sender_id` it chose. It matures `trx.delay_sec` after `now`.
    ///
    /// An existing entry with the same key is replaced only when
    /// `replace_existing` is set. The caller authorizes `trx` first.
    pub fn schedule_generated(
        &self,
        sender: AccountName,
        sender_id: u128,
        trx: Transaction,
        now: TimePoint,
        expiration_window: u32,
        replace_existing: bool,
    ) -> Result<DeferredRow> {
        if !replace_existing && self.store.find_deferred(sender, sender_id)?.is_some() {
            return Err(EngineError::DuplicateTransaction(format!(
                "deferred transaction with sender {sender} and sender_id {sender_id} already exists"
            )));
        }
        let delay_until = now.plus_secs(trx.delay_sec);
        let signed = SignedTransaction::unsigned(trx);
        self.enqueue(DeferredRow {
            sender,
            sender_id,
            trx_id: signed.id(),
            authorizer: code_level(sender),
            published: now,
            delay_until,
            expiration: delay_until.plus_secs(expiration_window),
            packed_trx: signed.to_bytes()?,
        })
    }

    fn enqueue(&self, row: DeferredRow) -> Result<DeferredRow> {
        if let Some(replaced) = self.store.upsert_deferred(&row)? {
            debug!(trx = %replaced.trx_id, sender = %row.sender, "replaced deferred transaction");
        }
        info!(
            trx = %row.trx_id,
            sender = %row.sender,
            until = %row.delay_until,
            "deferred transaction"
        );
        Ok(row)
    }

    /// Remove the entry for `trx_id` without running it.
    pub fn cancel(&self, trx_id: &TransactionId) -> Result<DeferredRow> {
        let row = self.store.find_deferred_by_trx_id(trx_id)?.ok_or_else(|| {
            EngineError::Auth(AuthError::TransactionNotFound(format!(
                "cannot cancel trx_id={trx_id}, \
                 there is no deferred transaction with that transaction id"
            )))
        })?;
        self.retire(&row)?;
        info!(trx = %trx_id, sender = %row.sender, "canceled deferred transaction");
        Ok(row)
    }

    /// Remove the entry `sender` queued under `sender_id`, if any.
    pub fn cancel_generated(
        &self,
        sender: AccountName,
        sender_id: u128,
    ) -> Result<Option<DeferredRow>> {
        let Some(row) = self.store.find_deferred(sender, sender_id)? else {
            return Ok(None);
        };
        self.retire(&row)?;
        info!(trx = %row.trx_id, %sender, sender_id, "canceled deferred transaction");
        Ok(Some(row))
    }

    /// Entries whose maturity is at or before `now`, in maturity order.
    pub fn due(&self, now: TimePoint) -> Result<Vec<DeferredRow>> {
        Ok(self.store.deferred_due(now)?)
    }

    /// Drop an entry from the queue, whatever its outcome.
    pub fn retire(&self, row: &DeferredRow) -> Result<()> {
        self.store.remove_deferred(row.sender, row.sender_id)?;
        Ok(())
    }

    pub fn pending_for(&self, sender: AccountName) -> Result<Vec<DeferredRow>> {
        Ok(self.store.deferred_by_sender(sender)?)
    }
}

/// The permission native code of `sender` acts with.
pub fn code_level(sender: AccountName) -> PermissionLevel {
    PermissionLevel::new(sender, names::CODE)
}

/// Whether `row` was queued by native code rather than pushed.
pub fn is_generated(row: &DeferredRow) -> bool {
    row.authorizer == code_level(row.sender)
}

/// Authorize the actions of a transaction generated by `sender`'s native
/// code: no keys, only `sender@eosio.code`, under `delay` seconds.
pub fn authorize_generated<S: StateStore + ?Sized>(
    store: &S,
    config: AuthConfig,
    sender: AccountName,
    actions: &[Action],
    delay: u32,
) -> Result<AuthorizationSummary> {
    let provided = BTreeSet::from([code_level(sender)]);
    Ok(AuthorizationManager::new(store, config).check_authorization(
        actions,
        &BTreeSet::new(),
        &provided,
        delay,
        true,
    )?)
}

fn first_authorization(trx: &SignedTransaction) -> Result<PermissionLevel> {
    trx.transaction
        .actions
        .first()
        .and_then(|action| action.authorization.first())
        .copied()
        .ok_or_else(|| {
            EngineError::InvalidTransaction("deferred transaction declares no authorization".into())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::Name;
    use keystone_store::MemoryStore;

    fn body(memo: &[u8], delay: u32) -> Transaction {
        let auth = PermissionLevel::new(Name::from_static("alice"), Name::from_static("active"));
        let action = Action::raw(
            Name::from_static("token"),
            Name::from_static("transfer"),
            vec![auth],
            memo.to_vec(),
        );
        Transaction::new(TimePoint::from_secs(500), vec![action]).with_delay(delay)
    }

    fn trx(memo: &[u8], delay: u32) -> SignedTransaction {
        SignedTransaction::unsigned(body(memo, delay))
    }

    #[test]
    fn test_decide() {
        let now = TimePoint::from_secs(100);
        assert_eq!(decide(0, now), Disposition::ExecuteNow);
        assert_eq!(
            decide(10, now),
            Disposition::Defer {
                delay_until: TimePoint::from_secs(110)
            }
        );
    }

    #[test]
    fn test_schedule_and_due_order() {
        let store = MemoryStore::new();
        let queue = DeferredQueue::new(&store);
        let now = TimePoint::from_secs(100);

        let late = queue.schedule(&trx(b"late", 30), now, now.plus_secs(30), 600).unwrap();
        let early = queue.schedule(&trx(b"early", 10), now, now.plus_secs(10), 600).unwrap();
        assert_eq!(early.sender, Name::from_static("alice"));
        assert_eq!(early.expiration, TimePoint::from_secs(710));
        assert_eq!(early.delay_sec(), 10);

        assert!(queue.due(TimePoint::from_secs(105)).unwrap().is_empty());
        let due = queue.due(TimePoint::from_secs(130)).unwrap();
        let ids: Vec<_> = due.iter().map(|r| r.trx_id).collect();
        assert_eq!(ids, vec![early.trx_id, late.trx_id]);
        assert_eq!(queue.pending_for(Name::from_static("alice")).unwrap().len(), 2);
    }

    #[test]
    fn test_resubmission_replaces() {
        let store = MemoryStore::new();
        let queue = DeferredQueue::new(&store);
        let t = trx(b"same", 10);
        queue.schedule(&t, TimePoint::from_secs(100), TimePoint::from_secs(110), 600).unwrap();
        queue.schedule(&t, TimePoint::from_secs(105), TimePoint::from_secs(115), 600).unwrap();

        let pending = queue.pending_for(Name::from_static("alice")).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].delay_until, TimePoint::from_secs(115));
    }

    #[test]
    fn test_cancel() {
        let store = MemoryStore::new();
        let queue = DeferredQueue::new(&store);
        let row = queue
            .schedule(&trx(b"x", 10), TimePoint::from_secs(100), TimePoint::from_secs(110), 600)
            .unwrap();
        queue.cancel(&row.trx_id).unwrap();
        assert!(queue.due(TimePoint::from_secs(200)).unwrap().is_empty());

        let err = queue.cancel(&row.trx_id).unwrap_err();
        assert!(err.to_string().contains("no deferred transaction"));
    }

    #[test]
    fn test_generated_entry_keyed_by_chosen_id() {
        let store = MemoryStore::new();
        let queue = DeferredQueue::new(&store);
        let app = Name::from_static("app");
        let now = TimePoint::from_secs(100);

        let first = queue
            .schedule_generated(app, 7, body(b"one", 5), now, 600, false)
            .unwrap();
        assert_eq!(first.delay_until, TimePoint::from_secs(105));
        assert!(is_generated(&first));

        let err = queue
            .schedule_generated(app, 7, body(b"two", 5), now, 600, false)
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTransaction(_)));

        let second = queue
            .schedule_generated(app, 7, body(b"two", 8), now, 600, true)
            .unwrap();
        assert_ne!(second.trx_id, first.trx_id);
        let pending = queue.pending_for(app).unwrap();
        assert_eq!(pending, vec![second.clone()]);

        assert_eq!(queue.cancel_generated(app, 7).unwrap(), Some(second));
        assert_eq!(queue.cancel_generated(app, 7).unwrap(), None);
    }

    #[test]
    fn test_pushed_entry_is_not_generated() {
        let store = MemoryStore::new();
        let queue = DeferredQueue::new(&store);
        let row = queue
            .schedule(&trx(b"x", 10), TimePoint::from_secs(100), TimePoint::from_secs(110), 600)
            .unwrap();
        assert!(!is_generated(&row));
    }
}

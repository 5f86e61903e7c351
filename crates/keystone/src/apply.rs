//! Native action dispatch.
//!
//! Contract execution is out of scope for the engine; an [`ActionHandler`]
//! registered for `(code, action)` stands in for it. Handlers see the
//! action and a row store scoped to the receiving account through
//! [`ApplyContext`], and may queue deferred transactions of their own.

use keystone_auth::AuthConfig;
use keystone_core::{AccountName, Action, TimePoint, Transaction, TransactionId};
use keystone_store::StateStore;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::scheduler::{self, DeferredQueue};

/// Executes one kind of action.
pub trait ActionHandler: Send + Sync {
    fn apply(&self, ctx: &mut ApplyContext<'_>) -> Result<()>;
}

impl<F> ActionHandler for F
where
    F: Fn(&mut ApplyContext<'_>) -> Result<()> + Send + Sync,
{
    fn apply(&self, ctx: &mut ApplyContext<'_>) -> Result<()> {
        self(ctx)
    }
}

/// What an action may see and touch while it runs.
pub struct ApplyContext<'a> {
    store: &'a dyn StateStore,
    action: &'a Action,
    trx_id: TransactionId,
    pending_time: TimePoint,
    auth_config: AuthConfig,
    expiration_window: u32,
    pub(crate) canceled: Vec<TransactionId>,
}

impl<'a> ApplyContext<'a> {
    pub(crate) fn new(
        store: &'a dyn StateStore,
        action: &'a Action,
        trx_id: TransactionId,
        pending_time: TimePoint,
        auth_config: AuthConfig,
        expiration_window: u32,
    ) -> Self {
        Self {
            store,
            action,
            trx_id,
            pending_time,
            auth_config,
            expiration_window,
            canceled: Vec::new(),
        }
    }

    pub fn action(&self) -> &Action {
        self.action
    }

    /// The account whose code handles the action.
    pub fn receiver(&self) -> AccountName {
        self.action.account
    }

    pub fn trx_id(&self) -> TransactionId {
        self.trx_id
    }

    pub fn pending_time(&self) -> TimePoint {
        self.pending_time
    }

    pub fn auth_config(&self) -> AuthConfig {
        self.auth_config
    }

    pub(crate) fn store(&self) -> &'a dyn StateStore {
        self.store
    }

    /// Decode the action payload.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(self.action.data_as()?)
    }

    pub fn has_authorization(&self, account: AccountName) -> bool {
        self.action.authorization.iter().any(|level| level.actor == account)
    }

    /// Fail unless `account` declared an authorization on this action.
    pub fn require_authorization(&self, account: AccountName) -> Result<()> {
        if !self.has_authorization(account) {
            return Err(EngineError::ActionFailed(format!(
                "missing authority of {account} on {}::{}",
                self.action.account, self.action.name
            )));
        }
        Ok(())
    }

    pub fn is_account(&self, account: AccountName) -> Result<bool> {
        Ok(self.store.account_exists(account)?)
    }

    /// Fail the action with `message` unless `condition` holds.
    pub fn check(&self, condition: bool, message: impl Into<String>) -> Result<()> {
        if condition {
            Ok(())
        } else {
            Err(EngineError::ActionFailed(message.into()))
        }
    }

    pub fn get_row(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.store.get_contract_row(self.receiver(), key)?)
    }

    pub fn set_row(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Ok(self.store.set_contract_row(self.receiver(), key, value)?)
    }

    pub fn remove_row(&self, key: &[u8]) -> Result<()> {
        Ok(self.store.remove_contract_row(self.receiver(), key)?)
    }

    /// Queue `trx` as a deferred transaction sent by the receiver under
    /// `sender_id`, maturing `trx.delay_sec` after the pending block.
    ///
    /// Every declared authorization of `trx` must be satisfiable through
    /// `receiver@eosio.code` within that delay. Fails with
    /// `DuplicateTransaction` if `sender_id` is taken and `replace_existing`
    /// is not set.
    pub fn schedule_deferred(
        &mut self,
        sender_id: u128,
        trx: Transaction,
        replace_existing: bool,
    ) -> Result<TransactionId> {
        let sender = self.receiver();
        trx.validate_structure()?;
        if trx.delay_sec > self.auth_config.max_transaction_delay {
            return Err(EngineError::InvalidTransaction(format!(
                "declared delay of {} sec exceeds max_transaction_delay of {} sec",
                trx.delay_sec, self.auth_config.max_transaction_delay
            )));
        }
        for action in &trx.actions {
            if !self.is_account(action.account)? {
                return Err(EngineError::UnknownAccount(format!(
                    "deferred action {}::{} is addressed to a non-existent account",
                    action.account, action.name
                )));
            }
        }
        scheduler::authorize_generated(
            self.store,
            self.auth_config,
            sender,
            &trx.actions,
            trx.delay_sec,
        )?;

        let row = DeferredQueue::new(self.store).schedule_generated(
            sender,
            sender_id,
            trx,
            self.pending_time,
            self.expiration_window,
            replace_existing,
        )?;
        Ok(row.trx_id)
    }

    /// Drop the deferred transaction the receiver queued under `sender_id`.
    ///
    /// Returns whether one was pending.
    pub fn cancel_deferred(&mut self, sender_id: u128) -> Result<bool> {
        let canceled = DeferredQueue::new(self.store).cancel_generated(self.receiver(), sender_id)?;
        match canceled {
            Some(row) => {
                self.canceled.push(row.trx_id);
                Ok(true)
            }
            None => {
                debug!(sender = %self.receiver(), sender_id, "nothing to cancel");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::{Name, PermissionLevel};
    use keystone_store::MemoryStore;

    fn action() -> Action {
        Action::raw(
            Name::from_static("token"),
            Name::from_static("issue"),
            vec![PermissionLevel::new(Name::from_static("alice"), Name::from_static("active"))],
            vec![],
        )
    }

    #[test]
    fn test_rows_scoped_to_receiver() {
        let store = MemoryStore::new();
        let action = action();
        let ctx = ApplyContext::new(
            &store,
            &action,
            TransactionId::ZERO,
            TimePoint::from_secs(1),
            AuthConfig::default(),
            600,
        );
        ctx.set_row(b"supply", b"100").unwrap();
        assert_eq!(ctx.get_row(b"supply").unwrap(), Some(b"100".to_vec()));
        assert_eq!(
            store.get_contract_row(Name::from_static("token"), b"supply").unwrap(),
            Some(b"100".to_vec())
        );
        assert_eq!(
            store.get_contract_row(Name::from_static("alice"), b"supply").unwrap(),
            None
        );
        ctx.remove_row(b"supply").unwrap();
        assert_eq!(ctx.get_row(b"supply").unwrap(), None);
    }

    #[test]
    fn test_require_authorization() {
        let store = MemoryStore::new();
        let action = action();
        let ctx = ApplyContext::new(
            &store,
            &action,
            TransactionId::ZERO,
            TimePoint::from_secs(1),
            AuthConfig::default(),
            600,
        );
        ctx.require_authorization(Name::from_static("alice")).unwrap();
        let err = ctx.require_authorization(Name::from_static("bob")).unwrap_err();
        assert!(err.to_string().contains("missing authority of bob"));
    }

    fn mark(ctx: &mut ApplyContext<'_>) -> Result<()> {
        ctx.set_row(b"hit", b"1")
    }

    #[test]
    fn test_fn_handler() {
        let store = MemoryStore::new();
        let action = action();
        let mut ctx = ApplyContext::new(
            &store,
            &action,
            TransactionId::ZERO,
            TimePoint::from_secs(1),
            AuthConfig::default(),
            600,
        );
        mark.apply(&mut ctx).unwrap();
        assert!(ctx.get_row(b"hit").unwrap().is_some());
    }
}

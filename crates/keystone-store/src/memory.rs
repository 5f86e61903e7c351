//! In-memory implementation of the StateStore trait.
//!
//! This is the default for tests and single-process simulations. It has the
//! same semantics as SQLite but keeps everything in BTreeMap indexes with no
//! persistence. Undo sessions are whole-state snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use keystone_core::{AccountName, ActionName, PermissionName, TimePoint, TransactionId};

use crate::error::{Result, StoreError};
use crate::traits::{DeferredRow, LinkRow, NewPermission, PermissionId, PermissionRow, StateStore};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

struct MemoryStoreInner {
    state: State,
    /// Snapshot taken at each `begin_session`, innermost last.
    sessions: Vec<State>,
}

#[derive(Clone, Default)]
struct State {
    accounts: BTreeMap<AccountName, TimePoint>,

    next_permission_id: PermissionId,
    permissions: BTreeMap<PermissionId, PermissionRow>,
    /// (owner, name) -> id.
    by_owner_name: BTreeMap<(AccountName, PermissionName), PermissionId>,
    /// (parent, child).
    by_parent: BTreeSet<(PermissionId, PermissionId)>,

    links: BTreeMap<(AccountName, AccountName, ActionName), LinkRow>,

    deferred: BTreeMap<(AccountName, u128), DeferredRow>,
    deferred_by_trx: BTreeMap<TransactionId, (AccountName, u128)>,
    /// (delay_until, trx_id).
    deferred_by_delay: BTreeSet<(TimePoint, TransactionId)>,

    transactions: BTreeMap<TransactionId, TimePoint>,
    /// (expiration, trx_id).
    transactions_by_expiration: BTreeSet<(TimePoint, TransactionId)>,

    contract_rows: BTreeMap<(AccountName, Vec<u8>), Vec<u8>>,
}

impl State {
    fn remove_deferred(&mut self, key: (AccountName, u128)) -> Option<DeferredRow> {
        let row = self.deferred.remove(&key)?;
        self.deferred_by_trx.remove(&row.trx_id);
        self.deferred_by_delay.remove(&(row.delay_until, row.trx_id));
        Some(row)
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner {
                state: State {
                    next_permission_id: 1,
                    ..State::default()
                },
                sessions: Vec::new(),
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStore {
    fn create_account(&self, name: AccountName, created: TimePoint) -> Result<()> {
        let mut inner = self.write()?;
        if inner.state.accounts.contains_key(&name) {
            return Err(StoreError::AlreadyExists(format!("account {name}")));
        }
        inner.state.accounts.insert(name, created);
        Ok(())
    }

    fn account_exists(&self, name: AccountName) -> Result<bool> {
        Ok(self.read()?.state.accounts.contains_key(&name))
    }

    fn insert_permission(&self, permission: NewPermission) -> Result<PermissionRow> {
        let mut inner = self.write()?;
        let state = &mut inner.state;

        let key = (permission.owner, permission.name);
        if state.by_owner_name.contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!(
                "permission {}@{}",
                permission.owner, permission.name
            )));
        }

        let id = state.next_permission_id;
        state.next_permission_id += 1;

        let row = PermissionRow {
            id,
            owner: permission.owner,
            name: permission.name,
            parent: permission.parent,
            auth: permission.auth,
            last_updated: permission.last_updated,
        };
        state.by_owner_name.insert(key, id);
        if let Some(parent) = row.parent {
            state.by_parent.insert((parent, id));
        }
        state.permissions.insert(id, row.clone());
        Ok(row)
    }

    fn permission_by_id(&self, id: PermissionId) -> Result<Option<PermissionRow>> {
        Ok(self.read()?.state.permissions.get(&id).cloned())
    }

    fn find_permission(
        &self,
        owner: AccountName,
        name: PermissionName,
    ) -> Result<Option<PermissionRow>> {
        let inner = self.read()?;
        Ok(inner
            .state
            .by_owner_name
            .get(&(owner, name))
            .and_then(|id| inner.state.permissions.get(id))
            .cloned())
    }

    fn update_permission(&self, row: &PermissionRow) -> Result<()> {
        let mut inner = self.write()?;
        let stored = inner
            .state
            .permissions
            .get_mut(&row.id)
            .ok_or_else(|| StoreError::NotFound(format!("permission id {}", row.id)))?;
        stored.auth = row.auth.clone();
        stored.last_updated = row.last_updated;
        Ok(())
    }

    fn remove_permission(&self, id: PermissionId) -> Result<()> {
        let mut inner = self.write()?;
        let state = &mut inner.state;
        let row = state
            .permissions
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("permission id {id}")))?;
        state.by_owner_name.remove(&(row.owner, row.name));
        if let Some(parent) = row.parent {
            state.by_parent.remove(&(parent, id));
        }
        Ok(())
    }

    fn child_permissions(&self, parent: PermissionId) -> Result<Vec<PermissionRow>> {
        let inner = self.read()?;
        Ok(inner
            .state
            .by_parent
            .range((parent, PermissionId::MIN)..=(parent, PermissionId::MAX))
            .filter_map(|(_, child)| inner.state.permissions.get(child).cloned())
            .collect())
    }

    fn permissions_of(&self, owner: AccountName) -> Result<Vec<PermissionRow>> {
        let inner = self.read()?;
        let mut rows: Vec<PermissionRow> = inner
            .state
            .by_owner_name
            .range(
                (owner, PermissionName::from_u64(0))..=(owner, PermissionName::from_u64(u64::MAX)),
            )
            .filter_map(|(_, id)| inner.state.permissions.get(id).cloned())
            .collect();
        rows.sort_by_key(|row| row.id);
        Ok(rows)
    }

    fn find_link(
        &self,
        account: AccountName,
        code: AccountName,
        message_type: ActionName,
    ) -> Result<Option<LinkRow>> {
        Ok(self
            .read()?
            .state
            .links
            .get(&(account, code, message_type))
            .copied())
    }

    fn insert_link(&self, link: &LinkRow) -> Result<()> {
        let mut inner = self.write()?;
        let key = (link.account, link.code, link.message_type);
        if inner.state.links.contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!(
                "link {}:{}:{}",
                link.account, link.code, link.message_type
            )));
        }
        inner.state.links.insert(key, *link);
        Ok(())
    }

    fn remove_link(
        &self,
        account: AccountName,
        code: AccountName,
        message_type: ActionName,
    ) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .state
            .links
            .remove(&(account, code, message_type))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("link {account}:{code}:{message_type}")))
    }

    fn links_requiring(
        &self,
        account: AccountName,
        permission: PermissionName,
    ) -> Result<Vec<LinkRow>> {
        let inner = self.read()?;
        let lo = (account, AccountName::from_u64(0), ActionName::from_u64(0));
        let hi = (account, AccountName::from_u64(u64::MAX), ActionName::from_u64(u64::MAX));
        Ok(inner
            .state
            .links
            .range(lo..=hi)
            .map(|(_, link)| *link)
            .filter(|link| link.required_permission == permission)
            .collect())
    }

    fn find_deferred(&self, sender: AccountName, sender_id: u128) -> Result<Option<DeferredRow>> {
        Ok(self.read()?.state.deferred.get(&(sender, sender_id)).cloned())
    }

    fn find_deferred_by_trx_id(&self, trx_id: &TransactionId) -> Result<Option<DeferredRow>> {
        let inner = self.read()?;
        Ok(inner
            .state
            .deferred_by_trx
            .get(trx_id)
            .and_then(|key| inner.state.deferred.get(key))
            .cloned())
    }

    fn upsert_deferred(&self, row: &DeferredRow) -> Result<Option<DeferredRow>> {
        let mut inner = self.write()?;
        let state = &mut inner.state;
        let key = (row.sender, row.sender_id);

        if let Some(other) = state.deferred_by_trx.get(&row.trx_id) {
            if *other != key {
                return Err(StoreError::AlreadyExists(format!(
                    "deferred transaction {}",
                    row.trx_id
                )));
            }
        }

        let replaced = state.remove_deferred(key);
        state.deferred_by_trx.insert(row.trx_id, key);
        state.deferred_by_delay.insert((row.delay_until, row.trx_id));
        state.deferred.insert(key, row.clone());
        Ok(replaced)
    }

    fn remove_deferred(&self, sender: AccountName, sender_id: u128) -> Result<bool> {
        let mut inner = self.write()?;
        Ok(inner.state.remove_deferred((sender, sender_id)).is_some())
    }

    fn deferred_due(&self, now: TimePoint) -> Result<Vec<DeferredRow>> {
        let inner = self.read()?;
        Ok(inner
            .state
            .deferred_by_delay
            .iter()
            .take_while(|(delay_until, _)| *delay_until <= now)
            .filter_map(|(_, trx_id)| inner.state.deferred_by_trx.get(trx_id))
            .filter_map(|key| inner.state.deferred.get(key).cloned())
            .collect())
    }

    fn deferred_by_sender(&self, sender: AccountName) -> Result<Vec<DeferredRow>> {
        let inner = self.read()?;
        Ok(inner
            .state
            .deferred
            .range((sender, u128::MIN)..=(sender, u128::MAX))
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn find_transaction(&self, trx_id: &TransactionId) -> Result<Option<TimePoint>> {
        Ok(self.read()?.state.transactions.get(trx_id).copied())
    }

    fn insert_transaction(&self, trx_id: &TransactionId, expiration: TimePoint) -> Result<()> {
        let mut inner = self.write()?;
        let state = &mut inner.state;
        if state.transactions.contains_key(trx_id) {
            return Err(StoreError::AlreadyExists(format!("transaction {trx_id}")));
        }
        state.transactions.insert(*trx_id, expiration);
        state.transactions_by_expiration.insert((expiration, *trx_id));
        Ok(())
    }

    fn purge_expired_transactions(&self, now: TimePoint) -> Result<usize> {
        let mut inner = self.write()?;
        let state = &mut inner.state;
        let expired: Vec<(TimePoint, TransactionId)> = state
            .transactions_by_expiration
            .iter()
            .take_while(|(expiration, _)| *expiration < now)
            .copied()
            .collect();
        for entry in &expired {
            state.transactions_by_expiration.remove(entry);
            state.transactions.remove(&entry.1);
        }
        Ok(expired.len())
    }

    fn get_contract_row(&self, code: AccountName, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .read()?
            .state
            .contract_rows
            .get(&(code, key.to_vec()))
            .cloned())
    }

    fn set_contract_row(&self, code: AccountName, key: &[u8], value: &[u8]) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .state
            .contract_rows
            .insert((code, key.to_vec()), value.to_vec());
        Ok(())
    }

    fn remove_contract_row(&self, code: AccountName, key: &[u8]) -> Result<()> {
        let mut inner = self.write()?;
        inner.state.contract_rows.remove(&(code, key.to_vec()));
        Ok(())
    }

    fn begin_session(&self) -> Result<usize> {
        let mut inner = self.write()?;
        let snapshot = inner.state.clone();
        inner.sessions.push(snapshot);
        Ok(inner.sessions.len())
    }

    fn squash_session(&self) -> Result<()> {
        let mut inner = self.write()?;
        inner.sessions.pop().map(|_| ()).ok_or(StoreError::NoSession)
    }

    fn undo_session(&self) -> Result<()> {
        let mut inner = self.write()?;
        let snapshot = inner.sessions.pop().ok_or(StoreError::NoSession)?;
        inner.state = snapshot;
        Ok(())
    }

    fn session_depth(&self) -> Result<usize> {
        Ok(self.read()?.sessions.len())
    }
}

//! StateStore trait: the ordered multi-index the engine persists into.
//!
//! Implementations include in-memory (tests, default) and SQLite
//! (persistent). Both must iterate deterministically so that every node
//! derives byte-identical state from the same blocks.

use keystone_core::{
    AccountName, ActionName, Authority, PermissionLevel, PermissionName, TimePoint,
    TransactionId,
};

use crate::error::Result;

/// Arena id of a permission row.
pub type PermissionId = u64;

/// One node of an account's permission tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRow {
    pub id: PermissionId,
    pub owner: AccountName,
    pub name: PermissionName,
    /// `None` only for `owner`.
    pub parent: Option<PermissionId>,
    pub auth: Authority,
    pub last_updated: TimePoint,
}

impl PermissionRow {
    pub fn level(&self) -> PermissionLevel {
        PermissionLevel::new(self.owner, self.name)
    }
}

/// Fields of a permission before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPermission {
    pub owner: AccountName,
    pub name: PermissionName,
    pub parent: Option<PermissionId>,
    pub auth: Authority,
    pub last_updated: TimePoint,
}

/// `(account, code, message_type) -> required_permission`.
///
/// An empty `message_type` is the wildcard entry for every action of `code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRow {
    pub account: AccountName,
    pub code: AccountName,
    pub message_type: ActionName,
    pub required_permission: PermissionName,
}

/// A transaction held until `delay_until`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredRow {
    pub sender: AccountName,
    pub sender_id: u128,
    pub trx_id: TransactionId,
    /// The declared authorization the deferral was justified by, or
    /// `sender@eosio.code` when native code queued it.
    pub authorizer: PermissionLevel,
    pub published: TimePoint,
    pub delay_until: TimePoint,
    pub expiration: TimePoint,
    /// CBOR-encoded signed transaction.
    pub packed_trx: Vec<u8>,
}

impl DeferredRow {
    /// Length of the deferral in whole seconds.
    pub fn delay_sec(&self) -> u32 {
        self.delay_until.secs_since(self.published)
    }
}

/// Ordered multi-index over accounts, permissions, links, deferred
/// transactions, accepted transaction ids and contract rows.
///
/// Every method takes `&self`; implementations synchronize internally.
///
/// # Sessions
///
/// `begin_session` opens a nested undo session. `squash_session` folds the
/// innermost session into its parent (or commits it when outermost) and
/// `undo_session` reverts every write made since the matching
/// `begin_session`, including writes to the deferred queue.
pub trait StateStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Accounts
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a new account. Fails with `AlreadyExists` on a duplicate.
    fn create_account(&self, name: AccountName, created: TimePoint) -> Result<()>;

    fn account_exists(&self, name: AccountName) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Permissions
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a permission and assign it the next id.
    ///
    /// Fails with `AlreadyExists` if `(owner, name)` is taken.
    fn insert_permission(&self, permission: NewPermission) -> Result<PermissionRow>;

    fn permission_by_id(&self, id: PermissionId) -> Result<Option<PermissionRow>>;

    fn find_permission(
        &self,
        owner: AccountName,
        name: PermissionName,
    ) -> Result<Option<PermissionRow>>;

    /// Overwrite the authority and timestamp of an existing row.
    ///
    /// The owner, name and parent of a row never change.
    fn update_permission(&self, row: &PermissionRow) -> Result<()>;

    fn remove_permission(&self, id: PermissionId) -> Result<()>;

    /// Direct children of `parent`, ordered by id.
    fn child_permissions(&self, parent: PermissionId) -> Result<Vec<PermissionRow>>;

    /// Every permission of `owner`, ordered by id.
    fn permissions_of(&self, owner: AccountName) -> Result<Vec<PermissionRow>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Links
    // ─────────────────────────────────────────────────────────────────────────

    fn find_link(
        &self,
        account: AccountName,
        code: AccountName,
        message_type: ActionName,
    ) -> Result<Option<LinkRow>>;

    /// Fails with `AlreadyExists` if the triple is already linked.
    fn insert_link(&self, link: &LinkRow) -> Result<()>;

    /// Fails with `NotFound` if the triple is not linked.
    fn remove_link(
        &self,
        account: AccountName,
        code: AccountName,
        message_type: ActionName,
    ) -> Result<()>;

    /// Links of `account` whose requirement is `permission`, ordered by
    /// `(code, message_type)`.
    fn links_requiring(
        &self,
        account: AccountName,
        permission: PermissionName,
    ) -> Result<Vec<LinkRow>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Deferred transactions
    // ─────────────────────────────────────────────────────────────────────────

    fn find_deferred(&self, sender: AccountName, sender_id: u128) -> Result<Option<DeferredRow>>;

    fn find_deferred_by_trx_id(&self, trx_id: &TransactionId) -> Result<Option<DeferredRow>>;

    /// Insert, replacing any row with the same `(sender, sender_id)`.
    ///
    /// Returns the replaced row.
    fn upsert_deferred(&self, row: &DeferredRow) -> Result<Option<DeferredRow>>;

    /// Remove by `(sender, sender_id)`; returns whether a row existed.
    fn remove_deferred(&self, sender: AccountName, sender_id: u128) -> Result<bool>;

    /// Rows with `delay_until <= now`, ordered by `delay_until` then trx id.
    fn deferred_due(&self, now: TimePoint) -> Result<Vec<DeferredRow>>;

    /// Rows sent by `sender`, ordered by sender id.
    fn deferred_by_sender(&self, sender: AccountName) -> Result<Vec<DeferredRow>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Applied transaction ids
    // ─────────────────────────────────────────────────────────────────────────

    /// Expiration of an accepted transaction whose id is still remembered.
    fn find_transaction(&self, trx_id: &TransactionId) -> Result<Option<TimePoint>>;

    /// Remember `trx_id` until `expiration`.
    ///
    /// Fails with `AlreadyExists` if the id is already remembered.
    fn insert_transaction(&self, trx_id: &TransactionId, expiration: TimePoint) -> Result<()>;

    /// Forget every id whose expiration is before `now`; returns how many.
    fn purge_expired_transactions(&self, now: TimePoint) -> Result<usize>;

    // ─────────────────────────────────────────────────────────────────────────
    // Contract rows (opaque state owned by native action handlers)
    // ─────────────────────────────────────────────────────────────────────────

    fn get_contract_row(&self, code: AccountName, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn set_contract_row(&self, code: AccountName, key: &[u8], value: &[u8]) -> Result<()>;

    fn remove_contract_row(&self, code: AccountName, key: &[u8]) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Undo sessions
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a nested session; returns the new nesting depth.
    fn begin_session(&self) -> Result<usize>;

    /// Keep the innermost session's writes.
    fn squash_session(&self) -> Result<()>;

    /// Revert the innermost session's writes.
    fn undo_session(&self) -> Result<()>;

    /// Number of open sessions.
    fn session_depth(&self) -> Result<usize>;
}

//! Link Table.
//!
//! Maps `(account, code, action)` to the minimum permission of `account`
//! required to authorize that action. An entry with an empty action is the
//! wildcard for every action of `code`. Lookup order is exact entry, then
//! wildcard, then the default `active`.

use keystone_core::{names, AccountName, ActionName, PermissionLevel, PermissionName};
use keystone_store::{LinkRow, StateStore};
use tracing::debug;

use crate::error::{AuthError, Result};

/// System actions that always require their default authorization.
const UNLINKABLE_SYSTEM_ACTIONS: [ActionName; 5] = [
    names::UPDATEAUTH,
    names::DELETEAUTH,
    names::LINKAUTH,
    names::UNLINKAUTH,
    names::CANCELDELAY,
];

pub struct LinkTable<'a, S: StateStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: StateStore + ?Sized> LinkTable<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// The permission explicitly linked for the triple, if any.
    ///
    /// Falls back from the exact action to the wildcard entry.
    pub fn lookup_linked_permission(
        &self,
        account: AccountName,
        code: AccountName,
        message_type: ActionName,
    ) -> Result<Option<PermissionName>> {
        if let Some(link) = self.store.find_link(account, code, message_type)? {
            return Ok(Some(link.required_permission));
        }
        Ok(self
            .store
            .find_link(account, code, ActionName::EMPTY)?
            .map(|link| link.required_permission))
    }

    /// The minimum permission of `account` that may authorize the action.
    ///
    /// `None` means any permission of the account will do (`eosio.any`).
    pub fn lookup_minimum_permission(
        &self,
        account: AccountName,
        code: AccountName,
        message_type: ActionName,
    ) -> Result<Option<PermissionName>> {
        match self.lookup_linked_permission(account, code, message_type)? {
            Some(name) if name == names::ANY => Ok(None),
            Some(name) => Ok(Some(name)),
            None => Ok(Some(names::ACTIVE)),
        }
    }

    /// Link `(account, code, message_type)` to `requirement`.
    pub fn link(
        &self,
        account: AccountName,
        code: AccountName,
        message_type: ActionName,
        requirement: PermissionName,
    ) -> Result<()> {
        check_linkable(code, message_type)?;

        if requirement.is_empty() {
            return Err(AuthError::ActionValidate("required permission cannot be empty".into()));
        }
        if !self.store.account_exists(account)? {
            return Err(AuthError::ActionValidate(format!(
                "Failed to retrieve account: {account}"
            )));
        }
        if !self.store.account_exists(code)? {
            return Err(AuthError::ActionValidate(format!(
                "Failed to retrieve code for account: {code}"
            )));
        }
        if requirement != names::ANY
            && self.store.find_permission(account, requirement)?.is_none()
        {
            return Err(AuthError::ActionValidate(format!(
                "Failed to retrieve permission: {}",
                PermissionLevel::new(account, requirement)
            )));
        }

        if let Some(existing) = self.store.find_link(account, code, message_type)? {
            return Err(AuthError::ActionValidate(format!(
                "Attempting to update required authority of {account} for {code}::{message_type}, \
                 which is already linked to {}; unlink it first",
                existing.required_permission
            )));
        }

        self.store.insert_link(&LinkRow {
            account,
            code,
            message_type,
            required_permission: requirement,
        })?;
        debug!(%account, %code, action = %message_type, %requirement, "linked authority");
        Ok(())
    }

    /// Remove the link for `(account, code, message_type)`.
    pub fn unlink(
        &self,
        account: AccountName,
        code: AccountName,
        message_type: ActionName,
    ) -> Result<()> {
        if self.store.find_link(account, code, message_type)?.is_none() {
            return Err(AuthError::ActionValidate(format!(
                "Attempting to unlink authority, but no link found for {account} on {code}::{message_type}"
            )));
        }
        self.store.remove_link(account, code, message_type)?;
        debug!(%account, %code, action = %message_type, "unlinked authority");
        Ok(())
    }
}

/// Reject links that would let a lesser permission run a permission or
/// scheduling action of the system account.
pub fn check_linkable(code: AccountName, message_type: ActionName) -> Result<()> {
    if code == names::SYSTEM && UNLINKABLE_SYSTEM_ACTIONS.contains(&message_type) {
        return Err(AuthError::ActionValidate(format!(
            "Cannot link {code}::{message_type} to a minimum permission"
        )));
    }
    Ok(())
}

//! Permission Graph Store.
//!
//! Every account owns a tree of permissions rooted at `owner`. Rows live in
//! the store's arena and reference their parent by id; this module enforces
//! the tree invariants on every mutation:
//!
//! - `owner` has no parent, every other permission has exactly one
//! - `active` is always a child of `owner`
//! - a parent, once set, never changes
//! - `owner` and `active` are never deleted
//! - a permission with children or links is never deleted

use keystone_core::{names, AccountName, Authority, PermissionLevel, PermissionName, TimePoint};
use keystone_store::{NewPermission, PermissionRow, StateStore};
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::{AuthError, Result};

/// Read and mutate the permission trees held in a [`StateStore`].
pub struct PermissionGraph<'a, S: StateStore + ?Sized> {
    store: &'a S,
    config: AuthConfig,
}

impl<'a, S: StateStore + ?Sized> PermissionGraph<'a, S> {
    pub fn new(store: &'a S, config: AuthConfig) -> Self {
        Self { store, config }
    }

    pub fn find_permission(&self, level: &PermissionLevel) -> Result<Option<PermissionRow>> {
        Ok(self.store.find_permission(level.actor, level.permission)?)
    }

    /// Fetch a permission that must exist.
    pub fn get_permission(&self, level: &PermissionLevel) -> Result<PermissionRow> {
        self.find_permission(level)?.ok_or_else(|| {
            AuthError::PermissionQuery(format!("Failed to retrieve permission: {level}"))
        })
    }

    pub fn parent_of(&self, row: &PermissionRow) -> Result<Option<PermissionRow>> {
        match row.parent {
            None => Ok(None),
            Some(id) => self.store.permission_by_id(id)?.map(Some).ok_or_else(|| {
                AuthError::PermissionQuery(format!(
                    "Failed to retrieve parent {id} of permission {}",
                    row.level()
                ))
            }),
        }
    }

    /// `row` followed by each of its ancestors, ending at `owner`.
    pub fn ancestors(&self, row: &PermissionRow) -> Result<Vec<PermissionRow>> {
        let mut chain = vec![row.clone()];
        let mut current = row.clone();
        while let Some(parent) = self.parent_of(&current)? {
            if chain.iter().any(|seen| seen.id == parent.id) {
                return Err(AuthError::PermissionQuery(format!(
                    "permission tree of {} contains a cycle at {}",
                    row.owner,
                    parent.level()
                )));
            }
            chain.push(parent.clone());
            current = parent;
        }
        Ok(chain)
    }

    /// Whether `permission` is `other` or one of its ancestors.
    pub fn satisfies(&self, permission: &PermissionRow, other: &PermissionRow) -> Result<bool> {
        if permission.owner != other.owner {
            return Ok(false);
        }
        Ok(self
            .ancestors(other)?
            .iter()
            .any(|ancestor| ancestor.id == permission.id))
    }

    /// Structural and referential validation of an authority.
    pub fn validate_authority(&self, auth: &Authority) -> Result<()> {
        auth.validate()
            .map_err(|e| AuthError::ActionValidate(format!("Invalid authority: {e}")))?;

        if let Some(wait) = auth.max_wait() {
            if wait > self.config.max_transaction_delay {
                return Err(AuthError::ActionValidate(format!(
                    "Cannot set delay longer than max_transaction_delay, which is {} seconds",
                    self.config.max_transaction_delay
                )));
            }
        }

        if let Some(bad) = auth.keys.iter().find(|k| !k.key.is_valid()) {
            return Err(AuthError::ActionValidate(format!(
                "Invalid authority: malformed public key {}",
                bad.key
            )));
        }

        for entry in &auth.accounts {
            let level = entry.permission;
            // owner, active and the code permission exist for every account
            let implicit = [names::OWNER, names::ACTIVE, names::CODE];
            let exists = if implicit.contains(&level.permission) {
                self.store.account_exists(level.actor)?
            } else {
                self.find_permission(&level)?.is_some()
            };
            if !exists {
                return Err(AuthError::ActionValidate(format!(
                    "Invalid authority: permission {level} does not exist"
                )));
            }
        }
        Ok(())
    }

    /// Create a permission under `parent` (empty only for `owner`).
    pub fn create_permission(
        &self,
        owner: AccountName,
        name: PermissionName,
        parent: PermissionName,
        auth: Authority,
        now: TimePoint,
    ) -> Result<PermissionRow> {
        check_names(name, parent)?;

        if !self.store.account_exists(owner)? {
            return Err(AuthError::ActionValidate(format!(
                "account {owner} does not exist"
            )));
        }
        self.validate_authority(&auth)?;

        let level = PermissionLevel::new(owner, name);
        if self.find_permission(&level)?.is_some() {
            return Err(AuthError::ActionValidate(format!(
                "permission {level} already exists"
            )));
        }

        let parent_id = if parent.is_empty() {
            None
        } else {
            let parent_level = PermissionLevel::new(owner, parent);
            let row = self.find_permission(&parent_level)?.ok_or_else(|| {
                AuthError::ActionValidate(format!(
                    "parent permission {parent_level} does not exist"
                ))
            })?;
            Some(row.id)
        };

        let row = self.store.insert_permission(NewPermission {
            owner,
            name,
            parent: parent_id,
            auth,
            last_updated: now,
        })?;
        debug!(permission = %level, parent = %parent, id = row.id, "created permission");
        Ok(row)
    }

    /// Replace the authority of an existing permission.
    ///
    /// `parent` must name the permission's current parent.
    pub fn update_permission(
        &self,
        owner: AccountName,
        name: PermissionName,
        parent: PermissionName,
        auth: Authority,
        now: TimePoint,
    ) -> Result<PermissionRow> {
        check_names(name, parent)?;

        let level = PermissionLevel::new(owner, name);
        let mut row = self.find_permission(&level)?.ok_or_else(|| {
            AuthError::ActionValidate(format!("permission {level} does not exist"))
        })?;
        self.check_same_parent(&row, parent)?;
        self.validate_authority(&auth)?;

        row.auth = auth;
        row.last_updated = now;
        self.store.update_permission(&row)?;
        debug!(permission = %level, "updated permission");
        Ok(row)
    }

    /// Fail unless `parent` names the stored parent of `row`.
    pub fn check_same_parent(&self, row: &PermissionRow, parent: PermissionName) -> Result<()> {
        let current = self
            .parent_of(row)?
            .map(|p| p.name)
            .unwrap_or(PermissionName::EMPTY);
        if current != parent {
            return Err(AuthError::ActionValidate(format!(
                "Changing parent authority is not currently supported ({} has parent '{current}', not '{parent}')",
                row.level()
            )));
        }
        Ok(())
    }

    /// Delete a leaf permission that no link references.
    pub fn delete_permission(&self, owner: AccountName, name: PermissionName) -> Result<()> {
        check_deletable(name)?;

        let row = self.get_permission(&PermissionLevel::new(owner, name))?;

        if !self.store.child_permissions(row.id)?.is_empty() {
            return Err(AuthError::ActionValidate(format!(
                "Cannot delete an authority which has children. Delete the children of {} first",
                row.level()
            )));
        }

        if let Some(link) = self.store.links_requiring(owner, name)?.first() {
            return Err(AuthError::ActionValidate(format!(
                "Cannot delete a linked authority. Unlink the authority first. This authority is linked to {}::{}",
                link.code,
                link.message_type
            )));
        }

        self.store.remove_permission(row.id)?;
        debug!(permission = %row.level(), "deleted permission");
        Ok(())
    }
}

/// Name rules that hold for both creation and update.
fn check_names(name: PermissionName, parent: PermissionName) -> Result<()> {
    let fail = |msg: &str| Err(AuthError::ActionValidate(msg.to_string()));

    if name.is_empty() {
        return fail("Cannot create an authority with an empty name");
    }
    if name.starts_with(names::RESERVED_PREFIX) {
        return fail("Permission names that start with 'eosio.' are reserved");
    }
    if name == parent {
        return fail("Cannot set an authority as its own parent");
    }
    if name == names::OWNER {
        if !parent.is_empty() {
            return fail("Cannot change owner authority's parent");
        }
    } else if parent.is_empty() {
        return fail("Only owner permission can have empty parent");
    }
    if name == names::ACTIVE && parent != names::OWNER {
        return fail("Cannot change active authority's parent from owner");
    }
    Ok(())
}

/// `owner` and `active` are irrevocable.
pub(crate) fn check_deletable(name: PermissionName) -> Result<()> {
    if name == names::ACTIVE {
        return Err(AuthError::ActionValidate("Cannot delete active authority".into()));
    }
    if name == names::OWNER {
        return Err(AuthError::ActionValidate("Cannot delete owner authority".into()));
    }
    Ok(())
}

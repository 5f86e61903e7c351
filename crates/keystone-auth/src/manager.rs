//! Transaction-level authorization.
//!
//! [`AuthorizationManager::check_authorization`] validates every declared
//! authorization of every action in a transaction:
//!
//! 1. System actions carry their own seniority rules (updateauth, deleteauth,
//!    linkauth, unlinkauth, canceldelay); other actions must be declared
//!    with at least the permission linked for them.
//! 2. Each distinct declared authorization is checked once with the
//!    [`AuthorityChecker`], and the delay it needs is compared to the delay
//!    the transaction committed to.

use std::collections::{BTreeMap, BTreeSet};

use keystone_core::{
    names, Action, CancelDelay, DeleteAuth, Ed25519PublicKey, LinkAuth, PermissionLevel,
    SignedTransaction, UnlinkAuth, UpdateAuth,
};
use keystone_store::StateStore;
use tracing::debug;

use crate::checker::AuthorityChecker;
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::graph::{check_deletable, PermissionGraph};
use crate::links::{check_linkable, LinkTable};

/// Outcome of a successful transaction authorization check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationSummary {
    /// Largest delay any declared authorization needs beyond its credit.
    pub required_delay: u32,
    /// Provided keys that contributed to a satisfied authorization.
    pub used_keys: BTreeSet<Ed25519PublicKey>,
    /// For each declared authorization, the permission that satisfied it.
    pub satisfied_by: BTreeMap<PermissionLevel, PermissionLevel>,
    /// Provided permission levels that contributed to nothing.
    pub irrelevant_levels: Vec<PermissionLevel>,
}

/// Checks declared authorizations against the permission graph and links.
pub struct AuthorizationManager<'a, S: StateStore + ?Sized> {
    store: &'a S,
    config: AuthConfig,
}

impl<'a, S: StateStore + ?Sized> AuthorizationManager<'a, S> {
    pub fn new(store: &'a S, config: AuthConfig) -> Self {
        Self { store, config }
    }

    pub fn graph(&self) -> PermissionGraph<'a, S> {
        PermissionGraph::new(self.store, self.config)
    }

    pub fn links(&self) -> LinkTable<'a, S> {
        LinkTable::new(self.store)
    }

    /// Check the declared authorizations of `actions`.
    ///
    /// `declared_delay` is the delay the transaction committed to. A
    /// declared authorization that needs more delay than that (after any
    /// `canceldelay` credit) fails with `MissingAuthority`; one that cannot
    /// be satisfied at all fails with `UnsatisfiedAuthorization`.
    pub fn check_authorization(
        &self,
        actions: &[Action],
        provided_keys: &BTreeSet<Ed25519PublicKey>,
        provided_levels: &BTreeSet<PermissionLevel>,
        declared_delay: u32,
        allow_unused_keys: bool,
    ) -> Result<AuthorizationSummary> {
        // declared authorization -> smallest delay credit it was declared with
        let mut to_satisfy: BTreeMap<PermissionLevel, u32> = BTreeMap::new();

        for action in actions {
            if action.authorization.is_empty() {
                return Err(AuthError::NoAuthorizations(format!(
                    "action {}::{} declares no authorization",
                    action.account, action.name
                )));
            }

            let mut credit = 0;
            let mut special_case = false;
            if action.account == names::SYSTEM {
                special_case = true;
                match action.name {
                    n if n == names::UPDATEAUTH => {
                        self.check_updateauth(&action.data_as()?, &action.authorization)?
                    }
                    n if n == names::DELETEAUTH => {
                        self.check_deleteauth(&action.data_as()?, &action.authorization)?
                    }
                    n if n == names::LINKAUTH => {
                        self.check_linkauth(&action.data_as()?, &action.authorization)?
                    }
                    n if n == names::UNLINKAUTH => {
                        self.check_unlinkauth(&action.data_as()?, &action.authorization)?
                    }
                    n if n == names::CANCELDELAY => {
                        credit = self.check_canceldelay(&action.data_as()?, &action.authorization)?
                    }
                    _ => special_case = false,
                }
            }

            for declared in &action.authorization {
                if !special_case {
                    self.check_minimum_permission(action, declared)?;
                }
                to_satisfy
                    .entry(*declared)
                    .and_modify(|c| *c = (*c).min(credit))
                    .or_insert(credit);
            }
        }

        let mut checker = AuthorityChecker::new(
            self.store,
            self.config,
            provided_keys.clone(),
            provided_levels.clone(),
        );
        let mut summary = AuthorizationSummary::default();

        for (declared, credit) in &to_satisfy {
            let allowed = declared_delay.max(*credit);
            let satisfaction = checker.check(declared)?.ok_or_else(|| {
                AuthError::UnsatisfiedAuthorization(format!(
                    "transaction declares authority '{declared}', but does not have signatures for it \
                     under any delay; provided keys {}",
                    format_keys(provided_keys)
                ))
            })?;
            if satisfaction.delay > allowed {
                return Err(AuthError::MissingAuthority(format!(
                    "transaction declares authority '{declared}', but does not have signatures for it \
                     under a provided delay of {declared_delay} sec; it requires a delay of {} sec",
                    satisfaction.delay
                )));
            }
            let effective = if satisfaction.delay <= *credit {
                0
            } else {
                satisfaction.delay
            };
            summary.required_delay = summary.required_delay.max(effective);
            summary.satisfied_by.insert(*declared, satisfaction.via);
        }

        if !allow_unused_keys {
            let unused = checker.unused_keys();
            if !unused.is_empty() {
                return Err(AuthError::IrrelevantSignature(format!(
                    "transaction bears irrelevant signatures from these keys: {}",
                    format_keys(&unused)
                )));
            }
        }

        summary.used_keys = checker.used_keys().clone();
        summary.irrelevant_levels = checker.irrelevant_levels();
        debug!(
            declared = to_satisfy.len(),
            required_delay = summary.required_delay,
            "authorization satisfied"
        );
        Ok(summary)
    }

    /// The subset of `candidate_keys` needed to authorize `trx`.
    pub fn required_keys(
        &self,
        trx: &SignedTransaction,
        candidate_keys: &BTreeSet<Ed25519PublicKey>,
    ) -> Result<BTreeSet<Ed25519PublicKey>> {
        let summary = self.check_authorization(
            &trx.transaction.actions,
            candidate_keys,
            &BTreeSet::new(),
            trx.transaction.delay_sec,
            true,
        )?;
        Ok(summary.used_keys)
    }

    fn check_minimum_permission(&self, action: &Action, declared: &PermissionLevel) -> Result<()> {
        let Some(min_name) = self.links().lookup_minimum_permission(
            declared.actor,
            action.account,
            action.name,
        )?
        else {
            return Ok(());
        };
        let graph = self.graph();
        let min = graph.get_permission(&PermissionLevel::new(declared.actor, min_name))?;
        let have = graph.get_permission(declared)?;
        if !graph.satisfies(&have, &min)? {
            return Err(AuthError::IrrelevantAuthority(format!(
                "action declares irrelevant authority '{declared}'; minimum authority is {}",
                min.level()
            )));
        }
        Ok(())
    }

    /// Exactly one declared authorization, by `account`.
    fn single_auth<'b>(
        &self,
        action: &str,
        auths: &'b [PermissionLevel],
        account: keystone_core::AccountName,
    ) -> Result<&'b PermissionLevel> {
        let [auth] = auths else {
            return Err(AuthError::IrrelevantAuthority(format!(
                "{action} action should only have one declared authorization"
            )));
        };
        if auth.actor != account {
            return Err(AuthError::IrrelevantAuthority(format!(
                "the owner of the affected permission needs to be the actor of the declared authorization in {action}"
            )));
        }
        Ok(auth)
    }

    fn require_satisfies(
        &self,
        action: &str,
        declared: &PermissionLevel,
        minimum: &PermissionLevel,
    ) -> Result<()> {
        let graph = self.graph();
        let have = graph.get_permission(declared)?;
        let min = graph.get_permission(minimum)?;
        if !graph.satisfies(&have, &min)? {
            return Err(AuthError::IrrelevantAuthority(format!(
                "{action} action declares irrelevant authority '{declared}'; minimum authority is {minimum}"
            )));
        }
        Ok(())
    }

    /// Creating or updating a permission needs its parent (`owner` needs itself).
    fn check_updateauth(&self, update: &UpdateAuth, auths: &[PermissionLevel]) -> Result<()> {
        let auth = self.single_auth("updateauth", auths, update.account)?;
        let graph = self.graph();
        let target = PermissionLevel::new(update.account, update.permission);

        if let Some(existing) = graph.find_permission(&target)? {
            graph.check_same_parent(&existing, update.parent)?;
        }

        let minimum = if update.permission == names::OWNER {
            target
        } else {
            PermissionLevel::new(update.account, update.parent)
        };
        self.require_satisfies("updateauth", auth, &minimum)
    }

    /// Deleting a permission needs its parent.
    fn check_deleteauth(&self, delete: &DeleteAuth, auths: &[PermissionLevel]) -> Result<()> {
        let auth = self.single_auth("deleteauth", auths, delete.account)?;
        check_deletable(delete.permission)?;

        let graph = self.graph();
        let target =
            graph.get_permission(&PermissionLevel::new(delete.account, delete.permission))?;
        let minimum = graph.parent_of(&target)?.unwrap_or(target);
        self.require_satisfies("deleteauth", auth, &minimum.level())
    }

    /// Linking needs whatever currently guards the triple.
    fn check_linkauth(&self, link: &LinkAuth, auths: &[PermissionLevel]) -> Result<()> {
        let auth = self.single_auth("linkauth", auths, link.account)?;
        check_linkable(link.code, link.message_type)?;

        let Some(current) = self.links().lookup_minimum_permission(
            link.account,
            link.code,
            link.message_type,
        )?
        else {
            return Ok(());
        };
        self.require_satisfies("link", auth, &PermissionLevel::new(link.account, current))
    }

    /// Unlinking needs the permission the triple is linked to.
    fn check_unlinkauth(&self, unlink: &UnlinkAuth, auths: &[PermissionLevel]) -> Result<()> {
        let auth = self.single_auth("unlinkauth", auths, unlink.account)?;

        let linked = self
            .links()
            .lookup_linked_permission(unlink.account, unlink.code, unlink.message_type)?
            .ok_or_else(|| {
                AuthError::ActionValidate(format!(
                    "cannot unlink non-existent permission link of account '{}' for actions matching '{}::{}'",
                    unlink.account, unlink.code, unlink.message_type
                ))
            })?;
        if linked == names::ANY {
            return Ok(());
        }
        self.require_satisfies("unlink", auth, &PermissionLevel::new(unlink.account, linked))
    }

    /// Returns the delay credit: the length of the original deferral.
    fn check_canceldelay(&self, cancel: &CancelDelay, auths: &[PermissionLevel]) -> Result<u32> {
        let [auth] = auths else {
            return Err(AuthError::IrrelevantAuthority(
                "canceldelay action should only have one declared authorization".into(),
            ));
        };

        let graph = self.graph();
        let have = graph.get_permission(auth)?;
        let min = graph.get_permission(&cancel.canceling_auth)?;
        if !graph.satisfies(&have, &min)? {
            return Err(AuthError::IrrelevantAuthority(format!(
                "canceldelay action declares irrelevant authority '{auth}'; specified authority to satisfy is {}",
                cancel.canceling_auth
            )));
        }

        let deferred = self
            .store
            .find_deferred_by_trx_id(&cancel.trx_id)?
            .ok_or_else(|| {
                AuthError::TransactionNotFound(format!(
                    "cannot cancel trx_id={}, there is no deferred transaction with that transaction id",
                    cancel.trx_id
                ))
            })?;
        let original = SignedTransaction::from_bytes(&deferred.packed_trx)?;
        let found = original
            .transaction
            .actions
            .iter()
            .flat_map(|a| a.authorization.iter())
            .any(|level| *level == cancel.canceling_auth);
        if !found {
            return Err(AuthError::ActionValidate(
                "canceling_auth in canceldelay action was not found as authorization in the original delayed transaction".into(),
            ));
        }

        Ok(deferred.delay_sec())
    }
}

fn format_keys(keys: &BTreeSet<Ed25519PublicKey>) -> String {
    let parts: Vec<String> = keys.iter().map(|k| k.to_hex()).collect();
    format!("[{}]", parts.join(", "))
}

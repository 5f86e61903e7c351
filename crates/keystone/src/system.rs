//! Permission Mutation Actions of the system account.
//!
//! These run after the transaction has passed authorization, so they only
//! enforce the structural rules of the permission graph, the link table and
//! the deferred queue.

use keystone_auth::{AuthConfig, LinkTable, PermissionGraph};
use keystone_core::{
    names, Action, CancelDelay, DeleteAuth, LinkAuth, Name, NewAccount, PermissionLevel, TimePoint,
    UnlinkAuth, UpdateAuth,
};
use keystone_store::StateStore;
use tracing::info;

use crate::apply::ApplyContext;
use crate::error::{EngineError, Result};
use crate::scheduler::DeferredQueue;

/// Whether `action` is one of the built-in system actions.
pub fn is_system_action(action: &Action) -> bool {
    action.account == names::SYSTEM
        && [
            names::NEWACCOUNT,
            names::UPDATEAUTH,
            names::DELETEAUTH,
            names::LINKAUTH,
            names::UNLINKAUTH,
            names::CANCELDELAY,
        ]
        .contains(&action.name)
}

/// Apply a built-in system action.
///
/// The caller ensures [`is_system_action`] holds.
pub fn apply(ctx: &mut ApplyContext<'_>) -> Result<()> {
    match ctx.action().name {
        n if n == names::NEWACCOUNT => apply_newaccount(ctx),
        n if n == names::UPDATEAUTH => apply_updateauth(ctx),
        n if n == names::DELETEAUTH => apply_deleteauth(ctx),
        n if n == names::LINKAUTH => apply_linkauth(ctx),
        n if n == names::UNLINKAUTH => apply_unlinkauth(ctx),
        n if n == names::CANCELDELAY => apply_canceldelay(ctx),
        other => Err(EngineError::ActionFailed(format!(
            "{other} is not a system action"
        ))),
    }
}

fn graph<'a>(ctx: &ApplyContext<'a>) -> PermissionGraph<'a, dyn StateStore + 'a> {
    PermissionGraph::new(ctx.store(), ctx.auth_config())
}

fn apply_newaccount(ctx: &mut ApplyContext<'_>) -> Result<()> {
    let create: NewAccount = ctx.data_as()?;
    ctx.require_authorization(create.creator)?;

    ctx.check(!create.name.is_empty(), "account name cannot be empty")?;
    if create.name.starts_with(names::RESERVED_PREFIX) {
        ctx.check(
            create.creator == names::SYSTEM,
            "only the system account may create accounts with the 'eosio.' prefix",
        )?;
    }
    ctx.check(
        !ctx.is_account(create.name)?,
        format!("cannot create account named {}, as that name is already taken", create.name),
    )?;

    create_account(ctx.store(), ctx.auth_config(), &create, ctx.pending_time())?;
    info!(account = %create.name, creator = %create.creator, "created account");
    Ok(())
}

/// The account row plus its `owner` and `active` permissions.
pub(crate) fn create_account(
    store: &dyn StateStore,
    config: AuthConfig,
    create: &NewAccount,
    now: TimePoint,
) -> Result<()> {
    let graph = PermissionGraph::new(store, config);
    graph.validate_authority(&create.owner)?;
    graph.validate_authority(&create.active)?;

    store.create_account(create.name, now)?;
    graph.create_permission(create.name, names::OWNER, Name::EMPTY, create.owner.clone(), now)?;
    graph.create_permission(create.name, names::ACTIVE, names::OWNER, create.active.clone(), now)?;
    Ok(())
}

fn apply_updateauth(ctx: &mut ApplyContext<'_>) -> Result<()> {
    let update: UpdateAuth = ctx.data_as()?;
    ctx.require_authorization(update.account)?;

    let graph = graph(ctx);
    let level = PermissionLevel::new(update.account, update.permission);
    let now = ctx.pending_time();
    if graph.find_permission(&level)?.is_some() {
        graph.update_permission(
            update.account,
            update.permission,
            update.parent,
            update.auth,
            now,
        )?;
    } else {
        graph.create_permission(
            update.account,
            update.permission,
            update.parent,
            update.auth,
            now,
        )?;
    }
    Ok(())
}

fn apply_deleteauth(ctx: &mut ApplyContext<'_>) -> Result<()> {
    let delete: DeleteAuth = ctx.data_as()?;
    ctx.require_authorization(delete.account)?;
    graph(ctx).delete_permission(delete.account, delete.permission)?;
    Ok(())
}

fn apply_linkauth(ctx: &mut ApplyContext<'_>) -> Result<()> {
    let link: LinkAuth = ctx.data_as()?;
    ctx.require_authorization(link.account)?;
    LinkTable::new(ctx.store()).link(link.account, link.code, link.message_type, link.requirement)?;
    Ok(())
}

fn apply_unlinkauth(ctx: &mut ApplyContext<'_>) -> Result<()> {
    let unlink: UnlinkAuth = ctx.data_as()?;
    ctx.require_authorization(unlink.account)?;
    LinkTable::new(ctx.store()).unlink(unlink.account, unlink.code, unlink.message_type)?;
    Ok(())
}

fn apply_canceldelay(ctx: &mut ApplyContext<'_>) -> Result<()> {
    let cancel: CancelDelay = ctx.data_as()?;
    ctx.require_authorization(cancel.canceling_auth.actor)?;

    let row = DeferredQueue::new(ctx.store()).cancel(&cancel.trx_id)?;
    ctx.canceled.push(row.trx_id);
    Ok(())
}

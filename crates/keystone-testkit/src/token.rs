//! A minimal native token contract.
//!
//! Balances live in contract rows of the `token` account, keyed by the
//! holder's name. `issue` needs the token account's authorization and
//! `transfer` needs the sender's.

use keystone::{ActionHandler, ApplyContext, Engine, EngineError, Result};
use keystone_core::{AccountName, Action, ActionName, Name, PermissionLevel};
use keystone_store::StateStore;
use serde::{Deserialize, Serialize};

pub const TOKEN: AccountName = Name::from_static("token");
pub const ISSUE: ActionName = Name::from_static("issue");
pub const TRANSFER: ActionName = Name::from_static("transfer");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub to: AccountName,
    pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: AccountName,
    pub to: AccountName,
    pub quantity: u64,
    pub memo: String,
}

/// Register the token handlers on `engine`.
pub fn install<S: StateStore>(engine: Engine<S>) -> Engine<S> {
    engine
        .with_native_handler(TOKEN, ISSUE, IssueHandler)
        .with_native_handler(TOKEN, TRANSFER, TransferHandler)
}

pub fn issue_action(to: AccountName, quantity: u64, auth: PermissionLevel) -> Result<Action> {
    Ok(Action::new(TOKEN, ISSUE, vec![auth], &Issue { to, quantity })?)
}

pub fn transfer_action(
    from: AccountName,
    to: AccountName,
    quantity: u64,
    auth: PermissionLevel,
) -> Result<Action> {
    let transfer = Transfer {
        from,
        to,
        quantity,
        memo: String::new(),
    };
    Ok(Action::new(TOKEN, TRANSFER, vec![auth], &transfer)?)
}

/// Current balance of `account`; zero if it never held tokens.
pub fn balance<S: StateStore>(engine: &Engine<S>, account: AccountName) -> Result<u64> {
    decode(engine.contract_row(TOKEN, &row_key(account))?)
}

struct IssueHandler;

impl ActionHandler for IssueHandler {
    fn apply(&self, ctx: &mut ApplyContext<'_>) -> Result<()> {
        let issue: Issue = ctx.data_as()?;
        ctx.require_authorization(ctx.receiver())?;
        ctx.check(issue.quantity > 0, "must issue a positive quantity")?;
        ctx.check(ctx.is_account(issue.to)?, format!("account {} does not exist", issue.to))?;

        let current = read(ctx, issue.to)?;
        let updated = current
            .checked_add(issue.quantity)
            .ok_or_else(|| EngineError::ActionFailed("supply overflow".into()))?;
        write(ctx, issue.to, updated)
    }
}

struct TransferHandler;

impl ActionHandler for TransferHandler {
    fn apply(&self, ctx: &mut ApplyContext<'_>) -> Result<()> {
        let transfer: Transfer = ctx.data_as()?;
        ctx.require_authorization(transfer.from)?;
        ctx.check(transfer.from != transfer.to, "cannot transfer to self")?;
        ctx.check(transfer.quantity > 0, "must transfer a positive quantity")?;
        ctx.check(
            ctx.is_account(transfer.to)?,
            format!("account {} does not exist", transfer.to),
        )?;

        let from_balance = read(ctx, transfer.from)?;
        ctx.check(from_balance >= transfer.quantity, "overdrawn balance")?;
        let to_balance = read(ctx, transfer.to)?
            .checked_add(transfer.quantity)
            .ok_or_else(|| EngineError::ActionFailed("balance overflow".into()))?;

        write(ctx, transfer.from, from_balance - transfer.quantity)?;
        write(ctx, transfer.to, to_balance)
    }
}

fn row_key(account: AccountName) -> [u8; 8] {
    account.as_u64().to_be_bytes()
}

fn decode(row: Option<Vec<u8>>) -> Result<u64> {
    match row {
        None => Ok(0),
        Some(bytes) => {
            let array: [u8; 8] = bytes
                .try_into()
                .map_err(|_| EngineError::ActionFailed("corrupt balance row".into()))?;
            Ok(u64::from_le_bytes(array))
        }
    }
}

fn read(ctx: &ApplyContext<'_>, account: AccountName) -> Result<u64> {
    decode(ctx.get_row(&row_key(account))?)
}

fn write(ctx: &ApplyContext<'_>, account: AccountName, amount: u64) -> Result<()> {
    ctx.set_row(&row_key(account), &amount.to_le_bytes())
}

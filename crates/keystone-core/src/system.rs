//! Payloads of the built-in system actions hosted by the `eosio` account.

use serde::{Deserialize, Serialize};

use crate::authority::Authority;
use crate::error::Result;
use crate::transaction::Action;
use crate::types::{names, AccountName, ActionName, PermissionLevel, PermissionName, TransactionId};

/// Create a new account with `owner` and `active` permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub creator: AccountName,
    pub name: AccountName,
    pub owner: Authority,
    pub active: Authority,
}

/// Create or update a permission.
///
/// `parent` is empty only when `permission` is `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAuth {
    pub account: AccountName,
    pub permission: PermissionName,
    pub parent: PermissionName,
    pub auth: Authority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteAuth {
    pub account: AccountName,
    pub permission: PermissionName,
}

/// Require `requirement` for `(code, type)` actions authorized by `account`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAuth {
    pub account: AccountName,
    pub code: AccountName,
    #[serde(rename = "type")]
    pub message_type: ActionName,
    pub requirement: PermissionName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlinkAuth {
    pub account: AccountName,
    pub code: AccountName,
    #[serde(rename = "type")]
    pub message_type: ActionName,
}

/// Cancel a delayed transaction that `canceling_auth` authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelDelay {
    pub canceling_auth: PermissionLevel,
    pub trx_id: TransactionId,
}

/// Typed view over a system action payload.
pub trait SystemPayload: Serialize {
    const NAME: ActionName;

    /// Wrap this payload in an action addressed to the system account.
    fn into_action(&self, authorization: Vec<PermissionLevel>) -> Result<Action>
    where
        Self: Sized,
    {
        Action::new(names::SYSTEM, Self::NAME, authorization, self)
    }
}

impl SystemPayload for NewAccount {
    const NAME: ActionName = names::NEWACCOUNT;
}

impl SystemPayload for UpdateAuth {
    const NAME: ActionName = names::UPDATEAUTH;
}

impl SystemPayload for DeleteAuth {
    const NAME: ActionName = names::DELETEAUTH;
}

impl SystemPayload for LinkAuth {
    const NAME: ActionName = names::LINKAUTH;
}

impl SystemPayload for UnlinkAuth {
    const NAME: ActionName = names::UNLINKAUTH;
}

impl SystemPayload for CancelDelay {
    const NAME: ActionName = names::CANCELDELAY;
}

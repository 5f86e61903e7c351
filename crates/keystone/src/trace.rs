//! Records of what happened to each transaction in a block.

use keystone_core::{AccountName, ActionName, TimePoint, TransactionId};
use serde::Serialize;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Ran to completion; its writes are part of the block.
    Executed,
    /// A matured deferred transaction failed; only its removal from the
    /// queue persists.
    SoftFail,
    /// A matured deferred transaction could not even be decoded or verified.
    HardFail,
    /// Accepted and queued until its delay elapses.
    Delayed,
    /// Matured after its expiration and was dropped.
    Expired,
    /// Removed from the queue by `canceldelay`.
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionTrace {
    pub account: AccountName,
    pub name: ActionName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionTrace {
    pub id: TransactionId,
    pub status: TransactionStatus,
    pub block_time: TimePoint,
    /// Whether this trace comes from the deferred queue.
    pub scheduled: bool,
    /// Delay the authorization needed beyond any `canceldelay` credit.
    pub required_delay: u32,
    /// Maturity time, for `Delayed` traces.
    pub delay_until: Option<TimePoint>,
    /// Actions that ran, in order. Empty unless `Executed`.
    pub actions: Vec<ActionTrace>,
    pub error: Option<String>,
}

impl TransactionTrace {
    pub(crate) fn new(id: TransactionId, status: TransactionStatus, block_time: TimePoint) -> Self {
        Self {
            id,
            status,
            block_time,
            scheduled: false,
            required_delay: 0,
            delay_until: None,
            actions: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn scheduled(mut self) -> Self {
        self.scheduled = true;
        self
    }

    pub(crate) fn with_error(mut self, error: &EngineError) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Every trace recorded between `start_block` and `finalize_block`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockSummary {
    pub time: TimePoint,
    pub traces: Vec<TransactionTrace>,
}

impl BlockSummary {
    /// Traces with the given status.
    pub fn with_status(
        &self,
        status: TransactionStatus,
    ) -> impl Iterator<Item = &TransactionTrace> {
        self.traces.iter().filter(move |t| t.status == status)
    }

    pub fn trace(&self, id: &TransactionId) -> Option<&TransactionTrace> {
        self.traces.iter().find(|t| t.id == *id)
    }
}

/// Result of [`Engine::schedule_or_execute`](crate::Engine::schedule_or_execute).
#[derive(Debug)]
pub enum ScheduleOutcome {
    Executed(TransactionTrace),
    Delayed(TransactionTrace),
    Rejected(EngineError),
}

impl ScheduleOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, ScheduleOutcome::Executed(_))
    }

    pub fn is_delayed(&self) -> bool {
        matches!(self, ScheduleOutcome::Delayed(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ScheduleOutcome::Rejected(_))
    }
}

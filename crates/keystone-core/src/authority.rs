//! Weighted threshold authorities.
//!
//! An [`Authority`] is pure data: a threshold and three ordered lists of
//! weight sources. It has no behavior beyond structural validation; the
//! satisfiability search lives in the authorization crate.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::Ed25519PublicKey;
use crate::error::{CoreError, Result};
use crate::types::PermissionLevel;

pub type Weight = u16;

/// A public key and the weight its signature contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyWeight {
    pub key: Ed25519PublicKey,
    pub weight: Weight,
}

/// A delegated permission and the weight it contributes once satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionLevelWeight {
    pub permission: PermissionLevel,
    pub weight: Weight,
}

/// Weight granted only when the committed transaction delay is at least `wait_sec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WaitWeight {
    pub wait_sec: u32,
    pub weight: Weight,
}

/// Weighted threshold structure over keys, delegated permissions, and waits.
///
/// Keys are kept sorted by key bytes, accounts by permission level, and waits
/// by `wait_sec`, each strictly ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Authority {
    pub threshold: u32,
    pub keys: Vec<KeyWeight>,
    pub accounts: Vec<PermissionLevelWeight>,
    pub waits: Vec<WaitWeight>,
}

impl Authority {
    /// A single-key authority; adds a wait of `delay_sec` (and raises the
    /// threshold to 2) when a delay is requested.
    pub fn from_key(key: Ed25519PublicKey, delay_sec: u32) -> Self {
        let mut authority = Self {
            threshold: 1,
            keys: vec![KeyWeight { key, weight: 1 }],
            accounts: Vec::new(),
            waits: Vec::new(),
        };
        if delay_sec > 0 {
            authority.threshold = 2;
            authority.waits.push(WaitWeight {
                wait_sec: delay_sec,
                weight: 1,
            });
        }
        authority
    }

    /// A single-permission delegation with threshold 1.
    pub fn from_permission(level: PermissionLevel) -> Self {
        Self {
            threshold: 1,
            keys: Vec::new(),
            accounts: vec![PermissionLevelWeight {
                permission: level,
                weight: 1,
            }],
            waits: Vec::new(),
        }
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Add a key, keeping the list sorted.
    pub fn with_key(mut self, key: Ed25519PublicKey, weight: Weight) -> Self {
        self.keys.push(KeyWeight { key, weight });
        self.keys.sort_by(|a, b| a.key.cmp(&b.key));
        self
    }

    /// Add a delegated permission, keeping the list sorted.
    pub fn with_account(mut self, permission: PermissionLevel, weight: Weight) -> Self {
        self.accounts.push(PermissionLevelWeight { permission, weight });
        self.accounts.sort_by(|a, b| a.permission.cmp(&b.permission));
        self
    }

    /// Add a wait, keeping the list sorted.
    pub fn with_wait(mut self, wait_sec: u32, weight: Weight) -> Self {
        self.waits.push(WaitWeight { wait_sec, weight });
        self.waits.sort_by_key(|w| w.wait_sec);
        self
    }

    /// Sum of every weight source.
    pub fn total_weight(&self) -> u64 {
        let keys: u64 = self.keys.iter().map(|k| u64::from(k.weight)).sum();
        let accounts: u64 = self.accounts.iter().map(|a| u64::from(a.weight)).sum();
        let waits: u64 = self.waits.iter().map(|w| u64::from(w.weight)).sum();
        keys + accounts + waits
    }

    /// The longest wait, if any.
    pub fn max_wait(&self) -> Option<u32> {
        self.waits.last().map(|w| w.wait_sec)
    }

    /// Check the structural invariants.
    pub fn validate(&self) -> Result<()> {
        let entries = self.keys.len() + self.accounts.len() + self.waits.len();
        if entries >= 1 << 16 {
            return Err(CoreError::InvalidAuthority(format!(
                "too many weight entries: {entries}"
            )));
        }
        if self.threshold == 0 {
            return Err(CoreError::InvalidAuthority("threshold must be positive".into()));
        }
        if let Some(pair) = self.keys.windows(2).find(|p| p[0].key >= p[1].key) {
            return Err(CoreError::InvalidAuthority(format!(
                "keys must be unique and sorted, found {} after {}",
                pair[1].key, pair[0].key
            )));
        }
        if let Some(pair) = self
            .accounts
            .windows(2)
            .find(|p| p[0].permission >= p[1].permission)
        {
            return Err(CoreError::InvalidAuthority(format!(
                "accounts must be unique and sorted, found {} after {}",
                pair[1].permission, pair[0].permission
            )));
        }
        if let Some(pair) = self.waits.windows(2).find(|p| p[0].wait_sec >= p[1].wait_sec) {
            return Err(CoreError::InvalidAuthority(format!(
                "waits must be unique and sorted, found {}s after {}s",
                pair[1].wait_sec, pair[0].wait_sec
            )));
        }
        let zero_weight = self.keys.iter().any(|k| k.weight == 0)
            || self.accounts.iter().any(|a| a.weight == 0)
            || self.waits.iter().any(|w| w.weight == 0);
        if zero_weight {
            return Err(CoreError::InvalidAuthority("weights must be positive".into()));
        }
        if self.total_weight() < u64::from(self.threshold) {
            return Err(CoreError::InvalidAuthority(format!(
                "threshold {} is unreachable with total weight {}",
                self.threshold,
                self.total_weight()
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{threshold: {}, keys: [", self.threshold)?;
        for (i, k) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}:{}", &k.key.to_hex()[..16], k.weight)?;
        }
        f.write_str("], accounts: [")?;
        for (i, a) in self.accounts.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}:{}", a.permission, a.weight)?;
        }
        f.write_str("], waits: [")?;
        for (i, w) in self.waits.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}s:{}", w.wait_sec, w.weight)?;
        }
        f.write_str("]}")
    }
}

//! Limits and policies shared by the graph, link table, and checker.

use serde::{Deserialize, Serialize};

/// Which permission wins when several nodes of an ancestor walk are
/// satisfiable with the same delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AncestorTieBreak {
    /// Prefer the permission closest to the one that was required.
    #[default]
    Nearest,
    /// Prefer the permission closest to `owner`.
    Senior,
}

/// Authorization limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Deepest permission delegation the checker follows.
    pub max_authority_depth: u16,

    /// Longest wait an authority may carry, in seconds.
    pub max_transaction_delay: u32,

    pub ancestor_tie_break: AncestorTieBreak,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_authority_depth: 6,
            max_transaction_delay: 45 * 24 * 3600,
            ancestor_tie_break: AncestorTieBreak::Nearest,
        }
    }
}

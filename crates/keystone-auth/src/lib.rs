//! # Keystone Authorization
//!
//! Permission graphs, action links, and the authority checker that decides
//! whether a set of keys and permission levels satisfies a declared
//! authorization, and with how much delay.
//!
//! ## Key Concepts
//!
//! - **Permission graph**: each account owns a tree of named permissions
//!   rooted at `owner`. A parent satisfies everything its children do.
//! - **Links**: `(account, code, action)` entries naming the minimum
//!   permission that may authorize an action.
//! - **Checker**: weighs keys, delegated permissions and waits against an
//!   authority's threshold and reports the smallest delay that suffices.
//! - **Manager**: applies the above to every action of a transaction,
//!   including the seniority rules of the system actions.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::collections::BTreeSet;
//! use keystone_auth::{AuthConfig, AuthorizationManager};
//! use keystone_store::MemoryStore;
//!
//! let store = MemoryStore::new();
//! let manager = AuthorizationManager::new(&store, AuthConfig::default());
//! let summary = manager.check_authorization(&[], &BTreeSet::new(), &BTreeSet::new(), 0, false);
//! ```

pub mod checker;
pub mod config;
pub mod error;
pub mod graph;
pub mod links;
pub mod manager;

pub use checker::{AuthorityChecker, Satisfaction};
pub use config::{AncestorTieBreak, AuthConfig};
pub use error::{AuthError, Result};
pub use graph::PermissionGraph;
pub use links::{check_linkable, LinkTable};
pub use manager::{AuthorizationManager, AuthorizationSummary};

//! # Keystone Store
//!
//! State storage for Keystone. Provides a trait-based ordered multi-index
//! over accounts, permissions, permission links, deferred transactions,
//! accepted transaction ids, and native contract rows, with SQLite and
//! in-memory implementations.
//!
//! ## Key Types
//!
//! - [`StateStore`] - The trait for all storage operations
//! - [`MemoryStore`] - In-memory storage with snapshot sessions
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`PermissionRow`], [`LinkRow`], [`DeferredRow`] - Persisted rows
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keystone_store::{SqliteStore, StateStore};
//!
//! let store = SqliteStore::open("state.db").unwrap();
//! store.begin_session().unwrap();
//! // ... writes ...
//! store.undo_session().unwrap();
//! ```
//!
//! ## Design Notes
//!
//! - **Deterministic iteration**: every listing has a defined order
//! - **Nested undo sessions**: a failed transaction or an aborted block
//!   reverts its writes, deferred queue included

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{DeferredRow, LinkRow, NewPermission, PermissionId, PermissionRow, StateStore};

//! # Keystone
//!
//! The engine API for Keystone: transaction authorization against
//! per-account permission trees, delayed execution through a deferred
//! queue, and the block lifecycle that ties them together.
//!
//! ## Overview
//!
//! For every action in a transaction the engine resolves the minimum
//! permission through the link table, checks the declared authorizations
//! against the provided signatures, and then either
//!
//! - **executes** the transaction now (no delay declared),
//! - **defers** it until `block time + delay_sec` (a delay was declared and
//!   covers what authorization needs), or
//! - **rejects** it.
//!
//! Matured deferred transactions are re-authorized and run at the start of
//! the first block that reaches their maturity.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keystone::{Engine, EngineConfig};
//! use keystone::core::{Authority, Keypair, Name, TimePoint};
//! use keystone::store::MemoryStore;
//!
//! let mut engine = Engine::new(MemoryStore::new(), EngineConfig::default()).unwrap();
//! let key = Keypair::generate().public_key();
//! engine
//!     .create_account(
//!         Name::from_static("alice"),
//!         Authority::from_key(key, 0),
//!         Authority::from_key(key, 0),
//!     )
//!     .unwrap();
//!
//! engine.start_block(TimePoint::from_secs(1)).unwrap();
//! // engine.push_transaction(&signed_trx)?;
//! let summary = engine.finalize_block().unwrap();
//! ```
//!
//! ## Re-exports
//!
//! - `keystone::core` - names, authorities, transactions
//! - `keystone::store` - the state store and its implementations
//! - `keystone::auth` - permission graph, links, and the checker

pub mod apply;
pub mod config;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod system;
pub mod trace;

pub use keystone_auth as auth;
pub use keystone_core as core;
pub use keystone_store as store;

pub use apply::{ActionHandler, ApplyContext};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use scheduler::{DeferredQueue, Disposition};
pub use trace::{ActionTrace, BlockSummary, ScheduleOutcome, TransactionStatus, TransactionTrace};

pub use keystone_core::{
    AccountName, Action, ActionName, Authority, Keypair, Name, PermissionLevel, PermissionName,
    SignedTransaction, TimePoint, Transaction, TransactionId,
};

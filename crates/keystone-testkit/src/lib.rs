//! # Keystone Testkit
//!
//! Testing utilities for Keystone.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: [`TestChain`], an engine with deterministic keys that
//!   produces one block per pushed transaction
//! - **Token**: a small native contract whose `transfer` action gives the
//!   permission system something to guard
//! - **Generators**: Proptest strategies for names, keys, and weighted
//!   authorities with a known expected delay
//!
//! ## Test Fixtures
//!
//! ```rust
//! use keystone_testkit::TestChain;
//!
//! let mut chain = TestChain::new().unwrap();
//! chain.create_accounts(&["alice", "bob"]).unwrap();
//! chain.issue("alice", 100).unwrap();
//! chain.transfer("alice", "bob", 40, "active", 0).unwrap();
//! assert_eq!(chain.balance("bob").unwrap(), 40);
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use keystone_testkit::generators::WeightedCase;
//!
//! proptest! {
//!     #[test]
//!     fn authority_is_valid(case: WeightedCase) {
//!         prop_assert!(case.authority().is_valid());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod token;

pub use fixtures::{key_for, level, TestChain, GENESIS_TIME, TRX_LIFETIME};
pub use generators::{case_key, WeightedCase};

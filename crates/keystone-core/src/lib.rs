//! # Keystone Core
//!
//! Pure primitives for Keystone: names, authorities, transactions, and
//! canonicalization.
//!
//! This crate contains no I/O and no storage. It is pure computation over
//! cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`Name`] - Base-32 packed 64-bit identifier for accounts, permissions, actions
//! - [`PermissionLevel`] - An `(actor, permission)` pair
//! - [`Authority`] - Weighted threshold over keys, delegated permissions, and waits
//! - [`Transaction`] / [`SignedTransaction`] - Actions with a committed delay
//!
//! ## Canonicalization
//!
//! Transaction ids and signing digests use deterministic CBOR. See [`canonical`].

pub mod authority;
pub mod canonical;
pub mod crypto;
pub mod error;
pub mod system;
pub mod transaction;
pub mod types;

pub use authority::{Authority, KeyWeight, PermissionLevelWeight, WaitWeight, Weight};
pub use canonical::canonical_transaction_bytes;
pub use crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
pub use error::{CoreError, Result};
pub use system::{
    CancelDelay, DeleteAuth, LinkAuth, NewAccount, SystemPayload, UnlinkAuth, UpdateAuth,
};
pub use transaction::{Action, SignatureEntry, SignedTransaction, Transaction};
pub use types::{
    names, AccountName, ActionName, Name, PermissionLevel, PermissionName, TimePoint,
    TransactionId,
};

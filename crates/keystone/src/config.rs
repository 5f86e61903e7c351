//! Engine configuration.

use keystone_auth::{AncestorTieBreak, AuthConfig};
use keystone_core::Blake3Hash;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Configuration for the [`Engine`](crate::Engine).
///
/// Every field has a default, so a partial JSON document is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound into every signing digest; hex in JSON.
    #[serde(with = "hex_hash")]
    pub chain_id: Blake3Hash,

    /// Longest delay a transaction may declare, and longest wait an
    /// authority may carry, in seconds.
    pub max_transaction_delay: u32,

    /// How far past the pending block time a transaction may expire, in seconds.
    pub max_transaction_lifetime: u32,

    /// How long a matured deferred transaction stays executable, in seconds.
    pub deferred_trx_expiration_window: u32,

    pub max_authority_depth: u16,

    /// Accept transactions carrying signatures that authorize nothing.
    pub allow_unused_keys: bool,

    pub ancestor_tie_break: AncestorTieBreak,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let auth = AuthConfig::default();
        Self {
            chain_id: Blake3Hash::hash(b"keystone"),
            max_transaction_delay: auth.max_transaction_delay,
            max_transaction_lifetime: 3600,
            deferred_trx_expiration_window: 600,
            max_authority_depth: auth.max_authority_depth,
            allow_unused_keys: false,
            ancestor_tie_break: auth.ancestor_tie_break,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// The subset consumed by the authorization layer.
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            max_authority_depth: self.max_authority_depth,
            max_transaction_delay: self.max_transaction_delay,
            ancestor_tie_break: self.ancestor_tie_break,
        }
    }
}

mod hex_hash {
    use keystone_core::Blake3Hash;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Blake3Hash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hash.to_hex())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Blake3Hash, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| D::Error::custom("chain_id must be 32 bytes"))?;
        Ok(Blake3Hash::from_bytes(array))
    }
}

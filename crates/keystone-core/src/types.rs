//! Strong type definitions for Keystone.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

const CHARMAP: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";

/// A 64-bit base-32 encoded name.
///
/// Names identify accounts, permissions, and actions. Up to twelve
/// characters from `.12345a-z` are packed five bits at a time from the most
/// significant end; an optional thirteenth character (restricted to
/// `.12345a-j`) fills the low four bits.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Name(pub u64);

impl Name {
    /// The empty name.
    pub const EMPTY: Self = Self(0);

    /// Build a name at compile time.
    ///
    /// Panics (at compile time when used in a const) on invalid input.
    pub const fn from_static(s: &str) -> Self {
        match encode(s.as_bytes()) {
            Ok(value) => Self(value),
            Err(_) => panic!("invalid name literal"),
        }
    }

    /// Create from the raw 64-bit value.
    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw 64-bit value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Whether the textual form starts with `prefix`.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.to_string().starts_with(prefix)
    }
}

const fn char_to_symbol(c: u8) -> Option<u64> {
    match c {
        b'a'..=b'z' => Some((c - b'a') as u64 + 6),
        b'1'..=b'5' => Some((c - b'1') as u64 + 1),
        b'.' => Some(0),
        _ => None,
    }
}

const fn encode(bytes: &[u8]) -> Result<u64, &'static str> {
    if bytes.len() > 13 {
        return Err("name is longer than 13 characters");
    }
    let mut value: u64 = 0;
    let mut i = 0;
    while i < bytes.len() {
        let symbol = match char_to_symbol(bytes[i]) {
            Some(s) => s,
            None => return Err("name contains an invalid character"),
        };
        if i < 12 {
            value |= (symbol & 0x1f) << (64 - 5 * (i + 1));
        } else {
            if symbol > 0x0f {
                return Err("thirteenth character must be in .12345abcdefghij");
            }
            value |= symbol & 0x0f;
        }
        i += 1;
    }
    if !bytes.is_empty() && bytes[bytes.len() - 1] == b'.' {
        return Err("name is not normalized (trailing dot)");
    }
    Ok(value)
}

impl FromStr for Name {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        encode(s.as_bytes())
            .map(Self)
            .map_err(|reason| CoreError::InvalidName(format!("{s:?}: {reason}")))
    }
}

impl TryFrom<&str> for Name {
    type Error = CoreError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chars = [b'.'; 13];
        let mut tmp = self.0;
        for i in 0..13 {
            let mask = if i == 0 { 0x0f } else { 0x1f };
            chars[12 - i] = CHARMAP[(tmp & mask) as usize];
            tmp >>= if i == 0 { 4 } else { 5 };
        }
        let len = chars
            .iter()
            .rposition(|&c| c != b'.')
            .map(|p| p + 1)
            .unwrap_or(0);
        // CHARMAP is ASCII
        f.write_str(std::str::from_utf8(&chars[..len]).map_err(|_| fmt::Error)?)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({self})")
    }
}

pub type AccountName = Name;
pub type PermissionName = Name;
pub type ActionName = Name;

/// Well-known names.
pub mod names {
    use super::Name;

    /// The system account that hosts the permission and scheduling actions.
    pub const SYSTEM: Name = Name::from_static("eosio");
    pub const OWNER: Name = Name::from_static("owner");
    pub const ACTIVE: Name = Name::from_static("active");
    /// Link requirement meaning "any permission of the actor".
    pub const ANY: Name = Name::from_static("eosio.any");
    /// Virtual permission held by an account's native code while it
    /// schedules transactions; never stored.
    pub const CODE: Name = Name::from_static("eosio.code");

    pub const NEWACCOUNT: Name = Name::from_static("newaccount");
    pub const UPDATEAUTH: Name = Name::from_static("updateauth");
    pub const DELETEAUTH: Name = Name::from_static("deleteauth");
    pub const LINKAUTH: Name = Name::from_static("linkauth");
    pub const UNLINKAUTH: Name = Name::from_static("unlinkauth");
    pub const CANCELDELAY: Name = Name::from_static("canceldelay");

    /// Prefix reserved for system-defined permission names.
    pub const RESERVED_PREFIX: &str = "eosio.";
}

/// An (actor, permission) pair naming one node of an account's permission tree.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionLevel {
    pub actor: AccountName,
    pub permission: PermissionName,
}

impl PermissionLevel {
    pub const fn new(actor: AccountName, permission: PermissionName) -> Self {
        Self { actor, permission }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.actor, self.permission)
    }
}

impl fmt::Debug for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PermissionLevel({self})")
    }
}

impl FromStr for PermissionLevel {
    type Err = CoreError;

    /// Parses `account@permission`; the permission defaults to `active`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('@');
        let actor = parts.next().unwrap_or_default().parse()?;
        let permission = match parts.next() {
            Some(p) => p.parse()?,
            None => names::ACTIVE,
        };
        if parts.next().is_some() {
            return Err(CoreError::InvalidName(format!(
                "permission level {s:?} invalid, use account[@permission]"
            )));
        }
        Ok(Self { actor, permission })
    }
}

/// A point in time, in microseconds since the Unix epoch.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimePoint(pub i64);

impl TimePoint {
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000_000)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000)
    }

    pub const fn as_micros(&self) -> i64 {
        self.0
    }

    /// Whole seconds since the epoch (truncated).
    pub const fn as_secs(&self) -> i64 {
        self.0 / 1_000_000
    }

    pub const fn plus_secs(&self, secs: u32) -> Self {
        Self(self.0.saturating_add(secs as i64 * 1_000_000))
    }

    /// Whole seconds elapsed from `earlier` to `self`, saturating at zero.
    pub fn secs_since(&self, earlier: TimePoint) -> u32 {
        let delta = (self.0 - earlier.0).max(0) / 1_000_000;
        u32::try_from(delta).unwrap_or(u32::MAX)
    }
}

impl fmt::Debug for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimePoint({}us)", self.0)
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0.div_euclid(1_000_000), self.0.rem_euclid(1_000_000))
    }
}

/// A 32-byte transaction identifier, computed as Blake3(canonical transaction bytes).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub [u8; 32]);

impl TransactionId {
    /// Create a new TransactionId from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }

    /// The 128-bit sender id a deferred copy of this transaction is filed under.
    pub fn sender_id(&self) -> u128 {
        let mut head = [0u8; 16];
        head.copy_from_slice(&self.0[..16]);
        u128::from_be_bytes(head)
    }

    /// The zero transaction ID (used as a sentinel).
    pub const ZERO: Self = Self([0u8; 32]);
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for TransactionId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for TransactionId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for TransactionId {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = slice.try_into()?;
        Ok(Self(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_name_roundtrip() {
        for s in ["eosio", "owner", "active", "eosio.any", "tester2", "a", "zzzzzzzzzzzzj"] {
            let name: Name = s.parse().unwrap();
            assert_eq!(name.to_string(), s);
        }
    }

    #[test]
    fn test_name_known_value() {
        // Reference value from the base-32 packing of "eosio"
        assert_eq!(Name::from_static("eosio").as_u64(), 6138663577826885632);
    }

    #[test]
    fn test_name_rejects_invalid() {
        assert!("Upper".parse::<Name>().is_err());
        assert!("toolongname1234".parse::<Name>().is_err());
        assert!("trailing.".parse::<Name>().is_err());
        assert!("zzzzzzzzzzzzz".parse::<Name>().is_err());
        assert!("has6".parse::<Name>().is_err());
    }

    #[test]
    fn test_name_ordering_is_numeric() {
        let a: Name = "alice".parse().unwrap();
        let b: Name = "bob".parse().unwrap();
        assert!(a < b);
        assert!(Name::EMPTY < a);
    }

    #[test]
    fn test_permission_level_parse() {
        let level: PermissionLevel = "tester@first".parse().unwrap();
        assert_eq!(level.actor, Name::from_static("tester"));
        assert_eq!(level.permission, Name::from_static("first"));

        let default: PermissionLevel = "tester".parse().unwrap();
        assert_eq!(default.permission, names::ACTIVE);

        assert!("a@b@c".parse::<PermissionLevel>().is_err());
    }

    #[test]
    fn test_time_point_arithmetic() {
        let t = TimePoint::from_secs(100);
        assert_eq!(t.plus_secs(10), TimePoint::from_secs(110));
        assert_eq!(t.plus_secs(10).secs_since(t), 10);
        assert_eq!(t.secs_since(t.plus_secs(10)), 0);
    }

    proptest! {
        #[test]
        fn prop_name_display_parse_roundtrip(s in "[a-z1-5]{1,12}") {
            let name: Name = s.parse().unwrap();
            prop_assert_eq!(name.to_string(), s);
        }
    }

    #[test]
    fn test_transaction_id_hex_roundtrip() {
        let id = TransactionId::from_bytes([0x42; 32]);
        let recovered = TransactionId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, recovered);
    }
}

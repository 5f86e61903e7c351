//! Proptest generators for property-based testing.

use std::collections::BTreeSet;

use proptest::prelude::*;

use keystone_core::{Authority, Ed25519PublicKey, Keypair, Name, PermissionLevel, Weight};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random Ed25519PublicKey.
pub fn public_key() -> impl Strategy<Value = Ed25519PublicKey> {
    keypair().prop_map(|kp| kp.public_key())
}

/// Generate a valid, normalized name of up to 12 characters.
pub fn name() -> impl Strategy<Value = Name> {
    "[a-z1-5][a-z1-5.]{0,10}[a-z1-5]"
        .prop_filter_map("valid name", |s| s.parse::<Name>().ok())
}

pub fn permission_level() -> impl Strategy<Value = PermissionLevel> {
    (name(), name()).prop_map(|(actor, permission)| PermissionLevel::new(actor, permission))
}

/// The deterministic key used for slot `index` of a [`WeightedCase`].
pub fn case_key(index: usize) -> Keypair {
    Keypair::from_label(&format!("case-key-{index}"))
}

/// An authority over up to six keys and three waits, with a threshold no
/// larger than its total weight.
#[derive(Debug, Clone)]
pub struct WeightedCase {
    /// Weight of [`case_key`]`(i)`.
    pub key_weights: Vec<Weight>,
    /// `(wait_sec, weight)`, strictly ascending by `wait_sec`.
    pub waits: Vec<(u32, Weight)>,
    pub threshold: u32,
}

impl WeightedCase {
    pub fn authority(&self) -> Authority {
        let mut auth = Authority {
            threshold: self.threshold,
            keys: Vec::new(),
            accounts: Vec::new(),
            waits: Vec::new(),
        };
        for (i, weight) in self.key_weights.iter().enumerate() {
            auth = auth.with_key(case_key(i).public_key(), *weight);
        }
        for (wait_sec, weight) in &self.waits {
            auth = auth.with_wait(*wait_sec, *weight);
        }
        auth
    }

    /// Keys for the slots whose bit is set in `mask`.
    pub fn signers(&self, mask: u8) -> BTreeSet<Ed25519PublicKey> {
        (0..self.key_weights.len())
            .filter(|i| mask & (1 << i) != 0)
            .map(|i| case_key(i).public_key())
            .collect()
    }

    /// Total weight of the keys selected by `mask`.
    pub fn signed_weight(&self, mask: u8) -> u32 {
        self.key_weights
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, w)| u32::from(*w))
            .sum()
    }

    /// The delay a correct checker must report for `mask`: zero if the keys
    /// alone suffice, otherwise the wait at which the ascending running sum
    /// of wait weights first reaches the threshold.
    pub fn expected_delay(&self, mask: u8) -> Option<u32> {
        let mut total = self.signed_weight(mask);
        if total >= self.threshold {
            return Some(0);
        }
        for (wait_sec, weight) in &self.waits {
            total += u32::from(*weight);
            if total >= self.threshold {
                return Some(*wait_sec);
            }
        }
        None
    }
}

impl Arbitrary for WeightedCase {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            prop::collection::vec(1u16..=4, 1..=6),
            prop::collection::btree_map(1u32..=86_400, 1u16..=3, 0..=3),
        )
            .prop_flat_map(|(key_weights, waits)| {
                let total: u32 = key_weights.iter().map(|w| u32::from(*w)).sum::<u32>()
                    + waits.values().map(|w| u32::from(*w)).sum::<u32>();
                let waits: Vec<(u32, Weight)> = waits.into_iter().collect();
                (Just(key_weights), Just(waits), 1..=total)
            })
            .prop_map(|(key_weights, waits, threshold)| WeightedCase {
                key_weights,
                waits,
                threshold,
            })
            .boxed()
    }
}

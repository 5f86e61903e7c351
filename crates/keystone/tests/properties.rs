//! Property tests for weighted-threshold authorization through the engine.

use keystone::core::{names, Action, Authority, Name};
use keystone::{EngineConfig, EngineError, SignedTransaction};
use keystone_testkit::{case_key, key_for, TestChain, WeightedCase};
use proptest::prelude::*;

const MULTI: Name = Name::from_static("multi");

/// A chain where `multi@active` is the case's authority.
fn chain_for(case: &WeightedCase) -> TestChain {
    let config = EngineConfig {
        allow_unused_keys: true,
        ..EngineConfig::default()
    };
    let mut chain = TestChain::with_config(config).unwrap();
    chain
        .engine
        .create_account(
            MULTI,
            Authority::from_key(key_for("multi", "owner").public_key(), 0),
            case.authority(),
        )
        .unwrap();
    chain
}

/// An action with no handler, declared by `multi@active`, signed by the
/// case keys selected by `mask`.
fn ping(chain: &TestChain, case: &WeightedCase, mask: u8, delay_sec: u32) -> SignedTransaction {
    let action = Action::raw(
        MULTI,
        Name::from_static("ping"),
        vec![keystone::PermissionLevel::new(MULTI, names::ACTIVE)],
        Vec::new(),
    );
    let keypairs: Vec<_> = (0..case.key_weights.len())
        .filter(|i| mask & (1 << i) != 0)
        .map(case_key)
        .collect();
    let signers: Vec<_> = keypairs.iter().collect();
    chain.sign(chain.transaction(vec![action], delay_sec), &signers)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_required_delay_follows_weights(case: WeightedCase, mask in any::<u8>()) {
        let chain = chain_for(&case);
        let trx = ping(&chain, &case, mask, 86_400);

        match (case.expected_delay(mask), chain.engine.check_authorization(&trx)) {
            (Some(expected), Ok(summary)) => prop_assert_eq!(summary.required_delay, expected),
            (None, Err(EngineError::Auth(_))) => {}
            (expected, result) => prop_assert!(false, "expected {:?}, got {:?}", expected, result),
        }
    }

    #[test]
    fn prop_shorter_delay_rejected(case: WeightedCase, mask in any::<u8>()) {
        let Some(expected) = case.expected_delay(mask) else {
            return Ok(());
        };
        prop_assume!(expected > 0);
        let chain = chain_for(&case);

        let short = ping(&chain, &case, mask, expected - 1);
        prop_assert!(chain.engine.check_authorization(&short).is_err());

        let exact = ping(&chain, &case, mask, expected);
        prop_assert!(chain.engine.check_authorization(&exact).is_ok());
    }

    #[test]
    fn prop_required_keys_are_a_sufficient_subset(case: WeightedCase, mask in any::<u8>()) {
        prop_assume!(case.signed_weight(mask) >= case.threshold);
        let chain = chain_for(&case);
        let trx = ping(&chain, &case, mask, 0);

        let candidates = case.signers(mask);
        let required = chain.engine.required_keys(&trx, &candidates).unwrap();
        prop_assert!(required.is_subset(&candidates));
        let weight: u32 = case
            .key_weights
            .iter()
            .enumerate()
            .filter(|(i, _)| required.contains(&case_key(*i).public_key()))
            .map(|(_, w)| u32::from(*w))
            .sum();
        prop_assert!(weight >= case.threshold);
    }
}

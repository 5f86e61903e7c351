//! Authorization Checker.
//!
//! Decides whether a set of provided keys and permission levels satisfies a
//! permission, and with how much delay.
//!
//! ## Algorithm
//!
//! Every authority node turns its entries into weight sources, each with a
//! cost in seconds:
//!
//! - a key that was provided costs 0
//! - a delegated permission costs the delay its own (recursive) check needs,
//!   or 0 when that permission level was provided directly
//! - a wait costs its `wait_sec`
//!
//! Sources are taken in ascending cost order until the threshold is reached;
//! the node's delay is the cost of the last source taken. This is the
//! smallest delay at which the node is satisfiable.
//!
//! A permission on the visiting stack contributes nothing, which breaks
//! cycles. Nodes deeper than `max_authority_depth` contribute nothing.

use std::collections::{BTreeMap, BTreeSet};

use keystone_core::{Authority, Ed25519PublicKey, PermissionLevel, Weight};
use keystone_store::{PermissionRow, StateStore};

use crate::config::{AncestorTieBreak, AuthConfig};
use crate::error::Result;
use crate::graph::PermissionGraph;

/// Provided credentials a satisfied node consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Usage {
    keys: BTreeSet<Ed25519PublicKey>,
    levels: BTreeSet<PermissionLevel>,
}

impl Usage {
    fn merge(&mut self, other: &Usage) {
        self.keys.extend(other.keys.iter().copied());
        self.levels.extend(other.levels.iter().copied());
    }
}

/// One way of contributing weight toward a threshold.
#[derive(Debug, Clone)]
enum WeightSource {
    Key(Ed25519PublicKey),
    Account { delay: u32, usage: Usage },
    Wait(u32),
}

impl WeightSource {
    fn cost(&self) -> u32 {
        match self {
            WeightSource::Key(_) => 0,
            WeightSource::Account { delay, .. } => *delay,
            WeightSource::Wait(wait_sec) => *wait_sec,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct NodeOutcome {
    delay: Option<u32>,
    usage: Usage,
    /// False when a cycle or depth cut may have hidden weight from this node.
    complete: bool,
}

/// A satisfied permission requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Satisfaction {
    /// The required permission itself, or the ancestor that satisfied it.
    pub via: PermissionLevel,
    /// Smallest delay, in seconds, under which `via` is satisfied.
    pub delay: u32,
}

/// Weighted-threshold satisfiability search over one set of credentials.
///
/// A checker is built per transaction so that results of shared
/// sub-permissions are computed once.
pub struct AuthorityChecker<'a, S: StateStore + ?Sized> {
    graph: PermissionGraph<'a, S>,
    config: AuthConfig,
    provided_keys: BTreeSet<Ed25519PublicKey>,
    provided_levels: BTreeSet<PermissionLevel>,
    visiting: BTreeSet<PermissionLevel>,
    /// Complete outcomes with the depth they were computed at. An entry only
    /// answers queries at that depth or shallower.
    cache: BTreeMap<PermissionLevel, (u16, NodeOutcome)>,
    used: Usage,
}

impl<'a, S: StateStore + ?Sized> AuthorityChecker<'a, S> {
    pub fn new(
        store: &'a S,
        config: AuthConfig,
        provided_keys: BTreeSet<Ed25519PublicKey>,
        provided_levels: BTreeSet<PermissionLevel>,
    ) -> Self {
        Self {
            graph: PermissionGraph::new(store, config),
            config,
            provided_keys,
            provided_levels,
            visiting: BTreeSet::new(),
            cache: BTreeMap::new(),
            used: Usage::default(),
        }
    }

    /// Check `level`, accepting any ancestor of it on the same account.
    ///
    /// Fails with `PermissionQuery` if `level` does not exist; returns `None`
    /// if neither it nor any ancestor is satisfiable.
    pub fn check(&mut self, level: &PermissionLevel) -> Result<Option<Satisfaction>> {
        let row = self.graph.get_permission(level)?;
        let chain = self.graph.ancestors(&row)?;

        let mut best: Option<(Satisfaction, Usage)> = None;
        for node in &chain {
            let outcome = self.evaluate_row(node, 0)?;
            let Some(delay) = outcome.delay else {
                continue;
            };
            let better = match &best {
                None => true,
                Some((current, _)) => match self.config.ancestor_tie_break {
                    AncestorTieBreak::Nearest => delay < current.delay,
                    AncestorTieBreak::Senior => delay <= current.delay,
                },
            };
            if better {
                let satisfaction = Satisfaction {
                    via: node.level(),
                    delay,
                };
                best = Some((satisfaction, outcome.usage));
            }
            if delay == 0 && self.config.ancestor_tie_break == AncestorTieBreak::Nearest {
                break;
            }
        }

        Ok(best.map(|(satisfaction, usage)| {
            self.used.merge(&usage);
            satisfaction
        }))
    }

    /// Check an authority that is not stored in the graph.
    ///
    /// Returns the minimum delay, or `None` if unsatisfiable.
    pub fn check_authority(&mut self, auth: &Authority) -> Result<Option<u32>> {
        let outcome = self.evaluate_authority(auth, 0)?;
        if outcome.delay.is_some() {
            self.used.merge(&outcome.usage);
        }
        Ok(outcome.delay)
    }

    /// Keys that contributed to a satisfied check so far.
    pub fn used_keys(&self) -> &BTreeSet<Ed25519PublicKey> {
        &self.used.keys
    }

    /// Provided keys that contributed to nothing.
    pub fn unused_keys(&self) -> BTreeSet<Ed25519PublicKey> {
        self.provided_keys
            .difference(&self.used.keys)
            .copied()
            .collect()
    }

    /// Provided permission levels that contributed to nothing.
    pub fn irrelevant_levels(&self) -> Vec<PermissionLevel> {
        self.provided_levels
            .difference(&self.used.levels)
            .copied()
            .collect()
    }

    fn evaluate_row(&mut self, row: &PermissionRow, depth: u16) -> Result<NodeOutcome> {
        let level = row.level();
        if self.provided_levels.contains(&level) {
            return Ok(provided_outcome(level));
        }
        if let Some((cached_depth, cached)) = self.cache.get(&level) {
            if depth <= *cached_depth {
                return Ok(cached.clone());
            }
        }

        self.visiting.insert(level);
        let outcome = self.evaluate_authority(&row.auth, depth);
        self.visiting.remove(&level);
        let outcome = outcome?;

        if outcome.complete {
            self.cache
                .entry(level)
                .or_insert_with(|| (depth, outcome.clone()));
        }
        Ok(outcome)
    }

    fn evaluate_authority(&mut self, auth: &Authority, depth: u16) -> Result<NodeOutcome> {
        let mut complete = true;
        let mut sources: Vec<(WeightSource, Weight)> = Vec::new();

        for entry in &auth.keys {
            if self.provided_keys.contains(&entry.key) {
                sources.push((WeightSource::Key(entry.key), entry.weight));
            }
        }

        for entry in &auth.accounts {
            let level = entry.permission;
            if self.provided_levels.contains(&level) {
                let usage = provided_outcome(level).usage;
                sources.push((WeightSource::Account { delay: 0, usage }, entry.weight));
                continue;
            }
            if self.visiting.contains(&level) || depth >= self.config.max_authority_depth {
                complete = false;
                continue;
            }
            let Some(row) = self.graph.find_permission(&level)? else {
                continue;
            };
            let sub = self.evaluate_row(&row, depth + 1)?;
            complete &= sub.complete;
            if let Some(delay) = sub.delay {
                sources.push((
                    WeightSource::Account {
                        delay,
                        usage: sub.usage,
                    },
                    entry.weight,
                ));
            }
        }

        for entry in &auth.waits {
            sources.push((WeightSource::Wait(entry.wait_sec), entry.weight));
        }

        // Stable: keys, then accounts, then waits among equal costs.
        sources.sort_by_key(|(source, _)| source.cost());

        let threshold = u64::from(auth.threshold);
        let mut total: u64 = 0;
        let mut usage = Usage::default();
        for (source, weight) in &sources {
            total += u64::from(*weight);
            match source {
                WeightSource::Key(key) => {
                    usage.keys.insert(*key);
                }
                WeightSource::Account { usage: sub, .. } => usage.merge(sub),
                WeightSource::Wait(_) => {}
            }
            if total >= threshold {
                return Ok(NodeOutcome {
                    delay: Some(source.cost()),
                    usage,
                    complete,
                });
            }
        }

        Ok(NodeOutcome {
            delay: None,
            usage: Usage::default(),
            complete,
        })
    }
}

fn provided_outcome(level: PermissionLevel) -> NodeOutcome {
    let mut usage = Usage::default();
    usage.levels.insert(level);
    NodeOutcome {
        delay: Some(0),
        usage,
        complete: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::{names, AccountName, Keypair, Name, TimePoint};
    use keystone_store::MemoryStore;
    use proptest::prelude::*;

    fn key(label: &str) -> Ed25519PublicKey {
        Keypair::from_label(label).public_key()
    }

    fn keys(labels: &[&str]) -> BTreeSet<Ed25519PublicKey> {
        labels.iter().map(|l| key(l)).collect()
    }

    fn level(actor: &str, permission: &str) -> PermissionLevel {
        PermissionLevel::new(actor.parse().unwrap(), permission.parse().unwrap())
    }

    /// Accounts with owner and active each guarded by `<name>@<perm>` keys.
    fn store_with(accounts: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        let graph = PermissionGraph::new(&store, AuthConfig::default());
        for account in accounts {
            let name: AccountName = account.parse().unwrap();
            store.create_account(name, TimePoint::from_secs(0)).unwrap();
            graph
                .create_permission(
                    name,
                    names::OWNER,
                    Name::EMPTY,
                    Authority::from_key(key(&format!("{account}@owner")), 0),
                    TimePoint::from_secs(0),
                )
                .unwrap();
            graph
                .create_permission(
                    name,
                    names::ACTIVE,
                    names::OWNER,
                    Authority::from_key(key(&format!("{account}@active")), 0),
                    TimePoint::from_secs(0),
                )
                .unwrap();
        }
        store
    }

    fn set_auth(store: &MemoryStore, level: PermissionLevel, auth: Authority) {
        let mut row = store
            .find_permission(level.actor, level.permission)
            .unwrap()
            .unwrap();
        row.auth = auth;
        store.update_permission(&row).unwrap();
    }

    fn checker<'a>(store: &'a MemoryStore, provided: &[&str]) -> AuthorityChecker<'a, MemoryStore> {
        AuthorityChecker::new(store, AuthConfig::default(), keys(provided), BTreeSet::new())
    }

    #[test]
    fn test_single_key_satisfies_without_delay() {
        let store = store_with(&["alice"]);
        let mut checker = checker(&store, &["alice@active"]);
        let result = checker.check(&level("alice", "active")).unwrap().unwrap();
        assert_eq!(result.delay, 0);
        assert_eq!(result.via, level("alice", "active"));
        assert!(checker.unused_keys().is_empty());
    }

    #[test]
    fn test_wrong_key_unsatisfied() {
        let store = store_with(&["alice"]);
        let mut checker = checker(&store, &["mallory"]);
        assert_eq!(checker.check(&level("alice", "active")).unwrap(), None);
        assert_eq!(checker.unused_keys(), keys(&["mallory"]));
    }

    #[test]
    fn test_missing_permission_is_query_error() {
        let store = store_with(&["alice"]);
        let mut checker = checker(&store, &[]);
        assert!(matches!(
            checker.check(&level("alice", "nope")),
            Err(crate::AuthError::PermissionQuery(_))
        ));
    }

    #[test]
    fn test_owner_key_satisfies_active() {
        let store = store_with(&["alice"]);
        let mut checker = checker(&store, &["alice@owner"]);
        let result = checker.check(&level("alice", "active")).unwrap().unwrap();
        assert_eq!(result.via, level("alice", "owner"));
    }

    #[test]
    fn test_wait_sets_delay() {
        let store = store_with(&["alice"]);
        set_auth(
            &store,
            level("alice", "active"),
            Authority::from_key(key("alice@active"), 10),
        );
        let mut checker = checker(&store, &["alice@active"]);
        let result = checker.check(&level("alice", "active")).unwrap().unwrap();
        assert_eq!(result.delay, 10);
    }

    #[test]
    fn test_smallest_sufficient_wait_chosen() {
        let auth = Authority::default()
            .with_threshold(3)
            .with_key(key("a"), 1)
            .with_wait(5, 1)
            .with_wait(30, 1)
            .with_wait(60, 5);
        let store = MemoryStore::new();
        let mut checker = checker(&store, &["a"]);
        assert_eq!(checker.check_authority(&auth).unwrap(), Some(30));

        let mut no_key = AuthorityChecker::new(
            &store,
            AuthConfig::default(),
            BTreeSet::new(),
            BTreeSet::new(),
        );
        assert_eq!(no_key.check_authority(&auth).unwrap(), Some(60));
    }

    #[test]
    fn test_delegated_permission_delay_propagates() {
        let store = store_with(&["alice", "bob"]);
        set_auth(
            &store,
            level("bob", "active"),
            Authority::from_key(key("bob@active"), 20),
        );
        set_auth(
            &store,
            level("alice", "active"),
            Authority::from_permission(level("bob", "active")),
        );
        let mut checker = checker(&store, &["bob@active"]);
        let result = checker.check(&level("alice", "active")).unwrap().unwrap();
        assert_eq!(result.delay, 20);
        assert!(checker.used_keys().contains(&key("bob@active")));
    }

    #[test]
    fn test_ancestor_with_smaller_delay_wins() {
        let store = store_with(&["alice"]);
        set_auth(
            &store,
            level("alice", "active"),
            Authority::from_key(key("shared"), 10),
        );
        set_auth(
            &store,
            level("alice", "owner"),
            Authority::from_key(key("shared"), 0),
        );
        let mut checker = checker(&store, &["shared"]);
        let result = checker.check(&level("alice", "active")).unwrap().unwrap();
        assert_eq!(result.via, level("alice", "owner"));
        assert_eq!(result.delay, 0);
    }

    #[test]
    fn test_tie_break_policy() {
        let store = store_with(&["alice"]);
        for perm in ["active", "owner"] {
            set_auth(&store, level("alice", perm), Authority::from_key(key("shared"), 5));
        }

        let mut nearest = checker(&store, &["shared"]);
        let result = nearest.check(&level("alice", "active")).unwrap().unwrap();
        assert_eq!(result.via, level("alice", "active"));

        let config = AuthConfig {
            ancestor_tie_break: AncestorTieBreak::Senior,
            ..AuthConfig::default()
        };
        let mut senior =
            AuthorityChecker::new(&store, config, keys(&["shared"]), BTreeSet::new());
        let result = senior.check(&level("alice", "active")).unwrap().unwrap();
        assert_eq!(result.via, level("alice", "owner"));
    }

    #[test]
    fn test_cycle_contributes_nothing() {
        let store = store_with(&["alice", "bob"]);
        set_auth(
            &store,
            level("alice", "active"),
            Authority::from_permission(level("bob", "active")),
        );
        set_auth(
            &store,
            level("bob", "active"),
            Authority::from_permission(level("alice", "active")),
        );
        let mut checker = checker(&store, &["alice@active", "bob@active"]);
        // Only the owners can break the loop, and their keys were not provided.
        assert_eq!(checker.check(&level("alice", "active")).unwrap(), None);
    }

    #[test]
    fn test_cycle_with_alternative_source() {
        let store = store_with(&["alice", "bob"]);
        set_auth(
            &store,
            level("alice", "active"),
            Authority::from_permission(level("bob", "active")),
        );
        set_auth(
            &store,
            level("bob", "active"),
            Authority::from_permission(level("alice", "active")).with_key(key("bob-key"), 1),
        );
        let mut checker = checker(&store, &["bob-key"]);
        let result = checker.check(&level("alice", "active")).unwrap().unwrap();
        assert_eq!(result.delay, 0);
    }

    #[test]
    fn test_depth_limit() {
        let names: Vec<String> = (1..=4).map(|i| format!("acct{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let store = store_with(&refs);
        for pair in refs.windows(2) {
            set_auth(
                &store,
                level(pair[0], "active"),
                Authority::from_permission(level(pair[1], "active")),
            );
        }

        let shallow = AuthConfig {
            max_authority_depth: 2,
            ..AuthConfig::default()
        };
        let mut checker =
            AuthorityChecker::new(&store, shallow, keys(&["acct4@active"]), BTreeSet::new());
        assert_eq!(checker.check(&level("acct1", "active")).unwrap(), None);

        let deep = AuthConfig {
            max_authority_depth: 3,
            ..AuthConfig::default()
        };
        let mut checker =
            AuthorityChecker::new(&store, deep, keys(&["acct4@active"]), BTreeSet::new());
        assert!(checker.check(&level("acct1", "active")).unwrap().is_some());
    }

    #[test]
    fn test_shared_subpermission_reached_deeper_is_cut() {
        // dave@active is reached at depth 1 directly and at depth 2 via frank.
        // Only the shallow path leaves room to reach erin.
        let store = store_with(&["alice", "dave", "erin", "frank"]);
        set_auth(
            &store,
            level("alice", "active"),
            Authority::from_permission(level("dave", "active"))
                .with_account(level("frank", "active"), 1)
                .with_threshold(2),
        );
        set_auth(
            &store,
            level("dave", "active"),
            Authority::from_permission(level("erin", "active")),
        );
        set_auth(
            &store,
            level("frank", "active"),
            Authority::from_permission(level("dave", "active")),
        );

        let shallow = AuthConfig {
            max_authority_depth: 2,
            ..AuthConfig::default()
        };
        let mut checker =
            AuthorityChecker::new(&store, shallow, keys(&["erin@active"]), BTreeSet::new());
        assert_eq!(checker.check(&level("alice", "active")).unwrap(), None);

        let mut direct =
            AuthorityChecker::new(&store, shallow, keys(&["erin@active"]), BTreeSet::new());
        assert!(direct.check(&level("dave", "active")).unwrap().is_some());
    }

    #[test]
    fn test_provided_level_presatisfied() {
        let store = store_with(&["alice", "bob"]);
        set_auth(
            &store,
            level("alice", "active"),
            Authority::from_permission(level("bob", "active")),
        );
        let provided: BTreeSet<PermissionLevel> =
            [level("bob", "active"), level("carol", "active")].into_iter().collect();
        let mut checker =
            AuthorityChecker::new(&store, AuthConfig::default(), BTreeSet::new(), provided);
        assert!(checker.check(&level("alice", "active")).unwrap().is_some());
        assert_eq!(checker.irrelevant_levels(), vec![level("carol", "active")]);
    }

    #[test]
    fn test_surplus_key_unused() {
        let store = store_with(&["alice"]);
        let mut checker = checker(&store, &["alice@active", "alice@owner"]);
        checker.check(&level("alice", "active")).unwrap().unwrap();
        assert_eq!(checker.unused_keys(), keys(&["alice@owner"]));
    }

    proptest! {
        #[test]
        fn prop_key_threshold(
            weights in proptest::collection::vec(1u16..5, 1..6),
            mask in any::<u8>(),
            threshold in 1u32..15,
        ) {
            let store = MemoryStore::new();
            let mut auth = Authority::from_key(key("k0"), 0)
                .with_threshold(threshold);
            auth.keys.clear();
            let mut provided = BTreeSet::new();
            let mut provided_weight = 0u32;
            for (i, weight) in weights.iter().enumerate() {
                let k = key(&format!("k{i}"));
                auth = auth.with_key(k, *weight);
                if mask & (1 << i) != 0 {
                    provided.insert(k);
                    provided_weight += u32::from(*weight);
                }
            }
            let mut checker =
                AuthorityChecker::new(&store, AuthConfig::default(), provided, BTreeSet::new());
            let result = checker.check_authority(&auth).unwrap();
            prop_assert_eq!(result.is_some(), provided_weight >= threshold);
            if let Some(delay) = result {
                prop_assert_eq!(delay, 0);
            }
        }
    }
}

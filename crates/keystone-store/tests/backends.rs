//! The in-memory and SQLite stores must agree on every deferred-queue and
//! transaction-id operation, including what an undone session leaves behind.

use keystone_core::{names, AccountName, Name, PermissionLevel, TimePoint, TransactionId};
use keystone_store::{DeferredRow, MemoryStore, SqliteStore, StateStore, StoreError};
use proptest::prelude::*;

const SENDERS: [AccountName; 3] = [
    Name::from_static("alice"),
    Name::from_static("bob"),
    Name::from_static("carol"),
];
const TRX_IDS: u8 = 12;
const HORIZON: i64 = 40;

#[derive(Debug, Clone)]
enum Op {
    Upsert { sender: usize, sender_id: u8, trx: u8, delay: i64 },
    Remove { sender: usize, sender_id: u8 },
    Remember { trx: u8, expiration: i64 },
    Purge { now: i64 },
}

#[derive(Debug, PartialEq)]
enum Outcome {
    Upserted(Option<DeferredRow>),
    Removed(bool),
    Remembered,
    Purged(usize),
    AlreadyExists,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..SENDERS.len(), 0u8..6, 0..TRX_IDS, 0..HORIZON).prop_map(
            |(sender, sender_id, trx, delay)| Op::Upsert {
                sender,
                sender_id,
                trx,
                delay,
            }
        ),
        (0..SENDERS.len(), 0u8..6).prop_map(|(sender, sender_id)| Op::Remove { sender, sender_id }),
        (0..TRX_IDS, 0..HORIZON).prop_map(|(trx, expiration)| Op::Remember { trx, expiration }),
        (0..HORIZON).prop_map(|now| Op::Purge { now }),
    ]
}

fn trx_id(byte: u8) -> TransactionId {
    TransactionId::from_bytes([byte; 32])
}

fn row(sender: usize, sender_id: u8, trx: u8, delay: i64) -> DeferredRow {
    let sender = SENDERS[sender];
    DeferredRow {
        sender,
        sender_id: u128::from(sender_id),
        trx_id: trx_id(trx),
        authorizer: PermissionLevel::new(sender, names::ACTIVE),
        published: TimePoint::from_secs(0),
        delay_until: TimePoint::from_secs(delay),
        expiration: TimePoint::from_secs(delay + 600),
        packed_trx: vec![trx],
    }
}

fn apply(store: &dyn StateStore, op: &Op) -> Outcome {
    let result = match *op {
        Op::Upsert {
            sender,
            sender_id,
            trx,
            delay,
        } => store
            .upsert_deferred(&row(sender, sender_id, trx, delay))
            .map(Outcome::Upserted),
        Op::Remove { sender, sender_id } => store
            .remove_deferred(SENDERS[sender], u128::from(sender_id))
            .map(Outcome::Removed),
        Op::Remember { trx, expiration } => store
            .insert_transaction(&trx_id(trx), TimePoint::from_secs(expiration))
            .map(|()| Outcome::Remembered),
        Op::Purge { now } => store
            .purge_expired_transactions(TimePoint::from_secs(now))
            .map(Outcome::Purged),
    };
    match result {
        Ok(outcome) => outcome,
        Err(StoreError::AlreadyExists(_)) => Outcome::AlreadyExists,
        Err(e) => panic!("{op:?} failed: {e}"),
    }
}

/// Everything the engine can observe through the deferred and id indexes.
#[derive(Debug, PartialEq)]
struct View {
    due: Vec<DeferredRow>,
    by_sender: Vec<Vec<DeferredRow>>,
    remembered: Vec<Option<TimePoint>>,
}

fn view(store: &dyn StateStore) -> View {
    View {
        due: store.deferred_due(TimePoint::from_secs(HORIZON)).unwrap(),
        by_sender: SENDERS
            .iter()
            .map(|sender| store.deferred_by_sender(*sender).unwrap())
            .collect(),
        remembered: (0..TRX_IDS)
            .map(|trx| store.find_transaction(&trx_id(trx)).unwrap())
            .collect(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_backends_agree(
        ops in proptest::collection::vec(op(), 0..40),
        undone in proptest::collection::vec(op(), 0..10),
    ) {
        let memory = MemoryStore::new();
        let sqlite = SqliteStore::open_memory().unwrap();

        for op in &ops {
            prop_assert_eq!(apply(&memory, op), apply(&sqlite, op), "{:?}", op);
        }
        let before = view(&memory);
        prop_assert_eq!(&before, &view(&sqlite));

        for store in [&memory as &dyn StateStore, &sqlite] {
            store.begin_session().unwrap();
            for op in &undone {
                apply(store, op);
            }
            store.undo_session().unwrap();
            prop_assert_eq!(&view(store), &before);
        }
    }
}

//! End-to-end delayed execution: deferral, maturity, cancellation, and the
//! failure modes of matured transactions.

use anyhow::Result;
use keystone::core::{CancelDelay, SystemPayload};
use keystone::auth::AuthError;
use keystone::{EngineConfig, EngineError, TransactionStatus};
use keystone_testkit::{key_for, level, TestChain};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// alice and bob, alice holding 100 tokens, `alice@first` under active with
/// a 10 second wait and linked to `token::transfer`.
fn delayed_chain() -> Result<TestChain> {
    init_tracing();
    let mut chain = TestChain::new()?;
    chain.create_accounts(&["alice", "bob"])?;
    chain.issue("alice", 100)?;
    chain.create_permission("alice", "first", "active", 10)?;
    chain.linkauth("alice", "token", "transfer", "first", "active")?;
    Ok(chain)
}

#[test]
fn test_delayed_transfer_matures() -> Result<()> {
    let mut chain = delayed_chain()?;

    let trace = chain.transfer("alice", "bob", 5, "first", 10)?;
    assert_eq!(trace.status, TransactionStatus::Delayed);
    assert_eq!(trace.required_delay, 10);
    assert_eq!(trace.delay_until, Some(trace.block_time.plus_secs(10)));
    assert_eq!(chain.balance("alice")?, 100);
    assert_eq!(chain.balance("bob")?, 0);
    assert_eq!(chain.pending_count("alice")?, 1);

    let summary = chain.advance(9)?;
    assert!(summary.traces.is_empty());
    assert_eq!(chain.balance("bob")?, 0);

    let summary = chain.advance(1)?;
    let executed = summary
        .trace(&trace.id)
        .expect("matured transaction has a trace");
    assert_eq!(executed.status, TransactionStatus::Executed);
    assert!(executed.scheduled);
    assert_eq!(chain.balance("alice")?, 95);
    assert_eq!(chain.balance("bob")?, 5);
    assert_eq!(chain.pending_count("alice")?, 0);
    Ok(())
}

#[test]
fn test_insufficient_delay_rejected() -> Result<()> {
    let mut chain = delayed_chain()?;

    for declared in [0, 5, 9] {
        let err = chain.transfer("alice", "bob", 5, "first", declared).unwrap_err();
        assert!(
            matches!(err.as_auth(), Some(AuthError::MissingAuthority(_))),
            "declared {declared}: {err}"
        );
    }
    assert_eq!(chain.pending_count("alice")?, 0);
    assert_eq!(chain.balance("alice")?, 100);
    Ok(())
}

#[test]
fn test_longer_declared_delay_still_defers() -> Result<()> {
    let mut chain = delayed_chain()?;

    let trace = chain.transfer("alice", "bob", 5, "first", 20)?;
    assert_eq!(trace.status, TransactionStatus::Delayed);
    assert_eq!(trace.required_delay, 10);

    chain.advance(10)?;
    assert_eq!(chain.balance("bob")?, 0);
    chain.advance(10)?;
    assert_eq!(chain.balance("bob")?, 5);
    Ok(())
}

#[test]
fn test_parent_permission_skips_delay() -> Result<()> {
    let mut chain = delayed_chain()?;

    let trace = chain.transfer("alice", "bob", 5, "active", 0)?;
    assert_eq!(trace.status, TransactionStatus::Executed);
    assert_eq!(trace.required_delay, 0);
    assert_eq!(chain.balance("bob")?, 5);
    Ok(())
}

#[test]
fn test_any_declared_delay_defers() -> Result<()> {
    let mut chain = delayed_chain()?;

    let trace = chain.transfer("alice", "bob", 5, "active", 3)?;
    assert_eq!(trace.status, TransactionStatus::Delayed);
    assert_eq!(trace.required_delay, 0);
    chain.advance(3)?;
    assert_eq!(chain.balance("bob")?, 5);
    Ok(())
}

#[test]
fn test_canceldelay_removes_entry() -> Result<()> {
    let mut chain = delayed_chain()?;
    let delayed = chain.transfer("alice", "bob", 5, "first", 10)?;

    // the cancellation itself needs the same 10 seconds, covered by the credit
    let cancel = CancelDelay {
        canceling_auth: level("alice", "first")?,
        trx_id: delayed.id,
    }
    .into_action(vec![level("alice", "first")?])?;
    let trx = chain.sign(chain.transaction(vec![cancel], 0), &[&key_for("alice", "first")]);

    let time = chain.head_time().plus_secs(1);
    chain.engine.start_block(time)?;
    let trace = chain.engine.push_transaction(&trx)?;
    let summary = chain.engine.finalize_block()?;

    assert_eq!(trace.status, TransactionStatus::Executed);
    assert_eq!(trace.required_delay, 0);
    let canceled: Vec<_> = summary.with_status(TransactionStatus::Canceled).collect();
    assert_eq!(canceled.len(), 1);
    assert_eq!(canceled[0].id, delayed.id);
    assert_eq!(chain.pending_count("alice")?, 0);

    chain.advance(20)?;
    assert_eq!(chain.balance("alice")?, 100);
    assert_eq!(chain.balance("bob")?, 0);
    Ok(())
}

#[test]
fn test_canceldelay_with_unrelated_permission_rejected() -> Result<()> {
    let mut chain = delayed_chain()?;
    chain.create_permission("alice", "second", "active", 0)?;
    let delayed = chain.transfer("alice", "bob", 5, "first", 10)?;

    let err = chain.canceldelay("alice", "first", delayed.id, "second").unwrap_err();
    assert!(matches!(err.as_auth(), Some(AuthError::IrrelevantAuthority(_))));
    assert!(err.to_string().contains("declares irrelevant authority"));
    assert_eq!(chain.pending_count("alice")?, 1);
    Ok(())
}

#[test]
fn test_canceldelay_with_undeclared_authority_rejected() -> Result<()> {
    let mut chain = delayed_chain()?;
    let delayed = chain.transfer("alice", "bob", 5, "first", 10)?;

    let err = chain.canceldelay("alice", "active", delayed.id, "active").unwrap_err();
    assert!(matches!(err.as_auth(), Some(AuthError::ActionValidate(_))));
    assert!(err.to_string().contains("was not found as authorization"));
    assert_eq!(chain.pending_count("alice")?, 1);
    Ok(())
}

#[test]
fn test_canceldelay_unknown_transaction_rejected() -> Result<()> {
    let mut chain = delayed_chain()?;
    let executed = chain.transfer("alice", "bob", 5, "active", 0)?;

    let err = chain.canceldelay("alice", "active", executed.id, "active").unwrap_err();
    assert!(matches!(err.as_auth(), Some(AuthError::TransactionNotFound(_))));
    Ok(())
}

#[test]
fn test_matured_execution_failure_is_soft_fail() -> Result<()> {
    let mut chain = delayed_chain()?;
    let delayed = chain.transfer("alice", "bob", 5, "first", 10)?;

    // drain the balance before the deferred transfer runs
    chain.transfer("alice", "bob", 100, "active", 0)?;

    let summary = chain.advance(10)?;
    let trace = summary.trace(&delayed.id).expect("matured transaction has a trace");
    assert_eq!(trace.status, TransactionStatus::SoftFail);
    assert!(trace.error.as_deref().unwrap_or_default().contains("overdrawn balance"));
    assert_eq!(chain.balance("alice")?, 0);
    assert_eq!(chain.balance("bob")?, 100);
    assert_eq!(chain.pending_count("alice")?, 0);
    Ok(())
}

#[test]
fn test_matured_authorization_is_rechecked() -> Result<()> {
    let mut chain = delayed_chain()?;
    let delayed = chain.transfer("alice", "bob", 5, "first", 10)?;

    // rotate the key of alice@first while the transfer waits
    let rotated = keystone::Authority::from_key(key_for("alice", "rotated").public_key(), 10);
    chain.updateauth("alice", "first", "active", rotated, "active")?;

    let summary = chain.advance(10)?;
    let trace = summary.trace(&delayed.id).expect("matured transaction has a trace");
    assert_eq!(trace.status, TransactionStatus::SoftFail);
    assert_eq!(chain.balance("bob")?, 0);
    assert_eq!(chain.pending_count("alice")?, 0);
    Ok(())
}

#[test]
fn test_missed_window_expires() -> Result<()> {
    let mut chain = delayed_chain()?;
    let window = chain.engine.config().deferred_trx_expiration_window;
    let delayed = chain.transfer("alice", "bob", 5, "first", 10)?;

    let summary = chain.advance(10 + window + 1)?;
    let trace = summary.trace(&delayed.id).expect("expired transaction has a trace");
    assert_eq!(trace.status, TransactionStatus::Expired);
    assert!(trace.scheduled);
    assert_eq!(chain.balance("bob")?, 0);
    assert_eq!(chain.pending_count("alice")?, 0);
    Ok(())
}

#[test]
fn test_matured_in_maturity_order() -> Result<()> {
    let mut chain = delayed_chain()?;
    let later = chain.transfer("alice", "bob", 60, "first", 12)?;
    let sooner = chain.transfer("alice", "bob", 50, "first", 10)?;

    // both mature in the same block; the sooner one drains enough that the
    // later one overdraws
    let summary = chain.advance(20)?;
    let statuses: Vec<_> = summary.traces.iter().map(|t| (t.id, t.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (sooner.id, TransactionStatus::Executed),
            (later.id, TransactionStatus::SoftFail),
        ]
    );
    assert_eq!(chain.balance("bob")?, 50);
    Ok(())
}

#[test]
fn test_failed_transaction_rolls_back_every_action() -> Result<()> {
    let mut chain = delayed_chain()?;
    let alice = level("alice", "active")?;
    let ok = keystone_testkit::token::transfer_action(
        "alice".parse()?,
        "bob".parse()?,
        40,
        alice,
    )?;
    let overdraw = keystone_testkit::token::transfer_action(
        "alice".parse()?,
        "bob".parse()?,
        80,
        alice,
    )?;

    let err = chain.push(vec![ok, overdraw], &[&key_for("alice", "active")], 0).unwrap_err();
    assert!(matches!(err, EngineError::ActionFailed(_)));
    assert_eq!(chain.balance("alice")?, 100);
    assert_eq!(chain.balance("bob")?, 0);
    Ok(())
}

#[test]
fn test_replayed_transfer_rejected() -> Result<()> {
    init_tracing();
    let mut chain = TestChain::new()?;
    chain.create_accounts(&["alice", "bob"])?;
    chain.issue("alice", 100)?;

    let trx = chain.transfer_trx("alice", "bob", 10, "active", 0)?;
    chain.push_signed(&trx)?;
    let err = chain.push_signed(&trx).unwrap_err();
    assert!(matches!(err, EngineError::DuplicateTransaction(_)), "{err}");
    assert_eq!(chain.balance("alice")?, 90);
    assert_eq!(chain.balance("bob")?, 10);
    Ok(())
}

#[test]
fn test_pending_deferral_resubmission_replaces() -> Result<()> {
    let mut chain = delayed_chain()?;
    let trx = chain.transfer_trx("alice", "bob", 5, "first", 10)?;
    let first = chain.push_signed(&trx)?;
    let second = chain.push_signed(&trx)?;

    assert_eq!(second.status, TransactionStatus::Delayed);
    assert_eq!(second.id, first.id);
    let pending = chain.engine.list_pending("alice".parse()?)?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].delay_until, second.block_time.plus_secs(10));

    chain.advance(10)?;
    assert_eq!(chain.balance("bob")?, 5);
    let err = chain.push_signed(&trx).unwrap_err();
    assert!(matches!(err, EngineError::DuplicateTransaction(_)), "{err}");
    Ok(())
}

#[test]
fn test_canceled_deferral_cannot_be_resubmitted() -> Result<()> {
    let mut chain = delayed_chain()?;
    let trx = chain.transfer_trx("alice", "bob", 5, "first", 10)?;
    let delayed = chain.push_signed(&trx)?;
    chain.canceldelay("alice", "first", delayed.id, "first")?;

    let err = chain.push_signed(&trx).unwrap_err();
    assert!(matches!(err, EngineError::DuplicateTransaction(_)), "{err}");
    assert_eq!(chain.pending_count("alice")?, 0);
    Ok(())
}

#[test]
fn test_aborted_block_discards_everything() -> Result<()> {
    let mut chain = delayed_chain()?;
    let head = chain.head_time();
    let now = chain.transfer_trx("alice", "bob", 10, "active", 0)?;
    let later = chain.transfer_trx("alice", "bob", 5, "first", 10)?;

    chain.engine.start_block(head.plus_secs(1))?;
    chain.engine.push_transaction(&now)?;
    chain.engine.push_transaction(&later)?;
    assert_eq!(chain.balance("bob")?, 10);
    chain.engine.abort_block()?;

    assert_eq!(chain.engine.head_time(), Some(head));
    assert_eq!(chain.balance("bob")?, 0);
    assert_eq!(chain.pending_count("alice")?, 0);
    Ok(())
}

#[test]
fn test_schedule_or_execute_outcomes() -> Result<()> {
    let mut chain = delayed_chain()?;
    let now = chain.transfer_trx("alice", "bob", 10, "active", 0)?;
    let later = chain.transfer_trx("alice", "bob", 5, "first", 10)?;
    let too_soon = chain.transfer_trx("alice", "bob", 5, "first", 0)?;

    let time = chain.head_time().plus_secs(1);
    chain.engine.start_block(time)?;
    assert!(chain.engine.schedule_or_execute(&now).is_executed());
    assert!(chain.engine.schedule_or_execute(&later).is_delayed());
    assert!(chain.engine.schedule_or_execute(&too_soon).is_rejected());
    let summary = chain.engine.finalize_block()?;
    // rejected transactions leave no trace
    assert_eq!(summary.traces.len(), 2);
    Ok(())
}

#[test]
fn test_required_keys_and_check_authorization() -> Result<()> {
    let chain = delayed_chain()?;
    let trx = chain.transfer_trx("alice", "bob", 5, "first", 10)?;

    let candidates = [
        key_for("alice", "first").public_key(),
        key_for("bob", "active").public_key(),
        key_for("bob", "owner").public_key(),
    ]
    .into_iter()
    .collect();
    let required = chain.engine.required_keys(&trx, &candidates)?;
    assert_eq!(
        required,
        [key_for("alice", "first").public_key()].into_iter().collect()
    );

    let summary = chain.engine.check_authorization(&trx)?;
    assert_eq!(summary.required_delay, 10);
    assert_eq!(
        summary.satisfied_by.get(&level("alice", "first")?),
        Some(&level("alice", "first")?)
    );
    Ok(())
}

#[test]
fn test_deferred_sender_is_first_authorizer() -> Result<()> {
    let mut chain = delayed_chain()?;
    let trace = chain.transfer("alice", "bob", 5, "first", 10)?;

    let pending = chain.engine.list_pending("alice".parse()?)?;
    assert_eq!(pending.len(), 1);
    let row = &pending[0];
    assert_eq!(row.trx_id, trace.id);
    assert_eq!(row.sender_id, trace.id.sender_id());
    assert_eq!(row.authorizer, level("alice", "first")?);
    assert_eq!(row.delay_sec(), 10);
    assert_eq!(
        row.expiration,
        row.delay_until
            .plus_secs(EngineConfig::default().deferred_trx_expiration_window)
    );
    assert!(chain.engine.list_pending("bob".parse()?)?.is_empty());
    Ok(())
}

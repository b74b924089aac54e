// ============================================================================
// Lifecycle scenarios
// ============================================================================
//
// End-to-end runs of the confirmation tasks against the in-memory chain,
// relay, ledger and fund locks. Paused tokio time drives pollers and
// scheduled re-checks.
//
// ============================================================================

use std::time::Duration;

use coinflip_reconciler::mock::MockEnvironment;
use coinflip_reconciler::rpc::chain_client::bet_created_event;
use coinflip_reconciler::rpc::{ChainBetStatus, TxResult};
use coinflip_reconciler::{
    AcceptOutcome, CancelOutcome, CreateOutcome, NotificationKind, PendingSecretStore, Side,
    SweepScheduler, TickOutcome, WagerAction, WagerStatus,
};

// ============================================================================
// CREATE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_create_confirmed_with_bet_event() {
    let env = MockEnvironment::new();
    let broadcast = env.begin_create("alice", Side::Heads, [42u8; 32], 1_000, "H1");
    env.chain.insert_tx("H1", TxResult::success(vec![bet_created_event(42)]));

    let outcome = env.reconciler.confirm_create(broadcast.clone()).await.unwrap();
    assert_eq!(outcome, CreateOutcome::Confirmed(42));

    let wager = env.ledger.wager(42).unwrap();
    assert_eq!(wager.status, WagerStatus::Open);
    assert_eq!(wager.create_tx_hash.as_deref(), Some("H1"));
    assert!(wager.has_secret());

    assert!(env.secrets.get(&broadcast.commitment).unwrap().is_none());
    assert_eq!(env.funds.inflight("alice"), 0);
    // Stake now belongs to the open wager
    assert_eq!(env.funds.locked("alice"), 1_000);
    assert_eq!(env.notifier.count(NotificationKind::Confirmed, WagerAction::Create), 1);
    assert_eq!(env.notifier.all().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_detached_create_task_completes() {
    let env = MockEnvironment::new();
    let broadcast = env.begin_create("alice", Side::Tails, [8u8; 32], 250, "H2");

    let handle = env.reconciler.track_create(broadcast);
    // Included after a few poll rounds
    tokio::time::sleep(Duration::from_millis(300)).await;
    env.chain.insert_tx("H2", TxResult::success(vec![bet_created_event(43)]));
    handle.await.unwrap();

    assert_eq!(env.ledger.wager(43).unwrap().status, WagerStatus::Open);
    assert_eq!(env.funds.inflight("alice"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_create_recheck_leaves_unseen_create_to_orphan_import() {
    let env = MockEnvironment::new();
    let broadcast = env.begin_create("alice", Side::Heads, [9u8; 32], 500, "H3");

    let outcome = env.reconciler.confirm_create(broadcast.clone()).await.unwrap();
    assert_eq!(outcome, CreateOutcome::Pending);

    tokio::time::advance(env.reconciler.config().create_recheck_delay).await;
    let scheduler = SweepScheduler::new(env.reconciler.clone());
    match scheduler.tick().await {
        TickOutcome::Ran(report) => assert_eq!(report.rechecks_run, 1),
        TickOutcome::Skipped => panic!("no other tick was running"),
    }

    let record = env.ledger.by_commitment(&broadcast.commitment).unwrap();
    assert_eq!(record.status, WagerStatus::Creating);
    assert_eq!(env.funds.locked("alice"), 500);
    assert_eq!(env.funds.inflight("alice"), 0);
    assert!(env.notifier.all().is_empty());
}

// ============================================================================
// ACCEPT
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unseen_accept_reverted_after_recheck_window() {
    let env = MockEnvironment::new();
    env.open_wager(60, "alice", 1_000);
    let broadcast = env.begin_accept(60, "bob", Side::Heads, "HA60");

    let outcome = env.reconciler.confirm_accept(broadcast).await.unwrap();
    assert_eq!(outcome, AcceptOutcome::Pending);
    assert_eq!(env.ledger.wager(60).unwrap().status, WagerStatus::Accepting);
    assert_eq!(env.funds.locked("bob"), 1_000);

    tokio::time::advance(Duration::from_secs(45)).await;
    let scheduler = SweepScheduler::new(env.reconciler.clone());
    assert!(matches!(scheduler.tick().await, TickOutcome::Ran(r) if r.rechecks_run == 1));

    let wager = env.ledger.wager(60).unwrap();
    assert_eq!(wager.status, WagerStatus::Open);
    assert_eq!(wager.acceptor_id, None);
    assert_eq!(env.funds.locked("bob"), 0);
    assert_eq!(env.funds.locked("alice"), 1_000);
    assert_eq!(env.notifier.count(NotificationKind::Failed, WagerAction::Accept), 1);
    assert_eq!(env.notifier.count(NotificationKind::Reverted, WagerAction::Accept), 1);
}

#[tokio::test(start_paused = true)]
async fn test_accept_without_secret_stays_accepted() {
    let env = MockEnvironment::new();
    env.open_wager(61, "alice", 1_000);
    let broadcast = env.begin_accept(61, "bob", Side::Tails, "HA61");
    env.chain.insert_tx("HA61", TxResult::success(vec![]));
    env.chain.accept_bet(61, "cosmos1bob", Side::Tails);

    let outcome = env.reconciler.confirm_accept(broadcast).await.unwrap();
    assert_eq!(outcome, AcceptOutcome::Accepted);

    let wager = env.ledger.wager(61).unwrap();
    assert_eq!(wager.status, WagerStatus::Accepted);
    assert!(env.relay.requests().is_empty());
    assert_eq!(env.funds.locked("alice"), 1_000);
    assert_eq!(env.funds.locked("bob"), 1_000);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_reveal_when_parallel_disabled() {
    let mut config = coinflip_reconciler::ReconcilerConfig::mock();
    config.parallel_reveal = false;
    let env = MockEnvironment::with_config(config);
    env.open_wager(62, "alice", 1_000);
    env.ledger.attach_secret(62, Side::Tails, &[3u8; 32]);
    let broadcast = env.begin_accept(62, "bob", Side::Tails, "HA62");
    env.chain.insert_tx("HA62", TxResult::success(vec![]));
    env.chain.accept_bet(62, "cosmos1bob", Side::Tails);

    env.reconciler.confirm_accept(broadcast).await.unwrap();

    let wager = env.ledger.wager(62).unwrap();
    assert_eq!(wager.status, WagerStatus::Revealed);
    // Guess matched the maker's side
    assert_eq!(wager.winner_id.as_deref(), Some("bob"));
    assert_eq!(wager.maker_secret, None);
    assert_eq!(env.funds.locked("alice"), 0);
    assert_eq!(env.funds.locked("bob"), 0);
    assert!(env.funds.unlock_calls().is_empty());
}

// ============================================================================
// CANCEL
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_then_repeated_sync_unlocks_once() {
    let env = MockEnvironment::new();
    env.open_wager(70, "alice", 1_000);
    let broadcast = env.begin_cancel(70, "HX70");
    env.chain.insert_tx("HX70", TxResult::success(vec![]));
    env.chain.set_bet_status(70, ChainBetStatus::Canceled);

    let outcome = env.reconciler.confirm_cancel(broadcast).await.unwrap();
    assert!(matches!(outcome, CancelOutcome::Canceled | CancelOutcome::Resolved));

    for _ in 0..3 {
        env.reconciler.sync_wager(70).await.unwrap();
    }
    assert_eq!(env.funds.unlock_calls().len(), 1);
    assert_eq!(env.notifier.count(NotificationKind::Canceled, WagerAction::Cancel), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_confirmations_of_same_wager() {
    let env = MockEnvironment::new();
    env.open_wager(71, "alice", 1_000);
    let broadcast = env.begin_cancel(71, "HX71");
    env.chain.insert_tx("HX71", TxResult::success(vec![]));
    env.chain.set_bet_status(71, ChainBetStatus::Canceled);

    let (a, b) = tokio::join!(
        env.reconciler.confirm_cancel(broadcast.clone()),
        env.reconciler.confirm_cancel(broadcast),
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    assert!(outcomes.contains(&CancelOutcome::Busy) || outcomes.contains(&CancelOutcome::AlreadyApplied));
    assert_eq!(env.funds.unlock_calls().len(), 1);
    assert_eq!(env.funds.locked("alice"), 0);
}

//! End-to-end venue sessions against the scripted ledger node.

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use ledger_dice::dashboard::DashboardState;
use ledger_dice::engine::decision::{CashoutPolicy, DecisionEngine, GamePolicy};
use ledger_dice::engine::orchestrator::{ReconnectPolicy, Venue, VenueSettings};
use ledger_dice::fairness::SecretSchedule;
use ledger_dice::ledger::client::{StreamClient, StreamState};
use ledger_dice::ledger::protocol::{PaymentTx, SignedPayment};
use ledger_dice::ledger::signer::{NodeSigner, PaymentSigner};
use ledger_dice::storage::{self, paid::PaidLedger};
use ledger_dice::types::{Checkpoint, Outcome, VenueError};

use crate::mock_ledger::*;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    node: MockNode,
    venue: Venue,
    checkpoint: TempCheckpoint,
}

/// Checkpoint file removed when the test ends.
struct TempCheckpoint(String);

impl TempCheckpoint {
    fn new() -> Self {
        let mut p = std::env::temp_dir();
        p.push(format!("ledger_dice_it_checkpoint_{}.json", uuid::Uuid::new_v4()));
        Self(p.to_string_lossy().to_string())
    }
}

impl Drop for TempCheckpoint {
    fn drop(&mut self) {
        let _ = storage::delete_checkpoint(Some(&self.0));
    }
}

async fn harness_with(
    sessions: Vec<SessionScript>,
    signer: Box<dyn PaymentSigner>,
    cashout: Option<CashoutPolicy>,
) -> Harness {
    let node = MockNode::new(sessions);
    let checkpoint = TempCheckpoint::new();
    let settings = VenueSettings {
        account: VENUE.to_string(),
        checkpoint_path: checkpoint.0.clone(),
        cashout,
        reconnect: ReconnectPolicy::default(),
        backlog_timeout: Duration::from_millis(200),
    };
    let engine = DecisionEngine::new(
        GamePolicy::default(),
        Arc::new(SecretSchedule::fixed(SecretString::new("123456".into()))),
    );
    let venue = Venue::new(
        settings,
        StreamClient::new(Box::new(node.clone())),
        engine,
        signer,
        PaidLedger::in_memory().await.unwrap(),
        Checkpoint::zero(),
    );
    Harness {
        node,
        venue,
        checkpoint,
    }
}

async fn harness(sessions: Vec<SessionScript>) -> Harness {
    let signer = Box::new(NodeSigner::new(SecretString::new("sVenueSecret".into())));
    harness_with(sessions, signer, None).await
}

/// Run one session to the end of its script.
async fn run_session(h: &mut Harness) -> VenueError {
    h.venue
        .run_session()
        .await
        .expect_err("scripted sessions end when the node closes")
}

struct FailingSigner;

#[async_trait]
impl PaymentSigner for FailingSigner {
    async fn sign(&self, _tx: &PaymentTx) -> Result<SignedPayment> {
        anyhow::bail!("signer offline")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_backlog_then_live_settles_in_order() {
    let session = SessionScript::backlog(&[
        TestPayment::bet(WIN_HASH, 100, 1_000_000),
        TestPayment::bet(LOSS_HASH, 101, 1_000_000),
    ])
    .live(&[TestPayment::bet(WIN_HASH_2, 102, 2_000_000)]);
    let mut h = harness(vec![session]).await;

    let err = run_session(&mut h).await;
    assert!(matches!(err, VenueError::Transport(_)));
    assert_eq!(h.venue.state(), StreamState::Reconnecting);

    assert_eq!(
        h.node.commands(),
        vec!["account_tx", "submit", "submit", "subscribe", "submit"]
    );

    // First run asks for the earliest available ledger, ascending.
    let sent = h.node.sent();
    let backlog = &sent[0];
    assert_eq!(backlog["account"], VENUE);
    assert_eq!(backlog["ledger_index_min"], -1);
    assert_eq!(backlog["forward"], true);

    let submits = h.node.submits();
    assert_eq!(submits[0]["tx_json"]["Destination"], PLAYER);
    assert_eq!(submits[0]["tx_json"]["Amount"]["value"], "1980100");
    assert_eq!(submits[0]["secret"], "sVenueSecret");
    assert_eq!(submits[1]["tx_json"]["Amount"]["value"], "100");
    assert_eq!(submits[2]["tx_json"]["Amount"]["value"], "3960200");

    let stats = h.venue.stats();
    assert_eq!(stats.wins, 2);
    assert_eq!(stats.losses, 1);
    assert_eq!(stats.bets_seen, 3);

    assert_eq!(h.venue.checkpoint().ledger_index, 102);
    assert_eq!(h.venue.checkpoint().tx_hash, WIN_HASH_2);
    let on_disk = storage::load_checkpoint(Some(&h.checkpoint.0)).unwrap();
    assert_eq!(&on_disk, h.venue.checkpoint());
}

#[tokio::test]
async fn test_submit_results_are_recorded() {
    let session = SessionScript::backlog(&[TestPayment::bet(LOSS_HASH, 100, 1_000_000)]);
    let mut h = harness(vec![session]).await;
    run_session(&mut h).await;

    let record = h.venue.paid_ledger().get(LOSS_HASH).await.unwrap().unwrap();
    assert_eq!(record.outcome, Some(Outcome::Loss));
    assert_eq!(record.payout_drops, 100);
    assert_eq!(record.destination, PLAYER);
    assert_eq!(record.engine_result.as_deref(), Some("tesSUCCESS"));
}

#[tokio::test]
async fn test_non_bets_are_ignored() {
    let session = SessionScript::backlog(&[
        // Venue's own outgoing payout
        TestPayment::bet(WIN_HASH, 100, 1_980_100).from(VENUE).to(PLAYER),
        // Not a payment
        TestPayment::bet(LOSS_HASH, 100, 0).kind("TrustSet"),
        // Addressed elsewhere
        TestPayment::bet(WIN_HASH_2, 101, 1_000_000).to("rSomeoneElse"),
    ]);
    let mut h = harness(vec![session]).await;
    run_session(&mut h).await;

    assert!(h.node.submits().is_empty());
    assert_eq!(h.venue.stats().bets_seen, 0);
    assert!(h.venue.checkpoint().is_first_run());
}

#[tokio::test]
async fn test_refill_tag_is_not_paid() {
    let session = SessionScript::backlog(&[]).live(&[
        TestPayment::bet(WIN_HASH, 200, 50_000_000).tag(777),
    ]);
    let mut h = harness(vec![session]).await;
    run_session(&mut h).await;

    assert!(h.node.submits().is_empty());
    assert_eq!(h.venue.stats().skipped, 1);
    // Still advances the cursor
    assert_eq!(h.venue.checkpoint().ledger_index, 200);
}

#[tokio::test]
async fn test_oversized_bet_is_refunded() {
    // limit = 5 XRP / 5 = 1 XRP
    let session = SessionScript::backlog(&[
        TestPayment::bet(LOSS_HASH, 100, 2_000_000).bankroll(5_000_000),
    ]);
    let mut h = harness(vec![session]).await;
    run_session(&mut h).await;

    let submits = h.node.submits();
    assert_eq!(submits.len(), 1);
    assert_eq!(submits[0]["tx_json"]["Amount"]["value"], "2000000");
    assert_eq!(h.venue.stats().refunds, 1);
}

#[tokio::test]
async fn test_marker_pages_before_subscribe() {
    let session = SessionScript::default()
        .page(
            &[TestPayment::bet(WIN_HASH, 100, 1_000_000)],
            Some(json!({"ledger": 100, "seq": 7})),
        )
        .page(&[TestPayment::bet(LOSS_HASH, 105, 1_000_000)], None);
    let mut h = harness(vec![session]).await;
    run_session(&mut h).await;

    assert_eq!(
        h.node.commands(),
        vec!["account_tx", "submit", "account_tx", "submit", "subscribe"]
    );
    let sent = h.node.sent();
    let second_page = &sent[2];
    assert_eq!(second_page["marker"]["seq"], 7);
    assert_eq!(second_page["ledger_index_min"], -1);
    assert_eq!(h.venue.checkpoint().ledger_index, 105);
}

#[tokio::test]
async fn test_unreadable_backlog_entry_skips_only_itself() {
    let mut no_hash = TestPayment::bet(LOSS_HASH, 99, 1_000_000).history_entry();
    no_hash["tx"].as_object_mut().unwrap().remove("hash");

    // API v2 entry: body under tx_json, hash and ledger_index beside it.
    let mut v2 = TestPayment::bet(LOSS_HASH_2, 101, 1_000_000).history_entry();
    let mut tx = v2["tx"].take();
    let hash = tx.as_object_mut().unwrap().remove("hash").unwrap();
    let ledger_index = tx.as_object_mut().unwrap().remove("ledger_index").unwrap();
    let entry = v2.as_object_mut().unwrap();
    entry.remove("tx");
    entry.insert("tx_json".into(), tx);
    entry.insert("hash".into(), hash);
    entry.insert("ledger_index".into(), ledger_index);

    let session = SessionScript::default().raw_page(
        vec![
            no_hash,
            TestPayment::bet(WIN_HASH, 100, 1_000_000).history_entry(),
            v2,
        ],
        None,
    );
    let mut h = harness(vec![session]).await;
    run_session(&mut h).await;

    assert_eq!(
        h.node.commands(),
        vec!["account_tx", "submit", "submit", "subscribe"]
    );
    assert_eq!(h.venue.stats().wins, 1);
    assert_eq!(h.venue.stats().losses, 1);
    assert!(h.venue.paid_ledger().contains(WIN_HASH).await.unwrap());
    assert!(h.venue.paid_ledger().contains(LOSS_HASH_2).await.unwrap());
    assert!(!h.venue.paid_ledger().contains(LOSS_HASH).await.unwrap());
    assert_eq!(h.venue.checkpoint().ledger_index, 101);
}

#[tokio::test]
async fn test_reconnect_does_not_double_pay() {
    let first = SessionScript::backlog(&[TestPayment::bet(WIN_HASH, 100, 1_000_000)])
        .live(&[TestPayment::bet(LOSS_HASH, 101, 1_000_000)]);
    // The node replays the checkpointed ledger and more.
    let second = SessionScript::backlog(&[
        TestPayment::bet(WIN_HASH, 100, 1_000_000),
        TestPayment::bet(LOSS_HASH, 101, 1_000_000),
        TestPayment::bet(LOSS_HASH_2, 102, 1_000_000),
    ]);
    let mut h = harness(vec![first, second]).await;

    run_session(&mut h).await;
    assert_eq!(h.node.submits().len(), 2);

    run_session(&mut h).await;
    let submits = h.node.submits();
    assert_eq!(submits.len(), 3);

    // The second session resumes from the checkpointed ledger.
    let backlogs: Vec<_> = h
        .node
        .sent()
        .into_iter()
        .filter(|c| c["command"] == "account_tx")
        .collect();
    assert_eq!(backlogs[1]["ledger_index_min"], 101);

    assert_eq!(h.venue.stats().duplicates, 2);
    assert_eq!(h.venue.checkpoint().ledger_index, 102);
    assert_eq!(h.venue.paid_ledger().count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_garbage_does_not_end_session() {
    let session = SessionScript::backlog(&[])
        .raw("{not json at all")
        .raw(r#"{"type": "transaction", "validated": true}"#)
        .raw(r#"{"type": "ledgerClosed", "ledger_index": 150}"#)
        .live(&[TestPayment::bet(WIN_HASH, 151, 1_000_000)]);
    let mut h = harness(vec![session]).await;
    run_session(&mut h).await;

    assert_eq!(h.node.submits().len(), 1);
    assert_eq!(h.venue.stats().wins, 1);
}

#[tokio::test]
async fn test_signing_failure_keeps_bet_for_replay() {
    let session = SessionScript::backlog(&[TestPayment::bet(WIN_HASH, 100, 1_000_000)]);
    let mut h = harness_with(vec![session], Box::new(FailingSigner), None).await;

    let err = run_session(&mut h).await;
    assert!(matches!(err, VenueError::Signing(_)));
    assert!(h.node.submits().is_empty());
    assert!(h.venue.checkpoint().is_first_run());
    assert!(!h.venue.paid_ledger().contains(WIN_HASH).await.unwrap());
}

#[tokio::test]
async fn test_backlog_command_error_ends_session() {
    let session = SessionScript {
        backlog_error: Some("actNotFound".into()),
        ..Default::default()
    };
    let mut h = harness(vec![session]).await;

    match run_session(&mut h).await {
        VenueError::Command { error, .. } => assert_eq!(error, "actNotFound"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!h.node.commands().contains(&"subscribe".to_string()));
}

#[tokio::test]
async fn test_silent_backlog_times_out() {
    let mut h = harness(vec![SessionScript::unresponsive()]).await;

    let err = tokio::time::timeout(Duration::from_secs(5), h.venue.run_session())
        .await
        .expect("backlog wait is bounded")
        .expect_err("no reply ends the session");
    match err {
        VenueError::Transport(message) => assert!(message.contains("account_tx")),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(h.node.commands(), vec!["account_tx"]);
    assert!(h.venue.checkpoint().is_first_run());
}

#[tokio::test]
async fn test_unreachable_node_is_transport_error() {
    let mut h = harness(Vec::new()).await;
    let err = run_session(&mut h).await;
    assert!(matches!(err, VenueError::Transport(_)));
    assert_eq!(h.venue.state(), StreamState::Reconnecting);
}

#[tokio::test]
async fn test_cashout_sweeps_once() {
    let cashout = CashoutPolicy {
        threshold_drops: 100_000_000,
        target_account: "rColdWallet".into(),
        destination_tag: Some(9),
    };
    let bet = TestPayment::bet(LOSS_HASH, 100, 1_000_000).bankroll(150_000_000);
    let sessions = vec![
        SessionScript::backlog(&[bet.clone()]),
        SessionScript::backlog(&[bet]),
    ];
    let signer = Box::new(NodeSigner::new(SecretString::new("sVenueSecret".into())));
    let mut h = harness_with(sessions, signer, Some(cashout)).await;

    run_session(&mut h).await;
    run_session(&mut h).await;

    let submits = h.node.submits();
    assert_eq!(submits.len(), 2);
    assert_eq!(submits[0]["tx_json"]["Destination"], PLAYER);
    assert_eq!(submits[1]["tx_json"]["Destination"], "rColdWallet");
    assert_eq!(submits[1]["tx_json"]["DestinationTag"], 9);
    // 150 XRP - 100 drops payout - 100 XRP threshold
    assert_eq!(submits[1]["tx_json"]["Amount"]["value"], "49999900");
}

#[tokio::test]
async fn test_monitor_receives_snapshots() {
    let session = SessionScript::backlog(&[TestPayment::bet(WIN_HASH, 100, 1_000_000)]);
    let Harness { node: _node, venue, checkpoint: _checkpoint } = harness(vec![session]).await;
    let monitor = Arc::new(DashboardState::new("HILO-TEST", VENUE, Checkpoint::zero()));
    let mut venue = venue.with_monitor(monitor.clone());

    venue.run_session().await.unwrap_err();

    assert_eq!(monitor.stats.read().await.wins, 1);
    assert_eq!(monitor.checkpoint.read().await.ledger_index, 100);
    // Last state published by the session itself
    assert_eq!(*monitor.stream_state.read().await, StreamState::LiveSubscribed);
    let decisions = monitor.recent_decisions.read().await;
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].outcome, Outcome::Win);
}

//! Event-driven advancement

mod common;

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{eyre, Result};

use bridge_tracker::watcher::{BridgeEvent, EventSource};
use bridge_tracker::{Layer, NextAction, Status, Watcher};
use common::{hash, message_pair, Harness, CHALLENGE_BUFFER, CHALLENGE_PERIOD};

/// Hands out queued batches of events, one batch per poll
struct MockEventSource {
    layer: Layer,
    batches: VecDeque<Result<Vec<BridgeEvent>>>,
}

impl MockEventSource {
    fn new(layer: Layer, batches: Vec<Result<Vec<BridgeEvent>>>) -> Self {
        Self {
            layer,
            batches: batches.into(),
        }
    }
}

#[async_trait]
impl EventSource for MockEventSource {
    fn layer(&self) -> Layer {
        self.layer
    }

    async fn poll(&mut self) -> Result<Vec<BridgeEvent>> {
        self.batches.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

fn watcher(h: &Harness, sources: Vec<Box<dyn EventSource>>) -> Watcher {
    Watcher::new(h.scanner(), h.worker(), sources, Duration::from_millis(10))
}

#[tokio::test]
async fn test_deposit_initiated_advances_record() {
    let h = Harness::new();
    h.mined_deposit(hash(0x0a), hash(0x4d));
    h.store.record_transfer(hash(0x0a), Layer::L1).await.unwrap();

    let w = watcher(&h, Vec::new());
    w.handle(&BridgeEvent::DepositInitiated { tx_hash: hash(0x0a) })
        .await
        .unwrap();

    let status = h.store.snapshot().await.unwrap().get(&hash(0x0a)).unwrap().status();
    assert_eq!(status, Status::Waiting);
}

#[tokio::test]
async fn test_deposit_finalized_marks_waiting_deposit_relayed() {
    let h = Harness::new();
    h.mined_deposit(hash(0x0a), hash(0x4d));
    h.store.record_transfer(hash(0x0a), Layer::L1).await.unwrap();
    h.scanner().run_pass().await.unwrap();

    h.gateway.add_relay(Layer::L2, hash(0x4d), hash(0x0b));
    let w = watcher(&h, Vec::new());
    w.handle(&BridgeEvent::DepositFinalized { tx_hash: hash(0x0b) })
        .await
        .unwrap();

    let record = h.store.snapshot().await.unwrap().get(&hash(0x0a)).cloned().unwrap();
    assert_eq!(record.status(), Status::Relayed);
    assert_eq!(record.relay_tx_hash(), Some(hash(0x0b)));
    assert_eq!(record.next_action(), NextAction::Withdraw);
}

#[tokio::test]
async fn test_replayed_event_changes_nothing() {
    let h = Harness::new();
    h.mined_deposit(hash(0x0a), hash(0x4d));
    h.gateway.add_relay(Layer::L2, hash(0x4d), hash(0x0b));
    h.store.record_transfer(hash(0x0a), Layer::L1).await.unwrap();

    let event = BridgeEvent::DepositInitiated { tx_hash: hash(0x0a) };
    let w = watcher(&h, Vec::new());
    w.handle(&event).await.unwrap();
    let first = h.store.snapshot().await.unwrap();

    w.handle(&event).await.unwrap();
    h.scanner().run_pass().await.unwrap();
    let second = h.store.snapshot().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(
        second.get(&hash(0x0a)).unwrap().status(),
        Status::Relayed
    );
}

#[tokio::test]
async fn test_withdrawal_finalized_reconciles_without_submitting() {
    let h = Harness::new();
    let batched_at = 2_000;
    let pair = h.batched_withdrawal(hash(0x0c), hash(0x0e), 40, batched_at);
    h.l1
        .set_latest_timestamp(batched_at + CHALLENGE_PERIOD + CHALLENGE_BUFFER);
    h.store.record_transfer(hash(0x0c), Layer::L2).await.unwrap();
    let scanner = h.scanner();
    scanner.run_pass().await.unwrap();
    scanner.run_pass().await.unwrap();

    // Someone else relayed the message
    h.gateway
        .add_relay(Layer::L1, pair.message.hash(), hash(0x7e));

    let w = watcher(&h, Vec::new());
    w.handle(&BridgeEvent::WithdrawalFinalized { tx_hash: hash(0x7e) })
        .await
        .unwrap();

    let record = h.store.snapshot().await.unwrap().get(&hash(0x0c)).cloned().unwrap();
    assert_eq!(record.status(), Status::Relayed);
    assert_eq!(record.relay_tx_hash(), Some(hash(0x7e)));
    assert_eq!(record.next_action(), NextAction::Deposit);
    assert_eq!(h.gateway.relay_count(), 0);
    assert_eq!(h.gateway.deposit_count(), 0);
    assert_eq!(h.proofs.message_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_withdrawal_with_unrelayed_message_stays_ready() {
    let h = Harness::new();
    let batched_at = 2_000;
    let pairs = vec![message_pair(1), message_pair(2)];
    h.batched_withdrawal_with(hash(0x0c), hash(0x0e), 40, batched_at, pairs.clone());
    h.l1
        .set_latest_timestamp(batched_at + CHALLENGE_PERIOD + CHALLENGE_BUFFER);
    h.store.record_transfer(hash(0x0c), Layer::L2).await.unwrap();
    let scanner = h.scanner();
    scanner.run_pass().await.unwrap();
    scanner.run_pass().await.unwrap();

    // Only the first of the two messages was relayed
    h.gateway
        .add_relay(Layer::L1, pairs[0].message.hash(), hash(0x7e));

    let w = watcher(&h, Vec::new());
    w.handle(&BridgeEvent::WithdrawalFinalized { tx_hash: hash(0x7e) })
        .await
        .unwrap();

    let record = h.store.snapshot().await.unwrap().get(&hash(0x0c)).cloned().unwrap();
    assert_eq!(record.status(), Status::Ready);
    assert!(record.relay_tx_hash().is_none());

    h.gateway
        .add_relay(Layer::L1, pairs[1].message.hash(), hash(0x7f));
    w.handle(&BridgeEvent::WithdrawalFinalized { tx_hash: hash(0x7f) })
        .await
        .unwrap();

    let record = h.store.snapshot().await.unwrap().get(&hash(0x0c)).cloned().unwrap();
    assert_eq!(record.status(), Status::Relayed);
    assert_eq!(record.relay_tx_hash(), Some(hash(0x7f)));
    assert_eq!(h.gateway.relay_count(), 0);
}

#[tokio::test]
async fn test_withdrawal_initiated_moves_only_that_record() {
    let h = Harness::new();
    h.l2.mine(hash(0x0c), 20, true);
    h.l2.mine(hash(0x0d), 21, true);
    h.store.record_transfer(hash(0x0c), Layer::L2).await.unwrap();
    h.store.record_transfer(hash(0x0d), Layer::L2).await.unwrap();

    let w = watcher(&h, Vec::new());
    w.handle(&BridgeEvent::WithdrawalInitiated { tx_hash: hash(0x0c) })
        .await
        .unwrap();

    let transfers = h.store.snapshot().await.unwrap();
    assert_eq!(transfers.get(&hash(0x0c)).unwrap().status(), Status::Waiting);
    assert_eq!(transfers.get(&hash(0x0d)).unwrap().status(), Status::Sent);
}

#[tokio::test]
async fn test_untracked_event_is_ignored() {
    let h = Harness::new();
    h.l1.pend(hash(0x0a));
    h.store.record_transfer(hash(0x0a), Layer::L1).await.unwrap();
    let before = h.store.snapshot().await.unwrap();

    let w = watcher(&h, Vec::new());
    w.handle(&BridgeEvent::DepositInitiated { tx_hash: hash(0x99) })
        .await
        .unwrap();

    assert_eq!(h.store.snapshot().await.unwrap(), before);
}

#[tokio::test]
async fn test_poll_once_survives_failing_source() {
    let h = Harness::new();
    h.mined_deposit(hash(0x0a), hash(0x4d));
    h.store.record_transfer(hash(0x0a), Layer::L1).await.unwrap();

    let failing = MockEventSource::new(Layer::L2, vec![Err(eyre!("connection refused"))]);
    let working = MockEventSource::new(
        Layer::L1,
        vec![Ok(vec![BridgeEvent::DepositInitiated { tx_hash: hash(0x0a) }])],
    );
    let mut w = watcher(&h, vec![Box::new(failing), Box::new(working)]);

    assert_eq!(w.poll_once().await, 1);
    let status = h.store.snapshot().await.unwrap().get(&hash(0x0a)).unwrap().status();
    assert_eq!(status, Status::Waiting);

    // Both sources drained
    assert_eq!(w.poll_once().await, 0);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let h = Harness::new();
    let w = watcher(&h, Vec::new());
    let (tx, rx) = tokio::sync::mpsc::channel(1);

    let handle = tokio::spawn(w.run(rx));
    tx.send(()).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

use std::sync::Arc;

use tokio::time::Duration;

use super::*;
use crate::concurrency;

fn cast(representation: &str) -> Envelope {
    Envelope::cast("Order", representation, Vec::new())
}

fn representation_of(delivery: Option<Delivery>) -> String {
    match delivery {
        Some(Delivery::Message(envelope)) => envelope.representation,
        other => panic!("Expected a message, got {other:?}"),
    }
}

#[tokio::test]
async fn test_messages_are_received_in_order() {
    let mailbox = LocalMailbox::new();
    mailbox.send(cast("a")).expect("Failed to send");
    mailbox.send(cast("b")).expect("Failed to send");
    assert_eq!(2, mailbox.pending_messages());

    assert_eq!("a", representation_of(mailbox.receive().await));
    assert_eq!("b", representation_of(mailbox.receive().await));
    assert_eq!(0, mailbox.pending_messages());
}

#[tokio::test]
async fn test_receive_wakes_on_send() {
    let mailbox = Arc::new(LocalMailbox::new());
    let consumer = {
        let mailbox = mailbox.clone();
        concurrency::spawn(async move { representation_of(mailbox.receive().await) })
    };
    concurrency::sleep(Duration::from_millis(10)).await;
    mailbox.send(cast("late")).expect("Failed to send");

    let received = concurrency::timeout(Duration::from_millis(500), consumer)
        .await
        .expect("Receiver was never woken")
        .expect("Receiver panicked");
    assert_eq!("late", received);
}

#[tokio::test]
async fn test_closed_mailbox_returns_the_message() {
    let mailbox = LocalMailbox::new();
    mailbox.close();
    assert!(mailbox.is_closed());

    match mailbox.send(cast("lost?")) {
        Err(MessagingErr::SendErr(envelope)) => assert_eq!("lost?", envelope.representation),
        other => panic!("Expected the envelope back, got {other:?}"),
    }
    assert!(mailbox.receive().await.is_none());
}

#[tokio::test]
async fn test_suspension_only_lets_resume_through() {
    let mailbox = LocalMailbox::new();
    mailbox.send(cast("held")).expect("Failed to send");
    mailbox.suspend();
    assert!(mailbox.is_suspended());

    // nothing deliverable while suspended
    let blocked = concurrency::timeout(Duration::from_millis(50), mailbox.receive()).await;
    assert!(blocked.is_err());

    // stop waits behind the suspension too
    mailbox.signal(Signal::Stop).expect("Failed to signal");
    let blocked = concurrency::timeout(Duration::from_millis(50), mailbox.receive()).await;
    assert!(blocked.is_err());

    mailbox.resume();
    assert_eq!("held", representation_of(mailbox.receive().await));
    assert!(!mailbox.is_suspended());
    assert!(matches!(
        mailbox.receive().await,
        Some(Delivery::Signal(Signal::Stop))
    ));
}

#[tokio::test]
async fn test_snapshot_request_passes_suspension() {
    let mailbox = LocalMailbox::new();
    mailbox.send(cast("queued")).expect("Failed to send");
    mailbox.suspend();

    let (tx, _rx) = concurrency::oneshot();
    mailbox
        .push(Delivery::TakeSnapshot(tx))
        .expect("Failed to push control");

    assert!(matches!(
        mailbox.receive().await,
        Some(Delivery::TakeSnapshot(_))
    ));
    // the protocol call is still waiting
    assert_eq!(1, mailbox.pending_messages());
}

#[tokio::test]
async fn test_drain_and_close_keeps_arrival_order() {
    let mailbox = LocalMailbox::new();
    mailbox.send(cast("pay")).expect("Failed to send");
    mailbox.signal(Signal::Stop).expect("Failed to signal");
    mailbox.send(cast("refund")).expect("Failed to send");
    mailbox.suspend();
    assert!(mailbox.stop_requested());

    // the stop does not survive the drain
    let drained = mailbox.drain_and_close();
    let order = drained
        .iter()
        .map(|e| e.representation.as_str())
        .collect::<Vec<_>>();
    assert_eq!(vec!["pay", "refund"], order);
    assert!(mailbox.is_closed());
    assert!(mailbox.send(cast("after")).is_err());
}

#[tokio::test]
async fn test_restore_runs_snapshot_then_pending_before_queued() {
    let mailbox = LocalMailbox::new();
    mailbox.send(cast("direct")).expect("Failed to send");

    let (tx, mut rx) = concurrency::oneshot();
    mailbox
        .restore(vec![9], vec![cast("pay"), cast("refund")], tx)
        .expect("Failed to restore");
    assert!(mailbox.is_suspended());

    match mailbox.receive().await {
        Some(Delivery::ApplySnapshot(snapshot, applied)) => {
            assert_eq!(vec![9], snapshot);
            let _ = applied.send(Ok(()));
        }
        other => panic!("Expected the snapshot first, got {other:?}"),
    }
    assert_eq!(Ok(Ok(())), rx.try_recv());

    // pending calls wait for resume
    let blocked = concurrency::timeout(Duration::from_millis(50), mailbox.receive()).await;
    assert!(blocked.is_err());

    mailbox.resume();
    assert_eq!("pay", representation_of(mailbox.receive().await));
    assert_eq!("refund", representation_of(mailbox.receive().await));
    assert_eq!("direct", representation_of(mailbox.receive().await));
}

#[tokio::test]
async fn test_handoff_wait_holds_calls_until_released() {
    let mailbox = LocalMailbox::awaiting_handoff();
    assert!(mailbox.is_awaiting_handoff());
    assert!(!mailbox.is_suspended());
    mailbox.send(cast("early")).expect("Failed to send");

    let blocked = concurrency::timeout(Duration::from_millis(50), mailbox.receive()).await;
    assert!(blocked.is_err());

    assert!(mailbox.release_handoff());
    assert!(!mailbox.release_handoff());
    assert_eq!("early", representation_of(mailbox.receive().await));
}

#[tokio::test]
async fn test_restore_ends_the_handoff_wait_ahead_of_early_calls() {
    let mailbox = LocalMailbox::awaiting_handoff();
    mailbox.send(cast("early")).expect("Failed to send");

    let (tx, _rx) = concurrency::oneshot();
    mailbox
        .restore(Vec::new(), vec![cast("shipped")], tx)
        .expect("Failed to restore");
    assert!(!mailbox.is_awaiting_handoff());

    assert!(matches!(
        mailbox.receive().await,
        Some(Delivery::ApplySnapshot(_, _))
    ));
    mailbox.resume();
    assert_eq!("shipped", representation_of(mailbox.receive().await));
    assert_eq!("early", representation_of(mailbox.receive().await));
    // a released timer finds nothing left to release
    assert!(!mailbox.release_handoff());
}

#[test]
fn test_capacity_is_single_consumer() {
    assert_eq!(1, LocalMailbox::new().concurrency_capacity());
}

// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

use std::sync::Arc;

use super::*;
use crate::concurrency;
use crate::message::{RemoteReturn, ReturnChannel};
use crate::protocol::{Answer, Deliver, GridMessage};
use crate::transport::InMemoryNetwork;
use crate::{Address, Definition, Envelope, GridErr, TransportErr};

fn deliver_to(node: NodeId, key: &str) -> Deliver {
    Deliver {
        node,
        sender: 1,
        correlation_id: 0,
        expects_reply: false,
        protocol: "ledger".to_string(),
        address: Address::from_key(key),
        definition: Definition::new("ledger"),
        payload: Vec::new(),
        representation: "charge".to_string(),
    }
}

fn answer(correlation_id: CorrelationId) -> Answer {
    Answer {
        receiver: 1,
        sender: 2,
        correlation_id,
        outcome: Ok(vec![7]),
        redirect: None,
    }
}

#[test]
fn test_answer_completes_exactly_once() {
    let registry = CorrelationRegistry::new();
    let id = registry.next_id();
    let (tx, mut rx) = concurrency::oneshot();
    registry.await_answer(id, tx);
    registry.track(id, 2, deliver_to(2, "order-42"));

    assert!(registry.complete(answer(id)));
    assert_eq!(Ok(Ok(vec![7])), rx.try_recv());
    assert_eq!(0, registry.in_flight());

    // a duplicate is discarded
    assert!(!registry.complete(answer(id)));
    assert_eq!(1, registry.matched());
    assert_eq!(1, registry.unmatched());
}

#[test]
fn test_ids_are_unique() {
    let registry = CorrelationRegistry::new();
    let a = registry.next_id();
    let b = registry.next_id();
    assert_ne!(a, b);
    assert!(a > 0);
}

#[test]
fn test_stranded_messages_come_back_in_send_order() {
    let registry = CorrelationRegistry::new();
    registry.track(3, 2, deliver_to(2, "c"));
    registry.track(1, 2, deliver_to(2, "a"));
    registry.track(2, 5, deliver_to(5, "b"));

    let stranded = registry.take_unacked_for(2);
    let ids = stranded.iter().map(|(id, _)| *id).collect::<Vec<_>>();
    assert_eq!(vec![1, 3], ids);
    assert_eq!("a", stranded[0].1.address.id_string());
    // the message to node 5 is untouched
    assert_eq!(1, registry.in_flight());
}

#[test]
fn test_cancel_closes_the_waiter() {
    let registry = CorrelationRegistry::new();
    let (tx, mut rx) = concurrency::oneshot();
    registry.await_answer(9, tx);
    registry.cancel(9);
    assert!(rx.try_recv().is_err());
    assert_eq!(0, registry.waiting());
}

#[tokio::test]
async fn test_answers_to_the_local_node_skip_the_transport() {
    let network = InMemoryNetwork::new();
    let registry = Arc::new(CorrelationRegistry::new());
    let outbound = Outbound::new(1, network.transport(), registry.clone());

    let (tx, rx) = concurrency::oneshot();
    registry.await_answer(4, tx);
    outbound.answer(1, 4, Ok(b"done".to_vec()));

    assert_eq!(Ok(b"done".to_vec()), rx.await.expect("Waiter dropped"));
}

#[tokio::test]
async fn test_unreachable_delivery_is_not_tracked() {
    let network = InMemoryNetwork::new();
    let registry = Arc::new(CorrelationRegistry::new());
    let outbound = Outbound::new(1, network.transport(), registry.clone());

    let (tx, _rx) = concurrency::oneshot();
    let envelope = Envelope::call("ledger", "charge", Vec::new(), ReturnChannel::Local(tx));
    let result = outbound.deliver(2, &Address::from_key("k"), &Definition::new("ledger"), envelope);

    assert!(matches!(
        result,
        Err(GridErr::Transport(TransportErr::Unreachable(2)))
    ));
    assert_eq!(0, registry.in_flight());
    assert_eq!(0, registry.waiting());
}

#[tokio::test]
async fn test_casts_are_tracked_until_acknowledged() {
    let network = InMemoryNetwork::new();
    let mut link = network.connect(2);
    let registry = Arc::new(CorrelationRegistry::new());
    let outbound = Outbound::new(1, network.transport(), registry.clone());

    let envelope = Envelope::cast("ledger", "charge", Vec::new());
    outbound
        .deliver(2, &Address::from_key("k"), &Definition::new("ledger"), envelope)
        .expect("Failed to deliver");
    assert_eq!(1, registry.in_flight());

    let bytes = link.recv().await.expect("Nothing sent");
    let deliver = match GridMessage::decode(bytes).expect("Failed to decode") {
        GridMessage::Deliver(deliver) => deliver,
        other => panic!("Expected a Deliver, got {}", other.kind()),
    };
    assert!(!deliver.expects_reply);
    assert_eq!(1, deliver.sender);

    assert!(registry.complete(Answer {
        receiver: 1,
        sender: 2,
        correlation_id: deliver.correlation_id,
        outcome: Ok(Vec::new()),
        redirect: None,
    }));
    assert_eq!(0, registry.in_flight());
}

#[tokio::test]
async fn test_relays_keep_the_original_return_address() {
    let network = InMemoryNetwork::new();
    let mut link = network.connect(2);
    let mut caller = network.connect(3);
    let registry = Arc::new(CorrelationRegistry::new());
    let outbound = Arc::new(Outbound::new(1, network.transport(), registry.clone()));

    let sink: Arc<dyn AnswerSink> = outbound.clone();
    let reply = ReturnChannel::Remote(RemoteReturn::new(3, 77, true, sink));
    let envelope = Envelope::call("ledger", "charge", Vec::new(), reply);
    outbound
        .deliver(2, &Address::from_key("k"), &Definition::new("ledger"), envelope)
        .expect("Failed to relay");

    // the original sender tracks it, not us
    assert_eq!(0, registry.in_flight());
    match GridMessage::decode(link.recv().await.expect("Nothing sent")) {
        Ok(GridMessage::Deliver(deliver)) => {
            assert_eq!(3, deliver.sender);
            assert_eq!(77, deliver.correlation_id);
            assert!(deliver.expects_reply);
        }
        other => panic!("Expected a Deliver, got {other:?}"),
    }
    // and the caller learns who holds its message now
    match GridMessage::decode(caller.recv().await.expect("No redirect sent")) {
        Ok(GridMessage::Answer(answer)) => {
            assert_eq!(3, answer.receiver);
            assert_eq!(77, answer.correlation_id);
            assert_eq!(Some(2), answer.redirect);
        }
        other => panic!("Expected an Answer, got {other:?}"),
    }
}

#[test]
fn test_redirect_moves_the_message_without_completing_it() {
    let registry = CorrelationRegistry::new();
    let id = registry.next_id();
    let (tx, mut rx) = concurrency::oneshot();
    registry.await_answer(id, tx);
    registry.track(id, 2, deliver_to(2, "order-42"));

    assert!(registry.complete(Answer::redirect(1, 2, id, 3)));
    assert!(rx.try_recv().is_err());
    assert_eq!(0, registry.in_flight_to(2));
    assert_eq!(1, registry.in_flight_to(3));
    assert_eq!(0, registry.matched());

    // a departure of the node it moved to re-homes it
    let stranded = registry.take_unacked_for(3);
    assert_eq!(1, stranded.len());
    assert_eq!(3, stranded[0].1.node);

    // and one for an answered message is ignored
    assert!(!registry.redirect(id, 4));
}

#[tokio::test]
async fn test_shipped_local_calls_are_tracked_to_the_new_owner() {
    let network = InMemoryNetwork::new();
    let mut link = network.connect(2);
    let registry = Arc::new(CorrelationRegistry::new());
    let outbound = Outbound::new(1, network.transport(), registry.clone());

    let (tx, _rx) = concurrency::oneshot();
    let pending = vec![
        Envelope::call("ledger", "charge", Vec::new(), ReturnChannel::Local(tx)),
        Envelope::cast("ledger", "note", Vec::new()),
    ];
    let (_, _ack) = outbound
        .relocate(
            2,
            Address::from_key("k"),
            Definition::new("ledger"),
            Vec::new(),
            pending,
        )
        .expect("Failed to relocate");
    assert_eq!(2, registry.in_flight_to(2));

    match GridMessage::decode(link.recv().await.expect("Nothing sent")) {
        Ok(GridMessage::Relocate(relocate)) => {
            let replies = relocate
                .pending
                .iter()
                .map(|pending| pending.reply.as_ref().map(|ret| (ret.node, ret.expects_reply)))
                .collect::<Vec<_>>();
            assert_eq!(vec![Some((1, true)), Some((1, false))], replies);
        }
        other => panic!("Expected a Relocate, got {other:?}"),
    }
}

#[test]
fn test_delivery_log_drops_second_copies() {
    let log = DeliveryLog::new(concurrency::Duration::from_secs(60));
    assert!(log.first_sight(1, 7));
    assert!(!log.first_sight(1, 7));
    assert!(log.first_sight(2, 7));

    log.forget(1, 7);
    assert!(log.first_sight(1, 7));

    log.forget_node(1);
    assert_eq!(1, log.len());
}

#[tokio::test]
async fn test_delivery_log_expires_entries() {
    let log = DeliveryLog::new(concurrency::Duration::from_millis(20));
    assert!(log.first_sight(1, 7));
    concurrency::sleep(concurrency::Duration::from_millis(40)).await;
    assert!(log.first_sight(1, 7));
}

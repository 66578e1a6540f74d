// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

use std::sync::atomic::{AtomicU8, Ordering};

use function_name::named;

use super::*;
use crate::common_test::periodic_check;
use crate::concurrency::Duration;
use crate::{Outcome, ReturnChannel};

struct Tally {
    stops: Arc<AtomicU8>,
    total: u64,
}

#[async_trait::async_trait]
impl GridActor for Tally {
    async fn handle(
        &mut self,
        representation: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, ActorProcessingErr> {
        match representation {
            "add" => {
                self.total += payload.len() as u64;
                Ok(self.total.to_be_bytes().to_vec())
            }
            "boom" => panic!("tally exploded"),
            other => Err(From::from(format!("unknown operation {other}"))),
        }
    }

    async fn snapshot(&mut self) -> Result<Vec<u8>, ActorProcessingErr> {
        Ok(self.total.to_be_bytes().to_vec())
    }

    async fn post_stop(&mut self) -> Result<(), ActorProcessingErr> {
        self.stops.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn tally_stage(stops: Arc<AtomicU8>) -> Arc<Stage> {
    let stage = Stage::new();
    stage.register("tally", move |_, _| {
        Ok(Box::new(Tally {
            stops: stops.clone(),
            total: 0,
        }) as Box<dyn GridActor>)
    });
    stage
}

async fn ask(mailbox: &LocalMailbox, representation: &str, payload: Vec<u8>) -> Outcome {
    let (tx, rx) = crate::concurrency::oneshot();
    mailbox
        .send(Envelope::call("tally", representation, payload, ReturnChannel::Local(tx)))
        .expect("Failed to send");
    rx.await.expect("Reply dropped")
}

#[named]
#[tokio::test]
async fn test_create_or_find_reuses_the_running_unit() {
    let stage = tally_stage(Arc::new(AtomicU8::new(0)));
    let address = Address::from_key(function_name!());
    let definition = Definition::new("tally");

    let first = stage
        .create_or_find(&address, &definition)
        .expect("Failed to create");
    let second = stage
        .create_or_find(&address, &definition)
        .expect("Failed to find");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(1, stage.len());
    assert_eq!(vec![(address, definition)], stage.hosted());

    assert_eq!(Ok(3u64.to_be_bytes().to_vec()), ask(&first, "add", vec![0; 3]).await);
    assert_eq!(Ok(5u64.to_be_bytes().to_vec()), ask(&second, "add", vec![0; 2]).await);
}

#[named]
#[tokio::test]
async fn test_held_creation_waits_and_leaves_running_units_alone() {
    let stage = tally_stage(Arc::new(AtomicU8::new(0)));
    let held = Address::from_key(format!("{}-held", function_name!()));
    let running = Address::from_key(format!("{}-running", function_name!()));
    let definition = Definition::new("tally");

    let existing = stage
        .create_or_find(&running, &definition)
        .expect("Failed to create");
    let found = stage
        .create_awaiting_handoff(&running, &definition)
        .expect("Failed to find");
    assert!(Arc::ptr_eq(&existing, &found));
    assert!(!found.is_awaiting_handoff());

    let mailbox = stage
        .create_awaiting_handoff(&held, &definition)
        .expect("Failed to create");
    assert!(mailbox.is_awaiting_handoff());
    let (tx, rx) = crate::concurrency::oneshot();
    mailbox
        .send(Envelope::call("tally", "add", vec![0; 4], ReturnChannel::Local(tx)))
        .expect("Failed to send");
    crate::concurrency::sleep(Duration::from_millis(50)).await;
    assert_eq!(1, mailbox.pending_messages());

    mailbox.release_handoff();
    assert_eq!(Ok(4u64.to_be_bytes().to_vec()), rx.await.expect("Reply dropped"));
}

#[tokio::test]
async fn test_unknown_definition_is_refused() {
    let stage = Stage::new();
    let result = stage.create_or_find(&Address::from_key("x"), &Definition::new("nope"));
    assert!(matches!(result, Err(SpawnErr::UnknownDefinition(name)) if name == "nope"));
    assert!(stage.is_empty());
}

#[tokio::test]
async fn test_factory_errors_are_startup_failures() {
    let stage = Stage::new();
    stage.register("broken", |_, _| Err(From::from("no parameters")));
    let result = stage.create_or_find(&Address::from_key("x"), &Definition::new("broken"));
    assert!(matches!(result, Err(SpawnErr::StartupFailed(_))));
}

#[named]
#[tokio::test]
async fn test_errors_and_panics_become_error_outcomes() {
    let stage = tally_stage(Arc::new(AtomicU8::new(0)));
    let mailbox = stage
        .create_or_find(&Address::from_key(function_name!()), &Definition::new("tally"))
        .expect("Failed to create");

    assert!(ask(&mailbox, "subtract", Vec::new()).await.is_err());
    let panicked = ask(&mailbox, "boom", Vec::new()).await;
    assert_eq!(Err("tally exploded".to_string()), panicked);

    // the unit survives both
    assert_eq!(Ok(1u64.to_be_bytes().to_vec()), ask(&mailbox, "add", vec![0]).await);
}

#[named]
#[tokio::test]
async fn test_stop_evicts_and_fails_queued_calls() {
    let stops = Arc::new(AtomicU8::new(0));
    let stage = tally_stage(stops.clone());
    let address = Address::from_key(function_name!());
    let mailbox = stage
        .create_or_find(&address, &Definition::new("tally"))
        .expect("Failed to create");

    mailbox.signal(Signal::Stop).expect("Failed to signal");
    let (tx, rx) = crate::concurrency::oneshot();
    let late = mailbox.send(Envelope::call("tally", "add", vec![0], ReturnChannel::Local(tx)));

    periodic_check(|| stage.find(&address).is_none(), Duration::from_millis(500)).await;
    periodic_check(|| stops.load(Ordering::Relaxed) == 1, Duration::from_millis(500)).await;
    assert!(stage.is_empty());
    if late.is_ok() {
        // queued behind the stop
        assert!(matches!(rx.await, Ok(Err(_))));
    }

    // a fresh unit replaces the stopped one
    let replacement = stage
        .create_or_find(&address, &Definition::new("tally"))
        .expect("Failed to recreate");
    assert!(!Arc::ptr_eq(&mailbox, &replacement));
}

#[named]
#[tokio::test]
async fn test_snapshot_request_is_answered_while_suspended() {
    let stage = tally_stage(Arc::new(AtomicU8::new(0)));
    let mailbox = stage
        .create_or_find(&Address::from_key(function_name!()), &Definition::new("tally"))
        .expect("Failed to create");
    ask(&mailbox, "add", vec![0; 4]).await.expect("Failed to add");

    mailbox.suspend();
    mailbox
        .send(Envelope::cast("tally", "add", vec![0]))
        .expect("Failed to send");
    let (tx, rx) = crate::concurrency::oneshot();
    mailbox
        .push(Delivery::TakeSnapshot(tx))
        .expect("Failed to request a snapshot");

    let snapshot = rx.await.expect("Snapshot dropped").expect("Snapshot failed");
    assert_eq!(4u64.to_be_bytes().to_vec(), snapshot);
    assert_eq!(1, mailbox.pending_messages());
}

#[named]
#[tokio::test]
async fn test_evict_only_removes_the_matching_unit() {
    let stage = tally_stage(Arc::new(AtomicU8::new(0)));
    let address = Address::from_key(function_name!());
    let mailbox = stage
        .create_or_find(&address, &Definition::new("tally"))
        .expect("Failed to create");

    let stranger = Arc::new(LocalMailbox::new());
    assert!(!stage.evict(&address, &stranger));
    assert!(stage.evict(&address, &mailbox));
    assert!(stage.find(&address).is_none());
}

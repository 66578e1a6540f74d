// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Local hosting of units.
//!
//! The placement layer never constructs or runs units itself. It talks to a [Host],
//! which can create-or-find the unit behind an address, list what it hosts and forget
//! a unit once it has been relocated away. Enqueueing, suspension and snapshots all go
//! through the unit's [LocalMailbox].
//!
//! [Stage] is the default [Host]. Units are user types implementing [GridActor],
//! built from a [Definition] by a factory registered under the definition's type
//! name. Each unit runs on its own task, processing one mailbox item at a time.
//!
//! ## Example
//!
//! ```rust
//! use ractor_grid::stage::{GridActor, Host, Stage};
//! use ractor_grid::{ActorProcessingErr, Address, Definition};
//!
//! struct Counter(u64);
//!
//! #[async_trait::async_trait]
//! impl GridActor for Counter {
//!     async fn handle(
//!         &mut self,
//!         _representation: &str,
//!         _payload: Vec<u8>,
//!     ) -> Result<Vec<u8>, ActorProcessingErr> {
//!         self.0 += 1;
//!         Ok(self.0.to_be_bytes().to_vec())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let stage = Stage::new();
//!     stage.register("counter", |_, _| Ok(Box::new(Counter(0)) as Box<dyn GridActor>));
//!
//!     let address = Address::from_key("counter-1");
//!     let mailbox = stage
//!         .create_or_find(&address, &Definition::new("counter"))
//!         .expect("Failed to create the counter");
//!     assert!(stage.find(&address).is_some());
//!     # drop(mailbox);
//! }
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;

use crate::concurrency;
use crate::mailbox::{LocalMailbox, Mailbox};
use crate::message::{Delivery, Signal};
use crate::{ActorProcessingErr, Address, Definition, Envelope, SpawnErr};

#[cfg(test)]
mod tests;

/// Behavior of a unit hosted on the grid. Operations arrive as an operation name
/// (`representation`) plus opaque, already-encoded arguments.
#[async_trait::async_trait]
pub trait GridActor: Send + 'static {
    /// Process one operation, returning the encoded result
    async fn handle(
        &mut self,
        representation: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, ActorProcessingErr>;

    /// Capture the state needed to resume this unit on another node. Called while the
    /// unit is suspended, so no operation runs between the capture and the move.
    async fn snapshot(&mut self) -> Result<Vec<u8>, ActorProcessingErr> {
        Ok(Vec::new())
    }

    /// Adopt state captured by [GridActor::snapshot] on the previous owner
    async fn apply_snapshot(&mut self, snapshot: Vec<u8>) -> Result<(), ActorProcessingErr> {
        let _ = snapshot;
        Ok(())
    }

    /// Invoked once the unit's mailbox has closed, either because the unit was stopped
    /// or because it was relocated away
    async fn post_stop(&mut self) -> Result<(), ActorProcessingErr> {
        Ok(())
    }
}

/// The capabilities the placement layer needs from the local actor-execution engine
pub trait Host: Send + Sync {
    /// The open mailbox of a hosted unit
    fn find(&self, address: &Address) -> Option<Arc<LocalMailbox>>;

    /// Find the unit, or construct and start it from `definition`
    fn create_or_find(
        &self,
        address: &Address,
        definition: &Definition,
    ) -> Result<Arc<LocalMailbox>, SpawnErr>;

    /// Like [Host::create_or_find], but a newly constructed unit starts with its calls
    /// held for a hand-off (see [LocalMailbox::awaiting_handoff]). A unit which is
    /// already running is returned as it is
    fn create_awaiting_handoff(
        &self,
        address: &Address,
        definition: &Definition,
    ) -> Result<Arc<LocalMailbox>, SpawnErr>;

    /// Every unit this host currently runs
    fn hosted(&self) -> Vec<(Address, Definition)>;

    /// Forget the unit if `mailbox` is still the one registered for `address`. Returns
    /// [true] if it was removed
    fn evict(&self, address: &Address, mailbox: &Arc<LocalMailbox>) -> bool;
}

type Factory =
    dyn Fn(&Address, &Definition) -> Result<Box<dyn GridActor>, ActorProcessingErr> + Send + Sync;

struct HostedUnit {
    definition: Definition,
    mailbox: Arc<LocalMailbox>,
}

/// The default [Host]: a directory of units, each running on its own task
pub struct Stage {
    myself: Weak<Stage>,
    factories: DashMap<String, Arc<Factory>>,
    units: DashMap<Address, HostedUnit>,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Stage {{ factories: {}, units: {} }}",
            self.factories.len(),
            self.units.len()
        )
    }
}

impl Stage {
    /// Create an empty stage
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|myself| Self {
            myself: myself.clone(),
            factories: DashMap::new(),
            units: DashMap::new(),
        })
    }

    /// Register the factory building units of `type_name`. Replaces any previous
    /// factory for the same name
    pub fn register<F>(&self, type_name: impl Into<String>, factory: F)
    where
        F: Fn(&Address, &Definition) -> Result<Box<dyn GridActor>, ActorProcessingErr>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(type_name.into(), Arc::new(factory));
    }

    /// Number of registered units
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether no unit is registered
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn create_with(
        &self,
        address: &Address,
        definition: &Definition,
        new_mailbox: fn() -> LocalMailbox,
    ) -> Result<Arc<LocalMailbox>, SpawnErr> {
        if let Some(mailbox) = self.find(address) {
            return Ok(mailbox);
        }

        let factory = self
            .factories
            .get(&definition.type_name)
            .map(|factory| factory.value().clone())
            .ok_or_else(|| SpawnErr::UnknownDefinition(definition.type_name.clone()))?;
        // built outside of the directory's shard lock
        let actor = factory(address, definition).map_err(SpawnErr::StartupFailed)?;
        let mailbox = Arc::new(new_mailbox());

        let unit = HostedUnit {
            definition: definition.clone(),
            mailbox: mailbox.clone(),
        };
        match self.units.entry(address.clone()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().mailbox.is_closed() {
                    // lost a creation race, the other unit wins
                    return Ok(occupied.get().mailbox.clone());
                }
                occupied.insert(unit);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(unit);
            }
        }

        log::debug!("Starting unit {address} of type '{}'", definition.type_name);
        self.spawn_unit(address.clone(), actor, mailbox.clone());
        Ok(mailbox)
    }

    fn spawn_unit(&self, address: Address, mut actor: Box<dyn GridActor>, mailbox: Arc<LocalMailbox>) {
        let stage = self.myself.clone();
        concurrency::spawn(async move {
            run_unit(&address, actor.as_mut(), &mailbox).await;
            if let Some(stage) = stage.upgrade() {
                stage.evict(&address, &mailbox);
            }
        });
    }
}

impl Host for Stage {
    fn find(&self, address: &Address) -> Option<Arc<LocalMailbox>> {
        self.units
            .get(address)
            .filter(|unit| !unit.mailbox.is_closed())
            .map(|unit| unit.mailbox.clone())
    }

    fn create_or_find(
        &self,
        address: &Address,
        definition: &Definition,
    ) -> Result<Arc<LocalMailbox>, SpawnErr> {
        self.create_with(address, definition, LocalMailbox::new)
    }

    fn create_awaiting_handoff(
        &self,
        address: &Address,
        definition: &Definition,
    ) -> Result<Arc<LocalMailbox>, SpawnErr> {
        self.create_with(address, definition, LocalMailbox::awaiting_handoff)
    }

    fn hosted(&self) -> Vec<(Address, Definition)> {
        self.units
            .iter()
            .filter(|unit| !unit.mailbox.is_closed())
            .map(|unit| (unit.key().clone(), unit.definition.clone()))
            .collect()
    }

    fn evict(&self, address: &Address, mailbox: &Arc<LocalMailbox>) -> bool {
        self.units
            .remove_if(address, |_, unit| Arc::ptr_eq(&unit.mailbox, mailbox))
            .is_some()
    }
}

fn panic_string(panic: Box<dyn std::any::Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(v) => *v,
        Err(e) => match e.downcast::<&str>() {
            Ok(v) => v.to_string(),
            _ => "Unknown panic occurred which couldn't be coerced to a string".to_string(),
        },
    }
}

async fn run_unit(address: &Address, actor: &mut dyn GridActor, mailbox: &LocalMailbox) {
    while let Some(delivery) = mailbox.receive().await {
        match delivery {
            Delivery::Message(envelope) => {
                let Envelope {
                    representation,
                    payload,
                    reply,
                    ..
                } = envelope;
                let outcome = match AssertUnwindSafe(actor.handle(&representation, payload))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(err)) => {
                        log::debug!("Unit {address} failed '{representation}': {err}");
                        Err(err.to_string())
                    }
                    Err(panic) => {
                        let reason = panic_string(panic);
                        log::error!("Unit {address} panicked in '{representation}': {reason}");
                        Err(reason)
                    }
                };
                if let Some(reply) = reply {
                    reply.send(outcome);
                }
            }
            Delivery::Signal(Signal::Stop) => {
                for envelope in mailbox.drain_and_close() {
                    if let Some(reply) = envelope.reply {
                        reply.send(Err(format!("Unit {address} stopped")));
                    }
                }
                break;
            }
            Delivery::Signal(Signal::Resume) => {}
            Delivery::TakeSnapshot(reply) => {
                let snapshot = actor.snapshot().await.map_err(|err| err.to_string());
                let _ = reply.send(snapshot);
            }
            Delivery::ApplySnapshot(snapshot, reply) => {
                let applied = actor
                    .apply_snapshot(snapshot)
                    .await
                    .map_err(|err| err.to_string());
                let _ = reply.send(applied);
            }
        }
    }

    if let Err(err) = actor.post_stop().await {
        log::warn!("Unit {address} failed in post_stop: {err}");
    }
    log::debug!("Unit {address} exited");
}

// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Moving live units between nodes.
//!
//! On the old owner a relocation runs:
//!
//! 1. suspend the unit's mailbox so only relocation controls are handed out
//! 2. ask the unit for its snapshot. The request waits behind any operation already
//!    running, so the snapshot reflects frozen state
//! 3. drain the queued calls and close the mailbox in one step, keeping arrival order
//! 4. forget the unit and ship a `Relocate` to the new owner
//! 5. wait for the new owner's acknowledgement
//!
//! On the new owner the unit is found or created, its mailbox suspended, and the
//! snapshot followed by the shipped calls placed ahead of anything already queued.
//! Once the snapshot is applied the suspension is lifted and the calls run in their
//! original order. A unit which cannot apply its snapshot is stopped and evicted,
//! every shipped call is answered with the failure, and the failure is reported back
//! to the old owner.
//!
//! A unit which cannot produce its snapshot is not resumed on the old owner, where the
//! ring no longer routes to it. It is stopped and evicted, its queued calls are
//! answered with the failure, and the next call to the address starts it fresh on the
//! new owner. A [Signal::Stop](crate::message::Signal::Stop) queued behind the
//! suspension is discarded with the mailbox, the unit keeps running on the new owner.

use std::sync::Arc;

use dashmap::DashMap;

use crate::concurrency::{self, Duration};
use crate::mailbox::routing::Placement;
use crate::mailbox::{LocalMailbox, Mailbox};
use crate::message::Delivery;
use crate::protocol::Relocate;
use crate::remote::AnswerSink;
use crate::{Address, Definition, Envelope, MessagingErr, NodeId, RelocationErr, ReturnChannel};

pub(crate) mod handoff;


/// Where an address is in the relocation state machine, as seen from this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelocationState {
    /// Running here, accepting operations
    Active,
    /// Suspended while its snapshot is captured
    Suspended,
    /// Shipped to the given node, waiting for the acknowledgement
    Shipped(NodeId),
    /// Running on the given node now
    Relocated(NodeId),
    /// Arrived from another node, applying its snapshot
    Restoring,
    /// The last relocation attempt failed
    Failed(RelocationErr),
}

/// The outcome of relocating a batch of addresses after a membership change
#[derive(Debug, Default)]
pub struct RelocationReport {
    /// Addresses moved, with their new owner
    pub relocated: Vec<(Address, NodeId)>,
    /// Addresses with no successor which stayed on this node
    pub skipped: Vec<Address>,
    /// Addresses whose relocation failed
    pub failed: Vec<(Address, RelocationErr)>,
}

impl RelocationReport {
    /// Whether every attempted relocation succeeded
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of addresses considered
    pub fn len(&self) -> usize {
        self.relocated.len() + self.skipped.len() + self.failed.len()
    }

    /// Whether nothing was considered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn record(&mut self, address: Address, target: NodeId, result: Result<(), RelocationErr>) {
        match result {
            Ok(()) => self.relocated.push((address, target)),
            Err(err) => self.failed.push((address, err)),
        }
    }
}

/// Runs both halves of a relocation for one node
pub(crate) struct RelocationCoordinator {
    placement: Arc<Placement>,
    states: Arc<DashMap<Address, RelocationState>>,
    snapshot_timeout: Duration,
    relocation_timeout: Duration,
}

impl RelocationCoordinator {
    pub(crate) fn new(
        placement: Arc<Placement>,
        snapshot_timeout: Duration,
        relocation_timeout: Duration,
    ) -> Self {
        Self {
            placement,
            states: Arc::new(DashMap::new()),
            snapshot_timeout,
            relocation_timeout,
        }
    }

    pub(crate) fn state(&self, address: &Address) -> Option<RelocationState> {
        self.states.get(address).map(|state| state.value().clone())
    }

    fn set_state(&self, address: &Address, state: RelocationState) {
        self.states.insert(address.clone(), state);
    }

    /// Move the locally hosted unit at `address` to `target`
    pub(crate) async fn relocate(
        &self,
        address: Address,
        definition: Definition,
        target: NodeId,
    ) -> Result<(), RelocationErr> {
        let result = self.try_relocate(&address, definition, target).await;
        match &result {
            Ok(()) => {
                log::info!("Relocated {address} to node {target}");
                self.set_state(&address, RelocationState::Relocated(target));
            }
            Err(err) => {
                log::error!("Relocation of {address} to node {target} failed: {err}");
                self.set_state(&address, RelocationState::Failed(err.clone()));
            }
        }
        result
    }

    async fn try_relocate(
        &self,
        address: &Address,
        definition: Definition,
        target: NodeId,
    ) -> Result<(), RelocationErr> {
        let mailbox = self
            .placement
            .host
            .find(address)
            .ok_or(RelocationErr::NotLocal)?;

        self.set_state(address, RelocationState::Suspended);
        mailbox.suspend();
        let (tx, rx) = concurrency::oneshot();
        if mailbox.push(Delivery::TakeSnapshot(tx)).is_err() {
            return Err(RelocationErr::NotLocal);
        }
        let snapshot = match concurrency::timeout(self.snapshot_timeout, rx).await {
            Ok(Ok(Ok(snapshot))) => snapshot,
            Ok(Ok(Err(reason))) => return Err(self.abandon(address, &mailbox, reason)),
            Ok(Err(_)) => return Err(RelocationErr::NotLocal),
            Err(_) => {
                let reason = format!(
                    "no snapshot within {}ms",
                    self.snapshot_timeout.as_millis()
                );
                return Err(self.abandon(address, &mailbox, reason));
            }
        };

        if mailbox.stop_requested() {
            log::warn!(
                "Discarding a queued stop of {address}, it keeps running on node {target}"
            );
        }
        let pending = mailbox.drain_and_close();
        self.placement.host.evict(address, &mailbox);
        self.placement.adopted.remove(address);
        for envelope in pending.iter() {
            if let Some(ReturnChannel::Remote(remote)) = &envelope.reply {
                // a copy re-sent here after the move must be accepted again
                self.placement
                    .delivered
                    .forget(remote.node, remote.correlation_id);
            }
        }
        log::debug!(
            "Shipping {address} to node {target} with {} pending message(s)",
            pending.len()
        );

        self.set_state(address, RelocationState::Shipped(target));
        let (correlation_id, ack) = self.placement.outbound.relocate(
            target,
            address.clone(),
            definition,
            snapshot,
            pending,
        )?;

        match concurrency::timeout(self.relocation_timeout, ack).await {
            Ok(Ok(Ok(_))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(RelocationErr::Rejected(reason)),
            Ok(Err(_)) => Err(RelocationErr::Rejected(
                "acknowledgement channel dropped".to_string(),
            )),
            Err(_) => {
                self.placement.outbound.registry().cancel(correlation_id);
                Err(RelocationErr::Timeout)
            }
        }
    }

    /// Stop a unit whose snapshot could not be captured. Its queued calls fail
    fn abandon(
        &self,
        address: &Address,
        mailbox: &Arc<LocalMailbox>,
        reason: String,
    ) -> RelocationErr {
        let stranded = mailbox.drain_and_close();
        self.placement.host.evict(address, mailbox);
        self.placement.adopted.remove(address);
        log::warn!(
            "Stopping {address} without its state, failing {} queued call(s): {reason}",
            stranded.len()
        );
        fail_all(stranded, &format!("Unit {address} stopped: {reason}"));
        RelocationErr::Snapshot(reason)
    }

    /// Apply a `Relocate` from another node. Runs synchronously on the inbound path so
    /// the restored calls are queued ahead of anything the same link carries next.
    pub(crate) fn restore(&self, relocate: Relocate) {
        let Relocate {
            sender,
            correlation_id,
            definition,
            address,
            snapshot,
            pending,
            ..
        } = relocate;
        let outbound = self.placement.outbound.clone();
        self.set_state(&address, RelocationState::Restoring);
        log::debug!(
            "Restoring {address} from node {sender} with {} pending message(s)",
            pending.len()
        );

        for ret in pending.iter().filter_map(|message| message.reply.as_ref()) {
            self.placement
                .delivered
                .first_sight(ret.node, ret.correlation_id);
        }
        let pending = pending
            .into_iter()
            .map(|message| Envelope {
                protocol: message.protocol,
                representation: message.representation,
                payload: message.payload,
                reply: message.reply.map(|ret| outbound.return_channel(ret)),
            })
            .collect::<Vec<_>>();

        let mailbox = match self.placement.host.create_or_find(&address, &definition) {
            Ok(mailbox) => mailbox,
            Err(err) => {
                let reason = err.to_string();
                fail_all(pending, &reason);
                self.set_state(&address, RelocationState::Failed(RelocationErr::Rejected(reason.clone())));
                outbound.answer(sender, correlation_id, Err(reason));
                return;
            }
        };

        let (tx, rx) = concurrency::oneshot();
        if let Err(MessagingErr::SendErr(pending)) = mailbox.restore(snapshot, pending, tx) {
            let reason = format!("mailbox of {address} closed during restore");
            fail_all(pending, &reason);
            self.set_state(&address, RelocationState::Failed(RelocationErr::Rejected(reason.clone())));
            outbound.answer(sender, correlation_id, Err(reason));
            return;
        }

        self.placement.handoffs.arrived(&address);
        if self.placement.ring.node_of(address.id_string()) != Some(self.placement.local_node) {
            // our ring still routes it to the departing sender
            self.placement.adopted.insert(address.clone());
        }

        let placement = self.placement.clone();
        let states = self.states.clone();
        let snapshot_timeout = self.snapshot_timeout;
        concurrency::spawn(async move {
            let reason = match concurrency::timeout(snapshot_timeout, rx).await {
                Ok(Ok(Ok(()))) => {
                    mailbox.resume();
                    states.insert(address.clone(), RelocationState::Active);
                    log::info!("Resumed {address} relocated from node {sender}");
                    outbound.answer(sender, correlation_id, Ok(Vec::new()));
                    return;
                }
                Ok(Ok(Err(reason))) => reason,
                Ok(Err(_)) => "unit exited before applying its snapshot".to_string(),
                Err(_) => format!("snapshot not applied within {}ms", snapshot_timeout.as_millis()),
            };

            log::error!("Failed to restore {address} from node {sender}: {reason}");
            let drained = mailbox.drain_and_close();
            placement.host.evict(&address, &mailbox);
            placement.adopted.remove(&address);
            fail_all(drained, &reason);
            states.insert(
                address,
                RelocationState::Failed(RelocationErr::Snapshot(reason.clone())),
            );
            outbound.answer(sender, correlation_id, Err(reason));
        });
    }
}

fn fail_all(envelopes: Vec<Envelope>, reason: &str) {
    for envelope in envelopes {
        if let Some(reply) = envelope.reply {
            reply.send(Err(reason.to_string()));
        }
    }
}

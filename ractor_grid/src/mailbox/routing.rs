// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Ownership-aware mailboxes.
//!
//! Routing is decided per operation from the ring version current at the time of the
//! call, never cached, so a [RoutingMailbox] follows its address across nodes without
//! being invalidated.

use std::sync::Arc;

use dashmap::DashSet;

use super::{LocalMailbox, Mailbox};
use crate::message::{Delivery, Envelope, Signal};
use crate::relocation::handoff::Handoffs;
use crate::remote::{DeliveryLog, Outbound};
use crate::ring::SharedRing;
use crate::stage::Host;
use crate::{Address, Definition, GridErr, MessagingErr, NodeId, SpawnErr};

/// How many times a local send is re-routed after racing with a relocation
const MAX_REDELIVERIES: usize = 3;

/// Where an operation on an address runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// On this node
    Local,
    /// On the given node
    Remote(NodeId),
}

/// The routing state shared by every mailbox on a node
pub(crate) struct Placement {
    pub(crate) local_node: NodeId,
    pub(crate) ring: SharedRing,
    pub(crate) host: Arc<dyn Host>,
    pub(crate) outbound: Arc<Outbound>,
    pub(crate) handoffs: Handoffs,
    pub(crate) delivered: DeliveryLog,
    /// Units relocated here by a node which left the ring before this node saw it go
    pub(crate) adopted: DashSet<Address>,
}

impl Placement {
    /// Non-distributable addresses and an empty ring always resolve locally, as do
    /// units adopted from a departing node
    pub(crate) fn route(&self, address: &Address) -> Route {
        if !address.is_distributable() || self.adopted.contains(address) {
            return Route::Local;
        }
        match self.ring.node_of(address.id_string()) {
            Some(owner) if owner != self.local_node => Route::Remote(owner),
            _ => Route::Local,
        }
    }

    /// The running unit for `address`, or a new one. A unit this node took over by
    /// joining is created with its calls held until the previous owner hands it off.
    pub(crate) fn materialize(
        &self,
        address: &Address,
        definition: &Definition,
    ) -> Result<Arc<LocalMailbox>, SpawnErr> {
        if let Some(mailbox) = self.host.find(address) {
            return Ok(mailbox);
        }
        if address.is_distributable() {
            let ring = self.ring.snapshot();
            if ring.node_of(address.id_string()) == Some(self.local_node) {
                if let Some((from, left)) = self.handoffs.expected_from(address, &ring) {
                    let mailbox = self.host.create_awaiting_handoff(address, definition)?;
                    if mailbox.is_awaiting_handoff() {
                        self.handoffs.hold(address, from, mailbox.clone(), left);
                    }
                    return Ok(mailbox);
                }
            }
        }
        self.host.create_or_find(address, definition)
    }

    /// Send `envelope` to wherever `address` lives now, creating the unit if it is
    /// owned here and not running yet
    pub(crate) fn dispatch(
        &self,
        address: &Address,
        definition: &Definition,
        mut envelope: Envelope,
    ) -> Result<(), GridErr> {
        for _ in 0..MAX_REDELIVERIES {
            match self.route(address) {
                Route::Remote(owner) => {
                    return self.outbound.deliver(owner, address, definition, envelope)
                }
                Route::Local => {
                    let mailbox = match self.materialize(address, definition) {
                        Ok(mailbox) => mailbox,
                        Err(err) => {
                            if let Some(reply) = envelope.reply {
                                reply.send(Err(err.to_string()));
                            }
                            return Err(err.into());
                        }
                    };
                    match mailbox.send(envelope) {
                        Ok(()) => return Ok(()),
                        Err(MessagingErr::SendErr(returned)) => {
                            log::debug!("Mailbox of {address} closed under a send, re-routing");
                            envelope = returned;
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
            }
        }
        if let Some(reply) = envelope.reply {
            reply.send(Err(format!("No open mailbox for {address}")));
        }
        Err(MessagingErr::<()>::ChannelClosed.into())
    }
}

/// A mailbox which runs each operation locally or forwards it to the address's owner
#[derive(Clone)]
pub struct RoutingMailbox {
    address: Address,
    definition: Definition,
    local: Arc<LocalMailbox>,
    placement: Arc<Placement>,
}

impl std::fmt::Debug for RoutingMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RoutingMailbox {{ address: {}, route: {:?} }}", self.address, self.route())
    }
}

impl RoutingMailbox {
    pub(crate) fn new(
        address: Address,
        definition: Definition,
        local: Arc<LocalMailbox>,
        placement: Arc<Placement>,
    ) -> Self {
        Self {
            address,
            definition,
            local,
            placement,
        }
    }

    /// The address this mailbox serves
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The definition the unit is built from
    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    /// Where operations currently run
    pub fn route(&self) -> Route {
        self.placement.route(&self.address)
    }

    /// Whether operations currently run on this node
    pub fn is_local(&self) -> bool {
        self.route() == Route::Local
    }

    /// Send `envelope`, reporting the routing failure in full. A local mailbox which
    /// closed because its unit moved away is routed again rather than failing.
    pub fn deliver(&self, envelope: Envelope) -> Result<(), GridErr> {
        match self.route() {
            Route::Remote(owner) => {
                self.placement
                    .outbound
                    .deliver(owner, &self.address, &self.definition, envelope)
            }
            Route::Local => match self.local.send(envelope) {
                Ok(()) => Ok(()),
                Err(MessagingErr::SendErr(envelope)) => {
                    self.placement
                        .dispatch(&self.address, &self.definition, envelope)
                }
                Err(err) => Err(err.into()),
            },
        }
    }
}

#[async_trait::async_trait]
impl Mailbox for RoutingMailbox {
    fn send(&self, envelope: Envelope) -> Result<(), MessagingErr<Envelope>> {
        self.deliver(envelope).map_err(|err| {
            log::debug!("Send to {} failed: {err}", self.address);
            match err {
                GridErr::Transport(err) => MessagingErr::Transport(err),
                GridErr::Spawn(err) => MessagingErr::Spawn(err),
                _ => MessagingErr::ChannelClosed,
            }
        })
    }

    // lifecycle signals always reach the local unit, even for a remote address
    fn signal(&self, signal: Signal) -> Result<(), MessagingErr<Signal>> {
        self.local.signal(signal)
    }

    async fn receive(&self) -> Option<Delivery> {
        match self.route() {
            Route::Local => self.local.receive().await,
            Route::Remote(_) => None,
        }
    }

    fn close(&self) {
        self.local.close()
    }

    fn is_closed(&self) -> bool {
        self.local.is_closed()
    }

    fn is_suspended(&self) -> bool {
        match self.route() {
            Route::Local => self.local.is_suspended(),
            Route::Remote(_) => false,
        }
    }

    fn suspend(&self) {
        if self.is_local() {
            self.local.suspend()
        }
    }

    fn resume(&self) {
        self.local.resume()
    }

    fn pending_messages(&self) -> usize {
        match self.route() {
            Route::Local => self.local.pending_messages(),
            Route::Remote(_) => 0,
        }
    }

    fn concurrency_capacity(&self) -> usize {
        self.local.concurrency_capacity()
    }
}

// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The receiving half of the control protocol

use std::sync::Arc;

use crate::mailbox::routing::{Placement, Route};
use crate::protocol::{Deliver, GridMessage, ReturnAddress, Start};
use crate::relocation::RelocationCoordinator;
use crate::Envelope;

/// Applies messages from other nodes to this node. Every message is handled to
/// completion before the next one from the same link, which keeps a `Relocate`
/// ahead of the `Deliver`s that follow it.
pub(crate) struct Inbound {
    placement: Arc<Placement>,
    coordinator: Arc<RelocationCoordinator>,
}

impl Inbound {
    pub(crate) fn new(placement: Arc<Placement>, coordinator: Arc<RelocationCoordinator>) -> Self {
        Self {
            placement,
            coordinator,
        }
    }

    pub(crate) fn handle(&self, message: GridMessage) {
        log::debug!(
            "Node {} received {}",
            self.placement.local_node,
            message.kind()
        );
        match message {
            GridMessage::Start(start) => self.start(start),
            GridMessage::Deliver(deliver) => self.deliver(deliver),
            GridMessage::Answer(answer) => {
                self.placement.outbound.registry().complete(answer);
            }
            GridMessage::Relocate(relocate) => self.coordinator.restore(relocate),
        }
    }

    fn start(&self, start: Start) {
        match self.placement.route(&start.address) {
            Route::Local => {
                if let Err(err) = self
                    .placement
                    .materialize(&start.address, &start.definition)
                {
                    log::error!("Failed to start {}: {err}", start.address);
                }
            }
            Route::Remote(owner) => {
                log::warn!(
                    "Relaying Start for {} from node {} to its owner, node {owner}",
                    start.address,
                    start.sender
                );
                if let Err(err) = self.placement.outbound.relay_start(owner, start) {
                    log::warn!("Failed to relay Start to node {owner}: {err}");
                }
            }
        }
    }

    fn deliver(&self, deliver: Deliver) {
        let Deliver {
            sender,
            correlation_id,
            expects_reply,
            protocol,
            address,
            definition,
            payload,
            representation,
            ..
        } = deliver;

        match self.placement.route(&address) {
            Route::Remote(owner) => log::warn!(
                "Relaying Deliver for {address} from node {sender} to its owner, node {owner}"
            ),
            Route::Local => {
                if !self.placement.delivered.first_sight(sender, correlation_id) {
                    log::debug!(
                        "Dropping a second copy of correlation id {correlation_id} from node {sender}"
                    );
                    return;
                }
            }
        }

        // every Deliver is answered, casts with an empty acknowledgement
        let reply = self.placement.outbound.return_channel(ReturnAddress {
            node: sender,
            correlation_id,
            expects_reply,
        });
        let envelope = Envelope::call(protocol, representation, payload, reply);
        if let Err(err) = self.placement.dispatch(&address, &definition, envelope) {
            log::warn!("Failed to deliver to {address} for node {sender}: {err}");
        }
    }
}

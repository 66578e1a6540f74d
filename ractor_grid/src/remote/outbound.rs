// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The sending half of the control protocol

use std::sync::Arc;

use super::{AnswerSink, CorrelationRegistry};
use crate::concurrency::{self, OneshotReceiver};
use crate::message::{RemoteReturn, ReturnChannel};
use crate::protocol::{Answer, Deliver, GridMessage, PendingMessage, Relocate, ReturnAddress, Start};
use crate::transport::Transport;
use crate::{
    Address, CorrelationId, Definition, Envelope, GridErr, NodeId, Outcome, RelocationErr,
    TransportErr,
};

/// Packages local operations on remotely-owned addresses as protocol messages
pub struct Outbound {
    local_node: NodeId,
    transport: Arc<dyn Transport>,
    registry: Arc<CorrelationRegistry>,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Outbound {{ node: {} }}", self.local_node)
    }
}

impl Outbound {
    /// Create the outbound half for `local_node`
    pub fn new(
        local_node: NodeId,
        transport: Arc<dyn Transport>,
        registry: Arc<CorrelationRegistry>,
    ) -> Self {
        Self {
            local_node,
            transport,
            registry,
        }
    }

    /// The registry answers are matched against
    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    fn transmit(&self, message: GridMessage) -> Result<(), TransportErr> {
        log::debug!(
            "Node {} sending {} to node {}",
            self.local_node,
            message.kind(),
            message.destination()
        );
        self.transport.send(message)
    }

    /// Ask `node` to make sure `address` exists
    pub fn start(
        &self,
        node: NodeId,
        protocol: &str,
        address: &Address,
        definition: &Definition,
    ) -> Result<(), TransportErr> {
        self.transmit(GridMessage::Start(Start {
            node,
            sender: self.local_node,
            protocol: protocol.to_string(),
            address: address.clone(),
            definition: definition.clone(),
        }))
    }

    /// Pass a [Start] on to the node which owns its address now
    pub(crate) fn relay_start(&self, node: NodeId, mut start: Start) -> Result<(), TransportErr> {
        start.node = node;
        self.transmit(GridMessage::Start(start))
    }

    /// Send `envelope` to `node` as a [Deliver].
    ///
    /// A locally waiting caller is parked in the registry under a fresh correlation id.
    /// An envelope which already carries a remote return address is relayed with the
    /// original sender and correlation id, so the answer goes straight back to the
    /// caller and is not tracked here. The caller is redirected to `node` instead.
    pub fn deliver(
        &self,
        node: NodeId,
        address: &Address,
        definition: &Definition,
        envelope: Envelope,
    ) -> Result<(), GridErr> {
        let Envelope {
            protocol,
            representation,
            payload,
            reply,
        } = envelope;

        let (sender, correlation_id, expects_reply, relayed) = match reply {
            None => (self.local_node, self.registry.next_id(), false, None),
            Some(ReturnChannel::Local(tx)) => {
                let id = self.registry.next_id();
                self.registry.await_answer(id, tx);
                (self.local_node, id, true, None)
            }
            Some(ReturnChannel::Remote(remote)) => (
                remote.node,
                remote.correlation_id,
                remote.expects_reply,
                Some(remote),
            ),
        };

        let deliver = Deliver {
            node,
            sender,
            correlation_id,
            expects_reply,
            protocol,
            address: address.clone(),
            definition: definition.clone(),
            payload,
            representation,
        };
        if relayed.is_none() {
            self.registry.track(correlation_id, node, deliver.clone());
        }

        if let Err(err) = self.transmit(GridMessage::Deliver(deliver)) {
            match relayed {
                Some(remote) => ReturnChannel::Remote(remote).send(Err(err.to_string())),
                None => self.registry.cancel(correlation_id),
            }
            return Err(err.into());
        }
        if let Some(remote) = relayed {
            // the caller now follows `node`, not us
            remote.redirect(node);
        }
        Ok(())
    }

    /// Send a previously tracked [Deliver] to a different node under its original
    /// correlation id
    pub fn resend(&self, node: NodeId, correlation_id: CorrelationId, mut deliver: Deliver) {
        deliver.node = node;
        self.registry.track(correlation_id, node, deliver.clone());
        if let Err(err) = self.transmit(GridMessage::Deliver(deliver)) {
            log::warn!("Failed to re-send correlation id {correlation_id} to node {node}: {err}");
            self.registry.cancel(correlation_id);
        }
    }

    /// Turn a [ReturnAddress] back into a channel which answers through this node
    pub fn return_channel(self: &Arc<Self>, address: ReturnAddress) -> ReturnChannel {
        let sink: Arc<dyn AnswerSink> = self.clone();
        ReturnChannel::Remote(RemoteReturn::new(
            address.node,
            address.correlation_id,
            address.expects_reply,
            sink,
        ))
    }

    /// Answer every return address with an error
    pub fn fail_pending(&self, returns: &[ReturnAddress], reason: &str) {
        for ret in returns {
            self.answer(ret.node, ret.correlation_id, Err(reason.to_string()));
        }
    }

    /// Ship a suspended unit to `node`.
    ///
    /// Calls and casts which originated on this node are tracked against `node` like
    /// any other [Deliver], so they are re-homed if it departs before answering.
    /// Callers on other nodes are redirected to `node` once the unit is on its way.
    ///
    /// Returns the correlation id of the relocation and the receiver its
    /// acknowledgement arrives on.
    pub fn relocate(
        &self,
        node: NodeId,
        address: Address,
        definition: Definition,
        snapshot: Vec<u8>,
        pending: Vec<Envelope>,
    ) -> Result<(CorrelationId, OneshotReceiver<Outcome>), RelocationErr> {
        let mut shipped = Vec::with_capacity(pending.len());
        let mut returns = Vec::with_capacity(pending.len());
        let mut redirects = Vec::new();
        for envelope in pending {
            let Envelope {
                protocol,
                representation,
                payload,
                reply,
            } = envelope;
            let ret = match reply {
                Some(ReturnChannel::Remote(remote)) => {
                    let ret = ReturnAddress {
                        node: remote.node,
                        correlation_id: remote.correlation_id,
                        expects_reply: remote.expects_reply,
                    };
                    redirects.push(remote);
                    ret
                }
                local => {
                    let correlation_id = self.registry.next_id();
                    let expects_reply = match local {
                        Some(ReturnChannel::Local(tx)) => {
                            self.registry.await_answer(correlation_id, tx);
                            true
                        }
                        _ => false,
                    };
                    self.registry.track(
                        correlation_id,
                        node,
                        Deliver {
                            node,
                            sender: self.local_node,
                            correlation_id,
                            expects_reply,
                            protocol: protocol.clone(),
                            address: address.clone(),
                            definition: definition.clone(),
                            payload: payload.clone(),
                            representation: representation.clone(),
                        },
                    );
                    ReturnAddress {
                        node: self.local_node,
                        correlation_id,
                        expects_reply,
                    }
                }
            };
            returns.push(ret.clone());
            shipped.push(PendingMessage {
                protocol,
                representation,
                payload,
                reply: Some(ret),
            });
        }

        let correlation_id = self.registry.next_id();
        let (tx, rx) = concurrency::oneshot();
        self.registry.await_answer(correlation_id, tx);

        let message = GridMessage::Relocate(Relocate {
            receiver: node,
            sender: self.local_node,
            correlation_id,
            definition,
            address,
            snapshot,
            pending: shipped,
        });
        if let Err(err) = self.transmit(message) {
            self.registry.cancel(correlation_id);
            self.fail_pending(&returns, &err.to_string());
            return Err(err.into());
        }
        for remote in redirects {
            remote.redirect(node);
        }
        Ok((correlation_id, rx))
    }
}

impl AnswerSink for Outbound {
    fn answer(&self, to: NodeId, correlation_id: CorrelationId, outcome: Outcome) {
        let answer = Answer {
            receiver: to,
            sender: self.local_node,
            correlation_id,
            outcome,
            redirect: None,
        };
        if to == self.local_node {
            self.registry.complete(answer);
            return;
        }
        if let Err(err) = self.transmit(GridMessage::Answer(answer)) {
            log::warn!("Failed to answer correlation id {correlation_id} on node {to}: {err}");
        }
    }

    fn redirect(&self, to: NodeId, correlation_id: CorrelationId, node: NodeId) {
        if to == self.local_node {
            self.registry.redirect(correlation_id, node);
            return;
        }
        let answer = Answer::redirect(to, self.local_node, correlation_id, node);
        if let Err(err) = self.transmit(GridMessage::Answer(answer)) {
            log::warn!("Failed to redirect correlation id {correlation_id} on node {to}: {err}");
        }
    }
}

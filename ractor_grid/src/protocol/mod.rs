// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The inter-node control protocol.
//!
//! Four messages cross the network boundary:
//!
//! * [Start] asks the owner of an address to make sure the unit exists
//! * [Deliver] invokes an operation on a (possibly not yet created) unit
//! * [Answer] completes a [Deliver] or [Relocate] by correlation id, or tells the
//!   sender of a [Deliver] which node now holds it
//! * [Relocate] moves a unit's snapshot and queued calls to its new owner
//!
//! The transport moves [GridMessage]s; [GridMessage::encode] and
//! [GridMessage::decode] give a length-delimited protobuf rendering for transports
//! which move bytes.

use crate::{Address, CorrelationId, Definition, GridErr, NodeId, Outcome};

mod wire;


/// Ensure a unit exists on its owner
#[derive(Clone, Debug, PartialEq)]
pub struct Start {
    /// Destination node
    pub node: NodeId,
    /// Originating node
    pub sender: NodeId,
    /// Protocol the unit will be addressed with
    pub protocol: String,
    /// The unit
    pub address: Address,
    /// How to build the unit
    pub definition: Definition,
}

/// Invoke an operation on a unit
#[derive(Clone, Debug, PartialEq)]
pub struct Deliver {
    /// Destination node
    pub node: NodeId,
    /// The node the [Answer] goes back to. Relays keep the original sender
    pub sender: NodeId,
    /// The sender's correlation id for this call
    pub correlation_id: CorrelationId,
    /// Whether the sender waits for the result, or only for an acknowledgement
    pub expects_reply: bool,
    /// Protocol being invoked
    pub protocol: String,
    /// The unit
    pub address: Address,
    /// How to build the unit if it does not exist yet
    pub definition: Definition,
    /// Encoded arguments
    pub payload: Vec<u8>,
    /// The operation being invoked
    pub representation: String,
}

/// Complete a previously issued [Deliver] or [Relocate]
#[derive(Clone, Debug, PartialEq)]
pub struct Answer {
    /// The node holding the correlation id
    pub receiver: NodeId,
    /// The answering node
    pub sender: NodeId,
    /// The receiver's correlation id
    pub correlation_id: CorrelationId,
    /// Result or error. Empty for a redirect
    pub outcome: Outcome,
    /// Set when the [Deliver] was not completed but passed on to this node, which
    /// answers it instead. The receiver keeps waiting and re-homes the message if that
    /// node departs
    pub redirect: Option<NodeId>,
}

impl Answer {
    /// Tell `receiver` that its [Deliver] `correlation_id` is now held by `node`
    pub fn redirect(
        receiver: NodeId,
        sender: NodeId,
        correlation_id: CorrelationId,
        node: NodeId,
    ) -> Self {
        Self {
            receiver,
            sender,
            correlation_id,
            outcome: Ok(Vec::new()),
            redirect: Some(node),
        }
    }
}

/// Where a relocated call's result must be sent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReturnAddress {
    /// Node of the waiting caller
    pub node: NodeId,
    /// The caller's correlation id
    pub correlation_id: CorrelationId,
    /// Whether the caller waits for the result, or only for an acknowledgement
    pub expects_reply: bool,
}

/// A call that was queued, but not yet processed, when its unit was suspended
#[derive(Clone, Debug, PartialEq)]
pub struct PendingMessage {
    /// Protocol being invoked
    pub protocol: String,
    /// The operation being invoked
    pub representation: String,
    /// Encoded arguments
    pub payload: Vec<u8>,
    /// Where the result goes, if anywhere
    pub reply: Option<ReturnAddress>,
}

/// Move a unit to its new owner
#[derive(Clone, Debug, PartialEq)]
pub struct Relocate {
    /// The new owner
    pub receiver: NodeId,
    /// The old owner
    pub sender: NodeId,
    /// The old owner's correlation id, answered once the unit is resumed
    pub correlation_id: CorrelationId,
    /// How to build the unit
    pub definition: Definition,
    /// The unit
    pub address: Address,
    /// Opaque state captured at suspension
    pub snapshot: Vec<u8>,
    /// Queued calls in arrival order
    pub pending: Vec<PendingMessage>,
}

/// Any control message
#[derive(Clone, Debug, PartialEq)]
pub enum GridMessage {
    /// See [Start]
    Start(Start),
    /// See [Deliver]
    Deliver(Deliver),
    /// See [Answer]
    Answer(Answer),
    /// See [Relocate]
    Relocate(Relocate),
}

impl GridMessage {
    /// The node this message is addressed to
    pub fn destination(&self) -> NodeId {
        match self {
            Self::Start(start) => start.node,
            Self::Deliver(deliver) => deliver.node,
            Self::Answer(answer) => answer.receiver,
            Self::Relocate(relocate) => relocate.receiver,
        }
    }

    /// A short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start(_) => "Start",
            Self::Deliver(_) => "Deliver",
            Self::Answer(_) => "Answer",
            Self::Relocate(_) => "Relocate",
        }
    }

    /// Length-delimited protobuf encoding
    pub fn encode(&self) -> Vec<u8> {
        let wire: wire::WireGridMessage = self.clone().into();
        <wire::WireGridMessage as prost::Message>::encode_length_delimited_to_vec(&wire)
    }

    /// Decode a message produced by [GridMessage::encode]
    pub fn decode(bytes: Vec<u8>) -> Result<Self, GridErr> {
        let buffer = bytes::Bytes::from(bytes);
        let wire = <wire::WireGridMessage as prost::Message>::decode_length_delimited(buffer)?;
        wire.try_into()
    }
}

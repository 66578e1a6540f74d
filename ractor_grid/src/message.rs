// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Messages as they sit in a mailbox.
//!
//! An [Envelope] is a protocol call on a unit: which protocol, which operation
//! (`representation`), the opaque payload and, optionally, where the result goes. The
//! result channel is either a local oneshot or a node + correlation id pair that is
//! completed by sending an `Answer` over the network.

use std::sync::Arc;

use crate::concurrency::OneshotSender;
use crate::remote::AnswerSink;
use crate::{CorrelationId, NodeId};

/// The result of a unit processing an [Envelope]: the reply payload or the
/// unit's error rendered as a string
pub type Outcome = Result<Vec<u8>, String>;

/// Where the result of processing an [Envelope] is delivered
pub enum ReturnChannel {
    /// A caller waiting on this node
    Local(OneshotSender<Outcome>),
    /// A caller waiting on another node, reached through an `Answer`
    Remote(RemoteReturn),
}

/// The return address of a caller on another node
pub struct RemoteReturn {
    /// The node the caller lives on
    pub node: NodeId,
    /// The caller's correlation id
    pub correlation_id: CorrelationId,
    /// [false] when the caller only wants to know the message was processed
    pub expects_reply: bool,
    sink: Arc<dyn AnswerSink>,
}

impl RemoteReturn {
    /// Build a return address which answers through `sink`
    pub fn new(
        node: NodeId,
        correlation_id: CorrelationId,
        expects_reply: bool,
        sink: Arc<dyn AnswerSink>,
    ) -> Self {
        Self {
            node,
            correlation_id,
            expects_reply,
            sink,
        }
    }

    /// Tell the caller the call is now held by `node`, which will answer it
    pub fn redirect(&self, node: NodeId) {
        self.sink.redirect(self.node, self.correlation_id, node);
    }
}

impl ReturnChannel {
    /// Complete the channel. Dropped callers are ignored
    pub fn send(self, outcome: Outcome) {
        match self {
            Self::Local(tx) => {
                let _ = tx.send(outcome);
            }
            Self::Remote(remote) => {
                let outcome = if remote.expects_reply {
                    outcome
                } else {
                    // acks carry no payload
                    outcome.map(|_| Vec::new())
                };
                remote
                    .sink
                    .answer(remote.node, remote.correlation_id, outcome);
            }
        }
    }

    /// Whether a caller is waiting for the result (as opposed to an ack)
    pub fn expects_reply(&self) -> bool {
        match self {
            Self::Local(_) => true,
            Self::Remote(remote) => remote.expects_reply,
        }
    }
}

impl std::fmt::Debug for ReturnChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(_) => write!(f, "Local"),
            Self::Remote(remote) => write!(
                f,
                "Remote {{ node: {}, correlation_id: {}, expects_reply: {} }}",
                remote.node, remote.correlation_id, remote.expects_reply
            ),
        }
    }
}

/// A protocol call on a unit
#[derive(Debug)]
pub struct Envelope {
    /// The protocol (interface) being invoked
    pub protocol: String,
    /// The operation within the protocol
    pub representation: String,
    /// Opaque, already-encoded arguments
    pub payload: Vec<u8>,
    /// Where the result goes, [None] for fire-and-forget
    pub reply: Option<ReturnChannel>,
}

impl Envelope {
    /// A fire-and-forget call
    pub fn cast(
        protocol: impl Into<String>,
        representation: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            representation: representation.into(),
            payload,
            reply: None,
        }
    }

    /// A call whose result is delivered to `reply`
    pub fn call(
        protocol: impl Into<String>,
        representation: impl Into<String>,
        payload: Vec<u8>,
        reply: ReturnChannel,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            representation: representation.into(),
            payload,
            reply: Some(reply),
        }
    }
}

/// Lifecycle signals. Both are delivered to the local mailbox even when the address
/// is owned by another node, so a stale local placeholder can still be stopped or
/// released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stop the unit after the messages ahead of this signal.
    ///
    /// A stop is local to the node it was signalled on. If the unit is relocated
    /// before reaching it, the stop is discarded with the mailbox and the unit keeps
    /// running on its new owner.
    Stop,
    /// Lift a relocation suspension
    Resume,
}

/// Anything a mailbox can hold
#[derive(Debug)]
pub enum Delivery {
    /// A protocol call
    Message(Envelope),
    /// A lifecycle signal
    Signal(Signal),
    /// Ask a suspended unit for its relocation snapshot
    TakeSnapshot(OneshotSender<Result<Vec<u8>, String>>),
    /// Hand a suspended unit the snapshot it is resuming from
    ApplySnapshot(Vec<u8>, OneshotSender<Result<(), String>>),
}

impl Delivery {
    /// Whether this delivery may reach a unit whose mailbox is suspended for relocation
    pub fn passes_suspension(&self) -> bool {
        matches!(
            self,
            Self::Signal(Signal::Resume) | Self::TakeSnapshot(_) | Self::ApplySnapshot(_, _)
        )
    }

    /// Whether this is a protocol call
    pub fn is_message(&self) -> bool {
        matches!(self, Self::Message(_))
    }
}

impl From<Envelope> for Delivery {
    fn from(value: Envelope) -> Self {
        Delivery::Message(value)
    }
}

impl From<Signal> for Delivery {
    fn from(value: Signal) -> Self {
        Delivery::Signal(value)
    }
}

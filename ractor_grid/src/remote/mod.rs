// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The network boundary of a grid node.
//!
//! [Outbound] turns mailbox operations on remotely-owned addresses into protocol
//! messages and records every [crate::protocol::Deliver] it sends in the node's
//! [CorrelationRegistry] until the matching [crate::protocol::Answer] arrives. The
//! inbound side applies messages received from other nodes to the local host.

use crate::{CorrelationId, NodeId, Outcome};

pub mod correlation;
pub mod delivered;
pub(crate) mod inbound;
pub mod outbound;

pub use correlation::{CorrelationRegistry, UnAckMessage};
pub use delivered::DeliveryLog;
pub use outbound::Outbound;

#[cfg(test)]
mod tests;

/// Something which can route an [Outcome] back to a waiting caller
pub trait AnswerSink: Send + Sync {
    /// Complete correlation id `correlation_id` held by node `to`
    fn answer(&self, to: NodeId, correlation_id: CorrelationId, outcome: Outcome);

    /// Tell node `to` that correlation id `correlation_id` is now held by `node`
    fn redirect(&self, to: NodeId, correlation_id: CorrelationId, node: NodeId);
}

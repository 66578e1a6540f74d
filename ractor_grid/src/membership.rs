// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The seam to the cluster membership oracle.
//!
//! Failure detection and quorum computation live outside of the grid. The oracle
//! reports [MembershipEvent]s, and [spawn_membership_listener] applies them to a
//! [MembershipListener] one at a time, in order, on a single task. That task is the
//! only writer of the node's ring.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use crate::concurrency::{self, JoinHandle, MpscUnboundedReceiver};
use crate::NodeId;

/// Answers "who is alive right now"
pub trait MembershipOracle: Send + Sync {
    /// The current live members, including the local node
    fn current_live_nodes(&self) -> Vec<NodeId>;
}

/// A change reported by the membership oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipEvent {
    /// A node became a member
    NodeJoined(NodeId),
    /// A node is gone
    NodeLeft(NodeId),
    /// The cluster gained (`true`) or lost (`false`) quorum
    QuorumChanged(bool),
}

/// Reacts to membership changes
#[async_trait::async_trait]
pub trait MembershipListener: Send + Sync {
    /// A node joined the cluster
    async fn on_node_joined(&self, node: NodeId);

    /// A node left the cluster
    async fn on_node_left(&self, node: NodeId);

    /// The quorum flag flipped
    fn on_quorum_changed(&self, healthy: bool);
}

/// Apply `events` to `listener` in order until the channel closes
pub fn spawn_membership_listener<TListener>(
    listener: Arc<TListener>,
    mut events: MpscUnboundedReceiver<MembershipEvent>,
) -> JoinHandle<()>
where
    TListener: MembershipListener + 'static,
{
    concurrency::spawn(async move {
        while let Some(event) = events.recv().await {
            log::debug!("Applying membership event {event:?}");
            match event {
                MembershipEvent::NodeJoined(node) => listener.on_node_joined(node).await,
                MembershipEvent::NodeLeft(node) => listener.on_node_left(node).await,
                MembershipEvent::QuorumChanged(healthy) => listener.on_quorum_changed(healthy),
            }
        }
    })
}

/// A fixed membership, adjusted by hand. Useful for tests and static deployments
#[derive(Debug, Default)]
pub struct StaticMembership {
    nodes: RwLock<BTreeSet<NodeId>>,
}

impl StaticMembership {
    /// A membership of exactly `nodes`
    pub fn new<I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        Self {
            nodes: RwLock::new(nodes.into_iter().collect()),
        }
    }

    /// Record `node` as live
    pub fn add(&self, node: NodeId) {
        match self.nodes.write() {
            Ok(mut nodes) => nodes.insert(node),
            Err(poisoned) => poisoned.into_inner().insert(node),
        };
    }

    /// Record `node` as gone
    pub fn remove(&self, node: NodeId) {
        match self.nodes.write() {
            Ok(mut nodes) => nodes.remove(&node),
            Err(poisoned) => poisoned.into_inner().remove(&node),
        };
    }
}

impl MembershipOracle for StaticMembership {
    fn current_live_nodes(&self) -> Vec<NodeId> {
        match self.nodes.read() {
            Ok(nodes) => nodes.iter().copied().collect(),
            Err(poisoned) => poisoned.into_inner().iter().copied().collect(),
        }
    }
}

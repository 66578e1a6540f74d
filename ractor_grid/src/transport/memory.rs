// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! An in-process network of unbounded FIFO links

use std::sync::Arc;

use dashmap::DashMap;

use super::Transport;
use crate::concurrency::{self, MpscUnboundedReceiver, MpscUnboundedSender};
use crate::protocol::GridMessage;
use crate::{NodeId, TransportErr};

/// A set of in-process links, one inbound queue per connected node. Messages are
/// encoded on send and decoded by the receiver, so the codec is exercised exactly
/// as over a real wire.
#[derive(Clone, Debug, Default)]
pub struct InMemoryNetwork {
    links: Arc<DashMap<NodeId, MpscUnboundedSender<Vec<u8>>>>,
}

impl InMemoryNetwork {
    /// An empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `node`, returning its inbound queue. Reconnecting replaces the old queue
    pub fn connect(&self, node: NodeId) -> MpscUnboundedReceiver<Vec<u8>> {
        let (tx, rx) = concurrency::mpsc_unbounded();
        self.links.insert(node, tx);
        rx
    }

    /// Detach `node`. Messages to it fail with [TransportErr::Unreachable]
    pub fn disconnect(&self, node: NodeId) {
        self.links.remove(&node);
    }

    /// Whether `node` is attached
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.links.contains_key(&node)
    }

    /// A [Transport] sending over this network
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }
}

impl Transport for InMemoryNetwork {
    fn send(&self, message: GridMessage) -> Result<(), TransportErr> {
        let node = message.destination();
        let link = self
            .links
            .get(&node)
            .map(|link| link.value().clone())
            .ok_or(TransportErr::Unreachable(node))?;
        link.send(message.encode())
            .map_err(|_| TransportErr::Unreachable(node))
    }
}

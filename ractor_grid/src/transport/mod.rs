// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The network boundary between grid nodes.
//!
//! A [Transport] must deliver [GridMessage]s reliably and in order per pair of nodes.
//! Relocation depends on that ordering: a `Relocate` is applied before any `Deliver`
//! the same sender transmits afterwards. [InMemoryNetwork] provides such links inside
//! one process for tests and embedding.

use std::sync::Arc;

use crate::concurrency::{self, JoinHandle, MpscUnboundedReceiver};
use crate::protocol::GridMessage;
use crate::{Grid, TransportErr};

pub mod memory;
pub use memory::InMemoryNetwork;

/// Point-to-point, ordered delivery of control messages
pub trait Transport: Send + Sync {
    /// Send `message` to [GridMessage::destination]. Must not block
    fn send(&self, message: GridMessage) -> Result<(), TransportErr>;
}

/// Feed encoded messages arriving on `link` into `grid`'s inbound path until the
/// link closes
pub fn spawn_inbound(grid: Arc<Grid>, mut link: MpscUnboundedReceiver<Vec<u8>>) -> JoinHandle<()> {
    concurrency::spawn(async move {
        while let Some(bytes) = link.recv().await {
            match GridMessage::decode(bytes) {
                Ok(message) => grid.receive(message),
                Err(err) => {
                    log::error!("Node {} dropped an undecodable message: {err}", grid.local_node())
                }
            }
        }
        log::debug!("Inbound link of node {} closed", grid.local_node());
    })
}

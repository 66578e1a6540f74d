// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! # Location-transparent actor placement for a cluster of nodes
//!
//! A **grid** spreads addressable units of work ("actors") over the live nodes of a
//! cluster. Every unit has a globally unique [Address], and any node can talk to any
//! address without knowing which node currently hosts it. Ownership is decided by a
//! [ring::HashRing] built from the current membership, so every node holding the same
//! membership view agrees on the owner of every address.
//!
//! The moving parts, leaf first:
//!
//! 1. [ring::HashRing] maps a key to its owning [NodeId]. The shared copy is swapped
//!    wholesale on membership changes so routing reads never wait on writers.
//! 2. [Grid] is the per-node placement authority. It answers "is this address local?",
//!    hands out [mailbox::RoutingMailbox]es, gates remote placement on quorum and reacts
//!    to membership events by relocating exactly the addresses whose owner changed.
//! 3. [mailbox::RoutingMailbox] re-evaluates ownership on every operation and either
//!    runs it against the local mailbox or turns it into a protocol message.
//! 4. The relocation coordinator suspends a unit, captures its snapshot and its queued
//!    messages, ships both to the new owner and resumes the unit there in order.
//! 5. [protocol] holds the four control messages (`Start`, `Deliver`, `Answer`,
//!    `Relocate`) and [remote] the correlation bookkeeping around them.
//!
//! Cluster membership detection, the network transport and unit persistence are
//! supplied from the outside through [membership::MembershipOracle],
//! [transport::Transport] and the [stage::Host] capability respectively.
//!
//! ## Example
//!
//! ```rust
//! use ractor_grid::stage::{GridActor, Stage};
//! use ractor_grid::transport::InMemoryNetwork;
//! use ractor_grid::{ActorProcessingErr, Definition, Grid, GridConfig};
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl GridActor for Echo {
//!     async fn handle(
//!         &mut self,
//!         _representation: &str,
//!         payload: Vec<u8>,
//!     ) -> Result<Vec<u8>, ActorProcessingErr> {
//!         Ok(payload)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let network = InMemoryNetwork::new();
//!     let stage = Stage::new();
//!     stage.register("echo", |_, _| Ok(Box::new(Echo) as Box<dyn GridActor>));
//!     let grid = Grid::new(1, stage, network.transport(), GridConfig::default());
//!     grid.quorum_achieved();
//!
//!     let address = grid.address_of("greeter");
//!     let reply = grid
//!         .ask(&address, &Definition::new("echo"), "say", b"hi".to_vec(), None)
//!         .await
//!         .expect("Failed to ask the echo unit");
//!     assert_eq!(b"hi".to_vec(), reply);
//! }
//! ```

#![warn(unused_imports)]
#![warn(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod address;
pub mod concurrency;
pub mod config;
pub mod errors;
pub mod grid;
pub mod mailbox;
pub mod membership;
pub mod message;
pub mod protocol;
pub mod relocation;
pub mod remote;
pub mod ring;
pub mod rpc;
pub mod stage;
pub mod transport;


/// Nodes are represented by an integer id handed out by the membership oracle
pub type NodeId = u64;

/// Correlates an outbound request with its eventual [protocol::Answer]
pub type CorrelationId = u64;

// ============== Re-exports ============== //
pub use address::{Address, Definition};
pub use config::GridConfig;
pub use errors::{
    ActorProcessingErr, GridErr, MessagingErr, RelocationErr, SpawnErr, TransportErr,
};
pub use grid::Grid;
pub use message::{Envelope, Outcome, ReturnChannel};
pub use relocation::{RelocationReport, RelocationState};
pub use rpc::{CallResult, GridRef};

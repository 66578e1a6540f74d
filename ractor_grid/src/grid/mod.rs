// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The per-node placement authority.
//!
//! A [Grid] answers "is this address owned here?", hands out [RoutingMailbox]es, gates
//! remote placement on cluster quorum and reacts to membership changes:
//!
//! * a node joining moves exactly the locally owned addresses which now belong to it
//! * the joining node itself holds calls for addresses it took over until their
//!   previous owner hands them off, up to [GridConfig::handoff_timeout]
//! * a node leaving re-homes every in-flight message that was sent to it
//! * a graceful shutdown ([Grid::relocate_actors]) moves everything owned here to the
//!   remaining members, unless this node is the last one
//!
//! The quorum flag is owned by the membership oracle. Placements against a remote owner
//! wait for it, up to [GridConfig::quorum_timeout].

use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::watch;

use crate::concurrency::{self, Duration};
use crate::mailbox::routing::{Placement, Route};
use crate::mailbox::RoutingMailbox;
use crate::membership::{MembershipListener, MembershipOracle};
use crate::protocol::{Deliver, GridMessage};
use crate::relocation::handoff::Handoffs;
use crate::relocation::{RelocationCoordinator, RelocationReport, RelocationState};
use crate::remote::inbound::Inbound;
use crate::remote::{CorrelationRegistry, DeliveryLog, Outbound};
use crate::ring::{HashRing, SharedRing};
use crate::rpc::{self, GridRef};
use crate::stage::Host;
use crate::transport::Transport;
use crate::{
    Address, CorrelationId, Definition, Envelope, GridConfig, GridErr, NodeId, ReturnChannel,
};


/// The placement authority of one node
pub struct Grid {
    local_node: NodeId,
    config: GridConfig,
    placement: Arc<Placement>,
    registry: Arc<CorrelationRegistry>,
    coordinator: Arc<RelocationCoordinator>,
    inbound: Inbound,
    quorum: watch::Sender<bool>,
}

impl std::fmt::Debug for Grid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Grid {{ node: {}, members: {:?}, quorum: {} }}",
            self.local_node,
            self.live_nodes(),
            self.has_quorum()
        )
    }
}

impl Grid {
    /// Create the placement authority for `local_node`. The ring starts out holding
    /// only the local node, and quorum starts out lost.
    ///
    /// * `local_node` - This node's id, as handed out by the membership oracle
    /// * `host` - Runs the units owned by this node
    /// * `transport` - Carries control messages to the other nodes
    /// * `config` - Tunables, see [GridConfig]
    pub fn new(
        local_node: NodeId,
        host: Arc<dyn Host>,
        transport: Arc<dyn Transport>,
        config: GridConfig,
    ) -> Arc<Self> {
        let registry = Arc::new(CorrelationRegistry::new());
        let outbound = Arc::new(Outbound::new(local_node, transport, registry.clone()));
        let placement = Arc::new(Placement {
            local_node,
            ring: SharedRing::new(HashRing::with_nodes(config.points_per_node, [local_node])),
            host,
            outbound,
            handoffs: Handoffs::default(),
            delivered: DeliveryLog::new(config.duplicate_retention),
            adopted: DashSet::new(),
        });
        let coordinator = Arc::new(RelocationCoordinator::new(
            placement.clone(),
            config.snapshot_timeout,
            config.relocation_timeout,
        ));
        let inbound = Inbound::new(placement.clone(), coordinator.clone());
        let (quorum, _) = watch::channel(false);

        Arc::new(Self {
            local_node,
            config,
            placement,
            registry,
            coordinator,
            inbound,
            quorum,
        })
    }

    /// This node's id
    pub fn local_node(&self) -> NodeId {
        self.local_node
    }

    /// This node's configuration
    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// The local host
    pub fn host(&self) -> &Arc<dyn Host> {
        &self.placement.host
    }

    /// The correlation registry of this node's network boundary
    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    /// The current version of the ring
    pub fn ring(&self) -> Arc<HashRing> {
        self.placement.ring.snapshot()
    }

    /// Members of the current ring
    pub fn live_nodes(&self) -> Vec<NodeId> {
        self.ring().nodes()
    }

    /// The distributable address for `key`
    pub fn address_of(&self, key: impl Into<String>) -> Address {
        Address::from_key(key)
    }

    /// The node owning `address`. Non-distributable addresses are owned here
    pub fn owner_of(&self, address: &Address) -> Option<NodeId> {
        if address.is_distributable() {
            self.placement.ring.node_of(address.id_string())
        } else {
            Some(self.local_node)
        }
    }

    /// Whether operations on `address` run on this node
    pub fn is_local(&self, address: &Address) -> bool {
        self.placement.route(address) == Route::Local
    }

    /// Where `address` was last seen in the relocation state machine
    pub fn relocation_state(&self, address: &Address) -> Option<RelocationState> {
        self.coordinator.state(address)
    }

    // ============== Quorum ============== //

    /// Whether the cluster currently has quorum
    pub fn has_quorum(&self) -> bool {
        *self.quorum.borrow()
    }

    /// The membership oracle reports quorum. Releases waiting placements
    pub fn quorum_achieved(&self) {
        if !self.quorum.send_replace(true) {
            log::info!("Node {} achieved quorum", self.local_node);
        }
    }

    /// The membership oracle reports quorum lost. New remote placements wait
    pub fn quorum_lost(&self) {
        if self.quorum.send_replace(false) {
            log::info!("Node {} lost quorum", self.local_node);
        }
    }

    /// Wait until the quorum flag is set, up to [GridConfig::quorum_timeout]
    pub async fn wait_for_quorum(&self) -> Result<(), GridErr> {
        let mut flag = self.quorum.subscribe();
        let wait = async move {
            loop {
                let healthy = *flag.borrow_and_update();
                if healthy {
                    return;
                }
                if flag.changed().await.is_err() {
                    // the grid is gone, nothing will ever flip the flag
                    std::future::pending::<()>().await;
                }
            }
        };
        match self.config.quorum_timeout {
            Some(bound) => concurrency::timeout(bound, wait)
                .await
                .map_err(|_| GridErr::QuorumTimeout(bound)),
            None => {
                wait.await;
                Ok(())
            }
        }
    }

    // ============== Placement ============== //

    /// Allocate the mailbox for `address`.
    ///
    /// When another node owns the address this waits for quorum first, since a
    /// placement made against an unquorate ring may target a phantom owner. A local
    /// unit backs every mailbox so that lifecycle signals have a local target. Only
    /// when that unit is created here is the owner asked to start the real one;
    /// resolving the same address again reuses both.
    pub async fn actor_thunk_for(
        &self,
        address: Address,
        definition: Definition,
    ) -> Result<RoutingMailbox, GridErr> {
        self.gate(&address).await?;
        let local = match self.placement.host.find(&address) {
            Some(local) => local,
            None => {
                let local = self.placement.materialize(&address, &definition)?;
                if let Route::Remote(owner) = self.placement.route(&address) {
                    self.placement
                        .outbound
                        .start(owner, &definition.type_name, &address, &definition)?;
                }
                local
            }
        };
        Ok(RoutingMailbox::new(
            address,
            definition,
            local,
            self.placement.clone(),
        ))
    }

    /// A handle on `address` that works from this node whoever owns it
    pub async fn resolve(&self, address: Address, definition: Definition) -> Result<GridRef, GridErr> {
        let mailbox = self.actor_thunk_for(address, definition).await?;
        Ok(GridRef::new(mailbox))
    }

    async fn gate(&self, address: &Address) -> Result<(), GridErr> {
        match self.placement.route(address) {
            Route::Remote(_) => self.wait_for_quorum().await,
            Route::Local => Ok(()),
        }
    }

    /// Send an operation to `address` without waiting for it to run. Nothing is
    /// created on this node unless it owns the address
    pub async fn send(
        &self,
        address: &Address,
        definition: &Definition,
        representation: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<(), GridErr> {
        self.gate(address).await?;
        let envelope = Envelope::cast(definition.type_name.clone(), representation, payload);
        self.placement.dispatch(address, definition, envelope)
    }

    /// Invoke an operation on `address` and wait for its result. Nothing is created on
    /// this node unless it owns the address
    pub async fn ask(
        &self,
        address: &Address,
        definition: &Definition,
        representation: impl Into<String>,
        payload: Vec<u8>,
        timeout_option: Option<Duration>,
    ) -> Result<Vec<u8>, GridErr> {
        self.gate(address).await?;
        let (tx, rx) = concurrency::oneshot();
        let envelope = Envelope::call(
            definition.type_name.clone(),
            representation,
            payload,
            ReturnChannel::Local(tx),
        );
        self.placement.dispatch(address, definition, envelope)?;
        rpc::await_reply(rx, timeout_option).await.into_reply()
    }

    /// Apply a control message received from another node
    pub fn receive(&self, message: GridMessage) {
        self.inbound.handle(message)
    }

    // ============== Membership ============== //

    /// Seed the ring with the oracle's live nodes when the whole cluster starts at once.
    /// Nothing is relocated and nothing is expected from the other members
    pub fn bootstrap(&self, oracle: &dyn MembershipOracle) {
        self.seed(oracle);
    }

    /// Seed the ring with the oracle's live nodes when joining a running cluster.
    ///
    /// The other members relocate the units this node now owns once they see it join.
    /// Until [GridConfig::handoff_timeout] has passed, a call for such an address
    /// which arrives before its unit is created here with its calls held, so they
    /// run after the relocated ones instead of being erased by the snapshot.
    pub fn join(&self, oracle: &dyn MembershipOracle) {
        let after = self.seed(oracle);
        let mut previous = after.copy();
        previous.exclude_node(self.local_node);
        if previous.is_empty() {
            return;
        }
        self.placement
            .handoffs
            .open(previous, self.config.handoff_timeout);
    }

    fn seed(&self, oracle: &dyn MembershipOracle) -> Arc<HashRing> {
        let nodes = oracle.current_live_nodes();
        let (_, after) = self.placement.ring.update(|ring| {
            for node in nodes {
                ring.include_node(node);
            }
        });
        log::info!(
            "Node {} joined a ring of {} member(s)",
            self.local_node,
            after.len()
        );
        after
    }

    /// Add `node` to the ring and move every locally owned address it now owns
    pub async fn node_joined(&self, node: NodeId) -> RelocationReport {
        if node == self.local_node {
            return RelocationReport::default();
        }
        let (before, after) = self.placement.ring.update(|ring| {
            ring.include_node(node);
        });
        if before.contains(node) {
            log::debug!("Node {node} is already a member");
            return RelocationReport::default();
        }
        log::info!(
            "Node {} saw node {node} join, {} member(s)",
            self.local_node,
            after.len()
        );

        let moves = self
            .placement
            .host
            .hosted()
            .into_iter()
            .filter(|(address, _)| address.is_distributable())
            .filter(|(address, _)| {
                before.node_of(address.id_string()) == Some(self.local_node)
                    && after.node_of(address.id_string()) == Some(node)
            })
            .map(|(address, definition)| (address, definition, node))
            .collect::<Vec<_>>();
        self.relocate_all(moves, Vec::new()).await
    }

    /// Remove `node` from the ring and re-send every un-answered message it holds to
    /// the new owner, in send order. A message is held by the node it was last sent or
    /// redirected to, which need not have been a member of this node's ring
    pub fn node_left(&self, node: NodeId) {
        if node == self.local_node {
            log::warn!("Node {} ignoring its own departure", self.local_node);
            return;
        }
        let (before, after) = self.placement.ring.update(|ring| {
            ring.exclude_node(node);
        });
        self.placement.delivered.forget_node(node);
        self.placement.handoffs.release_from(node);
        if before.contains(node) {
            // adoption only bridges the gap until the departure is seen
            let local_node = self.local_node;
            self.placement
                .adopted
                .retain(|address| after.node_of(address.id_string()) != Some(local_node));
        }

        let stranded = self.registry.take_unacked_for(node);
        if stranded.is_empty() && !before.contains(node) {
            return;
        }
        log::info!(
            "Node {} saw node {node} leave, re-homing {} in-flight message(s)",
            self.local_node,
            stranded.len()
        );
        for (correlation_id, deliver) in stranded {
            self.reroute(&after, correlation_id, deliver);
        }
    }

    fn reroute(&self, ring: &HashRing, correlation_id: CorrelationId, deliver: Deliver) {
        match ring.node_of(deliver.address.id_string()) {
            Some(owner) if owner != self.local_node => {
                self.placement
                    .outbound
                    .resend(owner, correlation_id, deliver)
            }
            Some(_) => {
                let envelope = Envelope {
                    protocol: deliver.protocol,
                    representation: deliver.representation,
                    payload: deliver.payload,
                    reply: self
                        .registry
                        .take_waiter(correlation_id)
                        .map(ReturnChannel::Local),
                };
                if let Err(err) =
                    self.placement
                        .dispatch(&deliver.address, &deliver.definition, envelope)
                {
                    log::warn!("Failed to re-home a message for {}: {err}", deliver.address);
                }
            }
            None => {
                let reason = GridErr::Unroutable(deliver.address).to_string();
                if let Some(waiter) = self.registry.take_waiter(correlation_id) {
                    let _ = waiter.send(Err(reason));
                }
            }
        }
    }

    /// Graceful shutdown: take this node out of the ring and move everything it owns to
    /// the remaining members. When this is the last node nothing moves and the units
    /// are reported as skipped.
    pub async fn relocate_actors(&self) -> RelocationReport {
        let current = self.placement.ring.snapshot();
        let owned = self
            .placement
            .host
            .hosted()
            .into_iter()
            .filter(|(address, _)| address.is_distributable())
            .filter(|(address, _)| {
                current.node_of(address.id_string()) == Some(self.local_node)
                    || self.placement.adopted.contains(address)
            })
            .collect::<Vec<_>>();

        let mut reduced = current.copy();
        reduced.exclude_node(self.local_node);
        if reduced.is_empty() {
            log::warn!(
                "Node {} is the last member, keeping {} unit(s)",
                self.local_node,
                owned.len()
            );
            return RelocationReport {
                skipped: owned.into_iter().map(|(address, _)| address).collect(),
                ..Default::default()
            };
        }

        self.placement.ring.update(|ring| {
            ring.exclude_node(self.local_node);
        });
        let mut moves = Vec::new();
        let mut skipped = Vec::new();
        for (address, definition) in owned {
            match reduced.node_of(address.id_string()) {
                Some(target) => moves.push((address, definition, target)),
                None => skipped.push(address),
            }
        }
        self.relocate_all(moves, skipped).await
    }

    async fn relocate_all(
        &self,
        moves: Vec<(Address, Definition, NodeId)>,
        skipped: Vec<Address>,
    ) -> RelocationReport {
        let attempts = moves.into_iter().map(|(address, definition, target)| async move {
            let result = self
                .coordinator
                .relocate(address.clone(), definition, target)
                .await;
            (address, target, result)
        });
        let results = futures::future::join_all(attempts).await;

        let mut report = RelocationReport {
            skipped,
            ..Default::default()
        };
        for (address, target, result) in results {
            report.record(address, target, result);
        }
        report
    }
}

#[async_trait::async_trait]
impl MembershipListener for Grid {
    async fn on_node_joined(&self, node: NodeId) {
        let report = self.node_joined(node).await;
        for (address, err) in report.failed.iter() {
            log::error!("Unit {address} could not follow its owner to node {node}: {err}");
        }
    }

    async fn on_node_left(&self, node: NodeId) {
        self.node_left(node)
    }

    fn on_quorum_changed(&self, healthy: bool) {
        if healthy {
            self.quorum_achieved()
        } else {
            self.quorum_lost()
        }
    }
}

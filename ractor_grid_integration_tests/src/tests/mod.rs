// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Different test scenarios are defined here, along with the in-process cluster
//! they all run on

use std::collections::BTreeMap;
use std::sync::Arc;

use clap::Parser;
use rand::distributions::Alphanumeric;
use rand::thread_rng;
use rand::Rng;
use ractor_grid::concurrency::{sleep, Duration, Instant, JoinHandle, MpscUnboundedReceiver};
use ractor_grid::membership::StaticMembership;
use ractor_grid::stage::{GridActor, Stage};
use ractor_grid::transport::{spawn_inbound, InMemoryNetwork};
use ractor_grid::{ActorProcessingErr, Address, Definition, Grid, GridConfig, NodeId};
use tokio::sync::Semaphore;


fn random_key(prefix: &str) -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("{prefix}-{suffix}")
}

#[derive(Parser, Debug, Clone)]
pub enum TestCase {
    /// Remote calls are answered exactly once
    RemoteAnswer(remote_answer::RemoteAnswerConfig),
    /// Messages in flight to a departed node reach the new owner
    NodeDeparture(node_departure::NodeDepartureConfig),
    /// Calls queued during a relocation run on the new owner in order
    RelocationOrder(relocation_order::RelocationOrderConfig),
    /// Remote placement waits for quorum
    QuorumGate(quorum_gate::QuorumGateConfig),
    /// Units follow ownership as nodes join and leave gracefully
    Rebalance(rebalance::RebalanceConfig),
    /// Not-a-Node: Don't run any test and exit with code 0
    Nan,
}

/// Run `case`, returning its exit code
pub async fn run(case: TestCase) -> i32 {
    match case {
        TestCase::RemoteAnswer(config) => remote_answer::test(config).await,
        TestCase::NodeDeparture(config) => node_departure::test(config).await,
        TestCase::RelocationOrder(config) => relocation_order::test(config).await,
        TestCase::QuorumGate(config) => quorum_gate::test(config).await,
        TestCase::Rebalance(config) => rebalance::test(config).await,
        TestCase::Nan => 0,
    }
}

/// The unit type every scenario places: an append-only order history.
///
/// `hold` waits on the cluster's gate, `count` and `history` read without recording.
pub(crate) struct Order {
    gate: Arc<Semaphore>,
    history: Vec<String>,
}

pub(crate) fn order() -> Definition {
    Definition::new("order")
}

pub(crate) fn count_of(reply: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = reply.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

#[async_trait::async_trait]
impl GridActor for Order {
    async fn handle(
        &mut self,
        representation: &str,
        _payload: Vec<u8>,
    ) -> Result<Vec<u8>, ActorProcessingErr> {
        match representation {
            "count" => return Ok((self.history.len() as u64).to_be_bytes().to_vec()),
            "history" => return Ok(self.history.join(",").into_bytes()),
            "hold" => {
                let permit = self.gate.acquire().await?;
                permit.forget();
            }
            _ => {}
        }
        self.history.push(representation.to_string());
        Ok((self.history.len() as u64).to_be_bytes().to_vec())
    }

    async fn snapshot(&mut self) -> Result<Vec<u8>, ActorProcessingErr> {
        Ok(self.history.join(",").into_bytes())
    }

    async fn apply_snapshot(&mut self, snapshot: Vec<u8>) -> Result<(), ActorProcessingErr> {
        self.history = String::from_utf8(snapshot)?
            .split(',')
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect();
        Ok(())
    }
}

pub(crate) struct Node {
    pub(crate) grid: Arc<Grid>,
    pub(crate) stage: Arc<Stage>,
    inbound: JoinHandle<()>,
}

/// A set of grids connected over an [InMemoryNetwork]
pub(crate) struct Cluster {
    pub(crate) network: InMemoryNetwork,
    pub(crate) nodes: BTreeMap<NodeId, Node>,
    pub(crate) gate: Arc<Semaphore>,
    config: GridConfig,
}

impl Cluster {
    /// Start grids for `ids` which all know each other and have quorum
    pub(crate) fn start(ids: &[NodeId], config: GridConfig) -> Self {
        let mut cluster = Self {
            network: InMemoryNetwork::new(),
            nodes: BTreeMap::new(),
            gate: Arc::new(Semaphore::new(0)),
            config,
        };
        for id in ids {
            cluster.add_node(*id);
        }
        let membership = StaticMembership::new(ids.iter().copied());
        for node in cluster.nodes.values() {
            node.grid.bootstrap(&membership);
            node.grid.quorum_achieved();
        }
        log::info!("Started a cluster of {} node(s)", ids.len());
        cluster
    }

    /// Start a grid for `id`. Nobody else knows about it yet
    pub(crate) fn add_node(&mut self, id: NodeId) -> Arc<Grid> {
        let stage = Stage::new();
        let gate = self.gate.clone();
        stage.register("order", move |_, _| {
            Ok(Box::new(Order {
                gate: gate.clone(),
                history: Vec::new(),
            }) as Box<dyn GridActor>)
        });
        let grid = Grid::new(id, stage.clone(), self.network.transport(), self.config.clone());
        let inbound = spawn_inbound(grid.clone(), self.network.connect(id));
        self.nodes.insert(
            id,
            Node {
                grid: grid.clone(),
                stage,
                inbound,
            },
        );
        grid
    }

    pub(crate) fn grid(&self, id: NodeId) -> Arc<Grid> {
        self.nodes[&id].grid.clone()
    }

    /// Cut `id` off: it stops processing, but the network still accepts messages for
    /// it. Returns the link those messages pile up on
    pub(crate) fn silence(&mut self, id: NodeId) -> MpscUnboundedReceiver<Vec<u8>> {
        let parked = self.network.connect(id);
        if let Some(node) = self.nodes.get(&id) {
            node.inbound.abort();
        }
        parked
    }

    /// An address whose owner satisfies `accept`
    pub(crate) fn find_address<F>(prefix: &str, accept: F) -> Address
    where
        F: Fn(&Address) -> bool,
    {
        loop {
            let address = Address::from_key(random_key(prefix));
            if accept(&address) {
                return address;
            }
        }
    }
}

/// Poll `check` until it holds or `timeout` elapses
pub(crate) async fn wait_for<F>(check: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    check()
}

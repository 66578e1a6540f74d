// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Tunables for a [crate::Grid] node

use crate::concurrency::Duration;

/// Number of virtual tokens each node places on the ring
pub const DEFAULT_POINTS_PER_NODE: usize = 100;

const DEFAULT_QUORUM_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RELOCATION_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SNAPSHOT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_HANDOFF_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_DUPLICATE_RETENTION_MS: u64 = 60_000;

/// Configuration of a grid node
#[derive(Clone, Debug)]
pub struct GridConfig {
    /// Virtual tokens per node on the [crate::ring::HashRing]
    pub points_per_node: usize,
    /// Upper bound on how long a remote placement waits for quorum. [None] waits
    /// forever
    pub quorum_timeout: Option<Duration>,
    /// How long the old owner waits for the new owner to acknowledge a relocation
    pub relocation_timeout: Duration,
    /// How long the coordinator waits for a suspended unit to hand over its snapshot
    pub snapshot_timeout: Duration,
    /// After joining a running cluster, how long a newly owned address which is not
    /// hosted here waits for its previous owner to relocate it before starting fresh
    pub handoff_timeout: Duration,
    /// How long the `(sender, correlation id)` of an accepted remote delivery is
    /// remembered, so that a copy re-sent after a node departure is not run twice
    pub duplicate_retention: Duration,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            points_per_node: DEFAULT_POINTS_PER_NODE,
            quorum_timeout: Some(Duration::from_millis(DEFAULT_QUORUM_TIMEOUT_MS)),
            relocation_timeout: Duration::from_millis(DEFAULT_RELOCATION_TIMEOUT_MS),
            snapshot_timeout: Duration::from_millis(DEFAULT_SNAPSHOT_TIMEOUT_MS),
            handoff_timeout: Duration::from_millis(DEFAULT_HANDOFF_TIMEOUT_MS),
            duplicate_retention: Duration::from_millis(DEFAULT_DUPLICATE_RETENTION_MS),
        }
    }
}

impl GridConfig {
    /// Set the number of virtual tokens per node. Clamped to at least 1
    pub fn with_points_per_node(mut self, points: usize) -> Self {
        self.points_per_node = points.max(1);
        self
    }

    /// Set (or remove with [None]) the bound on the quorum wait
    pub fn with_quorum_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.quorum_timeout = timeout;
        self
    }

    /// Set the relocation acknowledgement timeout
    pub fn with_relocation_timeout(mut self, timeout: Duration) -> Self {
        self.relocation_timeout = timeout;
        self
    }

    /// Set the snapshot capture timeout
    pub fn with_snapshot_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_timeout = timeout;
        self
    }

    /// Set how long a newly joined node waits for hand-offs
    pub fn with_handoff_timeout(mut self, timeout: Duration) -> Self {
        self.handoff_timeout = timeout;
        self
    }

    /// Set how long accepted deliveries are remembered for duplicate detection
    pub fn with_duplicate_retention(mut self, retention: Duration) -> Self {
        self.duplicate_retention = retention;
        self
    }
}

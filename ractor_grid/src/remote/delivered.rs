// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Duplicate detection for remote deliveries.
//!
//! A caller re-sends its un-answered messages when their holder departs. If the
//! holder had already passed a message on (relayed it, or shipped it with a
//! relocation) the copy that moved and the re-sent one can meet on the same node.
//! Every node remembers the `(sender, correlation id)` of the deliveries it accepted
//! for a while and drops a second copy.

use std::sync::Mutex;

use dashmap::DashMap;

use crate::concurrency::{Duration, Instant};
use crate::{CorrelationId, NodeId};

/// The `(sender, correlation id)` pairs accepted by this node recently
#[derive(Debug)]
pub struct DeliveryLog {
    seen: DashMap<(NodeId, CorrelationId), Instant>,
    retention: Duration,
    last_sweep: Mutex<Instant>,
}

impl DeliveryLog {
    /// Remember accepted deliveries for `retention`
    pub fn new(retention: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            retention,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Record a delivery. Returns [false] if the same delivery was recorded already
    pub fn first_sight(&self, sender: NodeId, correlation_id: CorrelationId) -> bool {
        self.sweep();
        let now = Instant::now();
        match self.seen.insert((sender, correlation_id), now) {
            Some(at) => now.duration_since(at) >= self.retention,
            None => true,
        }
    }

    /// Forget a delivery which was passed on to another node, so a copy re-sent here
    /// later is accepted
    pub fn forget(&self, sender: NodeId, correlation_id: CorrelationId) {
        self.seen.remove(&(sender, correlation_id));
    }

    /// Forget everything `node` sent. A departed node re-sends nothing
    pub fn forget_node(&self, node: NodeId) {
        self.seen.retain(|(sender, _), _| *sender != node);
    }

    /// Number of remembered deliveries
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing is remembered
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn sweep(&self) {
        let now = Instant::now();
        {
            let mut last = match self.last_sweep.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if now.duration_since(*last) < self.retention {
                return;
            }
            *last = now;
        }
        let retention = self.retention;
        self.seen.retain(|_, at| now.duration_since(*at) < retention);
    }
}

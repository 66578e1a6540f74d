// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Correlation bookkeeping for outbound requests

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::concurrency::OneshotSender;
use crate::protocol::{Answer, Deliver};
use crate::{CorrelationId, NodeId, Outcome};

/// A [Deliver] which has been sent but not yet answered
#[derive(Debug, Clone)]
pub struct UnAckMessage {
    /// Where the message was sent
    pub destination: NodeId,
    /// The message, kept so it can be sent again if `destination` leaves
    pub deliver: Deliver,
}

/// Pairs outbound requests with their answers.
///
/// Two maps are kept: callers waiting on a result, keyed by correlation id, and every
/// un-answered [Deliver] with its destination so that in-flight work can be re-homed
/// when a node departs. Both are sharded concurrent maps, inserts and removals from
/// different I/O tasks never contend on a single lock.
#[derive(Debug)]
pub struct CorrelationRegistry {
    next_id: AtomicU64,
    waiters: DashMap<CorrelationId, OneshotSender<Outcome>>,
    unacked: DashMap<CorrelationId, UnAckMessage>,
    matched: AtomicU64,
    unmatched: AtomicU64,
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            waiters: DashMap::new(),
            unacked: DashMap::new(),
            matched: AtomicU64::new(0),
            unmatched: AtomicU64::new(0),
        }
    }

    /// Allocate a fresh correlation id
    pub fn next_id(&self) -> CorrelationId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a caller waiting on `correlation_id`
    pub fn await_answer(&self, correlation_id: CorrelationId, waiter: OneshotSender<Outcome>) {
        self.waiters.insert(correlation_id, waiter);
    }

    /// Record a sent [Deliver] until it is answered
    pub fn track(&self, correlation_id: CorrelationId, destination: NodeId, deliver: Deliver) {
        self.unacked.insert(
            correlation_id,
            UnAckMessage {
                destination,
                deliver,
            },
        );
    }

    /// Apply an incoming [Answer]. Returns [false] (and logs) if nothing was waiting on
    /// its correlation id, which happens for duplicate or late answers.
    ///
    /// A redirect only moves the un-answered [Deliver] to its new holder, the caller
    /// keeps waiting.
    pub fn complete(&self, answer: Answer) -> bool {
        let Answer {
            sender,
            correlation_id,
            outcome,
            redirect,
            ..
        } = answer;
        if let Some(node) = redirect {
            return self.redirect(correlation_id, node);
        }
        let acked = self.unacked.remove(&correlation_id).is_some();
        let waiter = self.waiters.remove(&correlation_id).map(|(_, tx)| tx);
        let waited = waiter.is_some();
        if let Some(tx) = waiter {
            // the caller may have given up already
            let _ = tx.send(outcome);
        }

        if acked || waited {
            self.matched.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            log::warn!(
                "Discarding answer from node {sender} for unknown correlation id {correlation_id}"
            );
            self.unmatched.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Record that the un-answered [Deliver] `correlation_id` is now held by `node`.
    /// Returns [false] if it was answered already
    pub fn redirect(&self, correlation_id: CorrelationId, node: NodeId) -> bool {
        match self.unacked.get_mut(&correlation_id) {
            Some(mut unacked) => {
                log::debug!(
                    "Correlation id {correlation_id} moved from node {} to node {node}",
                    unacked.destination
                );
                unacked.destination = node;
                unacked.deliver.node = node;
                true
            }
            None => false,
        }
    }

    /// Remove the waiter for `correlation_id`, if any
    pub fn take_waiter(&self, correlation_id: CorrelationId) -> Option<OneshotSender<Outcome>> {
        self.waiters.remove(&correlation_id).map(|(_, tx)| tx)
    }

    /// Forget `correlation_id` entirely. A waiting caller observes a closed channel
    pub fn cancel(&self, correlation_id: CorrelationId) {
        self.unacked.remove(&correlation_id);
        self.waiters.remove(&correlation_id);
    }

    /// Remove every un-answered [Deliver] sent to `node`, ordered by correlation id
    /// (which is send order). Waiters are left in place so the messages can be sent
    /// again under the same id.
    pub fn take_unacked_for(&self, node: NodeId) -> Vec<(CorrelationId, Deliver)> {
        let ids = self
            .unacked
            .iter()
            .filter(|entry| entry.destination == node)
            .map(|entry| *entry.key())
            .collect::<Vec<_>>();
        let mut stranded = ids
            .into_iter()
            .filter_map(|id| self.unacked.remove(&id))
            .map(|(id, unacked)| (id, unacked.deliver))
            .collect::<Vec<_>>();
        stranded.sort_by_key(|(id, _)| *id);
        stranded
    }

    /// Number of sent but un-answered [Deliver]s
    pub fn in_flight(&self) -> usize {
        self.unacked.len()
    }

    /// Number of un-answered [Deliver]s currently held by `node`
    pub fn in_flight_to(&self, node: NodeId) -> usize {
        self.unacked
            .iter()
            .filter(|entry| entry.destination == node)
            .count()
    }

    /// Number of callers waiting on an answer
    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }

    /// Answers which completed something
    pub fn matched(&self) -> u64 {
        self.matched.load(Ordering::Relaxed)
    }

    /// Answers which were discarded
    pub fn unmatched(&self) -> u64 {
        self.unmatched.load(Ordering::Relaxed)
    }

    /// Drop all state. Waiting callers observe a closed channel
    pub fn clear(&self) {
        self.unacked.clear();
        self.waiters.clear();
    }
}

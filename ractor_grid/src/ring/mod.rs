// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Consistent hashing of addresses onto nodes.
//!
//! Each node is placed on the ring at `points_per_node` virtual positions derived from
//! `"{node}:{index}"`. A key is owned by the first position at or after the key's own
//! hash, wrapping around at the end of the ring. The positions depend only on the set of
//! member nodes, so two independently built rings with the same membership agree on
//! every lookup regardless of the order nodes were added in.
//!
//! [SharedRing] is the copy shared by every routing call on a node. Membership changes
//! build a new [HashRing] and swap it in; readers hold an [Arc] to whichever version
//! was current when they looked, so a lookup never waits on a rebuild.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hasher;
use std::sync::{Arc, RwLock};

use twox_hash::XxHash64;

use crate::NodeId;


/// A point-in-time consistent hash ring
#[derive(Clone, Debug)]
pub struct HashRing {
    points_per_node: usize,
    nodes: BTreeSet<NodeId>,
    tokens: BTreeMap<u64, NodeId>,
}

/// Hash a key onto the ring's 64-bit space
pub fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(key);
    hasher.finish()
}

impl HashRing {
    /// Create an empty ring
    pub fn new(points_per_node: usize) -> Self {
        Self {
            points_per_node: points_per_node.max(1),
            nodes: BTreeSet::new(),
            tokens: BTreeMap::new(),
        }
    }

    /// Create a ring holding the given members
    pub fn with_nodes<I>(points_per_node: usize, nodes: I) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut ring = Self::new(points_per_node);
        ring.nodes.extend(nodes);
        ring.rebuild();
        ring
    }

    /// The node owning `key`, or [None] when the ring is empty
    pub fn node_of(&self, key: &str) -> Option<NodeId> {
        let hash = hash_key(key.as_bytes());
        // a key landing exactly on a token belongs to that token's node
        self.tokens
            .range(hash..)
            .next()
            .or_else(|| self.tokens.iter().next())
            .map(|(_, node)| *node)
    }

    /// Add a node. Returns [false] if it was already a member
    pub fn include_node(&mut self, node: NodeId) -> bool {
        let added = self.nodes.insert(node);
        if added {
            self.rebuild();
        }
        added
    }

    /// Remove a node. Returns [false] if it was not a member
    pub fn exclude_node(&mut self, node: NodeId) -> bool {
        let removed = self.nodes.remove(&node);
        if removed {
            self.rebuild();
        }
        removed
    }

    /// An independent point-in-time copy, safe to diff against later versions
    pub fn copy(&self) -> HashRing {
        self.clone()
    }

    /// Whether `node` is a member
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// Members in ascending order
    pub fn nodes(&self) -> Vec<NodeId> {
        self.nodes.iter().copied().collect()
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether there are no members
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Virtual tokens per node
    pub fn points_per_node(&self) -> usize {
        self.points_per_node
    }

    fn rebuild(&mut self) {
        self.tokens.clear();
        for node in self.nodes.iter() {
            for index in 0..self.points_per_node {
                let token = hash_key(format!("{node}:{index}").as_bytes());
                // colliding tokens go to the lowest node id so the outcome does not
                // depend on insertion order
                self.tokens
                    .entry(token)
                    .and_modify(|owner| *owner = (*owner).min(*node))
                    .or_insert(*node);
            }
        }
    }
}

/// The node-wide ring, read by every routing call and replaced on membership changes
#[derive(Debug)]
pub struct SharedRing {
    current: RwLock<Arc<HashRing>>,
}

impl SharedRing {
    /// Wrap an initial ring
    pub fn new(ring: HashRing) -> Self {
        Self {
            current: RwLock::new(Arc::new(ring)),
        }
    }

    /// The current version of the ring
    pub fn snapshot(&self) -> Arc<HashRing> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Owner of `key` in the current version
    pub fn node_of(&self, key: &str) -> Option<NodeId> {
        self.snapshot().node_of(key)
    }

    /// Build a new version from the current one and swap it in. Returns the
    /// `(before, after)` pair so callers can diff ownership.
    pub fn update<F>(&self, mutate: F) -> (Arc<HashRing>, Arc<HashRing>)
    where
        F: FnOnce(&mut HashRing),
    {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = guard.clone();
        let mut next = before.copy();
        mutate(&mut next);
        let after = Arc::new(next);
        *guard = after.clone();
        (before, after)
    }
}

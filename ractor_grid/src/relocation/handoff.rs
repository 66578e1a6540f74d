// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Hand-off holds on a node which joined a running cluster.
//!
//! Right after joining, this node owns addresses whose units may still be running on
//! their previous owner, about to be relocated here. A call for such an address which
//! arrives first must not run against fresh state that the relocated snapshot later
//! replaces. Instead the unit is created with its calls held, and they run behind the
//! relocated calls once the snapshot is restored. If nothing arrives within the
//! window, or the previous owner departs, the hold is released and the unit starts
//! fresh.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use crate::concurrency::{self, Duration, Instant};
use crate::mailbox::LocalMailbox;
use crate::ring::HashRing;
use crate::{Address, NodeId};

struct Window {
    previous: Arc<HashRing>,
    deadline: Instant,
}

struct Held {
    from: NodeId,
    mailbox: Arc<LocalMailbox>,
}

/// The hand-off window of one node and the units held in it
#[derive(Default)]
pub(crate) struct Handoffs {
    window: RwLock<Option<Window>>,
    held: Arc<DashMap<Address, Held>>,
}

impl Handoffs {
    /// Expect hand-offs from the owners in `previous` until `timeout` from now
    pub(crate) fn open(&self, previous: HashRing, timeout: Duration) {
        let window = Window {
            previous: Arc::new(previous),
            deadline: Instant::now() + timeout,
        };
        match self.window.write() {
            Ok(mut guard) => *guard = Some(window),
            Err(poisoned) => *poisoned.into_inner() = Some(window),
        }
    }

    /// The node `address` may still be relocated from, and how long to wait for it.
    /// [None] once the window has closed, or if that node is no longer a member of
    /// `ring`
    pub(crate) fn expected_from(
        &self,
        address: &Address,
        ring: &HashRing,
    ) -> Option<(NodeId, Duration)> {
        let guard = match self.window.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window = guard.as_ref()?;
        let left = window.deadline.checked_duration_since(Instant::now())?;
        if left.is_zero() {
            return None;
        }
        let from = window.previous.node_of(address.id_string())?;
        ring.contains(from).then_some((from, left))
    }

    /// Track a unit held for a hand-off from `from`, releasing it after `left`
    pub(crate) fn hold(
        &self,
        address: &Address,
        from: NodeId,
        mailbox: Arc<LocalMailbox>,
        left: Duration,
    ) {
        log::debug!("Holding calls for {address} until node {from} hands it off");
        self.held.insert(
            address.clone(),
            Held {
                from,
                mailbox: mailbox.clone(),
            },
        );
        let held = self.held.clone();
        let address = address.clone();
        concurrency::spawn(async move {
            concurrency::sleep(left).await;
            held.remove_if(&address, |_, entry| Arc::ptr_eq(&entry.mailbox, &mailbox));
            if mailbox.release_handoff() {
                log::warn!(
                    "No hand-off of {address} from node {from} within {}ms, starting it fresh",
                    left.as_millis()
                );
            }
        });
    }

    /// The relocated unit for `address` was restored, its hold is over
    pub(crate) fn arrived(&self, address: &Address) {
        self.held.remove(address);
    }

    /// `node` departed and will hand nothing off. Releases the units held for it and
    /// returns how many there were
    pub(crate) fn release_from(&self, node: NodeId) -> usize {
        let addresses = self
            .held
            .iter()
            .filter(|entry| entry.from == node)
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        let mut released = 0;
        for address in addresses {
            if let Some((_, entry)) = self.held.remove(&address) {
                if entry.mailbox.release_handoff() {
                    released += 1;
                }
            }
        }
        if released > 0 {
            log::info!("Released {released} unit(s) held for node {node}, starting them fresh");
        }
        released
    }

    /// Number of units currently held
    pub(crate) fn held(&self) -> usize {
        self.held.len()
    }
}

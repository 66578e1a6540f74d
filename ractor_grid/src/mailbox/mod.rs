// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Mailboxes.
//!
//! A [LocalMailbox] is the FIFO a hosted unit consumes from. It can be suspended for
//! relocation, in which case only the relocation controls and [Signal::Resume] are
//! handed out and protocol calls stay queued in arrival order. A mailbox created on a
//! node which just took over its address can also start out holding its calls until
//! the previous owner's hand-off arrives, or until the hold is released. A [RoutingMailbox]
//! wraps a [LocalMailbox] and decides per operation, from the current ring, whether
//! the operation runs here or is forwarded to the owning node.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::concurrency::OneshotSender;
use crate::message::{Delivery, Envelope, Signal};
use crate::MessagingErr;

pub mod routing;
pub use routing::{Route, RoutingMailbox};

#[cfg(test)]
mod tests;

/// The operations every mailbox supports, local or routed
#[async_trait::async_trait]
pub trait Mailbox: Send + Sync {
    /// Enqueue a protocol call
    ///
    /// Returns [Err(MessagingErr::SendErr)] with the envelope if the mailbox is closed
    fn send(&self, envelope: Envelope) -> Result<(), MessagingErr<Envelope>>;

    /// Enqueue a lifecycle signal
    fn signal(&self, signal: Signal) -> Result<(), MessagingErr<Signal>>;

    /// Wait for the next deliverable item. [None] once the mailbox is closed
    async fn receive(&self) -> Option<Delivery>;

    /// Close the mailbox. Queued items are dropped and further sends fail
    fn close(&self);

    /// Whether the mailbox is closed
    fn is_closed(&self) -> bool;

    /// Whether the mailbox is suspended for relocation
    fn is_suspended(&self) -> bool;

    /// Hold back protocol calls until [Signal::Resume] arrives
    fn suspend(&self);

    /// Lift a suspension by enqueueing [Signal::Resume]
    fn resume(&self);

    /// Number of queued protocol calls
    fn pending_messages(&self) -> usize;

    /// How many items the consumer processes at once
    fn concurrency_capacity(&self) -> usize;
}

#[derive(Default)]
struct MailboxState {
    queue: VecDeque<Delivery>,
    suspended: bool,
    awaiting_handoff: bool,
    closed: bool,
}

impl MailboxState {
    fn next(&mut self) -> Option<Delivery> {
        loop {
            let index = if self.suspended || self.awaiting_handoff {
                self.queue.iter().position(|d| d.passes_suspension())?
            } else {
                0
            };
            match self.queue.remove(index)? {
                Delivery::Signal(Signal::Resume) => {
                    // consumed by the mailbox, never reaches the unit
                    self.suspended = false;
                }
                delivery => return Some(delivery),
            }
        }
    }
}

/// The node-local FIFO behind a hosted unit
#[derive(Default)]
pub struct LocalMailbox {
    state: Mutex<MailboxState>,
    notify: Notify,
}

impl std::fmt::Debug for LocalMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        write!(
            f,
            "LocalMailbox {{ queued: {}, suspended: {}, awaiting_handoff: {}, closed: {} }}",
            state.queue.len(),
            state.suspended,
            state.awaiting_handoff,
            state.closed
        )
    }
}

impl LocalMailbox {
    /// Create an open, active mailbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an open mailbox which holds protocol calls until a relocated snapshot
    /// is restored into it, or [LocalMailbox::release_handoff] is called
    pub fn awaiting_handoff() -> Self {
        let mailbox = Self::default();
        mailbox.lock().awaiting_handoff = true;
        mailbox
    }

    /// Whether protocol calls are held for a hand-off
    pub fn is_awaiting_handoff(&self) -> bool {
        self.lock().awaiting_handoff
    }

    /// Stop waiting for a hand-off and let held calls run against fresh state. Returns
    /// [true] if the mailbox was still waiting
    pub fn release_handoff(&self) -> bool {
        let released = std::mem::replace(&mut self.lock().awaiting_handoff, false);
        if released {
            self.notify.notify_one();
        }
        released
    }

    /// Whether a [Signal::Stop] is queued
    pub fn stop_requested(&self) -> bool {
        self.lock()
            .queue
            .iter()
            .any(|d| matches!(d, Delivery::Signal(Signal::Stop)))
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Enqueue any delivery at the back of the queue
    pub(crate) fn push(&self, delivery: Delivery) -> Result<(), MessagingErr<Delivery>> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(MessagingErr::SendErr(delivery));
            }
            state.queue.push_back(delivery);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Close the mailbox and hand back the queued protocol calls in arrival order.
    /// Nothing can be enqueued between the drain and the close. Queued signals are
    /// discarded, including a pending [Signal::Stop].
    pub(crate) fn drain_and_close(&self) -> Vec<Envelope> {
        let drained = {
            let mut state = self.lock();
            state.closed = true;
            state
                .queue
                .drain(..)
                .filter_map(|d| match d {
                    Delivery::Message(envelope) => Some(envelope),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };
        self.notify.notify_one();
        drained
    }

    /// Suspend the mailbox and place the snapshot followed by `pending` ahead of
    /// everything already queued, in one step. The unit applies the snapshot while
    /// suspended; the pending calls run after [Signal::Resume]. Ends any wait for a
    /// hand-off.
    pub(crate) fn restore(
        &self,
        snapshot: Vec<u8>,
        pending: Vec<Envelope>,
        applied: OneshotSender<Result<(), String>>,
    ) -> Result<(), MessagingErr<Vec<Envelope>>> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(MessagingErr::SendErr(pending));
            }
            state.suspended = true;
            state.awaiting_handoff = false;
            for envelope in pending.into_iter().rev() {
                state.queue.push_front(Delivery::Message(envelope));
            }
            state
                .queue
                .push_front(Delivery::ApplySnapshot(snapshot, applied));
        }
        self.notify.notify_one();
        Ok(())
    }
}

#[async_trait::async_trait]
impl Mailbox for LocalMailbox {
    fn send(&self, envelope: Envelope) -> Result<(), MessagingErr<Envelope>> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(MessagingErr::SendErr(envelope));
            }
            state.queue.push_back(Delivery::Message(envelope));
        }
        self.notify.notify_one();
        Ok(())
    }

    fn signal(&self, signal: Signal) -> Result<(), MessagingErr<Signal>> {
        self.push(Delivery::Signal(signal)).map_err(|err| err.map(|_| signal))
    }

    async fn receive(&self) -> Option<Delivery> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(delivery) = state.next() {
                    return Some(delivery);
                }
            }
            notified.await;
        }
    }

    fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn is_suspended(&self) -> bool {
        self.lock().suspended
    }

    fn suspend(&self) {
        self.lock().suspended = true;
    }

    fn resume(&self) {
        let _ = self.push(Delivery::Signal(Signal::Resume));
    }

    fn pending_messages(&self) -> usize {
        self.lock().queue.iter().filter(|d| d.is_message()).count()
    }

    fn concurrency_capacity(&self) -> usize {
        1
    }
}

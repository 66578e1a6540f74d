// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Grid error types

use std::fmt::Display;

use crate::concurrency::Duration;
use crate::{Address, NodeId};

/// Represents a unit's internal processing error
pub type ActorProcessingErr = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors constructing a unit on the local host
#[derive(Debug)]
pub enum SpawnErr {
    /// No factory is registered for the definition's type name
    UnknownDefinition(String),
    /// The factory returned an error while building the unit
    StartupFailed(ActorProcessingErr),
}

impl std::error::Error for SpawnErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            Self::StartupFailed(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

impl Display for SpawnErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownDefinition(type_name) => {
                write!(f, "No factory registered for unit type '{type_name}'")
            }
            Self::StartupFailed(err) => {
                if f.alternate() {
                    write!(f, "Unit failed during construction '{err:#}'")
                } else {
                    write!(f, "Unit failed during construction '{err}'")
                }
            }
        }
    }
}

/// A messaging error has occurred
pub enum MessagingErr<T> {
    /// The mailbox you're trying to send to has been closed, either because the unit
    /// stopped or because it was relocated to another node.
    ///
    /// Includes the message which failed to send so the caller can route it again.
    SendErr(T),

    /// The channel you're waiting on has had all the senders dropped
    ChannelClosed,

    /// The message was routed to another node and the network boundary refused it.
    /// Worth retrying once the link or the membership recovers
    Transport(TransportErr),

    /// The message was routed here, but its unit could not be constructed
    Spawn(SpawnErr),
}

impl<T> MessagingErr<T> {
    /// Map any message embedded within the error type. This is primarily useful
    /// for normalizing an error value if the message is not needed.
    pub fn map<F, U>(self, mapper: F) -> MessagingErr<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            MessagingErr::SendErr(err) => MessagingErr::SendErr(mapper(err)),
            MessagingErr::ChannelClosed => MessagingErr::ChannelClosed,
            MessagingErr::Transport(err) => MessagingErr::Transport(err),
            MessagingErr::Spawn(err) => MessagingErr::Spawn(err),
        }
    }

    /// Whether the caller may reasonably retry the same send later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl<T> std::fmt::Debug for MessagingErr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SendErr(_) => write!(f, "SendErr"),
            Self::ChannelClosed => write!(f, "ChannelClosed"),
            Self::Transport(t) => write!(f, "Transport({t:?})"),
            Self::Spawn(s) => write!(f, "Spawn({s:?})"),
        }
    }
}

impl<T> Display for MessagingErr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChannelClosed => {
                write!(f, "Messaging failed because channel is closed")
            }
            Self::SendErr(_) => {
                write!(f, "Messaging failed to enqueue the message, the mailbox is closed")
            }
            Self::Transport(err) => write!(f, "Messaging failed to forward the message: {err}"),
            Self::Spawn(err) => write!(f, "Messaging failed to start the receiving unit: {err}"),
        }
    }
}

impl<T> std::error::Error for MessagingErr<T> {}

/// Errors raised by the network boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportErr {
    /// No link to the given node
    Unreachable(NodeId),
    /// The transport has been shut down
    Closed,
}

impl std::error::Error for TransportErr {}

impl Display for TransportErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable(node) => write!(f, "Node {node} is unreachable"),
            Self::Closed => write!(f, "Transport is closed"),
        }
    }
}

/// Errors moving a unit from one node to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelocationErr {
    /// The address is not hosted on this node
    NotLocal,
    /// The unit could not produce or apply its snapshot
    Snapshot(String),
    /// The new owner refused or failed to reconstruct the unit
    Rejected(String),
    /// The new owner never acknowledged the relocation
    Timeout,
    /// The relocation could not be shipped
    Transport(TransportErr),
}

impl std::error::Error for RelocationErr {}

impl Display for RelocationErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotLocal => write!(f, "Unit is not hosted on this node"),
            Self::Snapshot(reason) => write!(f, "Snapshot failed '{reason}'"),
            Self::Rejected(reason) => write!(f, "New owner rejected the relocation '{reason}'"),
            Self::Timeout => write!(f, "Relocation was not acknowledged in time"),
            Self::Transport(err) => write!(f, "Relocation could not be shipped: {err}"),
        }
    }
}

impl From<TransportErr> for RelocationErr {
    fn from(value: TransportErr) -> Self {
        RelocationErr::Transport(value)
    }
}

/// Error types which can result from grid operations
pub enum GridErr {
    /// A unit could not be constructed
    Spawn(SpawnErr),
    /// A local mailbox refused the message
    Messaging(MessagingErr<()>),
    /// The network boundary refused the message
    Transport(TransportErr),
    /// A relocation failed
    Relocation(RelocationErr),
    /// Quorum was not achieved within the configured bound
    QuorumTimeout(Duration),
    /// The ring has no owner for the address. Retry once membership settles
    Unroutable(Address),
    /// A protocol message could not be encoded or decoded
    Codec(String),
    /// The unit answered with an error
    Remote(String),
    /// A reply was not received in time
    Timeout,
}

impl GridErr {
    /// Whether the caller may reasonably retry the same operation later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unroutable(_) | Self::QuorumTimeout(_) | Self::Transport(_)
        )
    }
}

impl std::fmt::Debug for GridErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(s) => write!(f, "Spawn({s:?})"),
            Self::Messaging(m) => write!(f, "Messaging({m:?})"),
            Self::Transport(t) => write!(f, "Transport({t:?})"),
            Self::Relocation(r) => write!(f, "Relocation({r:?})"),
            Self::QuorumTimeout(d) => write!(f, "QuorumTimeout({d:?})"),
            Self::Unroutable(a) => write!(f, "Unroutable({a})"),
            Self::Codec(c) => write!(f, "Codec({c})"),
            Self::Remote(r) => write!(f, "Remote({r})"),
            Self::Timeout => write!(f, "Timeout"),
        }
    }
}

impl std::error::Error for GridErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            Self::Spawn(inner) => Some(inner),
            Self::Transport(inner) => Some(inner),
            Self::Relocation(inner) => Some(inner),
            _ => None,
        }
    }
}

impl Display for GridErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(spawn_err) => {
                if f.alternate() {
                    write!(f, "{spawn_err:#}")
                } else {
                    write!(f, "{spawn_err}")
                }
            }
            Self::Messaging(messaging_err) => write!(f, "{messaging_err}"),
            Self::Transport(transport_err) => write!(f, "{transport_err}"),
            Self::Relocation(relocation_err) => write!(f, "{relocation_err}"),
            Self::QuorumTimeout(waited) => {
                write!(f, "Cluster quorum not achieved after {}ms", waited.as_millis())
            }
            Self::Unroutable(address) => {
                write!(f, "No owner known for address {address}, retry later")
            }
            Self::Codec(reason) => write!(f, "Codec failure '{reason}'"),
            Self::Remote(reason) => write!(f, "Unit answered with an error '{reason}'"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

impl From<SpawnErr> for GridErr {
    fn from(value: SpawnErr) -> Self {
        GridErr::Spawn(value)
    }
}

impl<T> From<MessagingErr<T>> for GridErr {
    fn from(value: MessagingErr<T>) -> Self {
        match value {
            MessagingErr::Transport(err) => GridErr::Transport(err),
            MessagingErr::Spawn(err) => GridErr::Spawn(err),
            other => GridErr::Messaging(other.map(|_| ())),
        }
    }
}

impl From<TransportErr> for GridErr {
    fn from(value: TransportErr) -> Self {
        GridErr::Transport(value)
    }
}

impl From<RelocationErr> for GridErr {
    fn from(value: RelocationErr) -> Self {
        GridErr::Relocation(value)
    }
}

impl From<prost::DecodeError> for GridErr {
    fn from(value: prost::DecodeError) -> Self {
        GridErr::Codec(value.to_string())
    }
}

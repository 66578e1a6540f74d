// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Remote procedure calls on grid addresses.
//!
//! As with local actors there are 2 kinds of RPCs: `cast` sends an operation without
//! waiting, `call` waits for the unit's answer. Both work the same whether the address
//! is hosted on this node or another one; the [RoutingMailbox] decides per send.
//!
//! ## Examples
//!
//! ```rust
//! use ractor_grid::concurrency::Duration;
//! use ractor_grid::stage::{GridActor, Stage};
//! use ractor_grid::transport::InMemoryNetwork;
//! use ractor_grid::{ActorProcessingErr, Definition, Grid, GridConfig};
//!
//! struct Greeter;
//!
//! #[async_trait::async_trait]
//! impl GridActor for Greeter {
//!     async fn handle(
//!         &mut self,
//!         representation: &str,
//!         payload: Vec<u8>,
//!     ) -> Result<Vec<u8>, ActorProcessingErr> {
//!         match representation {
//!             "greet" => Ok([b"hello ".to_vec(), payload].concat()),
//!             other => Err(From::from(format!("unknown operation {other}"))),
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let stage = Stage::new();
//!     stage.register("greeter", |_, _| Ok(Box::new(Greeter) as Box<dyn GridActor>));
//!     let grid = Grid::new(1, stage, InMemoryNetwork::new().transport(), GridConfig::default());
//!
//!     let greeter = grid
//!         .resolve(grid.address_of("greeter-1"), Definition::new("greeter"))
//!         .await
//!         .expect("Failed to resolve the greeter");
//!
//!     // send a 1-way operation
//!     greeter.cast("greet", b"nobody".to_vec()).expect("Failed to cast");
//!
//!     // wait for the reply, optionally up to a timeout
//!     let reply = greeter
//!         .call("greet", b"world".to_vec(), Some(Duration::from_millis(100)))
//!         .await
//!         .expect("Failed to send the call");
//!     assert_eq!(Ok(b"hello world".to_vec()), reply.unwrap());
//! }
//! ```

use crate::concurrency::{self, Duration, OneshotReceiver};
use crate::mailbox::{Mailbox, RoutingMailbox};
use crate::message::Signal;
use crate::{Address, Envelope, GridErr, Outcome, ReturnChannel};

pub mod call_result;
pub use call_result::CallResult;


/// Sends an operation to the address behind `mailbox` without waiting for it to run
///
/// * `mailbox` - The [RoutingMailbox] of the address
/// * `representation` - The operation to invoke
/// * `payload` - The encoded arguments
///
/// Returns [Ok(())] once the operation is queued locally or handed to the transport
pub fn cast(
    mailbox: &RoutingMailbox,
    representation: impl Into<String>,
    payload: Vec<u8>,
) -> Result<(), GridErr> {
    let envelope = Envelope::cast(
        mailbox.definition().type_name.clone(),
        representation,
        payload,
    );
    mailbox.deliver(envelope)
}

/// Sends an operation to the address behind `mailbox` and awaits the unit's answer
///
/// * `mailbox` - The [RoutingMailbox] of the address
/// * `representation` - The operation to invoke
/// * `payload` - The encoded arguments
/// * `timeout_option` - An optional [Duration] which represents the amount of
///   time until the operation times out
///
/// Returns [Ok(CallResult)] upon successful initial sending with the unit's [Outcome],
/// [Err(GridErr)] if the operation could not be sent at all
pub async fn call(
    mailbox: &RoutingMailbox,
    representation: impl Into<String>,
    payload: Vec<u8>,
    timeout_option: Option<Duration>,
) -> Result<CallResult<Outcome>, GridErr> {
    let (tx, rx) = concurrency::oneshot();
    let envelope = Envelope::call(
        mailbox.definition().type_name.clone(),
        representation,
        payload,
        ReturnChannel::Local(tx),
    );
    mailbox.deliver(envelope)?;
    Ok(await_reply(rx, timeout_option).await)
}

/// Wait for the reply to a call, optionally up to a timeout
pub(crate) async fn await_reply(
    rx: OneshotReceiver<Outcome>,
    timeout_option: Option<Duration>,
) -> CallResult<Outcome> {
    if let Some(duration) = timeout_option {
        match concurrency::timeout(duration, rx).await {
            Ok(Ok(result)) => CallResult::Success(result),
            Ok(Err(_send_err)) => CallResult::SenderError,
            Err(_timeout_err) => CallResult::Timeout,
        }
    } else {
        match rx.await {
            Ok(result) => CallResult::Success(result),
            Err(_send_err) => CallResult::SenderError,
        }
    }
}

/// A handle on a grid address which works the same from any node
#[derive(Clone, Debug)]
pub struct GridRef {
    mailbox: RoutingMailbox,
}

impl GridRef {
    pub(crate) fn new(mailbox: RoutingMailbox) -> Self {
        Self { mailbox }
    }

    /// The address behind this handle
    pub fn address(&self) -> &Address {
        self.mailbox.address()
    }

    /// Whether the address is currently owned by this node
    pub fn is_local(&self) -> bool {
        self.mailbox.is_local()
    }

    /// The underlying [RoutingMailbox]
    pub fn mailbox(&self) -> &RoutingMailbox {
        &self.mailbox
    }

    /// See [cast]
    pub fn cast(&self, representation: impl Into<String>, payload: Vec<u8>) -> Result<(), GridErr> {
        cast(&self.mailbox, representation, payload)
    }

    /// See [call]
    pub async fn call(
        &self,
        representation: impl Into<String>,
        payload: Vec<u8>,
        timeout_option: Option<Duration>,
    ) -> Result<CallResult<Outcome>, GridErr> {
        call(&self.mailbox, representation, payload, timeout_option).await
    }

    /// Stop the unit on this node after the operations already queued for it. Stops a
    /// stale local placeholder when the address is owned elsewhere
    pub fn stop(&self) -> Result<(), GridErr> {
        self.mailbox.signal(Signal::Stop).map_err(GridErr::from)
    }
}

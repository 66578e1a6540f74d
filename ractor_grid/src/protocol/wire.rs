// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Protobuf renderings of the control messages, generated via the [prost] derives

use super::{
    Answer, Deliver, GridMessage, PendingMessage, Relocate, ReturnAddress, Start,
};
use crate::{Address, Definition, GridErr};

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct WireAddress {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(bool, tag = "3")]
    pub distributable: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct WireDefinition {
    #[prost(string, tag = "1")]
    pub type_name: String,
    #[prost(bytes = "vec", tag = "2")]
    pub parameters: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct WireStart {
    #[prost(uint64, tag = "1")]
    pub node: u64,
    #[prost(uint64, tag = "2")]
    pub sender: u64,
    #[prost(string, tag = "3")]
    pub protocol: String,
    #[prost(message, optional, tag = "4")]
    pub address: Option<WireAddress>,
    #[prost(message, optional, tag = "5")]
    pub definition: Option<WireDefinition>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct WireDeliver {
    #[prost(uint64, tag = "1")]
    pub node: u64,
    #[prost(uint64, tag = "2")]
    pub sender: u64,
    #[prost(uint64, tag = "3")]
    pub correlation_id: u64,
    #[prost(bool, tag = "4")]
    pub expects_reply: bool,
    #[prost(string, tag = "5")]
    pub protocol: String,
    #[prost(message, optional, tag = "6")]
    pub address: Option<WireAddress>,
    #[prost(message, optional, tag = "7")]
    pub definition: Option<WireDefinition>,
    #[prost(bytes = "vec", tag = "8")]
    pub payload: Vec<u8>,
    #[prost(string, tag = "9")]
    pub representation: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct WireAnswer {
    #[prost(uint64, tag = "1")]
    pub receiver: u64,
    #[prost(uint64, tag = "2")]
    pub sender: u64,
    #[prost(uint64, tag = "3")]
    pub correlation_id: u64,
    #[prost(oneof = "wire_answer::Outcome", tags = "4, 5")]
    pub outcome: Option<wire_answer::Outcome>,
    #[prost(uint64, optional, tag = "6")]
    pub redirect: Option<u64>,
}

pub(crate) mod wire_answer {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub(crate) enum Outcome {
        #[prost(bytes, tag = "4")]
        Result(Vec<u8>),
        #[prost(string, tag = "5")]
        Error(String),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct WireReturnAddress {
    #[prost(uint64, tag = "1")]
    pub node: u64,
    #[prost(uint64, tag = "2")]
    pub correlation_id: u64,
    #[prost(bool, tag = "3")]
    pub expects_reply: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct WirePendingMessage {
    #[prost(string, tag = "1")]
    pub protocol: String,
    #[prost(string, tag = "2")]
    pub representation: String,
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
    #[prost(message, optional, tag = "4")]
    pub reply: Option<WireReturnAddress>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct WireRelocate {
    #[prost(uint64, tag = "1")]
    pub receiver: u64,
    #[prost(uint64, tag = "2")]
    pub sender: u64,
    #[prost(uint64, tag = "3")]
    pub correlation_id: u64,
    #[prost(message, optional, tag = "4")]
    pub definition: Option<WireDefinition>,
    #[prost(message, optional, tag = "5")]
    pub address: Option<WireAddress>,
    #[prost(bytes = "vec", tag = "6")]
    pub snapshot: Vec<u8>,
    #[prost(message, repeated, tag = "7")]
    pub pending: Vec<WirePendingMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct WireGridMessage {
    #[prost(oneof = "grid_message::Msg", tags = "1, 2, 3, 4")]
    pub msg: Option<grid_message::Msg>,
}

pub(crate) mod grid_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub(crate) enum Msg {
        #[prost(message, tag = "1")]
        Start(super::WireStart),
        #[prost(message, tag = "2")]
        Deliver(super::WireDeliver),
        #[prost(message, tag = "3")]
        Answer(super::WireAnswer),
        #[prost(message, tag = "4")]
        Relocate(super::WireRelocate),
    }
}

fn missing(field: &str) -> GridErr {
    GridErr::Codec(format!("missing field '{field}'"))
}

// ============== Domain -> wire ============== //

impl From<Address> for WireAddress {
    fn from(value: Address) -> Self {
        Self {
            id: value.id_string().to_string(),
            name: value.name().map(str::to_string),
            distributable: value.is_distributable(),
        }
    }
}

impl From<Definition> for WireDefinition {
    fn from(value: Definition) -> Self {
        Self {
            type_name: value.type_name,
            parameters: value.parameters,
        }
    }
}

impl From<ReturnAddress> for WireReturnAddress {
    fn from(value: ReturnAddress) -> Self {
        Self {
            node: value.node,
            correlation_id: value.correlation_id,
            expects_reply: value.expects_reply,
        }
    }
}

impl From<PendingMessage> for WirePendingMessage {
    fn from(value: PendingMessage) -> Self {
        Self {
            protocol: value.protocol,
            representation: value.representation,
            payload: value.payload,
            reply: value.reply.map(Into::into),
        }
    }
}

impl From<GridMessage> for WireGridMessage {
    fn from(value: GridMessage) -> Self {
        let msg = match value {
            GridMessage::Start(start) => grid_message::Msg::Start(WireStart {
                node: start.node,
                sender: start.sender,
                protocol: start.protocol,
                address: Some(start.address.into()),
                definition: Some(start.definition.into()),
            }),
            GridMessage::Deliver(deliver) => grid_message::Msg::Deliver(WireDeliver {
                node: deliver.node,
                sender: deliver.sender,
                correlation_id: deliver.correlation_id,
                expects_reply: deliver.expects_reply,
                protocol: deliver.protocol,
                address: Some(deliver.address.into()),
                definition: Some(deliver.definition.into()),
                payload: deliver.payload,
                representation: deliver.representation,
            }),
            GridMessage::Answer(answer) => grid_message::Msg::Answer(WireAnswer {
                receiver: answer.receiver,
                sender: answer.sender,
                correlation_id: answer.correlation_id,
                outcome: Some(match answer.outcome {
                    Ok(result) => wire_answer::Outcome::Result(result),
                    Err(error) => wire_answer::Outcome::Error(error),
                }),
                redirect: answer.redirect,
            }),
            GridMessage::Relocate(relocate) => grid_message::Msg::Relocate(WireRelocate {
                receiver: relocate.receiver,
                sender: relocate.sender,
                correlation_id: relocate.correlation_id,
                definition: Some(relocate.definition.into()),
                address: Some(relocate.address.into()),
                snapshot: relocate.snapshot,
                pending: relocate.pending.into_iter().map(Into::into).collect(),
            }),
        };
        Self { msg: Some(msg) }
    }
}

// ============== Wire -> domain ============== //

impl From<WireAddress> for Address {
    fn from(value: WireAddress) -> Self {
        Address::from_parts(value.id, value.name, value.distributable)
    }
}

impl From<WireDefinition> for Definition {
    fn from(value: WireDefinition) -> Self {
        Definition::with_parameters(value.type_name, value.parameters)
    }
}

impl From<WireReturnAddress> for ReturnAddress {
    fn from(value: WireReturnAddress) -> Self {
        Self {
            node: value.node,
            correlation_id: value.correlation_id,
            expects_reply: value.expects_reply,
        }
    }
}

impl From<WirePendingMessage> for PendingMessage {
    fn from(value: WirePendingMessage) -> Self {
        Self {
            protocol: value.protocol,
            representation: value.representation,
            payload: value.payload,
            reply: value.reply.map(Into::into),
        }
    }
}

impl TryFrom<WireGridMessage> for GridMessage {
    type Error = GridErr;

    fn try_from(value: WireGridMessage) -> Result<Self, Self::Error> {
        match value.msg.ok_or_else(|| missing("msg"))? {
            grid_message::Msg::Start(start) => Ok(GridMessage::Start(Start {
                node: start.node,
                sender: start.sender,
                protocol: start.protocol,
                address: start.address.ok_or_else(|| missing("address"))?.into(),
                definition: start.definition.ok_or_else(|| missing("definition"))?.into(),
            })),
            grid_message::Msg::Deliver(deliver) => Ok(GridMessage::Deliver(Deliver {
                node: deliver.node,
                sender: deliver.sender,
                correlation_id: deliver.correlation_id,
                expects_reply: deliver.expects_reply,
                protocol: deliver.protocol,
                address: deliver.address.ok_or_else(|| missing("address"))?.into(),
                definition: deliver
                    .definition
                    .ok_or_else(|| missing("definition"))?
                    .into(),
                payload: deliver.payload,
                representation: deliver.representation,
            })),
            grid_message::Msg::Answer(answer) => Ok(GridMessage::Answer(Answer {
                receiver: answer.receiver,
                sender: answer.sender,
                correlation_id: answer.correlation_id,
                outcome: match answer.outcome.ok_or_else(|| missing("outcome"))? {
                    wire_answer::Outcome::Result(result) => Ok(result),
                    wire_answer::Outcome::Error(error) => Err(error),
                },
                redirect: answer.redirect,
            })),
            grid_message::Msg::Relocate(relocate) => Ok(GridMessage::Relocate(Relocate {
                receiver: relocate.receiver,
                sender: relocate.sender,
                correlation_id: relocate.correlation_id,
                definition: relocate
                    .definition
                    .ok_or_else(|| missing("definition"))?
                    .into(),
                address: relocate.address.ok_or_else(|| missing("address"))?.into(),
                snapshot: relocate.snapshot,
                pending: relocate.pending.into_iter().map(Into::into).collect(),
            })),
        }
    }
}

//! Route programming service messages (RIB API-style).
//!
//! GetVersion is a unary probe; Modify is a bidirectional stream of id-tagged
//! requests whose results come back asynchronously, also id-tagged - the
//! engine's correlation map exists for this method. One drained engine batch
//! is merged into a single `ModifyRequest` envelope on the wire; the target
//! answers with `ModifyResponse` messages carrying any number of results, in
//! any order.

use crate::transport::{StreamingMethod, UnaryMethod};
use grpcsh_core::{Error, Transport};
use std::str::FromStr;
use std::sync::Arc;
use tonic::codec::CompressionEncoding;
use tonic::transport::Channel;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VersionRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableVersion {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(uint32, tag = "2")]
    pub version: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VersionResponse {
    #[prost(string, tag = "1")]
    pub api_version: String,
    #[prost(message, repeated, tag = "2")]
    pub operational_tables: Vec<TableVersion>,
}

/// Which route table a request targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum AddressFamily {
    Ipv4 = 0,
    Ipv6 = 1,
}

impl FromStr for AddressFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ipv4" => Ok(Self::Ipv4),
            "ipv6" => Ok(Self::Ipv6),
            other => Err(Error::Configuration {
                reason: format!("unsupported address family <{other}>"),
            }),
        }
    }
}

/// What to do with the addressed entry. Parsed from operator input, so an
/// unknown verb fails before anything is queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOp {
    Add,
    Replace,
    Delete,
}

impl FromStr for RouteOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(Self::Add),
            "replace" => Ok(Self::Replace),
            "delete" => Ok(Self::Delete),
            other => Err(Error::Configuration {
                reason: format!("unsupported operation <{other}>, expected add|replace|delete"),
            }),
        }
    }
}

/// Identity of a route entry: prefix plus ordering preference.
#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct RouteKey {
    #[prost(enumeration = "AddressFamily", tag = "1")]
    pub family: i32,
    #[prost(string, tag = "2")]
    pub prefix: String,
    #[prost(uint32, tag = "3")]
    pub preference: u32,
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct NextHop {
    #[prost(string, tag = "1")]
    pub ip_address: String,
    #[prost(uint32, repeated, tag = "2")]
    pub pushed_label_stack: Vec<u32>,
}

/// Weighted primary/backup next-hop pair attached to a route entry.
#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct NextHopGroup {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(uint32, tag = "2")]
    pub weight: u32,
    #[prost(message, optional, tag = "3")]
    pub primary: Option<NextHop>,
    #[prost(message, optional, tag = "4")]
    pub backup: Option<NextHop>,
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct RouteEntry {
    #[prost(message, optional, tag = "1")]
    pub key: Option<RouteKey>,
    #[prost(uint32, tag = "2")]
    pub rtm_preference: u32,
    #[prost(uint32, tag = "3")]
    pub metric: u32,
    #[prost(string, tag = "4")]
    pub tunnel_next_hop: String,
    #[prost(message, repeated, tag = "5")]
    pub groups: Vec<NextHopGroup>,
}

/// Marks the end of the initial route download for one table.
#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct EndOfRib {
    #[prost(uint32, tag = "1")]
    pub table_id: u32,
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct Request {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(oneof = "request::Operation", tags = "2, 3, 4, 5")]
    pub operation: Option<request::Operation>,
}

pub mod request {
    #[derive(Clone, PartialEq, ::prost::Oneof, serde::Serialize)]
    pub enum Operation {
        #[prost(message, tag = "2")]
        RouteAdd(super::RouteEntry),
        #[prost(message, tag = "3")]
        RouteReplace(super::RouteEntry),
        #[prost(message, tag = "4")]
        RouteDelete(super::RouteKey),
        #[prost(message, tag = "5")]
        EndOfRib(super::EndOfRib),
    }
}

impl Request {
    /// Builds one route operation. Add and replace carry the whole entry;
    /// delete carries only its key.
    pub fn route(id: u64, op: RouteOp, entry: RouteEntry) -> Self {
        let operation = match op {
            RouteOp::Add => request::Operation::RouteAdd(entry),
            RouteOp::Replace => request::Operation::RouteReplace(entry),
            RouteOp::Delete => request::Operation::RouteDelete(entry.key.unwrap_or_default()),
        };
        Self {
            id,
            operation: Some(operation),
        }
    }

    pub fn end_of_rib(id: u64, table_id: u32) -> Self {
        Self {
            id,
            operation: Some(request::Operation::EndOfRib(EndOfRib { table_id })),
        }
    }

    /// Attaches a next-hop group to a queued add or replace entry. Groups
    /// never travel standalone; delete and end-of-rib requests carry no
    /// entry to extend.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when the request's operation has no entry.
    pub fn attach_group(&mut self, group: NextHopGroup) -> Result<(), Error> {
        match &mut self.operation {
            Some(request::Operation::RouteAdd(entry))
            | Some(request::Operation::RouteReplace(entry)) => {
                entry.groups.push(group);
                Ok(())
            }
            _ => Err(Error::Configuration {
                reason: format!("request {} has no route entry to extend", self.id),
            }),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModifyRequest {
    #[prost(message, repeated, tag = "1")]
    pub request: Vec<Request>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ModifyStatus {
    Unset = 0,
    Ok = 1,
    Failed = 2,
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize)]
pub struct ModifyResult {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(enumeration = "ModifyStatus", tag = "2")]
    pub status: i32,
    #[prost(string, tag = "3")]
    pub detail: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModifyResponse {
    #[prost(message, repeated, tag = "1")]
    pub result: Vec<ModifyResult>,
}

/// Splits one inbound response into its id-tagged results, the shape the
/// engine's correlating handler consumes.
pub fn results(response: &ModifyResponse) -> Vec<(u64, ModifyResult)> {
    response
        .result
        .iter()
        .map(|result| (result.id, result.clone()))
        .collect()
}

/// Registry buckets for this service, one per method.
pub const RPC_TYPES: &[&str] = &["version", "modify"];

pub fn version(
    channel: Channel,
    compression: Option<CompressionEncoding>,
) -> Arc<dyn Transport<VersionRequest, VersionResponse>> {
    Arc::new(UnaryMethod::new(
        channel,
        "/ribapi.RibApi/GetVersion",
        compression,
    ))
}

fn merge_batch(batch: Vec<Request>) -> Vec<ModifyRequest> {
    vec![ModifyRequest { request: batch }]
}

/// Modify merges one drained batch into a single request envelope, so all
/// operations queued between two signals travel as one wire message.
pub fn modify(
    channel: Channel,
    compression: Option<CompressionEncoding>,
) -> Arc<dyn Transport<Request, ModifyResponse>> {
    Arc::new(StreamingMethod::new(
        channel,
        "/ribapi.RibApi/Modify",
        compression,
        merge_batch,
    ))
}

//! Telemetry/configuration service messages (gNMI-style), hand-written as
//! prost structs - the message set is small and self-contained enough that
//! build-time codegen would be more machinery than message.
//!
//! Capabilities, Get and Set are unary; Subscribe is a bidirectional stream
//! whose outbound side carries subscription lists and poll markers and whose
//! inbound side carries timestamped notifications (see
//! [`render`](crate::render)).

use crate::transport::{StreamingMethod, UnaryMethod};
use grpcsh_core::{Error, Transport};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tonic::codec::CompressionEncoding;
use tonic::transport::Channel;

/// One element of a hierarchical data path: a name plus optional
/// `key=value` attributes selecting list instances.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PathElem {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(map = "string, string", tag = "2")]
    pub key: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Path {
    #[prost(message, repeated, tag = "1")]
    pub elem: Vec<PathElem>,
}

/// A leaf value. Builders encode structured values as JSON bytes; plain
/// strings ride in `string_val`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TypedValue {
    #[prost(oneof = "typed_value::Value", tags = "1, 2")]
    pub value: Option<typed_value::Value>,
}

pub mod typed_value {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(bytes, tag = "1")]
        JsonVal(Vec<u8>),
        #[prost(string, tag = "2")]
        StringVal(String),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Update {
    #[prost(message, optional, tag = "1")]
    pub path: Option<Path>,
    #[prost(message, optional, tag = "2")]
    pub val: Option<TypedValue>,
}

/// One timestamped batch of changes under a common prefix.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Notification {
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(message, optional, tag = "2")]
    pub prefix: Option<Path>,
    #[prost(message, repeated, tag = "3")]
    pub update: Vec<Update>,
    #[prost(message, repeated, tag = "4")]
    pub delete: Vec<Path>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Encoding {
    Json = 0,
    Bytes = 1,
    Proto = 2,
    Ascii = 3,
    JsonIetf = 4,
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "bytes" => Ok(Self::Bytes),
            "proto" => Ok(Self::Proto),
            "ascii" => Ok(Self::Ascii),
            "json-ietf" => Ok(Self::JsonIetf),
            other => Err(Error::Configuration {
                reason: format!("unsupported encoding <{other}>"),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DataType {
    All = 0,
    Config = 1,
    State = 2,
    Operational = 3,
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "config" => Ok(Self::Config),
            "state" => Ok(Self::State),
            "operational" => Ok(Self::Operational),
            other => Err(Error::Configuration {
                reason: format!("unsupported data type <{other}>"),
            }),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CapabilityRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModelData {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub organization: String,
    #[prost(string, tag = "3")]
    pub version: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CapabilityResponse {
    #[prost(message, repeated, tag = "1")]
    pub supported_models: Vec<ModelData>,
    #[prost(enumeration = "Encoding", repeated, tag = "2")]
    pub supported_encodings: Vec<i32>,
    #[prost(string, tag = "3")]
    pub gnmi_version: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetRequest {
    #[prost(message, optional, tag = "1")]
    pub prefix: Option<Path>,
    #[prost(message, repeated, tag = "2")]
    pub path: Vec<Path>,
    #[prost(enumeration = "DataType", tag = "3")]
    pub data_type: i32,
    #[prost(enumeration = "Encoding", tag = "4")]
    pub encoding: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetResponse {
    #[prost(message, repeated, tag = "1")]
    pub notification: Vec<Notification>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetRequest {
    #[prost(message, optional, tag = "1")]
    pub prefix: Option<Path>,
    #[prost(message, repeated, tag = "2")]
    pub delete: Vec<Path>,
    #[prost(message, repeated, tag = "3")]
    pub replace: Vec<Update>,
    #[prost(message, repeated, tag = "4")]
    pub update: Vec<Update>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum UpdateOp {
    Invalid = 0,
    Delete = 1,
    Replace = 2,
    Update = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateResult {
    #[prost(message, optional, tag = "1")]
    pub path: Option<Path>,
    #[prost(enumeration = "UpdateOp", tag = "2")]
    pub op: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetResponse {
    #[prost(message, optional, tag = "1")]
    pub prefix: Option<Path>,
    #[prost(message, repeated, tag = "2")]
    pub response: Vec<UpdateResult>,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
}

/// How the collector wants a subscription's updates triggered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Trigger {
    TargetDefined = 0,
    OnChange = 1,
    Sample = 2,
}

impl FromStr for Trigger {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "target-defined" => Ok(Self::TargetDefined),
            "on-change" => Ok(Self::OnChange),
            "sample" => Ok(Self::Sample),
            other => Err(Error::Configuration {
                reason: format!("unsupported subscription trigger <{other}>"),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ListMode {
    Stream = 0,
    Once = 1,
    Poll = 2,
}

impl FromStr for ListMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stream" => Ok(Self::Stream),
            "once" => Ok(Self::Once),
            "poll" => Ok(Self::Poll),
            other => Err(Error::Configuration {
                reason: format!("unsupported subscription mode <{other}>"),
            }),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Subscription {
    #[prost(message, optional, tag = "1")]
    pub path: Option<Path>,
    #[prost(enumeration = "Trigger", tag = "2")]
    pub mode: i32,
    #[prost(uint64, tag = "3")]
    pub sample_interval: u64,
    #[prost(bool, tag = "4")]
    pub suppress_redundant: bool,
    #[prost(uint64, tag = "5")]
    pub heartbeat_interval: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscriptionList {
    #[prost(message, optional, tag = "1")]
    pub prefix: Option<Path>,
    #[prost(message, repeated, tag = "2")]
    pub subscription: Vec<Subscription>,
    #[prost(enumeration = "ListMode", tag = "3")]
    pub mode: i32,
    #[prost(enumeration = "Encoding", tag = "4")]
    pub encoding: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Poll {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscribeRequest {
    #[prost(oneof = "subscribe_request::Request", tags = "1, 2")]
    pub request: Option<subscribe_request::Request>,
}

pub mod subscribe_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Request {
        #[prost(message, tag = "1")]
        Subscribe(super::SubscriptionList),
        #[prost(message, tag = "2")]
        Poll(super::Poll),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscribeResponse {
    #[prost(oneof = "subscribe_response::Response", tags = "1, 2")]
    pub response: Option<subscribe_response::Response>,
}

pub mod subscribe_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Response {
        #[prost(message, tag = "1")]
        Update(super::Notification),
        #[prost(bool, tag = "2")]
        SyncResponse(bool),
    }
}

impl Update {
    /// Builds an update carrying a JSON-encoded value.
    pub fn json(path: Path, value: &serde_json::Value) -> grpcsh_core::Result<Self> {
        let json_val = serde_json::to_vec(value).map_err(|e| Error::Configuration {
            reason: format!("value is not encodable as JSON: {e}"),
        })?;
        Ok(Self {
            path: Some(path),
            val: Some(TypedValue {
                value: Some(typed_value::Value::JsonVal(json_val)),
            }),
        })
    }
}

impl SubscribeRequest {
    pub fn subscribe(list: SubscriptionList) -> Self {
        Self {
            request: Some(subscribe_request::Request::Subscribe(list)),
        }
    }

    pub fn poll() -> Self {
        Self {
            request: Some(subscribe_request::Request::Poll(Poll {})),
        }
    }
}

/// Registry buckets for this service, one per method.
pub const RPC_TYPES: &[&str] = &["capabilities", "get", "set", "subscribe"];

pub fn capabilities(
    channel: Channel,
    compression: Option<CompressionEncoding>,
) -> Arc<dyn Transport<CapabilityRequest, CapabilityResponse>> {
    Arc::new(UnaryMethod::new(
        channel,
        "/gnmi.gNMI/Capabilities",
        compression,
    ))
}

pub fn get(
    channel: Channel,
    compression: Option<CompressionEncoding>,
) -> Arc<dyn Transport<GetRequest, GetResponse>> {
    Arc::new(UnaryMethod::new(channel, "/gnmi.gNMI/Get", compression))
}

pub fn set(
    channel: Channel,
    compression: Option<CompressionEncoding>,
) -> Arc<dyn Transport<SetRequest, SetResponse>> {
    Arc::new(UnaryMethod::new(channel, "/gnmi.gNMI/Set", compression))
}

fn one_message_each(batch: Vec<SubscribeRequest>) -> Vec<SubscribeRequest> {
    batch
}

/// Subscribe sends every queued request as its own wire message; a drained
/// batch stays one engine-level unit but is not merged on the wire.
pub fn subscribe(
    channel: Channel,
    compression: Option<CompressionEncoding>,
) -> Arc<dyn Transport<SubscribeRequest, SubscribeResponse>> {
    Arc::new(StreamingMethod::new(
        channel,
        "/gnmi.gNMI/Subscribe",
        compression,
        one_message_each,
    ))
}

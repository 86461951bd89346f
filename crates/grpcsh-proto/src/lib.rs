//! Wire messages and the tonic transport behind the grpcsh call engine.
//!
//! The engine in `grpcsh-core` is agnostic to message shapes; this crate
//! supplies the concrete ones for two device services, plus everything
//! mechanical around them:
//!
//! - [`gnmi`] - telemetry/configuration messages: Capabilities, Get, Set
//!   (unary) and Subscribe (bidirectional streaming).
//! - [`rib`] - route programming: GetVersion (unary) and Modify
//!   (bidirectional streaming with id-tagged requests).
//! - [`path`] - the `node[key=value]` path grammar and YANG-ish value
//!   coercion used by request builders.
//! - [`render`] - walks a subscribe notification into the nested record a
//!   [`NotificationSink`](grpcsh_core::NotificationSink) emits.
//! - [`transport`] - generic unary/streaming method transports over a shared
//!   `tonic` channel, one instance per gRPC method path.

pub mod gnmi;
pub mod path;
pub mod render;
pub mod rib;
pub mod transport;

pub use transport::{StreamingMethod, UnaryMethod};

//! Generic RPC call engine for interactive device clients.
//!
//! This crate turns a sequence of operator-issued "build request" actions
//! into correctly ordered unary or streaming calls against a remote device.
//! Each logical call owns one background worker task; new outbound messages
//! can be appended to an already-open stream, asynchronous responses are
//! correlated back to the requests that produced them, and every call shape
//! exposes the same wait/cancel/error surface.
//!
//! The engine is agnostic to message shapes. It depends on a [`Transport`]
//! only as "a thing that can issue a unary call" or "a thing that can open a
//! duplex stream"; request and response values are opaque. Per-service
//! message construction, channel/TLS setup and the command shell live in the
//! companion crates.
//!
//! ## Modules
//!
//! - [`call`] - the per-RPC state machine and worker lifecycle
//! - [`queue`] - the producer/consumer signal discipline feeding live streams
//! - [`correlate`] - id-keyed request/response pairing for bidirectional calls
//! - [`registry`] - the directory of named calls with guarded destruction
//! - [`sink`] - rendering inbound stream updates into external records
//! - [`handlers`] - stock response handlers (store-last, accumulate, correlate)
//! - [`transport`] - the seam a concrete wire transport implements

pub mod call;
pub mod correlate;
pub mod error;
pub mod handlers;
pub mod queue;
pub mod registry;
pub mod sink;
pub mod transport;

pub use call::{Call, CallShape, CallStatus, ManagedCall};
pub use correlate::{CorrelationMap, Exchange, SharedCorrelation};
pub use error::{Error, Result, TransportError};
pub use handlers::{Collected, ResponseHandler, Stored};
pub use queue::WorkQueue;
pub use registry::CallRegistry;
pub use sink::{Egress, NotificationSink, Record, UpdateType};
pub use transport::{Metadata, StreamPair, Transport};

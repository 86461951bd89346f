//! Error types for the call engine.
//!
//! The taxonomy mirrors how failures surface to an interactive operator:
//!
//! - `Transport`: connectivity loss or remote rejection, captured into the
//!   owning call's state and only observable through inspection.
//! - `Correlation`: a lookup for an id no request was ever recorded under.
//!   Distinct from "requested but not yet answered", which is a successful
//!   lookup with an empty response slot.
//! - `Configuration`: malformed call construction parameters. Raised
//!   synchronously at build time, never from inside a worker.
//! - `NotFound`: registry lookup or destruction of an absent key.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the call engine.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The transport reported a failure while a worker was executing a call.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// No request was ever recorded under this id.
    #[error("no request tracked under id {0}")]
    Correlation(u64),

    /// The call was constructed or driven with invalid parameters.
    #[error("invalid call configuration: {reason}")]
    Configuration { reason: String },

    /// The registry holds no call under this key.
    #[error("no rpc registered under {rpc_type}/{name}")]
    NotFound { rpc_type: String, name: String },
}

/// Failure reported by a [`Transport`](crate::Transport) implementation.
///
/// Workers never let these escape to the caller of `execute`; they are
/// captured into the call's `error` slot and flip its status to `erroneous`.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// The remote end rejected the call with a status code.
    #[error("rpc failed with {code}: {message}")]
    Status { code: String, message: String },

    /// The call was cancelled, locally or by the remote end.
    #[error("call cancelled")]
    Cancelled,

    /// The connection or stream went away.
    #[error("stream closed: {0}")]
    Closed(String),
}

//! The seam between the engine and a concrete wire transport.
//!
//! The engine drives a [`Transport`] through two operations only: issue one
//! unary call, or open one duplex stream. Implementations own the actual
//! connection (a tonic channel, a test stub built from tokio channels) and
//! decide how an engine-level batch maps onto wire messages. The engine never
//! owns or closes the underlying connection; transports are shared immutably
//! by every call in a session.

use crate::error::TransportError;
use core::time::Duration;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Per-call metadata pairs (for example username/password) attached to every
/// outgoing request.
pub type Metadata = Vec<(String, String)>;

/// The two ends of an open duplex stream, as seen by the engine.
///
/// One `outbound` send carries one drained batch in append order; how a batch
/// becomes wire messages (sent individually, or merged into one envelope) is
/// the transport's business. The `inbound` side yields messages strictly in
/// the order the transport produced them, terminated either cleanly (channel
/// closed) or by a single [`TransportError`] item.
pub struct StreamPair<Req, Resp> {
    pub outbound: mpsc::Sender<Vec<Req>>,
    pub inbound: mpsc::Receiver<Result<Resp, TransportError>>,
    /// Cancelling this token is the fire-and-forget "tear the stream down"
    /// request; the transport reports the outcome through `inbound`.
    pub cancel: CancellationToken,
}

/// A thing that can issue a unary call or open a duplex stream.
///
/// Object safe: both operations return boxed futures so calls can hold the
/// transport as `Arc<dyn Transport<_, _>>`. A transport backing only one
/// shape answers the other operation with [`TransportError::Closed`].
pub trait Transport<Req, Resp>: Send + Sync + 'static {
    /// Issues exactly one call and resolves with its response.
    fn call_unary(
        &self,
        request: Req,
        metadata: Metadata,
        timeout: Option<Duration>,
    ) -> BoxFuture<'static, Result<Resp, TransportError>>;

    /// Opens a duplex stream and hands both directions to the caller.
    fn open_stream(
        &self,
        metadata: Metadata,
        timeout: Option<Duration>,
    ) -> BoxFuture<'static, Result<StreamPair<Req, Resp>, TransportError>>;
}

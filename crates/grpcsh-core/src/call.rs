//! The per-RPC state machine and worker lifecycle.
//!
//! One [`Call`] tracks one named RPC instance, unary or streaming. The front
//! end builds messages, appends them to the call's pending buffer, and
//! signals the call's work queue; a worker task (started lazily on the first
//! `execute`) drains the buffer and drives the transport. Streaming calls
//! keep the worker alive between signals: draining moves everything buffered
//! since the last drain as one batch, in append order, then the worker
//! suspends until the next signal. Inbound messages are fed one at a time to
//! the call's swappable response handler.
//!
//! Failures inside a worker never escape to the front end. They are captured
//! into the call's error slot, logged, and flip the status to `erroneous`;
//! callers poll [`Call::status`] and [`Call::last_error`] after a
//! non-blocking `execute`, or bound their patience with [`Call::wait`].

use crate::error::{Error, TransportError};
use crate::handlers::ResponseHandler;
use crate::queue::WorkQueue;
use crate::transport::{Metadata, StreamPair, Transport};
use core::time::Duration;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Whether the call is a single request/response exchange or an open-ended
/// stream. Fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallShape {
    Unary,
    Streaming,
}

impl core::fmt::Display for CallShape {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unary => f.write_str("unary"),
            Self::Streaming => f.write_str("streaming"),
        }
    }
}

/// Lifecycle of the call's current worker generation.
///
/// `Finished` and `Erroneous` are terminal for that generation; a later
/// `execute` may start a fresh one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallStatus {
    Init,
    Running,
    Processing,
    Waiting,
    Finished,
    Erroneous,
}

impl core::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Processing => "processing",
            Self::Waiting => "waiting",
            Self::Finished => "finished",
            Self::Erroneous => "erroneous",
        };
        f.write_str(s)
    }
}

/// Invoked at drain time for every id-tagged request about to be sent,
/// before the batch reaches the transport. This is where correlated calls
/// record outgoing requests.
pub type DrainHook<Req> = Box<dyn FnMut(u64, &Req) + Send + 'static>;

/// Invoked by [`Call::clear`] to reset whatever response state the installed
/// handler accumulated (a stored last response, a correlation map).
pub type ClearHook = Box<dyn FnMut() + Send + 'static>;

struct Shared<Req, Resp> {
    rpc_type: String,
    name: String,
    shape: CallShape,
    metadata: Metadata,
    transport: Arc<dyn Transport<Req, Resp>>,
    status: Mutex<CallStatus>,
    pending: Mutex<Vec<(Option<u64>, Req)>>,
    queue: WorkQueue,
    error: Mutex<Option<Error>>,
    handler: Mutex<ResponseHandler<Resp>>,
    drain_hook: Mutex<Option<DrainHook<Req>>>,
    clear_hook: Mutex<Option<ClearHook>>,
    /// Present iff a worker is actively executing on the transport.
    handle: Mutex<Option<CancellationToken>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    ids: AtomicU64,
}

impl<Req, Resp> Shared<Req, Resp> {
    fn set_status(&self, status: CallStatus) {
        *self.status.lock() = status;
    }

    fn fail(&self, error: TransportError) {
        tracing::error!(
            rpc_type = %self.rpc_type,
            name = %self.name,
            "rpc worker failed: {error}"
        );
        *self.error.lock() = Some(Error::Transport(error));
        self.set_status(CallStatus::Erroneous);
    }
}

/// One logical RPC instance tracked by the engine.
///
/// Cheap to clone; clones share all state. A call is usually also registered
/// in a [`CallRegistry`](crate::CallRegistry) as an `Arc<dyn ManagedCall>`.
pub struct Call<Req, Resp> {
    shared: Arc<Shared<Req, Resp>>,
}

impl<Req, Resp> Clone for Call<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<Req, Resp> Call<Req, Resp>
where
    Req: Clone + Send + 'static,
    Resp: Send + 'static,
{
    pub fn new(
        rpc_type: impl Into<String>,
        name: impl Into<String>,
        shape: CallShape,
        transport: Arc<dyn Transport<Req, Resp>>,
        metadata: Metadata,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                rpc_type: rpc_type.into(),
                name: name.into(),
                shape,
                metadata,
                transport,
                status: Mutex::new(CallStatus::Init),
                pending: Mutex::new(Vec::new()),
                queue: WorkQueue::new(),
                error: Mutex::new(None),
                handler: Mutex::new(Box::new(|_resp| {
                    tracing::trace!("discarding response: no handler installed");
                })),
                drain_hook: Mutex::new(None),
                clear_hook: Mutex::new(None),
                handle: Mutex::new(None),
                worker: Mutex::new(None),
                ids: AtomicU64::new(0),
            }),
        }
    }

    /// Replaces the response handler. Takes effect for the next inbound
    /// message.
    pub fn set_response_handler(&self, handler: ResponseHandler<Resp>) {
        *self.shared.handler.lock() = handler;
    }

    pub fn set_drain_hook(&self, hook: DrainHook<Req>) {
        *self.shared.drain_hook.lock() = Some(hook);
    }

    pub fn set_clear_hook(&self, hook: ClearHook) {
        *self.shared.clear_hook.lock() = Some(hook);
    }

    /// Appends an untagged message to the pending buffer.
    pub fn push(&self, request: Req) {
        self.shared.pending.lock().push((None, request));
    }

    /// Replaces the whole pending buffer with this single untagged message.
    /// Builders that rebuild one request on every mutation use this instead
    /// of [`Call::push`].
    pub fn set_request(&self, request: Req) {
        let mut pending = self.shared.pending.lock();
        pending.clear();
        pending.push((None, request));
    }

    /// Appends an id-tagged message, assigning the next unused id when the
    /// caller did not supply one. Returns the id used.
    pub fn push_tagged(&self, id: Option<u64>, request: Req) -> u64 {
        let id = match id {
            Some(id) => {
                // Keep assignment monotonic past caller-supplied ids.
                self.shared.ids.fetch_max(id, Ordering::SeqCst);
                id
            }
            None => self.shared.ids.fetch_add(1, Ordering::SeqCst) + 1,
        };
        self.shared.pending.lock().push((Some(id), request));
        id
    }

    /// Rewrites a pending id-tagged message in place. Only messages still in
    /// the buffer are reachable; a request already drained to the transport
    /// cannot be changed.
    ///
    /// # Errors
    ///
    /// [`Error::Correlation`] when no pending message carries `id`; otherwise
    /// whatever `mutate` returns.
    pub fn update_tagged(
        &self,
        id: u64,
        mutate: impl FnOnce(&mut Req) -> crate::Result<()>,
    ) -> crate::Result<()> {
        let mut pending = self.shared.pending.lock();
        match pending.iter_mut().find(|(tag, _)| *tag == Some(id)) {
            Some((_, request)) => mutate(request),
            None => Err(Error::Correlation(id)),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Signals the work queue and makes sure a worker is there to observe it.
    ///
    /// A streaming call with a live worker only gets the signal; the worker
    /// drains on its own schedule. A unary call, or a streaming call whose
    /// previous worker terminated, gets a fresh worker. `timeout` bounds the
    /// transport call the worker issues, not this method, which never blocks.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when a unary call is executed with nothing
    /// built, or while its previous worker is still running (calls do not
    /// support concurrent duplicate workers).
    pub fn execute(&self, timeout: Option<Duration>) -> crate::Result<()> {
        let shared = &self.shared;
        let mut worker = shared.worker.lock();
        let live = worker.as_ref().is_some_and(|w| !w.is_finished());

        if live {
            match shared.shape {
                CallShape::Streaming => {
                    shared.queue.signal();
                    return Ok(());
                }
                CallShape::Unary => {
                    return Err(Error::Configuration {
                        reason: format!(
                            "unary rpc {}/{} is still running",
                            shared.rpc_type, shared.name
                        ),
                    });
                }
            }
        }

        if shared.shape == CallShape::Unary && shared.pending.lock().is_empty() {
            return Err(Error::Configuration {
                reason: format!(
                    "unary rpc {}/{} has no request built",
                    shared.rpc_type, shared.name
                ),
            });
        }

        shared.queue.signal();
        shared.set_status(CallStatus::Running);
        let token = CancellationToken::new();
        *shared.handle.lock() = Some(token.clone());

        let task = match shared.shape {
            CallShape::Unary => tokio::spawn(run_unary(Arc::clone(shared), timeout, token)),
            CallShape::Streaming => tokio::spawn(run_streaming(Arc::clone(shared), timeout, token)),
        };
        *worker = Some(task);
        Ok(())
    }

    /// Best-effort, fire-and-forget cancellation. A no-op without a live
    /// handle; the worker observes the cancellation in its own loop.
    pub fn cancel(&self) {
        if let Some(token) = self.shared.handle.lock().as_ref() {
            token.cancel();
        }
    }

    pub fn has_live_handle(&self) -> bool {
        self.shared.handle.lock().is_some()
    }

    /// Bounded join: returns once the work queue reports no unfinished units
    /// or after `timeout`, whichever comes first. Says nothing about success;
    /// inspect [`Call::status`] and [`Call::last_error`] separately.
    pub async fn wait(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.shared.queue.join()).await;
    }

    pub fn status(&self) -> CallStatus {
        *self.shared.status.lock()
    }

    pub fn last_error(&self) -> Option<Error> {
        self.shared.error.lock().clone()
    }

    /// Signalled units not yet acknowledged by the worker.
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.unfinished()
    }

    /// Resets accumulated request/response state without touching the status
    /// or the worker.
    pub fn clear(&self) {
        self.shared.pending.lock().clear();
        *self.shared.error.lock() = None;
        if let Some(hook) = self.shared.clear_hook.lock().as_mut() {
            hook();
        }
    }

    pub fn rpc_type(&self) -> &str {
        &self.shared.rpc_type
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn shape(&self) -> CallShape {
        self.shared.shape
    }
}

/// Drains the pending buffer, running the drain hook for tagged entries, and
/// returns the batch in append order.
fn drain<Req, Resp>(shared: &Shared<Req, Resp>) -> Vec<Req> {
    let drained: Vec<(Option<u64>, Req)> = {
        let mut pending = shared.pending.lock();
        pending.drain(..).collect()
    };
    if let Some(hook) = shared.drain_hook.lock().as_mut() {
        for (id, request) in &drained {
            if let Some(id) = id {
                hook(*id, request);
            }
        }
    }
    drained.into_iter().map(|(_, request)| request).collect()
}

async fn run_unary<Req, Resp>(
    shared: Arc<Shared<Req, Resp>>,
    timeout: Option<Duration>,
    token: CancellationToken,
) where
    Req: Clone + Send + 'static,
    Resp: Send + 'static,
{
    // The most recently built request wins; execute() guarantees there is one.
    let request = drain(&shared).pop();
    match request {
        Some(request) => {
            shared.set_status(CallStatus::Processing);
            let result = tokio::select! {
                () = token.cancelled() => Err(TransportError::Cancelled),
                result = shared
                    .transport
                    .call_unary(request, shared.metadata.clone(), timeout) => result,
            };
            match result {
                Ok(response) => {
                    let mut handler = shared.handler.lock();
                    (*handler)(response);
                    drop(handler);
                    shared.set_status(CallStatus::Finished);
                }
                Err(e) => shared.fail(e),
            }
        }
        None => {
            *shared.error.lock() = Some(Error::Configuration {
                reason: "no request built".into(),
            });
            shared.set_status(CallStatus::Erroneous);
        }
    }
    shared.queue.task_done();
    *shared.handle.lock() = None;
}

async fn run_streaming<Req, Resp>(
    shared: Arc<Shared<Req, Resp>>,
    timeout: Option<Duration>,
    token: CancellationToken,
) where
    Req: Clone + Send + 'static,
    Resp: Send + 'static,
{
    let pair = match shared
        .transport
        .open_stream(shared.metadata.clone(), timeout)
        .await
    {
        Ok(pair) => pair,
        Err(e) => {
            shared.fail(e);
            shared.queue.reset();
            *shared.handle.lock() = None;
            return;
        }
    };
    let StreamPair {
        outbound,
        mut inbound,
        cancel: stream_token,
    } = pair;

    // Propagate an engine-side cancel to the transport. The linking task ends
    // when the worker cancels the engine token during cleanup.
    tokio::spawn({
        let token = token.clone();
        let stream_token = stream_token.clone();
        async move {
            token.cancelled().await;
            stream_token.cancel();
        }
    });

    let pump = tokio::spawn(outbound_pump(Arc::clone(&shared), outbound, token.clone()));

    // Inbound side: deliver messages in transport order until the stream ends
    // cleanly, errors out, or is cancelled.
    let mut failed = false;
    loop {
        tokio::select! {
            () = token.cancelled() => {
                shared.fail(TransportError::Cancelled);
                failed = true;
                break;
            }
            message = inbound.recv() => match message {
                Some(Ok(response)) => {
                    shared.set_status(CallStatus::Processing);
                    {
                        let mut handler = shared.handler.lock();
                        (*handler)(response);
                    }
                    shared.set_status(CallStatus::Waiting);
                }
                Some(Err(e)) => {
                    shared.fail(e);
                    failed = true;
                    break;
                }
                None => break,
            }
        }
    }
    if !failed {
        shared.set_status(CallStatus::Finished);
    }

    token.cancel();
    let _ = pump.await;
    shared.queue.reset();
    *shared.handle.lock() = None;
}

/// Outbound side of a streaming worker: one signal, one atomic drain, one
/// batch on the wire. Runs until cancellation or until the stream is torn
/// down under it.
async fn outbound_pump<Req, Resp>(
    shared: Arc<Shared<Req, Resp>>,
    outbound: tokio::sync::mpsc::Sender<Vec<Req>>,
    token: CancellationToken,
) where
    Req: Clone + Send + 'static,
    Resp: Send + 'static,
{
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            () = shared.queue.acquire() => {}
        }
        shared.set_status(CallStatus::Processing);
        let batch = drain(&shared);
        if !batch.is_empty() && outbound.send(batch).await.is_err() {
            // Stream torn down under us; the inbound side reports the error.
            shared.queue.task_done();
            break;
        }
        shared.queue.task_done();
        shared.set_status(CallStatus::Waiting);
    }
}

/// Capability surface every call variant offers regardless of its message
/// types, so registries and the command shell can manage calls uniformly.
pub trait ManagedCall: Send + Sync {
    fn rpc_type(&self) -> &str;
    fn name(&self) -> &str;
    fn shape(&self) -> CallShape;
    fn status(&self) -> CallStatus;
    /// Signals the work queue and makes sure a worker observes it.
    fn execute(&self, timeout: Option<Duration>) -> crate::Result<()>;
    /// True iff a worker is actively executing on the transport.
    fn has_live_handle(&self) -> bool;
    /// Best-effort cancellation; never blocks, never fails.
    fn cancel(&self);
    fn pending_tasks(&self) -> usize;
    fn last_error(&self) -> Option<Error>;
    fn clear(&self);
    /// Bounded join on the call's work queue.
    fn wait(&self, timeout: Duration) -> BoxFuture<'_, ()>;
    /// One-line human summary for directory listings.
    fn describe(&self) -> String;
    /// Escape hatch for typed access through `Arc<dyn ManagedCall>`.
    fn as_any(&self) -> &dyn Any;
}

impl<Req, Resp> ManagedCall for Call<Req, Resp>
where
    Req: Clone + Send + 'static,
    Resp: Send + 'static,
{
    fn rpc_type(&self) -> &str {
        Call::rpc_type(self)
    }

    fn name(&self) -> &str {
        Call::name(self)
    }

    fn shape(&self) -> CallShape {
        Call::shape(self)
    }

    fn status(&self) -> CallStatus {
        Call::status(self)
    }

    fn execute(&self, timeout: Option<Duration>) -> crate::Result<()> {
        Call::execute(self, timeout)
    }

    fn has_live_handle(&self) -> bool {
        Call::has_live_handle(self)
    }

    fn cancel(&self) {
        Call::cancel(self);
    }

    fn pending_tasks(&self) -> usize {
        Call::pending_tasks(self)
    }

    fn last_error(&self) -> Option<Error> {
        Call::last_error(self)
    }

    fn clear(&self) {
        Call::clear(self);
    }

    fn wait(&self, timeout: Duration) -> BoxFuture<'_, ()> {
        Box::pin(Call::wait(self, timeout))
    }

    fn describe(&self) -> String {
        let error = match self.last_error() {
            Some(e) => e.to_string(),
            None => "none".to_string(),
        };
        format!(
            "{}/{} [{}] status: {}, pending requests: {}, unfinished tasks: {}, error: {}",
            self.rpc_type(),
            self.name(),
            self.shape(),
            self.status(),
            self.pending_len(),
            self.pending_tasks(),
            error
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    /// Unary stub that records requests and replies with a canned result.
    struct UnaryStub {
        response: Result<String, TransportError>,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl Transport<String, String> for UnaryStub {
        fn call_unary(
            &self,
            request: String,
            _metadata: Metadata,
            _timeout: Option<Duration>,
        ) -> BoxFuture<'static, Result<String, TransportError>> {
            self.requests.lock().push(request);
            let response = self.response.clone();
            async move { response }.boxed()
        }

        fn open_stream(
            &self,
            _metadata: Metadata,
            _timeout: Option<Duration>,
        ) -> BoxFuture<'static, Result<StreamPair<String, String>, TransportError>> {
            async { Err(TransportError::Closed("unary-only stub".into())) }.boxed()
        }
    }

    /// Unary stub whose call never resolves until cancelled.
    struct HangingUnaryStub;

    impl Transport<String, String> for HangingUnaryStub {
        fn call_unary(
            &self,
            _request: String,
            _metadata: Metadata,
            _timeout: Option<Duration>,
        ) -> BoxFuture<'static, Result<String, TransportError>> {
            futures::future::pending().boxed()
        }

        fn open_stream(
            &self,
            _metadata: Metadata,
            _timeout: Option<Duration>,
        ) -> BoxFuture<'static, Result<StreamPair<String, String>, TransportError>> {
            async { Err(TransportError::Closed("unary-only stub".into())) }.boxed()
        }
    }

    /// Streaming stub recording every batch it is handed.
    struct StreamStub {
        batches: Arc<Mutex<Vec<Vec<String>>>>,
        opens: Arc<AtomicUsize>,
        inject: Arc<Mutex<Option<mpsc::Sender<Result<String, TransportError>>>>>,
    }

    impl StreamStub {
        fn new() -> Self {
            Self {
                batches: Arc::new(Mutex::new(Vec::new())),
                opens: Arc::new(AtomicUsize::new(0)),
                inject: Arc::new(Mutex::new(None)),
            }
        }
    }

    impl Transport<String, String> for StreamStub {
        fn call_unary(
            &self,
            _request: String,
            _metadata: Metadata,
            _timeout: Option<Duration>,
        ) -> BoxFuture<'static, Result<String, TransportError>> {
            async { Err(TransportError::Closed("streaming-only stub".into())) }.boxed()
        }

        fn open_stream(
            &self,
            _metadata: Metadata,
            _timeout: Option<Duration>,
        ) -> BoxFuture<'static, Result<StreamPair<String, String>, TransportError>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let batches = Arc::clone(&self.batches);
            let (outbound, mut batch_rx) = mpsc::channel::<Vec<String>>(8);
            let (in_tx, inbound) = mpsc::channel(8);
            *self.inject.lock() = Some(in_tx);
            let cancel = CancellationToken::new();
            let sink_token = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = sink_token.cancelled() => break,
                        batch = batch_rx.recv() => match batch {
                            Some(batch) => batches.lock().push(batch),
                            None => break,
                        }
                    }
                }
            });
            let pair = StreamPair {
                outbound,
                inbound,
                cancel,
            };
            async move { Ok(pair) }.boxed()
        }
    }

    /// Streaming stub whose open never resolves, so the queue never drains.
    struct StuckStreamStub;

    impl Transport<String, String> for StuckStreamStub {
        fn call_unary(
            &self,
            _request: String,
            _metadata: Metadata,
            _timeout: Option<Duration>,
        ) -> BoxFuture<'static, Result<String, TransportError>> {
            async { Err(TransportError::Closed("streaming-only stub".into())) }.boxed()
        }

        fn open_stream(
            &self,
            _metadata: Metadata,
            _timeout: Option<Duration>,
        ) -> BoxFuture<'static, Result<StreamPair<String, String>, TransportError>> {
            futures::future::pending().boxed()
        }
    }

    async fn settle<F: Fn() -> bool>(cond: F) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 1s");
    }

    #[tokio::test]
    async fn unary_call_runs_to_finished() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let stub = Arc::new(UnaryStub {
            response: Ok("pong".into()),
            requests: Arc::clone(&requests),
        });
        let call: Call<String, String> =
            Call::new("test", "u1", CallShape::Unary, stub, Vec::new());
        let (handler, last) = handlers::store_last();
        call.set_response_handler(handler);

        call.push("ping".into());
        call.execute(None).expect("execute should not fail");
        call.wait(Duration::from_secs(1)).await;

        assert_eq!(*requests.lock(), vec!["ping".to_string()]);
        assert_eq!(*last.lock(), Some("pong".to_string()));
        assert_eq!(call.status(), CallStatus::Finished);
        assert_eq!(call.pending_tasks(), 0);
        settle(|| !call.has_live_handle()).await;
    }

    #[tokio::test]
    async fn unary_transport_error_is_captured_not_thrown() {
        let stub = Arc::new(UnaryStub {
            response: Err(TransportError::Status {
                code: "Unavailable".into(),
                message: "connection refused".into(),
            }),
            requests: Arc::new(Mutex::new(Vec::new())),
        });
        let call: Call<String, String> =
            Call::new("test", "u2", CallShape::Unary, stub, Vec::new());
        call.push("ping".into());
        call.execute(None).expect("failures surface via status only");
        call.wait(Duration::from_secs(1)).await;

        assert_eq!(call.status(), CallStatus::Erroneous);
        assert!(matches!(call.last_error(), Some(Error::Transport(_))));
    }

    #[tokio::test]
    async fn unary_with_nothing_built_fails_fast() {
        let stub = Arc::new(UnaryStub {
            response: Ok("pong".into()),
            requests: Arc::new(Mutex::new(Vec::new())),
        });
        let call: Call<String, String> =
            Call::new("test", "u3", CallShape::Unary, stub, Vec::new());
        assert!(matches!(
            call.execute(None),
            Err(Error::Configuration { .. })
        ));
        assert_eq!(call.status(), CallStatus::Init);
    }

    #[tokio::test]
    async fn unary_refuses_concurrent_duplicate_worker() {
        let call: Call<String, String> = Call::new(
            "test",
            "u4",
            CallShape::Unary,
            Arc::new(HangingUnaryStub),
            Vec::new(),
        );
        call.push("ping".into());
        call.execute(None).expect("first execute spawns");
        call.push("ping-again".into());
        assert!(matches!(
            call.execute(None),
            Err(Error::Configuration { .. })
        ));

        // Cancellation is observed as a transport error by the worker itself.
        call.cancel();
        settle(|| call.status() == CallStatus::Erroneous).await;
        assert_eq!(
            call.last_error(),
            Some(Error::Transport(TransportError::Cancelled))
        );
    }

    #[tokio::test]
    async fn streaming_batches_by_signal_in_append_order() {
        let stub = Arc::new(StreamStub::new());
        let batches = Arc::clone(&stub.batches);
        let opens = Arc::clone(&stub.opens);
        let call: Call<String, String> =
            Call::new("test", "s1", CallShape::Streaming, stub, Vec::new());

        call.push("a".into());
        call.push("b".into());
        call.push("c".into());
        call.execute(None).expect("execute should not fail");
        call.wait(Duration::from_secs(1)).await;
        settle(|| batches.lock().len() == 1).await;
        assert_eq!(*batches.lock(), vec![vec!["a", "b", "c"]]);

        // Two more appended before anything is acknowledged downstream: one
        // second batch of exactly two, never five and never split further.
        call.push("d".into());
        call.push("e".into());
        call.execute(None).expect("execute should not fail");
        call.wait(Duration::from_secs(1)).await;
        settle(|| batches.lock().len() == 2).await;
        assert_eq!(
            *batches.lock(),
            vec![vec!["a", "b", "c"], vec!["d", "e"]]
        );
        assert_eq!(opens.load(Ordering::SeqCst), 1, "one worker, one stream");
    }

    #[tokio::test]
    async fn streaming_execute_twice_spawns_one_worker() {
        let stub = Arc::new(StreamStub::new());
        let opens = Arc::clone(&stub.opens);
        let call: Call<String, String> =
            Call::new("test", "s2", CallShape::Streaming, stub, Vec::new());
        call.execute(None).expect("execute should not fail");
        call.execute(None).expect("execute should not fail");
        call.wait(Duration::from_secs(1)).await;
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn streaming_delivers_inbound_in_order() {
        let stub = Arc::new(StreamStub::new());
        let inject = Arc::clone(&stub.inject);
        let call: Call<String, String> =
            Call::new("test", "s3", CallShape::Streaming, stub, Vec::new());
        let (handler, seen) = handlers::accumulate();
        call.set_response_handler(handler);

        call.push("sub".into());
        call.execute(None).expect("execute should not fail");
        call.wait(Duration::from_secs(1)).await;

        let tx = inject.lock().clone().expect("stream is open");
        tx.send(Ok("n1".into())).await.expect("inbound open");
        tx.send(Ok("n2".into())).await.expect("inbound open");
        settle(|| seen.lock().len() == 2).await;
        assert_eq!(*seen.lock(), vec!["n1".to_string(), "n2".to_string()]);
        assert_eq!(call.status(), CallStatus::Waiting);

        // Clean end of stream finishes the worker.
        drop(tx);
        inject.lock().take();
        settle(|| call.status() == CallStatus::Finished).await;
        settle(|| !call.has_live_handle()).await;
    }

    #[tokio::test]
    async fn cancel_tears_down_a_streaming_worker() {
        let stub = Arc::new(StreamStub::new());
        let call: Call<String, String> =
            Call::new("test", "s4", CallShape::Streaming, stub, Vec::new());
        call.push("sub".into());
        call.execute(None).expect("execute should not fail");
        call.wait(Duration::from_secs(1)).await;

        call.cancel();
        settle(|| call.status() == CallStatus::Erroneous).await;
        settle(|| !call.has_live_handle()).await;

        // A fresh execute on the terminated call spawns a new generation.
        call.push("sub".into());
        call.execute(None).expect("execute should not fail");
        settle(|| call.has_live_handle()).await;
    }

    #[tokio::test]
    async fn cancel_without_live_handle_is_a_noop() {
        let stub = Arc::new(StreamStub::new());
        let call: Call<String, String> =
            Call::new("test", "s5", CallShape::Streaming, stub, Vec::new());
        assert!(!call.has_live_handle());
        call.cancel();
        assert_eq!(call.status(), CallStatus::Init);
    }

    #[tokio::test]
    async fn bounded_wait_elapses_with_undrained_queue() {
        let call: Call<String, String> = Call::new(
            "test",
            "s6",
            CallShape::Streaming,
            Arc::new(StuckStreamStub),
            Vec::new(),
        );
        call.push("sub".into());
        call.execute(None).expect("execute should not fail");

        let started = tokio::time::Instant::now();
        call.wait(Duration::from_millis(100)).await;
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(call.pending_tasks() > 0);
    }

    #[tokio::test]
    async fn drain_hook_sees_tagged_requests_before_send() {
        let stub = Arc::new(StreamStub::new());
        let call: Call<String, String> =
            Call::new("test", "s7", CallShape::Streaming, stub, Vec::new());
        let recorded: Arc<Mutex<Vec<(u64, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::clone(&recorded);
        call.set_drain_hook(Box::new(move |id, request| {
            writer.lock().push((id, request.clone()));
        }));

        assert_eq!(call.push_tagged(None, "first".into()), 1);
        assert_eq!(call.push_tagged(Some(7), "seventh".into()), 7);
        assert_eq!(call.push_tagged(None, "eighth".into()), 8);
        call.execute(None).expect("execute should not fail");
        call.wait(Duration::from_secs(1)).await;

        assert_eq!(
            *recorded.lock(),
            vec![
                (1, "first".to_string()),
                (7, "seventh".to_string()),
                (8, "eighth".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn update_tagged_rewrites_only_pending_requests() {
        let stub = Arc::new(StreamStub::new());
        let call: Call<String, String> =
            Call::new("test", "s8", CallShape::Streaming, stub, Vec::new());
        let recorded: Arc<Mutex<Vec<(u64, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::clone(&recorded);
        call.set_drain_hook(Box::new(move |id, request| {
            writer.lock().push((id, request.clone()));
        }));

        call.push_tagged(Some(3), "original".into());
        call.update_tagged(3, |request| {
            request.push_str("-amended");
            Ok(())
        })
        .expect("id 3 is pending");
        assert_eq!(
            call.update_tagged(9, |_| Ok(())),
            Err(Error::Correlation(9))
        );

        call.execute(None).expect("execute should not fail");
        call.wait(Duration::from_secs(1)).await;
        assert_eq!(*recorded.lock(), vec![(3, "original-amended".to_string())]);
    }
}

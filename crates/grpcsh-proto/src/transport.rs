//! Generic gRPC method transports over a shared channel.
//!
//! One [`UnaryMethod`] or [`StreamingMethod`] instance stands for one gRPC
//! method path and implements the engine's [`Transport`] seam for it. All
//! methods of a session share one `tonic` [`Channel`]; tonic multiplexes the
//! calls over it, so instances are cheap and carry no connection state of
//! their own.
//!
//! A streaming method owns the batch-to-wire mapping through its `encode`
//! function: the engine hands it one drained batch per signal, and `encode`
//! decides whether that becomes one wire message per request or a single
//! merged envelope.

use core::marker::PhantomData;
use core::time::Duration;
use futures::FutureExt;
use futures::future::BoxFuture;
use grpcsh_core::{Metadata, StreamPair, Transport, TransportError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::codec::CompressionEncoding;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};
use tonic::transport::Channel;
use tonic_prost::ProstCodec;

/// Maps one tonic status onto the engine's transport error. Cancellation is
/// its own variant so the engine can tell teardown from failure.
pub fn status_to_error(status: tonic::Status) -> TransportError {
    if status.code() == tonic::Code::Cancelled {
        TransportError::Cancelled
    } else {
        TransportError::Status {
            code: format!("{:?}", status.code()),
            message: status.message().to_string(),
        }
    }
}

/// Attaches session metadata pairs to an outgoing request. Pairs that do not
/// form valid ASCII metadata are skipped with a warning rather than failing
/// the call.
fn apply_metadata(map: &mut MetadataMap, pairs: &Metadata) {
    for (key, value) in pairs {
        let parsed = AsciiMetadataKey::from_bytes(key.as_bytes())
            .ok()
            .zip(value.parse::<AsciiMetadataValue>().ok());
        match parsed {
            Some((k, v)) => {
                map.insert(k, v);
            }
            None => tracing::warn!("skipping invalid metadata pair <{key}>"),
        }
    }
}

/// One unary gRPC method on a shared channel.
pub struct UnaryMethod<Req, Resp> {
    channel: Channel,
    path: &'static str,
    compression: Option<CompressionEncoding>,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> UnaryMethod<Req, Resp> {
    pub fn new(
        channel: Channel,
        path: &'static str,
        compression: Option<CompressionEncoding>,
    ) -> Self {
        Self {
            channel,
            path,
            compression,
            _marker: PhantomData,
        }
    }

    fn grpc(&self) -> tonic::client::Grpc<Channel> {
        configure(tonic::client::Grpc::new(self.channel.clone()), self.compression)
    }
}

fn configure(
    grpc: tonic::client::Grpc<Channel>,
    compression: Option<CompressionEncoding>,
) -> tonic::client::Grpc<Channel> {
    match compression {
        Some(encoding) => grpc.send_compressed(encoding).accept_compressed(encoding),
        None => grpc,
    }
}

impl<Req, Resp> Transport<Req, Resp> for UnaryMethod<Req, Resp>
where
    Req: prost::Message + Send + 'static,
    Resp: prost::Message + Default + Send + 'static,
{
    fn call_unary(
        &self,
        request: Req,
        metadata: Metadata,
        timeout: Option<Duration>,
    ) -> BoxFuture<'static, Result<Resp, TransportError>> {
        let mut grpc = self.grpc();
        let path = self.path;
        async move {
            grpc.ready()
                .await
                .map_err(|e| TransportError::Closed(e.to_string()))?;
            let mut req = tonic::Request::new(request);
            apply_metadata(req.metadata_mut(), &metadata);
            if let Some(timeout) = timeout {
                req.set_timeout(timeout);
            }
            let response = grpc
                .unary(
                    req,
                    PathAndQuery::from_static(path),
                    ProstCodec::<Req, Resp>::default(),
                )
                .await
                .map_err(status_to_error)?;
            Ok(response.into_inner())
        }
        .boxed()
    }

    fn open_stream(
        &self,
        _metadata: Metadata,
        _timeout: Option<Duration>,
    ) -> BoxFuture<'static, Result<StreamPair<Req, Resp>, TransportError>> {
        let path = self.path;
        async move { Err(TransportError::Closed(format!("{path} is a unary method"))) }.boxed()
    }
}

/// One bidirectional streaming gRPC method on a shared channel.
///
/// `Wire` is the message type actually sent; `encode` turns one engine batch
/// of `Req` into the wire messages for it.
pub struct StreamingMethod<Req, Wire, Resp> {
    channel: Channel,
    path: &'static str,
    compression: Option<CompressionEncoding>,
    encode: fn(Vec<Req>) -> Vec<Wire>,
    _marker: PhantomData<fn(Req, Wire) -> Resp>,
}

impl<Req, Wire, Resp> StreamingMethod<Req, Wire, Resp> {
    pub fn new(
        channel: Channel,
        path: &'static str,
        compression: Option<CompressionEncoding>,
        encode: fn(Vec<Req>) -> Vec<Wire>,
    ) -> Self {
        Self {
            channel,
            path,
            compression,
            encode,
            _marker: PhantomData,
        }
    }
}

impl<Req, Wire, Resp> Transport<Req, Resp> for StreamingMethod<Req, Wire, Resp>
where
    Req: Send + 'static,
    Wire: prost::Message + Send + 'static,
    Resp: prost::Message + Default + Send + 'static,
{
    fn call_unary(
        &self,
        _request: Req,
        _metadata: Metadata,
        _timeout: Option<Duration>,
    ) -> BoxFuture<'static, Result<Resp, TransportError>> {
        let path = self.path;
        async move {
            Err(TransportError::Closed(format!(
                "{path} is a streaming method"
            )))
        }
        .boxed()
    }

    fn open_stream(
        &self,
        metadata: Metadata,
        timeout: Option<Duration>,
    ) -> BoxFuture<'static, Result<StreamPair<Req, Resp>, TransportError>> {
        let mut grpc = configure(tonic::client::Grpc::new(self.channel.clone()), self.compression);
        let path = self.path;
        let encode = self.encode;
        async move {
            grpc.ready()
                .await
                .map_err(|e| TransportError::Closed(e.to_string()))?;

            let (outbound, mut batch_rx) = mpsc::channel::<Vec<Req>>(16);
            let (wire_tx, wire_rx) = mpsc::channel::<Wire>(16);
            let cancel = CancellationToken::new();

            // Batches become wire messages off the send path, so the engine's
            // drain-and-send stays non-blocking even when the wire is slow.
            let feeder_token = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let batch = tokio::select! {
                        () = feeder_token.cancelled() => break,
                        batch = batch_rx.recv() => match batch {
                            Some(batch) => batch,
                            None => break,
                        },
                    };
                    for message in encode(batch) {
                        if wire_tx.send(message).await.is_err() {
                            return;
                        }
                    }
                }
            });

            let mut req = tonic::Request::new(ReceiverStream::new(wire_rx));
            apply_metadata(req.metadata_mut(), &metadata);
            if let Some(timeout) = timeout {
                req.set_timeout(timeout);
            }
            let mut responses = grpc
                .streaming(
                    req,
                    PathAndQuery::from_static(path),
                    ProstCodec::<Wire, Resp>::default(),
                )
                .await
                .map_err(status_to_error)?
                .into_inner();

            let (in_tx, inbound) = mpsc::channel(16);
            let reader_token = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let message = tokio::select! {
                        () = reader_token.cancelled() => break,
                        message = responses.message() => message,
                    };
                    match message {
                        Ok(Some(response)) => {
                            if in_tx.send(Ok(response)).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(status) => {
                            let _ = in_tx.send(Err(status_to_error(status))).await;
                            break;
                        }
                    }
                }
                // Dropping in_tx closes the inbound side; dropping the
                // response stream hangs up on the server.
            });

            Ok(StreamPair {
                outbound,
                inbound,
                cancel,
            })
        }
        .boxed()
    }
}

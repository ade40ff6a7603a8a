//! gRPC entry point for the echo service.
//!
//! [`EchoService`] composes one chain per method when it is created and
//! afterwards only adapts tonic requests to those chains:
//!
//! - The request metadata and extensions become the [`CallContext`], along
//!   with a `grpc-timeout` deadline and a per-call cancellation token derived
//!   from the server's shutdown token.
//! - Unary calls cancel their token when tonic drops the call future.
//! - Streaming calls run on their own task, feeding a bounded response
//!   channel. The token is cancelled once the client stops reading.

use crate::server::{
    config::ServerConfig,
    proto::{EchoRequest, EchoResponse, echo_server::Echo, method},
    service::{
        context::grpc_timeout,
        echo::{Limits, bidirectional_streaming_echo, server_streaming_echo, unary_echo},
    },
};
use braid::{
    CallContext, DuplexStream, Registry, StreamHandler, StreamInfo, UnaryHandler, UnaryInfo,
};
use core::pin::Pin;
use futures::{Stream, future::ready, stream};
use tokio::{sync::mpsc, time::Instant};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Extensions, Request, Response, Status, Streaming, metadata::MetadataMap};

pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<EchoResponse, Status>> + Send>>;

/// The `Echo` service with every method bound to its middleware chain.
#[derive(Clone)]
pub struct EchoService {
    config: ServerConfig,
    unary: UnaryHandler<EchoRequest, EchoResponse>,
    server_streaming: StreamHandler<EchoRequest, EchoResponse>,
    bidirectional: StreamHandler<EchoRequest, EchoResponse>,
    shutdown_token: CancellationToken,
}

impl EchoService {
    /// Composes the echo handlers with the middleware currently in
    /// `registry`. Middleware registered afterwards are not picked up.
    pub fn new(config: ServerConfig, registry: &Registry<EchoRequest, EchoResponse>) -> Self {
        let limits = Limits::from(&config);

        let unary = registry.unary_handler(UnaryInfo::new(method::UNARY_ECHO), unary_echo(limits));
        let server_streaming = registry.stream_handler(
            StreamInfo::server_streaming(method::SERVER_STREAMING_ECHO),
            server_streaming_echo(limits),
        );
        let bidirectional = registry.stream_handler(
            StreamInfo::bidirectional(method::BIDIRECTIONAL_STREAMING_ECHO),
            bidirectional_streaming_echo(limits),
        );

        Self {
            config,
            unary,
            server_streaming,
            bidirectional,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Cancels every in-flight call. Handlers observe it through their
    /// context and finish with `CANCELLED`.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    fn call_context(&self, metadata: MetadataMap, extensions: Extensions) -> CallContext {
        let timeout = grpc_timeout(&metadata);
        let mut ctx = CallContext::new(metadata, extensions)
            .with_cancellation(self.shutdown_token.child_token());
        if let Some(timeout) = timeout {
            ctx.shorten_deadline(Instant::now() + timeout);
        }
        ctx
    }

    fn serve_stream<S>(
        &self,
        ctx: CallContext,
        inbound: S,
        handler: StreamHandler<EchoRequest, EchoResponse>,
    ) -> ResponseStream
    where
        S: Stream<Item = Result<EchoRequest, Status>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.config.stream_buffer_size);
        let handle = DuplexStream::new(inbound, tx.clone()).boxed();
        let token = ctx.cancellation().clone();

        tokio::spawn(async move {
            let res = tokio::select! {
                res = handler.call(ctx, handle) => res,
                () = tx.closed() => {
                    token.cancel();
                    tracing::debug!("Client went away, stream cancelled");
                    return;
                }
            };
            if let Err(status) = res {
                // The client may already be gone; nothing left to tell it.
                let _ = tx.send(Err(status)).await;
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

#[tonic::async_trait]
impl Echo for EchoService {
    type ServerStreamingEchoStream = ResponseStream;
    type BidirectionalStreamingEchoStream = ResponseStream;

    async fn unary_echo(
        &self,
        request: Request<EchoRequest>,
    ) -> Result<Response<EchoResponse>, Status> {
        let (metadata, extensions, message) = request.into_parts();
        let ctx = self.call_context(metadata, extensions);
        let _guard = ctx.cancellation().clone().drop_guard();

        let res = self.unary.call(ctx, message).await?;
        Ok(Response::new(res))
    }

    async fn server_streaming_echo(
        &self,
        request: Request<EchoRequest>,
    ) -> Result<Response<Self::ServerStreamingEchoStream>, Status> {
        let (metadata, extensions, message) = request.into_parts();
        let ctx = self.call_context(metadata, extensions);
        let inbound = stream::once(ready(Ok(message)));

        Ok(Response::new(self.serve_stream(
            ctx,
            inbound,
            self.server_streaming.clone(),
        )))
    }

    async fn bidirectional_streaming_echo(
        &self,
        request: Request<Streaming<EchoRequest>>,
    ) -> Result<Response<Self::BidirectionalStreamingEchoStream>, Status> {
        let (metadata, extensions, inbound) = request.into_parts();
        let ctx = self.call_context(metadata, extensions);

        Ok(Response::new(self.serve_stream(
            ctx,
            inbound,
            self.bidirectional.clone(),
        )))
    }
}

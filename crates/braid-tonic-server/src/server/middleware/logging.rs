use super::{
    counted::{Counted, MessageCounts},
    request_id::RequestId,
};
use braid::{
    BoxServerStream, CallContext, StreamHandler, StreamInfo, StreamMiddleware, UnaryHandler,
    UnaryInfo, UnaryMiddleware,
};
use std::{sync::Arc, time::Instant};
use tonic::{Code, Status};
use tracing::{Instrument, Span};

/// Logs when a call starts and how it finished.
///
/// Everything further down the chain runs inside an `rpc` span carrying the
/// method and request id. The completion line is emitted after `next`
/// returns, so it also reports calls rejected by middleware registered after
/// this one. A call whose future is dropped first, e.g. because the client
/// disconnected, is logged as cancelled.
#[derive(Clone, Copy, Debug, Default)]
pub struct Logging;

fn request_id(ctx: &CallContext) -> String {
    RequestId::from_context(ctx)
        .map(|id| id.as_str().to_owned())
        .unwrap_or_else(|| "-".to_owned())
}

/// Emits the completion line for one call, on drop if the call never got to
/// report a result.
struct Completion<'a> {
    method: &'a str,
    start: Instant,
    span: Span,
    counts: Option<Arc<MessageCounts>>,
    pending: bool,
}

impl<'a> Completion<'a> {
    fn new(method: &'a str, span: Span, counts: Option<Arc<MessageCounts>>) -> Self {
        Self {
            method,
            start: Instant::now(),
            span,
            counts,
            pending: true,
        }
    }

    fn finish<T>(mut self, res: &Result<T, Status>) {
        self.pending = false;
        let (method, elapsed_ms) = (self.method, self.elapsed_ms());
        self.span.in_scope(|| {
            self.log_counts();
            match res {
                Ok(_) => tracing::info!(method, elapsed_ms, code = "Ok", "Call finished"),
                Err(status) => tracing::warn!(
                    method,
                    elapsed_ms,
                    code = ?status.code(),
                    message = status.message(),
                    "Call failed"
                ),
            }
        });
    }

    fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1_000.0
    }

    fn log_counts(&self) {
        if let Some(counts) = &self.counts {
            tracing::info!(
                received = counts.received(),
                sent = counts.sent(),
                "Stream messages"
            );
        }
    }
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        let (method, elapsed_ms) = (self.method, self.elapsed_ms());
        self.span.in_scope(|| {
            self.log_counts();
            tracing::warn!(
                method,
                elapsed_ms,
                code = ?Code::Cancelled,
                "Call dropped before completion"
            );
        });
    }
}

#[tonic::async_trait]
impl<Req, Res> UnaryMiddleware<Req, Res> for Logging
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    async fn call(
        &self,
        ctx: CallContext,
        req: Req,
        info: &UnaryInfo,
        next: UnaryHandler<Req, Res>,
    ) -> Result<Res, Status> {
        let method = info.full_method();
        let span = tracing::info_span!("rpc", method, request_id = %request_id(&ctx));
        let completion = Completion::new(method, span.clone(), None);

        let res = async move {
            tracing::info!("Unary call started");
            next.call(ctx, req).await
        }
        .instrument(span)
        .await;

        completion.finish(&res);
        res
    }
}

#[tonic::async_trait]
impl<Req, Res> StreamMiddleware<Req, Res> for Logging
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    async fn call(
        &self,
        ctx: CallContext,
        stream: BoxServerStream<Req, Res>,
        info: &StreamInfo,
        next: StreamHandler<Req, Res>,
    ) -> Result<(), Status> {
        let method = info.full_method();
        let span = tracing::info_span!("rpc", method, request_id = %request_id(&ctx));
        let (stream, counts) = Counted::wrap(stream);
        let completion = Completion::new(method, span.clone(), Some(counts));

        let res = async move {
            tracing::info!(
                client_streaming = info.is_client_stream(),
                server_streaming = info.is_server_stream(),
                "Stream started"
            );
            next.call(ctx, stream).await
        }
        .instrument(span)
        .await;

        completion.finish(&res);
        res
    }
}

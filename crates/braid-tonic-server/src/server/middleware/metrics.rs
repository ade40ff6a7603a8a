use super::counted::{Counted, MessageCounts};
use crate::server::telemetry::{
    decrement_streams_inflight, increment_errors, increment_requests, increment_stream_messages,
    increment_streams_inflight, record_call_duration,
};
use braid::{
    BoxServerStream, CallContext, StreamHandler, StreamInfo, StreamMiddleware, UnaryHandler,
    UnaryInfo, UnaryMiddleware,
};
use portable_atomic::{AtomicI64, AtomicU64, Ordering};
use std::{sync::Arc, time::Instant};
use tonic::{Code, Status};

/// Records request, error, duration and stream metrics per method.
///
/// The OpenTelemetry recording functions are no-ops unless the `metrics`
/// feature is enabled, so this middleware is always installed. The
/// [`CallStats`] it keeps locally are always tracked.
///
/// Recording happens when the call finishes or when its future is dropped,
/// whichever comes first. A dropped call counts as `CANCELLED`.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    stats: Arc<CallStats>,
}

/// Process-local counters shared by every clone of a [`Metrics`].
#[derive(Debug, Default)]
pub struct CallStats {
    streams_inflight: AtomicI64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl CallStats {
    pub fn streams_inflight(&self) -> i64 {
        self.streams_inflight.load(Ordering::Relaxed)
    }

    /// Calls that returned `Ok`.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Calls that returned an error status.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Calls dropped before they produced a result.
    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &CallStats {
        &self.stats
    }
}

/// Outcome bookkeeping for one call, flushed on drop.
struct CallRecord<'a> {
    method: &'a str,
    start: Instant,
    stats: &'a CallStats,
    stream: Option<Arc<MessageCounts>>,
    outcome: Option<Result<(), Code>>,
}

impl<'a> CallRecord<'a> {
    fn unary(method: &'a str, stats: &'a CallStats) -> Self {
        increment_requests(method);
        Self {
            method,
            start: Instant::now(),
            stats,
            stream: None,
            outcome: None,
        }
    }

    fn stream(method: &'a str, stats: &'a CallStats, counts: Arc<MessageCounts>) -> Self {
        let mut record = Self::unary(method, stats);
        increment_streams_inflight(method);
        stats.streams_inflight.fetch_add(1, Ordering::Relaxed);
        record.stream = Some(counts);
        record
    }

    fn finish<T>(&mut self, res: &Result<T, Status>) {
        self.outcome = Some(res.as_ref().map(|_| ()).map_err(Status::code));
    }
}

impl Drop for CallRecord<'_> {
    fn drop(&mut self) {
        let method = self.method;
        record_call_duration(method, self.start.elapsed().as_secs_f64() * 1_000.0);

        match self.outcome {
            Some(Ok(())) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
            }
            Some(Err(code)) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                increment_errors(method, code);
            }
            None => {
                self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                increment_errors(method, Code::Cancelled);
            }
        }

        if let Some(counts) = self.stream.take() {
            decrement_streams_inflight(method);
            self.stats.streams_inflight.fetch_sub(1, Ordering::Relaxed);
            increment_stream_messages(method, "received", counts.received());
            increment_stream_messages(method, "sent", counts.sent());
        }
    }
}

#[tonic::async_trait]
impl<Req, Res> UnaryMiddleware<Req, Res> for Metrics
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
        let mut record = CallRecord::unary(info.full_method(), &self.stats);
        let res = next.call(ctx, req).await;
        record.finish(&res);
        res
    }
}

#[tonic::async_trait]
impl<Req, Res> StreamMiddleware<Req, Res> for Metrics
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
        let (stream, counts) = Counted::wrap(stream);
        let mut record = CallRecord::stream(info.full_method(), &self.stats, counts);
        let res = next.call(ctx, stream).await;
        record.finish(&res);
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid::{DuplexStream, Registry, ServerStream};
    use core::time::Duration;
    use std::sync::Mutex;

    fn unary(metrics: &Metrics, terminal: UnaryHandler<u32, u32>) -> UnaryHandler<u32, u32> {
        let mut registry: Registry<u32, u32> = Registry::new();
        registry.use_unary(metrics.clone());
        registry.unary_handler(UnaryInfo::new("/t.T/Unary"), terminal)
    }

    fn stream(metrics: &Metrics, terminal: StreamHandler<u32, u32>) -> StreamHandler<u32, u32> {
        let mut registry: Registry<u32, u32> = Registry::new();
        registry.use_stream(metrics.clone());
        registry.stream_handler(StreamInfo::bidirectional("/t.T/Bidi"), terminal)
    }

    #[tokio::test]
    async fn counts_unary_outcomes() {
        let metrics = Metrics::new();
        let handler = unary(
            &metrics,
            UnaryHandler::new(|_ctx: CallContext, req: u32| async move {
                if req == 0 {
                    Err(Status::invalid_argument("zero"))
                } else {
                    Ok(req)
                }
            }),
        );

        assert_eq!(handler.call(CallContext::default(), 7).await.unwrap(), 7);
        let err = handler.call(CallContext::default(), 0).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);

        assert_eq!(metrics.stats().completed(), 1);
        assert_eq!(metrics.stats().failed(), 1);
        assert_eq!(metrics.stats().cancelled(), 0);
    }

    #[tokio::test]
    async fn dropped_unary_call_is_recorded_as_cancelled() {
        let metrics = Metrics::new();
        let handler = unary(
            &metrics,
            UnaryHandler::new(|_ctx: CallContext, _req: u32| futures::future::pending()),
        );

        let res = tokio::time::timeout(
            Duration::from_millis(10),
            handler.call(CallContext::default(), 1),
        )
        .await;
        assert!(res.is_err());

        assert_eq!(metrics.stats().cancelled(), 1);
        assert_eq!(metrics.stats().completed(), 0);
    }

    #[tokio::test]
    async fn streams_in_flight_rise_and_fall() {
        let metrics = Metrics::new();
        let observed = Arc::new(Mutex::new(None));
        let handler = stream(&metrics, {
            let metrics = metrics.clone();
            let observed = Arc::clone(&observed);
            StreamHandler::new(
                move |_ctx: CallContext, mut stream: BoxServerStream<u32, u32>| {
                    *observed.lock().unwrap() = Some(metrics.stats().streams_inflight());
                    async move {
                        while let Some(n) = stream.recv().await? {
                            stream.send(n).await?;
                        }
                        Ok(())
                    }
                },
            )
        });

        let (duplex, _rx) =
            DuplexStream::<u32, u32>::channel(futures::stream::iter(vec![Ok(1), Ok(2)]), 4);
        handler.call(CallContext::default(), duplex.boxed()).await.unwrap();

        assert_eq!(*observed.lock().unwrap(), Some(1));
        assert_eq!(metrics.stats().streams_inflight(), 0);
        assert_eq!(metrics.stats().completed(), 1);
    }

    #[tokio::test]
    async fn dropped_stream_leaves_nothing_in_flight() {
        let metrics = Metrics::new();
        let handler = stream(
            &metrics,
            StreamHandler::new(|_ctx: CallContext, _stream: BoxServerStream<u32, u32>| {
                futures::future::pending()
            }),
        );

        let (duplex, _rx) = DuplexStream::<u32, u32>::channel(futures::stream::pending(), 1);
        let call = handler.call(CallContext::default(), duplex.boxed());
        let res = tokio::time::timeout(Duration::from_millis(10), call).await;
        assert!(res.is_err());

        assert_eq!(metrics.stats().streams_inflight(), 0);
        assert_eq!(metrics.stats().cancelled(), 1);
    }
}

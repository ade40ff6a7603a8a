use crate::server::error::Error;
use braid::{
    BoxServerStream, CallContext, StreamHandler, StreamInfo, StreamMiddleware, UnaryHandler,
    UnaryInfo, UnaryMiddleware,
};
use core::{future::Future, time::Duration};
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Enforces the call deadline.
///
/// The deadline is the one the host derived from `grpc-timeout`; calls that
/// arrive without one get `default_timeout`, if configured. When the deadline
/// passes the rest of the chain is dropped, the call's cancellation token is
/// cancelled, and the call fails with `DEADLINE_EXCEEDED`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Deadline {
    default_timeout: Option<Duration>,
}

impl Deadline {
    pub const fn new(default_timeout: Option<Duration>) -> Self {
        Self { default_timeout }
    }

    fn resolve(&self, ctx: &mut CallContext) -> Option<Instant> {
        if ctx.deadline().is_none() {
            if let Some(timeout) = self.default_timeout {
                ctx.shorten_deadline(Instant::now() + timeout);
            }
        }
        ctx.deadline()
    }
}

async fn enforce<T, F>(token: CancellationToken, deadline: Instant, fut: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    match timeout_at(deadline, fut).await {
        Ok(res) => res,
        Err(_) => {
            token.cancel();
            tracing::debug!("Deadline exceeded, call cancelled");
            Err(Error::DeadlineExceeded.into())
        }
    }
}

#[tonic::async_trait]
impl<Req, Res> UnaryMiddleware<Req, Res> for Deadline
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    async fn call(
        &self,
        mut ctx: CallContext,
        req: Req,
        _info: &UnaryInfo,
        next: UnaryHandler<Req, Res>,
    ) -> Result<Res, Status> {
        let Some(deadline) = self.resolve(&mut ctx) else {
            return next.call(ctx, req).await;
        };
        let token = ctx.cancellation().clone();
        enforce(token, deadline, next.call(ctx, req)).await
    }
}

#[tonic::async_trait]
impl<Req, Res> StreamMiddleware<Req, Res> for Deadline
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    async fn call(
        &self,
        mut ctx: CallContext,
        stream: BoxServerStream<Req, Res>,
        _info: &StreamInfo,
        next: StreamHandler<Req, Res>,
    ) -> Result<(), Status> {
        let Some(deadline) = self.resolve(&mut ctx) else {
            return next.call(ctx, stream).await;
        };
        let token = ctx.cancellation().clone();
        enforce(token, deadline, next.call(ctx, stream)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid::{DuplexStream, Registry};
    use std::sync::{Arc, Mutex};
    use tonic::Code;

    fn sleepy(delay: Duration) -> UnaryHandler<(), &'static str> {
        UnaryHandler::new(move |_ctx: CallContext, _req: ()| async move {
            tokio::time::sleep(delay).await;
            Ok("done")
        })
    }

    fn handler(
        default_timeout: Option<Duration>,
        terminal: UnaryHandler<(), &'static str>,
    ) -> UnaryHandler<(), &'static str> {
        let mut registry = Registry::new();
        registry.use_unary(Deadline::new(default_timeout));
        registry.unary_handler(UnaryInfo::new("/t.T/Slow"), terminal)
    }

    #[tokio::test(start_paused = true)]
    async fn fast_calls_complete() {
        let handler = handler(Some(Duration::from_secs(1)), sleepy(Duration::from_millis(10)));
        assert_eq!(handler.call(CallContext::default(), ()).await.unwrap(), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn default_timeout_applies_without_a_client_deadline() {
        let handler = handler(Some(Duration::from_secs(1)), sleepy(Duration::from_secs(5)));
        let err = handler.call(CallContext::default(), ()).await.unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn client_deadline_takes_precedence_over_the_default() {
        let handler = handler(Some(Duration::from_millis(10)), sleepy(Duration::from_secs(1)));
        let ctx = CallContext::default().with_deadline(Instant::now() + Duration::from_secs(2));
        assert_eq!(handler.call(ctx, ()).await.unwrap(), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn no_deadline_means_no_limit() {
        let handler = handler(None, sleepy(Duration::from_secs(3600)));
        assert_eq!(handler.call(CallContext::default(), ()).await.unwrap(), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_cancels_the_call_token() {
        let seen = Arc::new(Mutex::new(None));
        let terminal = {
            let seen = Arc::clone(&seen);
            UnaryHandler::new(move |ctx: CallContext, _req: ()| {
                *seen.lock().unwrap() = Some(ctx.cancellation().clone());
                async move {
                    ctx.cancelled().await;
                    Ok("unreachable")
                }
            })
        };
        let handler = handler(Some(Duration::from_millis(50)), terminal);

        let err = handler.call(CallContext::default(), ()).await.unwrap_err();

        assert_eq!(err.code(), Code::DeadlineExceeded);
        let token = seen.lock().unwrap().take().unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_calls_are_bounded_too() {
        let mut registry: Registry<u32, u32> = Registry::new();
        registry.use_stream(Deadline::new(Some(Duration::from_millis(100))));
        let handler = registry.stream_handler(
            StreamInfo::bidirectional("/t.T/Stream"),
            StreamHandler::new(|_ctx: CallContext, _stream: BoxServerStream<u32, u32>| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }),
        );

        let (duplex, _rx) = DuplexStream::<u32, u32>::channel(futures::stream::pending(), 1);
        let err = handler
            .call(CallContext::default(), duplex.boxed())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
    }
}

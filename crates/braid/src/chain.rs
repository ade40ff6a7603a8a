//! Chain composition.
//!
//! A chain is built by folding the middleware sequence from the terminal
//! handler outward: starting with `current = terminal`, each middleware from
//! last to first is bound around `current`. The outermost handler is the
//! first middleware registered, so for `[m0, m1, m2]` a call enters
//! `m0 -> m1 -> m2 -> terminal` and unwinds in the opposite order.
//!
//! The fold runs once per [`UnaryChain::bind`] / [`StreamChain::bind`]. The
//! handler it produces holds no per-call state and may be shared by any
//! number of concurrent calls.

use crate::{
    context::CallContext,
    handler::{StreamHandler, UnaryHandler},
    info::{StreamInfo, UnaryInfo},
    middleware::{StreamMiddleware, UnaryMiddleware},
    stream::BoxServerStream,
};
use core::fmt;
use std::sync::Arc;
use tonic::Status;

pub(crate) type SharedUnary<Req, Res> = Arc<dyn UnaryMiddleware<Req, Res>>;
pub(crate) type SharedStream<Req, Res> = Arc<dyn StreamMiddleware<Req, Res>>;

/// An immutable, ordered snapshot of unary middleware.
///
/// This is the composite entry point a host installs for all unary calls.
pub struct UnaryChain<Req, Res> {
    middlewares: Arc<[SharedUnary<Req, Res>]>,
}

impl<Req, Res> UnaryChain<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    pub(crate) fn new(middlewares: Arc<[SharedUnary<Req, Res>]>) -> Self {
        Self { middlewares }
    }

    /// Composes the chain around `terminal` for the method described by
    /// `info`.
    ///
    /// With no middleware the terminal handler is returned unchanged.
    pub fn bind(&self, info: UnaryInfo, terminal: UnaryHandler<Req, Res>) -> UnaryHandler<Req, Res> {
        #[cfg(feature = "tracing")]
        tracing::trace!(
            method = info.full_method(),
            depth = self.middlewares.len(),
            "composing unary chain"
        );

        if self.middlewares.is_empty() {
            return terminal;
        }

        let info = Arc::new(info);
        self.middlewares
            .iter()
            .rev()
            .fold(terminal, |next, middleware| {
                bind_unary(Arc::clone(middleware), Arc::clone(&info), next)
            })
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

fn bind_unary<Req, Res>(
    middleware: SharedUnary<Req, Res>,
    info: Arc<UnaryInfo>,
    next: UnaryHandler<Req, Res>,
) -> UnaryHandler<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    UnaryHandler::new(move |ctx: CallContext, req: Req| {
        let middleware = Arc::clone(&middleware);
        let info = Arc::clone(&info);
        let next = next.clone();
        async move { middleware.call(ctx, req, &info, next).await }
    })
}

/// A whole chain behaves like one middleware, so it can be installed as a
/// single interceptor or nested in another registry. This path binds the
/// chain on every call; prefer [`UnaryChain::bind`] when the terminal
/// handler is known up front.
#[tonic::async_trait]
impl<Req, Res> UnaryMiddleware<Req, Res> for UnaryChain<Req, Res>
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
        self.bind(info.clone(), next).call(ctx, req).await
    }
}

impl<Req, Res> Clone for UnaryChain<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            middlewares: Arc::clone(&self.middlewares),
        }
    }
}

impl<Req, Res> fmt::Debug for UnaryChain<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnaryChain")
            .field("len", &self.middlewares.len())
            .finish()
    }
}

/// An immutable, ordered snapshot of stream middleware.
pub struct StreamChain<Req, Res> {
    middlewares: Arc<[SharedStream<Req, Res>]>,
}

impl<Req, Res> StreamChain<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    pub(crate) fn new(middlewares: Arc<[SharedStream<Req, Res>]>) -> Self {
        Self { middlewares }
    }

    /// Composes the chain around `terminal`. Same fold as
    /// [`UnaryChain::bind`].
    pub fn bind(
        &self,
        info: StreamInfo,
        terminal: StreamHandler<Req, Res>,
    ) -> StreamHandler<Req, Res> {
        #[cfg(feature = "tracing")]
        tracing::trace!(
            method = info.full_method(),
            depth = self.middlewares.len(),
            client_streaming = info.is_client_stream(),
            server_streaming = info.is_server_stream(),
            "composing stream chain"
        );

        if self.middlewares.is_empty() {
            return terminal;
        }

        let info = Arc::new(info);
        self.middlewares
            .iter()
            .rev()
            .fold(terminal, |next, middleware| {
                bind_stream(Arc::clone(middleware), Arc::clone(&info), next)
            })
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

fn bind_stream<Req, Res>(
    middleware: SharedStream<Req, Res>,
    info: Arc<StreamInfo>,
    next: StreamHandler<Req, Res>,
) -> StreamHandler<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    StreamHandler::new(move |ctx: CallContext, stream: BoxServerStream<Req, Res>| {
        let middleware = Arc::clone(&middleware);
        let info = Arc::clone(&info);
        let next = next.clone();
        async move { middleware.call(ctx, stream, &info, next).await }
    })
}

#[tonic::async_trait]
impl<Req, Res> StreamMiddleware<Req, Res> for StreamChain<Req, Res>
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
        self.bind(info.clone(), next).call(ctx, stream).await
    }
}

impl<Req, Res> Clone for StreamChain<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            middlewares: Arc::clone(&self.middlewares),
        }
    }
}

impl<Req, Res> fmt::Debug for StreamChain<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamChain")
            .field("len", &self.middlewares.len())
            .finish()
    }
}

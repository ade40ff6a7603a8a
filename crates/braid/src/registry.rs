use crate::{
    chain::{SharedStream, SharedUnary, StreamChain, UnaryChain},
    context::CallContext,
    handler::{StreamHandler, UnaryHandler},
    info::{StreamInfo, UnaryInfo},
    middleware::{StreamFn, StreamMiddleware, UnaryFn, UnaryMiddleware},
    stream::BoxServerStream,
};
use core::{fmt, future::Future};
use std::sync::Arc;
use tonic::Status;

/// Ordered collections of unary and stream middleware for one server.
///
/// A registry is built during a single-threaded setup phase and then turned
/// into chains. It is an ordinary owned value: construct it at bootstrap,
/// register middleware through `&mut self`, and hand the resulting chains (or
/// bound handlers) to the service.
///
/// Insertion order is invocation order. Chains are snapshots of the sequence
/// at the moment they are taken, so middleware registered later only apply
/// to chains composed later.
///
/// `Req` and `Res` are the request and response message types. For streaming
/// calls the handle receives `Req` and sends `Res`. A server whose methods
/// use several message pairs builds one registry per pair from the same
/// setup function, with middleware written generically over both types, so
/// every call still passes through the same sequence.
pub struct Registry<Req, Res> {
    unary: Vec<SharedUnary<Req, Res>>,
    stream: Vec<SharedStream<Req, Res>>,
}

impl<Req, Res> Registry<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            unary: Vec::new(),
            stream: Vec::new(),
        }
    }

    /// Appends `middleware` to the unary sequence.
    pub fn use_unary<M>(&mut self, middleware: M) -> &mut Self
    where
        M: UnaryMiddleware<Req, Res>,
    {
        self.unary.push(Arc::new(middleware));
        self
    }

    /// Appends `middleware` to the stream sequence.
    pub fn use_stream<M>(&mut self, middleware: M) -> &mut Self
    where
        M: StreamMiddleware<Req, Res>,
    {
        self.stream.push(Arc::new(middleware));
        self
    }

    /// Appends a closure to the unary sequence.
    pub fn use_unary_fn<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(CallContext, Req, UnaryInfo, UnaryHandler<Req, Res>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, Status>> + Send + 'static,
    {
        self.use_unary(UnaryFn::new(f))
    }

    /// Appends a closure to the stream sequence.
    pub fn use_stream_fn<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(CallContext, BoxServerStream<Req, Res>, StreamInfo, StreamHandler<Req, Res>) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        self.use_stream(StreamFn::new(f))
    }

    /// Snapshot of the current unary sequence.
    pub fn unary_chain(&self) -> UnaryChain<Req, Res> {
        UnaryChain::new(self.unary.iter().cloned().collect())
    }

    /// Snapshot of the current stream sequence.
    pub fn stream_chain(&self) -> StreamChain<Req, Res> {
        StreamChain::new(self.stream.iter().cloned().collect())
    }

    /// Composes the current unary sequence around `terminal`.
    pub fn unary_handler(
        &self,
        info: UnaryInfo,
        terminal: UnaryHandler<Req, Res>,
    ) -> UnaryHandler<Req, Res> {
        self.unary_chain().bind(info, terminal)
    }

    /// Composes the current stream sequence around `terminal`.
    pub fn stream_handler(
        &self,
        info: StreamInfo,
        terminal: StreamHandler<Req, Res>,
    ) -> StreamHandler<Req, Res> {
        self.stream_chain().bind(info, terminal)
    }

    pub fn unary_len(&self) -> usize {
        self.unary.len()
    }

    pub fn stream_len(&self) -> usize {
        self.stream.len()
    }
}

impl<Req, Res> Default for Registry<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Res> fmt::Debug for Registry<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("unary", &self.unary.len())
            .field("stream", &self.stream.len())
            .finish()
    }
}

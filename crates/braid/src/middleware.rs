//! Middleware capability shapes.
//!
//! There is exactly one operation per shape, so each shape is a single-method
//! trait. Plain closures can be used through [`UnaryFn`] and [`StreamFn`],
//! usually via [`Registry::use_unary_fn`](crate::Registry::use_unary_fn) and
//! [`Registry::use_stream_fn`](crate::Registry::use_stream_fn).

use crate::{
    context::CallContext,
    handler::{StreamHandler, UnaryHandler},
    info::{StreamInfo, UnaryInfo},
    stream::BoxServerStream,
};
use core::future::Future;
use std::sync::Arc;
use tonic::Status;

/// Wraps a [`UnaryHandler`].
///
/// An implementation continues the chain by calling `next.call(ctx, req)`
/// and short-circuits it by returning without doing so. Code placed after
/// the `next` call runs on the way out, after every middleware registered
/// later has finished.
///
/// Calling `next` more than once per invocation is allowed by the types but
/// re-runs the rest of the chain; whether that is sensible is up to the
/// middleware.
#[tonic::async_trait]
pub trait UnaryMiddleware<Req, Res>: Send + Sync + 'static {
    async fn call(
        &self,
        ctx: CallContext,
        req: Req,
        info: &UnaryInfo,
        next: UnaryHandler<Req, Res>,
    ) -> Result<Res, Status>;
}

/// Wraps a [`StreamHandler`].
///
/// The stream handle may be replaced by a wrapper before it is passed on, to
/// intercept every message in either direction.
#[tonic::async_trait]
pub trait StreamMiddleware<Req, Res>: Send + Sync + 'static {
    async fn call(
        &self,
        ctx: CallContext,
        stream: BoxServerStream<Req, Res>,
        info: &StreamInfo,
        next: StreamHandler<Req, Res>,
    ) -> Result<(), Status>;
}

#[tonic::async_trait]
impl<M, Req, Res> UnaryMiddleware<Req, Res> for Arc<M>
where
    M: UnaryMiddleware<Req, Res> + ?Sized,
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
        (**self).call(ctx, req, info, next).await
    }
}

#[tonic::async_trait]
impl<M, Req, Res> StreamMiddleware<Req, Res> for Arc<M>
where
    M: StreamMiddleware<Req, Res> + ?Sized,
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
        (**self).call(ctx, stream, info, next).await
    }
}

/// Unary middleware built from a closure.
///
/// The closure gets its own clone of the [`UnaryInfo`] so the returned future
/// does not borrow from the chain.
#[derive(Clone, Copy, Debug)]
pub struct UnaryFn<F> {
    f: F,
}

impl<F> UnaryFn<F> {
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

#[tonic::async_trait]
impl<F, Fut, Req, Res> UnaryMiddleware<Req, Res> for UnaryFn<F>
where
    F: Fn(CallContext, Req, UnaryInfo, UnaryHandler<Req, Res>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Res, Status>> + Send + 'static,
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
        (self.f)(ctx, req, info.clone(), next).await
    }
}

/// Stream middleware built from a closure.
#[derive(Clone, Copy, Debug)]
pub struct StreamFn<F> {
    f: F,
}

impl<F> StreamFn<F> {
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

#[tonic::async_trait]
impl<F, Fut, Req, Res> StreamMiddleware<Req, Res> for StreamFn<F>
where
    F: Fn(CallContext, BoxServerStream<Req, Res>, StreamInfo, StreamHandler<Req, Res>) -> Fut
        + Send
        + Sync
        + 'static,
    Fut: Future<Output = Result<(), Status>> + Send + 'static,
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
        (self.f)(ctx, stream, info.clone(), next).await
    }
}

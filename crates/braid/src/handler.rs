//! Handler shapes: the terminal service method and every partially-applied
//! continuation of a chain share one of these two types.

use crate::{context::CallContext, stream::BoxServerStream};
use core::{fmt, future::Future};
use futures::{FutureExt, future::BoxFuture};
use std::sync::Arc;
use tonic::Status;

type DynUnaryFn<Req, Res> =
    dyn Fn(CallContext, Req) -> BoxFuture<'static, Result<Res, Status>> + Send + Sync;

type DynStreamFn<Req, Res> = dyn Fn(CallContext, BoxServerStream<Req, Res>) -> BoxFuture<'static, Result<(), Status>>
    + Send
    + Sync;

/// A unary handler: `(context, request) -> Result<response, Status>`.
///
/// Cloning is cheap and clones share the same underlying function, so one
/// composed handler can serve any number of concurrent calls.
pub struct UnaryHandler<Req, Res> {
    inner: Arc<DynUnaryFn<Req, Res>>,
}

impl<Req, Res> UnaryHandler<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    /// Wraps an async function or closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, Status>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |ctx: CallContext, req: Req| f(ctx, req).boxed()),
        }
    }

    /// Invokes the handler. The returned future owns everything it needs.
    pub fn call(&self, ctx: CallContext, req: Req) -> BoxFuture<'static, Result<Res, Status>> {
        (self.inner)(ctx, req)
    }
}

impl<Req, Res> UnaryHandler<Req, Res> {
    /// Returns `true` if both handlers are the same function, i.e. one is a
    /// clone of the other.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<Req, Res> Clone for UnaryHandler<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Req, Res> fmt::Debug for UnaryHandler<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnaryHandler").finish_non_exhaustive()
    }
}

/// A streaming handler: `(context, stream handle) -> Result<(), Status>`.
///
/// The handler drives the whole exchange through the handle; returning
/// `Ok(())` ends the response stream cleanly, returning an error ends it with
/// that status.
pub struct StreamHandler<Req, Res> {
    inner: Arc<DynStreamFn<Req, Res>>,
}

impl<Req, Res> StreamHandler<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(CallContext, BoxServerStream<Req, Res>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |ctx: CallContext, stream: BoxServerStream<Req, Res>| {
                f(ctx, stream).boxed()
            }),
        }
    }

    pub fn call(
        &self,
        ctx: CallContext,
        stream: BoxServerStream<Req, Res>,
    ) -> BoxFuture<'static, Result<(), Status>> {
        (self.inner)(ctx, stream)
    }
}

impl<Req, Res> StreamHandler<Req, Res> {
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<Req, Res> Clone for StreamHandler<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Req, Res> fmt::Debug for StreamHandler<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandler").finish_non_exhaustive()
    }
}

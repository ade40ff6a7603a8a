use crate::server::error::Error;
use braid::{
    BoxServerStream, CallContext, StreamHandler, StreamInfo, StreamMiddleware, UnaryHandler,
    UnaryInfo, UnaryMiddleware,
};
use std::sync::Arc;
use tonic::Status;

pub const AUTHORIZATION_HEADER: &str = "authorization";
const BEARER_PREFIX: &str = "Bearer ";

/// Shared-secret authentication.
///
/// A call is let through only when its `authorization` metadata equals the
/// configured token, optionally prefixed with `Bearer `. Rejected calls fail
/// with `UNAUTHENTICATED` and never reach `next`.
#[derive(Clone)]
pub struct TokenAuth {
    token: Arc<str>,
}

impl TokenAuth {
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self {
            token: token.into(),
        }
    }

    fn check(&self, ctx: &CallContext) -> Result<(), Error> {
        let value = ctx
            .metadata()
            .get(AUTHORIZATION_HEADER)
            .ok_or(Error::MissingToken)?;
        let value = value.to_str().map_err(|_| Error::InvalidToken)?;
        let presented = value.strip_prefix(BEARER_PREFIX).unwrap_or(value);

        if constant_time_eq(presented.as_bytes(), self.token.as_bytes()) {
            Ok(())
        } else {
            Err(Error::InvalidToken)
        }
    }
}

/// Compares two secrets without exiting early on the first differing byte.
/// Only the length is allowed to leak.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl core::fmt::Debug for TokenAuth {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenAuth")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[tonic::async_trait]
impl<Req, Res> UnaryMiddleware<Req, Res> for TokenAuth
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    async fn call(
        &self,
        ctx: CallContext,
        req: Req,
        _info: &UnaryInfo,
        next: UnaryHandler<Req, Res>,
    ) -> Result<Res, Status> {
        self.check(&ctx)?;
        next.call(ctx, req).await
    }
}

#[tonic::async_trait]
impl<Req, Res> StreamMiddleware<Req, Res> for TokenAuth
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    async fn call(
        &self,
        ctx: CallContext,
        stream: BoxServerStream<Req, Res>,
        _info: &StreamInfo,
        next: StreamHandler<Req, Res>,
    ) -> Result<(), Status> {
        self.check(&ctx)?;
        next.call(ctx, stream).await
    }
}

use braid::{
    BoxServerStream, CallContext, StreamHandler, StreamInfo, StreamMiddleware, UnaryHandler,
    UnaryInfo, UnaryMiddleware,
};
use core::fmt;
use tonic::Status;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The id assigned to the current call, stored in the context extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn from_context(ctx: &CallContext) -> Option<&Self> {
        ctx.extensions().get::<Self>()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reuses the client's `x-request-id` or assigns a fresh UUIDv7, and makes it
/// available both as metadata and as a [`RequestId`] extension.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestIdLayer;

fn assign(ctx: &mut CallContext) {
    let id = ctx
        .metadata()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::now_v7().to_string());

    if let Ok(value) = id.parse() {
        ctx.metadata_mut().insert(REQUEST_ID_HEADER, value);
    }
    ctx.extensions_mut().insert(RequestId(id));
}

#[tonic::async_trait]
impl<Req, Res> UnaryMiddleware<Req, Res> for RequestIdLayer
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
        assign(&mut ctx);
        next.call(ctx, req).await
    }
}

#[tonic::async_trait]
impl<Req, Res> StreamMiddleware<Req, Res> for RequestIdLayer
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
        assign(&mut ctx);
        next.call(ctx, stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid::Registry;
    use tonic::metadata::MetadataValue;

    fn registry() -> Registry<(), String> {
        let mut registry = Registry::new();
        registry.use_unary(RequestIdLayer);
        registry
    }

    fn report() -> UnaryHandler<(), String> {
        UnaryHandler::new(|ctx: CallContext, _req: ()| async move {
            let from_extension = RequestId::from_context(&ctx)
                .map(ToString::to_string)
                .unwrap_or_default();
            let from_metadata = ctx
                .metadata()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            assert_eq!(from_extension, from_metadata);
            Ok(from_extension)
        })
    }

    #[tokio::test]
    async fn keeps_the_client_request_id() {
        let handler = registry().unary_handler(UnaryInfo::new("/t.T/M"), report());
        let mut ctx = CallContext::default();
        ctx.metadata_mut()
            .insert(REQUEST_ID_HEADER, MetadataValue::from_static("req-123"));

        assert_eq!(handler.call(ctx, ()).await.unwrap(), "req-123");
    }

    #[tokio::test]
    async fn generates_a_uuid_when_missing() {
        let handler = registry().unary_handler(UnaryInfo::new("/t.T/M"), report());

        let first = handler.call(CallContext::default(), ()).await.unwrap();
        let second = handler.call(CallContext::default(), ()).await.unwrap();

        assert!(Uuid::parse_str(&first).is_ok());
        assert_ne!(first, second);
    }
}

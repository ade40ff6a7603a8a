//! Cross-cutting behaviors installed around every echo method.
//!
//! Each middleware is generic over the message types, so the same value can
//! be registered for unary and streaming calls alike. [`build_registry`]
//! fixes the order for this server:
//!
//! 1. [`RequestIdLayer`] - so every later log line carries the id.
//! 2. [`Logging`] - sees the final outcome, including rejections below it.
//! 3. [`Metrics`] - counts every call that reached the server.
//! 4. [`Deadline`] - bounds everything inside it, auth included.
//! 5. [`TokenAuth`] - only when a token is configured.

pub mod auth;
mod counted;
pub mod deadline;
pub mod logging;
pub mod metrics;
pub mod request_id;

pub use auth::TokenAuth;
pub use deadline::Deadline;
pub use logging::Logging;
pub use metrics::Metrics;
pub use request_id::{RequestId, RequestIdLayer};

use crate::server::config::ServerConfig;
use braid::Registry;

/// Builds the middleware registry for one request/response message pair.
///
/// Every service the server hosts calls this with its own message types, so
/// all of them get the same middleware in the same order. `metrics` is
/// shared between the registries so its stats cover the whole server.
pub fn build_registry<Req, Res>(config: &ServerConfig, metrics: &Metrics) -> Registry<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    let mut registry = Registry::new();
    let deadline = Deadline::new(config.default_timeout);

    registry
        .use_unary(RequestIdLayer)
        .use_unary(Logging)
        .use_unary(metrics.clone())
        .use_unary(deadline);
    registry
        .use_stream(RequestIdLayer)
        .use_stream(Logging)
        .use_stream(metrics.clone())
        .use_stream(deadline);

    if let Some(token) = &config.auth_token {
        let auth = TokenAuth::new(token.as_str());
        registry.use_unary(auth.clone()).use_stream(auth);
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::proto::{EchoRequest, EchoResponse};
    use braid::{
        BoxServerStream, CallContext, DuplexStream, ServerStream, StreamHandler, StreamInfo,
        UnaryHandler, UnaryInfo,
    };
    use core::time::Duration;
    use tonic::{Code, metadata::MetadataValue};

    fn config(auth_token: Option<&str>) -> ServerConfig {
        ServerConfig {
            auth_token: auth_token.map(str::to_owned),
            default_timeout: Some(Duration::from_secs(5)),
            stream_buffer_size: 4,
            max_message_len: 64,
            max_repeat: 8,
            server_addr: "127.0.0.1:0".to_string(),
            uds: false,
        }
    }

    fn authorized() -> CallContext {
        let mut ctx = CallContext::default();
        ctx.metadata_mut()
            .insert(auth::AUTHORIZATION_HEADER, MetadataValue::from_static("s3cret"));
        ctx
    }

    #[test]
    fn auth_is_only_installed_with_a_token() {
        let metrics = Metrics::new();

        let open: Registry<EchoRequest, EchoResponse> = build_registry(&config(None), &metrics);
        assert_eq!((open.unary_len(), open.stream_len()), (4, 4));

        let guarded: Registry<EchoRequest, EchoResponse> =
            build_registry(&config(Some("s3cret")), &metrics);
        assert_eq!((guarded.unary_len(), guarded.stream_len()), (5, 5));
    }

    #[tokio::test]
    async fn same_setup_serves_another_message_pair() {
        let config = config(Some("s3cret"));
        let metrics = Metrics::new();
        let echo: Registry<EchoRequest, EchoResponse> = build_registry(&config, &metrics);
        let lengths: Registry<String, u64> = build_registry(&config, &metrics);
        assert_eq!(echo.unary_len(), lengths.unary_len());

        let measure = lengths.unary_handler(
            UnaryInfo::new("/braid.text.v1.Text/Measure"),
            UnaryHandler::new(|_ctx: CallContext, req: String| async move { Ok(req.len() as u64) }),
        );
        assert_eq!(measure.call(authorized(), "four".to_string()).await.unwrap(), 4);
        let err = measure
            .call(CallContext::default(), "four".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unauthenticated);

        let count = lengths.stream_handler(
            StreamInfo::client_streaming("/braid.text.v1.Text/Count"),
            StreamHandler::new(
                |_ctx: CallContext, mut stream: BoxServerStream<String, u64>| async move {
                    let mut total = 0;
                    while stream.recv().await?.is_some() {
                        total += 1;
                    }
                    stream.send(total).await
                },
            ),
        );
        let inbound = futures::stream::iter(vec![Ok("a".to_string()), Ok("b".to_string())]);
        let (duplex, mut rx) = DuplexStream::<String, u64>::channel(inbound, 1);
        count.call(authorized(), duplex.boxed()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap(), 2);

        assert_eq!(metrics.stats().completed(), 2);
        assert_eq!(metrics.stats().failed(), 1);
    }
}

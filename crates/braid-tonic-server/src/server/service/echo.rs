//! Terminal echo handlers.
//!
//! These are the innermost handlers of each chain. They know nothing about
//! the middleware in front of them beyond the [`CallContext`] they receive:
//! every handler stops with `CANCELLED` once the call's token fires.

use crate::server::{
    config::ServerConfig,
    error::{Error, Result},
    proto::{EchoRequest, EchoResponse},
};
use braid::{BoxServerStream, CallContext, StreamHandler, UnaryHandler};

/// Request limits enforced by the echo handlers.
#[derive(Clone, Copy, Debug)]
pub struct Limits {
    pub max_message_len: usize,
    pub max_repeat: u32,
}

impl From<&ServerConfig> for Limits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_message_len: config.max_message_len,
            max_repeat: config.max_repeat,
        }
    }
}

impl Limits {
    fn check_message(&self, req: &EchoRequest) -> Result<()> {
        if req.message.len() > self.max_message_len {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "Message length {} exceeds maximum allowed ({})",
                    req.message.len(),
                    self.max_message_len
                ),
            });
        }
        Ok(())
    }

    /// Number of responses a server-streaming request asks for. `0` means one.
    fn repeat(&self, req: &EchoRequest) -> Result<u32> {
        if req.repeat > self.max_repeat {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "Repeat {} exceeds maximum allowed ({})",
                    req.repeat, self.max_repeat
                ),
            });
        }
        Ok(req.repeat.max(1))
    }
}

fn reply(message: String, sequence: u64) -> EchoResponse {
    EchoResponse { message, sequence }
}

/// `UnaryEcho`: returns the message unchanged.
pub fn unary_echo(limits: Limits) -> UnaryHandler<EchoRequest, EchoResponse> {
    UnaryHandler::new(move |ctx: CallContext, req: EchoRequest| async move {
        if ctx.is_cancelled() {
            return Err(Error::RequestCancelled.into());
        }
        limits.check_message(&req)?;
        Ok(reply(req.message, 0))
    })
}

/// `ServerStreamingEcho`: returns the message `repeat` times.
pub fn server_streaming_echo(limits: Limits) -> StreamHandler<EchoRequest, EchoResponse> {
    StreamHandler::new(
        move |ctx: CallContext, mut stream: BoxServerStream<EchoRequest, EchoResponse>| async move {
            let req = stream.recv().await?.ok_or_else(|| Error::InvalidRequest {
                reason: "Missing request message".to_string(),
            })?;
            limits.check_message(&req)?;
            let repeat = limits.repeat(&req)?;

            for sequence in 0..u64::from(repeat) {
                tokio::select! {
                    biased;
                    () = ctx.cancelled() => return Err(Error::RequestCancelled.into()),
                    res = stream.send(reply(req.message.clone(), sequence)) => res?,
                }
            }
            Ok(())
        },
    )
}

/// `BidirectionalStreamingEcho`: returns every message received, in order,
/// until the client half-closes.
pub fn bidirectional_streaming_echo(limits: Limits) -> StreamHandler<EchoRequest, EchoResponse> {
    StreamHandler::new(
        move |ctx: CallContext, mut stream: BoxServerStream<EchoRequest, EchoResponse>| async move {
            let mut sequence = 0;
            loop {
                let next = tokio::select! {
                    biased;
                    () = ctx.cancelled() => return Err(Error::RequestCancelled.into()),
                    next = stream.recv() => next?,
                };
                let Some(req) = next else {
                    return Ok(());
                };
                limits.check_message(&req)?;
                stream.send(reply(req.message, sequence)).await?;
                sequence += 1;
            }
        },
    )
}

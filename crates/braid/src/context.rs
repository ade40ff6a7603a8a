use core::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::{Extensions, Request, metadata::MetadataMap};

/// Per-call state threaded through every middleware and the terminal handler.
///
/// A context is owned by exactly one call. Middleware receive it by value and
/// may read or rewrite the request metadata, stash typed values in the
/// extensions, tighten the deadline, or hand it on unchanged to `next`.
///
/// Cancellation is cooperative: the host cancels the token when the client
/// goes away, and handlers that care observe it via
/// [`CallContext::cancelled`] or [`CallContext::is_cancelled`].
#[derive(Debug, Default)]
pub struct CallContext {
    metadata: MetadataMap,
    extensions: Extensions,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Creates a context from already-decoded request metadata and
    /// extensions, with a fresh cancellation token and no deadline.
    pub fn new(metadata: MetadataMap, extensions: Extensions) -> Self {
        Self {
            metadata,
            extensions,
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Splits a tonic request into a context and its message.
    pub fn from_request<T>(request: Request<T>) -> (Self, T) {
        let (metadata, extensions, message) = request.into_parts();
        (Self::new(metadata, extensions), message)
    }

    /// Replaces the cancellation token, e.g. with a child of a server-wide
    /// shutdown token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Sets the absolute deadline for this call.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Completes once the call has been cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Sets the deadline, keeping whichever of the current and the new one
    /// expires first.
    pub fn shorten_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
    }

    /// Time left until the deadline, saturating at zero. `None` if the call
    /// has no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Rebuilds a tonic request carrying this context's metadata and
    /// extensions.
    pub fn into_request<T>(self, message: T) -> Request<T> {
        Request::from_parts(self.metadata, self.extensions, message)
    }
}

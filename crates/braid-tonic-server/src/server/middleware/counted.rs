use braid::{BoxServerStream, ServerStream};
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tonic::Status;

/// Message tallies for one streaming call.
#[derive(Debug, Default)]
pub struct MessageCounts {
    received: AtomicU64,
    sent: AtomicU64,
}

impl MessageCounts {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

/// Stream handle wrapper that counts every message passing through it.
///
/// The counts live behind an `Arc` because the wrapper itself is moved into
/// `next` and is gone by the time the middleware reads them.
pub struct Counted<Req, Res> {
    inner: BoxServerStream<Req, Res>,
    counts: Arc<MessageCounts>,
}

impl<Req, Res> Counted<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    pub fn wrap(inner: BoxServerStream<Req, Res>) -> (BoxServerStream<Req, Res>, Arc<MessageCounts>) {
        let counts = Arc::new(MessageCounts::default());
        let wrapped = Self {
            inner,
            counts: Arc::clone(&counts),
        };
        (Box::new(wrapped), counts)
    }
}

#[tonic::async_trait]
impl<Req, Res> ServerStream<Req, Res> for Counted<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    async fn recv(&mut self) -> Result<Option<Req>, Status> {
        let message = self.inner.recv().await?;
        if message.is_some() {
            self.counts.received.fetch_add(1, Ordering::Relaxed);
        }
        Ok(message)
    }

    async fn send(&mut self, message: Res) -> Result<(), Status> {
        self.inner.send(message).await?;
        self.counts.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

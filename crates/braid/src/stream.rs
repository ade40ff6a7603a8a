//! Duplex stream handles for streaming calls.
//!
//! A streaming handler never sees the transport directly. It receives a
//! [`ServerStream`] and pulls requests from it and pushes responses into it.
//! Middleware can wrap the handle in their own [`ServerStream`] to observe,
//! rewrite, or reject individual messages before passing it to `next`.

use futures::{Stream, StreamExt, stream::BoxStream};
use tokio::sync::mpsc;
use tonic::Status;

/// A bidirectional message channel for one streaming call.
#[tonic::async_trait]
pub trait ServerStream<In, Out>: Send {
    /// Receives the next inbound message.
    ///
    /// Returns `Ok(None)` once the client has finished sending.
    async fn recv(&mut self) -> Result<Option<In>, Status>;

    /// Sends one outbound message.
    ///
    /// Fails if the client has gone away and nobody is reading any more.
    async fn send(&mut self, message: Out) -> Result<(), Status>;
}

/// Type-erased stream handle passed along a streaming chain.
pub type BoxServerStream<In, Out> = Box<dyn ServerStream<In, Out>>;

/// [`ServerStream`] backed by an inbound [`Stream`] and an outbound
/// [`mpsc::Sender`].
///
/// On a tonic server the inbound side is typically `tonic::Streaming<In>` and
/// the receiver half of the outbound channel becomes the response stream.
pub struct DuplexStream<In, Out> {
    inbound: BoxStream<'static, Result<In, Status>>,
    outbound: mpsc::Sender<Result<Out, Status>>,
}

impl<In, Out> DuplexStream<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    pub fn new<S>(inbound: S, outbound: mpsc::Sender<Result<Out, Status>>) -> Self
    where
        S: Stream<Item = Result<In, Status>> + Send + 'static,
    {
        Self {
            inbound: inbound.boxed(),
            outbound,
        }
    }

    /// Creates a handle together with the receiving end of its outbound
    /// channel.
    ///
    /// # Panics
    ///
    /// Panics if `buffer` is zero.
    pub fn channel<S>(inbound: S, buffer: usize) -> (Self, mpsc::Receiver<Result<Out, Status>>)
    where
        S: Stream<Item = Result<In, Status>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(inbound, tx), rx)
    }

    /// Boxes the handle for use with a [`StreamHandler`](crate::StreamHandler).
    pub fn boxed(self) -> BoxServerStream<In, Out> {
        Box::new(self)
    }
}

#[tonic::async_trait]
impl<In, Out> ServerStream<In, Out> for DuplexStream<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    async fn recv(&mut self) -> Result<Option<In>, Status> {
        self.inbound.next().await.transpose()
    }

    async fn send(&mut self, message: Out) -> Result<(), Status> {
        self.outbound
            .send(Ok(message))
            .await
            .map_err(|_| Status::cancelled("response stream closed by peer"))
    }
}

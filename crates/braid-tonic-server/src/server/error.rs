//! Error types for the echo service and its middleware.
//!
//! Every variant maps onto a gRPC status via `From<Error> for Status`, so
//! middleware and handlers can return `Err(Error::... .into())` and the chain
//! carries the resulting status unchanged back to the client.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// No `authorization` metadata was sent.
    #[error("Missing authorization token")]
    MissingToken,

    /// An `authorization` value was sent but did not match.
    #[error("Invalid authorization token")]
    InvalidToken,

    /// The client request was invalid or exceeded constraints.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The call ran past its deadline.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The client aborted the request or the server is shutting down.
    #[error("Request cancelled")]
    RequestCancelled,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::MissingToken => Status::unauthenticated("missing authorization token"),
            Error::InvalidToken => Status::unauthenticated("invalid authorization token"),
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::DeadlineExceeded => Status::deadline_exceeded("deadline exceeded"),
            Error::RequestCancelled => Status::cancelled("request was cancelled"),
        }
    }
}

//! Generated code for `proto/echo.proto`.

#![allow(clippy::all, clippy::pedantic)]

tonic::include_proto!("braid.echo.v1");

pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("echo_descriptor");

/// gRPC paths of the `Echo` methods, as seen by middleware.
pub mod method {
    pub const UNARY_ECHO: &str = "/braid.echo.v1.Echo/UnaryEcho";
    pub const SERVER_STREAMING_ECHO: &str = "/braid.echo.v1.Echo/ServerStreamingEcho";
    pub const BIDIRECTIONAL_STREAMING_ECHO: &str =
        "/braid.echo.v1.Echo/BidirectionalStreamingEcho";
}

//! Static per-method call metadata.
//!
//! An info value is captured once when a chain is bound to a method and the
//! same value is handed to every middleware for every call on that method.

use std::borrow::Cow;

/// Metadata for a unary method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnaryInfo {
    full_method: Cow<'static, str>,
}

impl UnaryInfo {
    /// `full_method` is the gRPC path, e.g. `/braid.echo.v1.Echo/UnaryEcho`.
    pub fn new(full_method: impl Into<Cow<'static, str>>) -> Self {
        Self {
            full_method: full_method.into(),
        }
    }

    pub fn full_method(&self) -> &str {
        &self.full_method
    }

    /// The fully-qualified service name, e.g. `braid.echo.v1.Echo`.
    pub fn service(&self) -> &str {
        split_path(&self.full_method).0
    }

    /// The bare method name, e.g. `UnaryEcho`.
    pub fn method(&self) -> &str {
        split_path(&self.full_method).1
    }
}

/// Metadata for a streaming method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamInfo {
    full_method: Cow<'static, str>,
    client_streaming: bool,
    server_streaming: bool,
}

impl StreamInfo {
    pub fn new(
        full_method: impl Into<Cow<'static, str>>,
        client_streaming: bool,
        server_streaming: bool,
    ) -> Self {
        Self {
            full_method: full_method.into(),
            client_streaming,
            server_streaming,
        }
    }

    /// Both sides stream.
    pub fn bidirectional(full_method: impl Into<Cow<'static, str>>) -> Self {
        Self::new(full_method, true, true)
    }

    /// Single request in, stream of responses out.
    pub fn server_streaming(full_method: impl Into<Cow<'static, str>>) -> Self {
        Self::new(full_method, false, true)
    }

    /// Stream of requests in, single response out.
    pub fn client_streaming(full_method: impl Into<Cow<'static, str>>) -> Self {
        Self::new(full_method, true, false)
    }

    pub fn full_method(&self) -> &str {
        &self.full_method
    }

    pub fn service(&self) -> &str {
        split_path(&self.full_method).0
    }

    pub fn method(&self) -> &str {
        split_path(&self.full_method).1
    }

    pub fn is_client_stream(&self) -> bool {
        self.client_streaming
    }

    pub fn is_server_stream(&self) -> bool {
        self.server_streaming
    }
}

/// Splits `/pkg.Service/Method` into `("pkg.Service", "Method")`. Paths
/// without a method separator yield the whole path as the service.
fn split_path(path: &str) -> (&str, &str) {
    let path = path.strip_prefix('/').unwrap_or(path);
    match path.rsplit_once('/') {
        Some((service, method)) => (service, method),
        None => (path, ""),
    }
}

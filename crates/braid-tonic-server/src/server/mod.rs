//! Server internals.
//!
//! - [`config`] - CLI/env configuration.
//! - [`error`] - Service error type and its mapping to `tonic::Status`.
//! - [`middleware`] - The cross-cutting behaviors installed in the chain.
//! - [`proto`] - Generated protobuf types and service traits.
//! - [`service`] - Echo terminal handlers and the tonic service adapter.
//! - [`telemetry`] - Logging, tracing and metrics bootstrap.

pub mod config;
pub mod error;
pub mod middleware;
pub mod proto;
pub mod service;
pub mod telemetry;

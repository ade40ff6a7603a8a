//! The echo service, served through the middleware chain.
//!
//! ## Structure
//!
//! - [`context`] - Building a [`braid::CallContext`] from an incoming call.
//! - [`echo`] - The terminal echo handlers.
//! - [`handler`] - gRPC service entry point (`EchoService`).

pub mod context;
pub mod echo;
pub mod handler;

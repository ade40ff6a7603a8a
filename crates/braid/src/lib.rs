#![doc = include_str!("../README.md")]

mod chain;
mod context;
mod handler;
mod info;
mod middleware;
mod registry;
mod stream;


pub use crate::chain::*;
pub use crate::context::*;
pub use crate::handler::*;
pub use crate::info::*;
pub use crate::middleware::*;
pub use crate::registry::*;
pub use crate::stream::*;

//! Gateway Layer
//!
//! Typed access to the remote execution gateway.

pub mod client;
pub mod http;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{GatewayClient, GatewayResult};
pub use http::HttpGatewayClient;
pub use types::*;

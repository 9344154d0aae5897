//! JSON-RPC plumbing for talking to launched nodes
//!
//! This module provides:
//! - A transport trait so backends can be swapped (HTTP in production, mocks in tests)
//! - A typed client facade that classifies failures
//! - An HTTP transport built on the ethers JSON-RPC provider

pub mod client;
pub mod http;

pub use client::RpcClient;
pub use http::HttpTransport;

use crate::error::MeshResult;

use async_trait::async_trait;
use serde_json::Value;

/// A connection that can carry one JSON-RPC request/response exchange at a time.
///
/// Implementations return the raw `result` member of the response, or
/// `Value::Null` when the response carried no result.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Send `method` with positional `params` and return the decoded result
    async fn request(&self, method: &str, params: Vec<Value>) -> MeshResult<Value>;

    /// Human-readable address of the remote end, used in errors and logs
    fn endpoint(&self) -> String;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Transport whose requests never complete, like a node that accepted the
    /// connection and then hung
    pub struct StalledTransport;

    #[async_trait]
    impl RpcTransport for StalledTransport {
        async fn request(&self, _method: &str, _params: Vec<Value>) -> MeshResult<Value> {
            std::future::pending().await
        }

        fn endpoint(&self) -> String {
            "mock://stalled".to_string()
        }
    }
}

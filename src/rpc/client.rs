//! Typed JSON-RPC client facade

use super::RpcTransport;
use crate::error::{MeshError, MeshResult};

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Applied to every call unless the client is built with another timeout
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Client bound to a single node's RPC endpoint.
///
/// Cloning is cheap and shares the underlying connection. There is no retry
/// logic here; callers decide when to try again. A call that outlives the
/// timeout fails as a transport error.
#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<dyn RpcTransport>,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    /// Call a method expecting a string result
    pub async fn call_string(&self, method: &str, params: Vec<Value>) -> MeshResult<String> {
        match self.call(method, params).await? {
            Value::String(s) => Ok(s),
            other => Err(type_mismatch(method, "string", &other)),
        }
    }

    /// Call a method expecting a boolean result
    pub async fn call_bool(&self, method: &str, params: Vec<Value>) -> MeshResult<bool> {
        match self.call(method, params).await? {
            Value::Bool(b) => Ok(b),
            other => Err(type_mismatch(method, "boolean", &other)),
        }
    }

    /// Call a method expecting an object result
    pub async fn call_map(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> MeshResult<Map<String, Value>> {
        match self.call(method, params).await? {
            Value::Object(map) => Ok(map),
            other => Err(type_mismatch(method, "mapping", &other)),
        }
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> MeshResult<Value> {
        debug!("RPC {} -> {} {:?}", self.transport.endpoint(), method, params);

        // Transport errors pass through untouched
        let request = self.transport.request(method, params);
        let result = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| MeshError::RpcTransport {
                endpoint: self.transport.endpoint(),
                method: method.to_string(),
                message: format!("no response within {:?}", self.timeout),
            })??;
        if result.is_null() {
            return Err(MeshError::RpcEmptyResult {
                endpoint: self.transport.endpoint(),
                method: method.to_string(),
            });
        }
        Ok(result)
    }
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("endpoint", &self.transport.endpoint())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn type_mismatch(method: &str, expected: &'static str, found: &Value) -> MeshError {
    let found = match found {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "mapping",
    };
    MeshError::RpcTypeMismatch {
        method: method.to_string(),
        expected,
        found: found.to_string(),
    }
}

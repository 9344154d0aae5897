//! Error types for the chain mesh launcher

use thiserror::Error;

/// Main error type for the launcher
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read chain directory {path}: {source}")]
    ReadDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read config file for chain {chain}: {source}")]
    ReadConf {
        chain: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Chain {chain} does not enable RPC (missing --rpc flag)")]
    RpcNotEnabled { chain: String },

    #[error("Chain {chain} has invalid {flag} value '{value}'")]
    InvalidPort {
        chain: String,
        flag: String,
        value: String,
    },

    #[error("Port {port} is used by both chain {first} and chain {second}")]
    DuplicatePort {
        port: u16,
        first: String,
        second: String,
    },

    #[error("Chain name {chain} is used by more than one directory")]
    DuplicateChain { chain: String },

    #[error("Failed to create RPC client for chain {chain}: {message}")]
    RpcClient { chain: String, message: String },

    #[error("Failed to start chain {chain}: {message}")]
    Spawn { chain: String, message: String },

    #[error("Chain {chain} exited with {status}{}", format_stderr(.stderr))]
    ProcessExit {
        chain: String,
        status: String,
        stderr: String,
    },

    #[error("RPC transport error calling {method} on {endpoint}: {message}")]
    RpcTransport {
        endpoint: String,
        method: String,
        message: String,
    },

    #[error("No response to {method} from {endpoint}")]
    RpcEmptyResult { endpoint: String, method: String },

    #[error("Unexpected result type from {method}: expected {expected}, got {found}")]
    RpcTypeMismatch {
        method: String,
        expected: &'static str,
        found: String,
    },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MeshError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MeshError::RpcTransport { .. }
                | MeshError::RpcEmptyResult { .. }
                | MeshError::RpcTypeMismatch { .. }
        )
    }
}

fn format_stderr(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!("; stderr: {}", stderr)
    }
}

/// Result type for launcher operations
pub type MeshResult<T> = Result<T, MeshError>;

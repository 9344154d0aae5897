//! Chain module - discovers chain directories and describes how to launch them
//!
//! This module provides:
//! - `ChainDescriptor`, the per-chain launch description shared by every stage
//! - Directory scanning and argument resolution
//! - The vendor method table used for RPC dispatch

pub mod args;
pub mod resolver;
pub mod vendor;

pub use resolver::ChainResolver;
pub use vendor::{IdentityShape, NodeVendor};

use crate::rpc::RpcClient;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Everything needed to launch and talk to one chain
#[derive(Debug)]
pub struct ChainDescriptor {
    /// Unique name, from the directory or an explicit `--chain` argument
    identity: String,
    /// The chain's own directory
    chain_dir: PathBuf,
    /// Executable found in the directory, if any
    executable: Option<PathBuf>,
    /// Arguments passed verbatim to the process
    launch_args: Vec<String>,
    rpc_port: u16,
    listen_port: u16,
    vendor: NodeVendor,
    /// Set once by the readiness poller, read-only afterwards
    enode: OnceLock<String>,
    /// Client bound to this chain's RPC port
    client: RpcClient,
}

impl ChainDescriptor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: String,
        chain_dir: PathBuf,
        executable: Option<PathBuf>,
        launch_args: Vec<String>,
        rpc_port: u16,
        listen_port: u16,
        vendor: NodeVendor,
        client: RpcClient,
    ) -> Self {
        Self {
            identity,
            chain_dir,
            executable,
            launch_args,
            rpc_port,
            listen_port,
            vendor,
            enode: OnceLock::new(),
            client,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn chain_dir(&self) -> &Path {
        &self.chain_dir
    }

    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    pub fn launch_args(&self) -> &[String] {
        &self.launch_args
    }

    pub fn rpc_port(&self) -> u16 {
        self.rpc_port
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn vendor(&self) -> NodeVendor {
        self.vendor
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    /// The node's enode address, once known
    pub fn enode(&self) -> Option<&str> {
        self.enode.get().map(String::as_str)
    }

    pub fn is_ready(&self) -> bool {
        self.enode.get().is_some()
    }

    /// Record the enode address. Returns false if one was already recorded,
    /// in which case the stored address is left untouched.
    pub(crate) fn set_enode(&self, enode: String) -> bool {
        self.enode.set(enode).is_ok()
    }

    /// Where the process's stdout is written. Always a file directly inside
    /// the chain directory, named after the directory unless overridden.
    pub fn log_path(&self, file_name: Option<&str>) -> PathBuf {
        let configured = file_name.and_then(|name| Path::new(name).file_name());
        let name = match configured {
            Some(name) => name.to_os_string(),
            None => {
                let stem = self
                    .chain_dir
                    .file_name()
                    .or_else(|| Path::new(&self.identity).file_name())
                    .unwrap_or_else(|| OsStr::new("chain"));
                let mut name = stem.to_os_string();
                name.push(".log");
                name
            }
        };
        self.chain_dir.join(name)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::rpc::{MockRpcTransport, RpcClient};
    use std::sync::Arc;

    /// Descriptor backed by the given mock transport
    pub fn descriptor(
        identity: &str,
        vendor: NodeVendor,
        mut transport: MockRpcTransport,
    ) -> ChainDescriptor {
        let endpoint = format!("mock://{}", identity);
        transport.expect_endpoint().return_const(endpoint);
        with_client(identity, vendor, RpcClient::new(Arc::new(transport)))
    }

    /// Descriptor around an already built client
    pub fn with_client(identity: &str, vendor: NodeVendor, client: RpcClient) -> ChainDescriptor {
        ChainDescriptor::new(
            identity.to_string(),
            PathBuf::from("/nonexistent").join(identity),
            None,
            vec!["--rpc".to_string()],
            8545,
            30303,
            vendor,
            client,
        )
    }
}

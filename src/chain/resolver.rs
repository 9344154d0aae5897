//! Turns a base directory of chain subdirectories into launch descriptors

use super::args::{default_args, enables_rpc, flag_value, tokenize};
use super::{ChainDescriptor, NodeVendor};
use crate::config::LauncherConfig;
use crate::error::{MeshError, MeshResult};
use crate::rpc::{HttpTransport, RpcClient};

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const RPC_PORT_FLAGS: &[&str] = &["rpcport", "rpc-port"];
const LISTEN_PORT_FLAGS: &[&str] = &["port"];
const IPC_EXTENSION: &str = "ipc";
const CONF_EXTENSION: &str = "conf";

/// Resolves chain directories into descriptors
pub struct ChainResolver {
    config: LauncherConfig,
}

/// Files of interest found in a chain directory
#[derive(Debug, Default)]
struct ChainFiles {
    executable: Option<PathBuf>,
    conf: Option<PathBuf>,
}

impl ChainResolver {
    pub fn new(config: LauncherConfig) -> Self {
        Self { config }
    }

    /// Scan the base directory and build one descriptor per chain subdirectory.
    ///
    /// Entries are visited in file name order, so resolving an unchanged
    /// directory twice yields the same descriptors and ports.
    pub fn resolve(&self) -> MeshResult<Vec<Arc<ChainDescriptor>>> {
        let base_dir = &self.config.base_dir;
        info!("Resolving chains in {}", base_dir.display());

        let mut descriptors: Vec<Arc<ChainDescriptor>> = Vec::new();

        for path in sorted_entries(base_dir)? {
            let name = match path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };

            if name.starts_with('.') {
                debug!("Skipping hidden entry {}", name);
                continue;
            }

            if self.config.is_excluded(&name) {
                info!("Skipping excluded chain {}", name);
                continue;
            }

            if !path.is_dir() {
                warn!("Skipping {} - not a directory", path.display());
                continue;
            }

            let descriptor = self.resolve_chain(&path, name, descriptors.len())?;
            info!(
                "Resolved chain {} ({}, rpc {}, listen {})",
                descriptor.identity(),
                descriptor.vendor(),
                descriptor.rpc_port(),
                descriptor.listen_port()
            );
            descriptors.push(Arc::new(descriptor));
        }

        check_unique(&descriptors)?;

        Ok(descriptors)
    }

    /// Resolve a single chain directory. `index` is the chain's position among
    /// resolved chains and offsets the default ports.
    fn resolve_chain(
        &self,
        chain_dir: &Path,
        dir_name: String,
        index: usize,
    ) -> MeshResult<ChainDescriptor> {
        let files = scan_chain_dir(chain_dir)?;

        let vendor = match &files.executable {
            Some(executable) => NodeVendor::from_executable(executable),
            None => {
                warn!("No executable found for chain {}", dir_name);
                NodeVendor::Geth
            }
        };

        let default_rpc = offset_port(self.config.rpc_port_base, index, &dir_name)?;
        let default_listen = offset_port(self.config.listen_port_base, index, &dir_name)?;

        let mut identity = dir_name;
        let launch_args = match &files.conf {
            Some(conf) => {
                let text = fs::read_to_string(conf).map_err(|source| MeshError::ReadConf {
                    chain: identity.clone(),
                    source,
                })?;
                let args = tokenize(&text);
                if let Some(chain) = flag_value(&args, &["chain"]) {
                    debug!("Chain {} renamed to {} by {}", identity, chain, conf.display());
                    identity = chain.to_string();
                }
                args
            }
            None => default_args(
                vendor,
                &identity,
                chain_dir,
                default_rpc,
                default_listen,
                &self.config,
            ),
        };

        if !enables_rpc(&launch_args) {
            return Err(MeshError::RpcNotEnabled { chain: identity });
        }

        let rpc_port = parse_port(&launch_args, RPC_PORT_FLAGS, &identity)?.unwrap_or(default_rpc);
        let listen_port =
            parse_port(&launch_args, LISTEN_PORT_FLAGS, &identity)?.unwrap_or(default_listen);

        let transport = HttpTransport::new(&self.config.rpc_domain, rpc_port).map_err(|e| {
            MeshError::RpcClient {
                chain: identity.clone(),
                message: e.to_string(),
            }
        })?;

        Ok(ChainDescriptor::new(
            identity,
            chain_dir.to_path_buf(),
            files.executable,
            launch_args,
            rpc_port,
            listen_port,
            vendor,
            RpcClient::new(Arc::new(transport)).with_timeout(self.config.rpc_timeout()),
        ))
    }
}

/// Directory entries sorted by file name
fn sorted_entries(dir: &Path) -> MeshResult<Vec<PathBuf>> {
    let read_err = |source| MeshError::ReadDir {
        path: dir.display().to_string(),
        source,
    };

    let mut paths = fs::read_dir(dir)
        .map_err(read_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)?;
    paths.sort();
    Ok(paths)
}

/// Find the executable and the `.conf` file. The first match of each wins.
fn scan_chain_dir(chain_dir: &Path) -> MeshResult<ChainFiles> {
    let mut files = ChainFiles::default();

    for path in sorted_entries(chain_dir)? {
        // Follow symlinks so a linked binary counts
        let metadata = match fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                warn!("Cannot stat {}: {}", path.display(), e);
                continue;
            }
        };

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();

        if extension == CONF_EXTENSION {
            if files.conf.is_none() {
                files.conf = Some(path);
            }
            continue;
        }

        if files.executable.is_none() && extension != IPC_EXTENSION && is_user_executable(&metadata)
        {
            files.executable = Some(path);
        }
    }

    Ok(files)
}

#[cfg(unix)]
fn is_user_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn is_user_executable(_metadata: &fs::Metadata) -> bool {
    false
}

fn offset_port(base: u16, index: usize, chain: &str) -> MeshResult<u16> {
    u16::try_from(index)
        .ok()
        .and_then(|i| base.checked_add(i))
        .ok_or_else(|| MeshError::InvalidPort {
            chain: chain.to_string(),
            flag: "default port".to_string(),
            value: format!("{}+{}", base, index),
        })
}

fn parse_port(args: &[String], flags: &[&str], chain: &str) -> MeshResult<Option<u16>> {
    match flag_value(args, flags) {
        Some(value) => value
            .parse::<u16>()
            .map(Some)
            .map_err(|_| MeshError::InvalidPort {
                chain: chain.to_string(),
                flag: flags[0].to_string(),
                value: value.to_string(),
            }),
        None => Ok(None),
    }
}

/// Chain names and ports must not repeat within one run
fn check_unique(descriptors: &[Arc<ChainDescriptor>]) -> MeshResult<()> {
    let mut names = HashSet::new();
    let mut ports: HashMap<u16, &str> = HashMap::new();

    for chain in descriptors {
        if !names.insert(chain.identity()) {
            return Err(MeshError::DuplicateChain {
                chain: chain.identity().to_string(),
            });
        }

        for port in [chain.rpc_port(), chain.listen_port()] {
            if let Some(first) = ports.insert(port, chain.identity()) {
                return Err(MeshError::DuplicatePort {
                    port,
                    first: first.to_string(),
                    second: chain.identity().to_string(),
                });
            }
        }
    }

    Ok(())
}

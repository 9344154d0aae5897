//! Launch argument handling: `.conf` tokenizing, defaults and flag lookup

use super::NodeVendor;
use crate::config::LauncherConfig;

use std::path::Path;

/// Split config file text into argument tokens.
///
/// Whitespace and backslashes (line continuations) both delimit tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c == '\\')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build a default argument list for a chain with no `.conf` file
pub fn default_args(
    vendor: NodeVendor,
    identity: &str,
    chain_dir: &Path,
    rpc_port: u16,
    listen_port: u16,
    config: &LauncherConfig,
) -> Vec<String> {
    let data_dir = chain_dir.join("data").display().to_string();
    let log_dir = chain_dir.join("logs").display().to_string();

    match vendor {
        NodeVendor::Geth => vec![
            "--datadir".into(),
            data_dir,
            "--chain".into(),
            identity.into(),
            "--nodiscover".into(),
            "--port".into(),
            listen_port.to_string(),
            "--rpc".into(),
            "--rpcport".into(),
            rpc_port.to_string(),
            "--cache".into(),
            config.cache_size.to_string(),
            "--rpcapi".into(),
            config.vendors.geth.rpc_api.clone(),
            "--log-dir".into(),
            log_dir,
        ],
        NodeVendor::Parity => vec![
            "--base-path".into(),
            data_dir,
            "--chain".into(),
            config.vendors.parity.chain.clone(),
            "--no-discovery".into(),
            "--port".into(),
            listen_port.to_string(),
            "--rpc".into(),
            "--rpcport".into(),
            rpc_port.to_string(),
            "--cache-size".into(),
            config.cache_size.to_string(),
            "--rpcapi".into(),
            config.vendors.parity.rpc_api.clone(),
            "--log-file".into(),
            chain_dir.join("logs").join("parity.log").display().to_string(),
        ],
    }
}

/// Whether the arguments turn on the HTTP RPC server
pub fn enables_rpc(args: &[String]) -> bool {
    args.iter().any(|a| flag_name(a) == Some("rpc"))
}

/// Value of the first flag among `names`, in `--flag value` or `--flag=value` form
pub fn flag_value<'a>(args: &'a [String], names: &[&str]) -> Option<&'a str> {
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        let Some(name) = flag_name(arg) else {
            continue;
        };

        if let Some((name, value)) = name.split_once('=') {
            if names.contains(&name) {
                return Some(value);
            }
            continue;
        }

        if names.contains(&name) {
            return iter.peek().map(|v| v.as_str());
        }
    }
    None
}

/// Strip one or two leading dashes; `None` for positional values
fn flag_name(arg: &str) -> Option<&str> {
    arg.strip_prefix("--")
        .or_else(|| arg.strip_prefix('-'))
        .filter(|name| !name.is_empty())
}

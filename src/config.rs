//! Configuration management for the chain mesh launcher
//!
//! Loads configuration from TOML files with environment variable substitution.
//! Every value has a built-in default so the launcher can run from the
//! command line alone.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub launcher: LauncherConfig,
    pub vendors: VendorsConfig,
    pub metrics: MetricsConfig,
}

/// Everything the chain resolver needs to turn directories into descriptors
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub base_dir: PathBuf,
    pub exclude: Vec<String>,
    pub rpc_domain: String,
    pub rpc_port_base: u16,
    pub listen_port_base: u16,
    pub cache_size: u32,
    pub poll_interval_ms: u64,
    pub rpc_timeout_ms: u64,
    pub readiness_timeout_secs: Option<u64>,
    pub log_file_name: Option<String>,
    #[serde(skip)]
    pub vendors: VendorsConfig,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::new(),
            exclude: Vec::new(),
            rpc_domain: "127.0.0.1".to_string(),
            rpc_port_base: 8545,
            listen_port_base: 30303,
            cache_size: 512,
            poll_interval_ms: 1000,
            rpc_timeout_ms: 5000,
            readiness_timeout_secs: None,
            log_file_name: None,
            vendors: VendorsConfig::default(),
        }
    }
}

impl LauncherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Upper bound on a single RPC exchange with a node
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn readiness_timeout(&self) -> Option<Duration> {
        self.readiness_timeout_secs.map(Duration::from_secs)
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|e| e == name)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VendorsConfig {
    pub geth: GethConfig,
    pub parity: ParityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GethConfig {
    pub rpc_api: String,
}

impl Default for GethConfig {
    fn default() -> Self {
        Self {
            rpc_api: "eth,admin,debug,miner,net,web3,txpool".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParityConfig {
    pub rpc_api: String,
    pub chain: String,
}

impl Default for ParityConfig {
    fn default() -> Self {
        Self {
            rpc_api: "web3,eth,net,parity,parity_set,traces,rpc".to_string(),
            chain: "classic".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9615,
        }
    }
}

/// Values supplied on the command line, applied on top of the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_dir: Option<PathBuf>,
    pub exclude: Option<String>,
    pub rpc_domain: Option<String>,
}

impl Settings {
    /// Load settings from the given file, `CHAINMESH_CONFIG`, or
    /// `config/default.toml`, falling back to built-in defaults
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| env::var("CHAINMESH_CONFIG").ok().map(PathBuf::from));

        let mut settings = match explicit {
            Some(config_path) => Self::from_file(&config_path)?,
            None => {
                let default_path = PathBuf::from("config/default.toml");
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Settings::default()
                }
            }
        };

        settings.apply(overrides);
        settings.validate()?;

        Ok(settings)
    }

    fn from_file(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
        Self::from_toml(&config_str)
    }

    /// Parse settings from TOML text
    pub fn from_toml(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let mut settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;
        settings.launcher.vendors = settings.vendors.clone();
        Ok(settings)
    }

    fn apply(&mut self, overrides: Overrides) {
        if let Some(base_dir) = overrides.base_dir {
            self.launcher.base_dir = base_dir;
        }
        if let Some(exclude) = overrides.exclude {
            self.launcher.exclude = parse_exclusions(&exclude);
        }
        if let Some(domain) = overrides.rpc_domain {
            self.launcher.rpc_domain = domain;
        }
        self.launcher.vendors = self.vendors.clone();
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.launcher.base_dir.as_os_str().is_empty() {
            anyhow::bail!("No base directory configured (use --base-dir)");
        }
        if !self.launcher.base_dir.is_dir() {
            anyhow::bail!(
                "Base directory {:?} is not a directory",
                self.launcher.base_dir
            );
        }
        if self.launcher.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }
        if self.launcher.rpc_timeout_ms == 0 {
            anyhow::bail!("rpc_timeout_ms must be greater than zero");
        }
        if self.launcher.rpc_domain.is_empty() {
            anyhow::bail!("rpc_domain must not be empty");
        }

        Ok(())
    }
}

/// Split a comma-separated exclusion list, dropping blanks
pub fn parse_exclusions(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid regex");
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

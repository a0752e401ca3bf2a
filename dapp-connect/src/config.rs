use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::router::ProtocolVersion;
use crate::transport::AppMetadata;

/// Main configuration for dapp-connect
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay websocket endpoint
    #[serde(default = "default_relay_url")]
    pub url: String,

    /// Project id issued by the relay operator, if it requires one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// How the wallet describes itself to dapps
    #[serde(default = "default_wallet_metadata")]
    pub metadata: AppMetadata,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
            project_id: None,
            metadata: default_wallet_metadata(),
        }
    }
}

fn default_relay_url() -> String {
    "wss://relay.walletconnect.org".to_string()
}

fn default_wallet_metadata() -> AppMetadata {
    AppMetadata {
        name: "dapp-connect wallet".to_string(),
        description: "Wallet-side session layer for relay-paired dapps".to_string(),
        url: "https://localhost".to_string(),
        icons: Vec::new(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Let signing requests reach the approval UI for watch-only wallets
    #[serde(default)]
    pub allow_on_read_only: bool,

    /// Cancel approvals nobody acted on after this many seconds (0 = never)
    #[serde(default)]
    pub approval_timeout_secs: u64,
}

impl SigningConfig {
    pub fn approval_timeout(&self) -> Option<Duration> {
        (self.approval_timeout_secs > 0).then(|| Duration::from_secs(self.approval_timeout_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Per-request timeout for passthrough calls
    #[serde(default = "default_rpc_timeout_secs")]
    pub timeout_secs: u64,

    /// Chain infrastructure endpoints, one per native chain id
    #[serde(default)]
    pub endpoints: Vec<RpcEndpoint>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_rpc_timeout_secs(),
            endpoints: Vec::new(),
        }
    }
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcEndpoint {
    pub chain_id: u64,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub version: ProtocolVersion,
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    /// Load config, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }
}

/// Default config location: `<config dir>/dapp-connect/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dapp-connect")
        .join("config.toml")
}

//! Run configuration.
//!
//! Values are layered with figment: built-in defaults, then an optional TOML file,
//! then `DEVCHAIN_`-prefixed environment variables (nested keys separated by `__`,
//! e.g. `DEVCHAIN_NODE__PORT`). The CLI applies its flags on top.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use alloy_signer_local::PrivateKeySigner;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    DeployError,
    probe::DEFAULT_PROBE_TIMEOUT,
    services::{forge::ToolConfig, node::NodeConfig},
    store::DEFAULT_DESCRIPTOR_PATH,
    verifier::DEFAULT_VERIFY_TIMEOUT,
};

/// The default name of the configuration file, looked up in the working directory.
pub const CONFIG_FILENAME: &str = "Devchain.toml";
/// Prefix of the environment variables read into the configuration.
pub const ENV_PREFIX: &str = "DEVCHAIN_";

/// Default node RPC endpoint.
pub const DEFAULT_RPC_URL: &str = "http://localhost:8545";
/// Chain id of the local development node.
pub const DEFAULT_CHAIN_ID: u64 = 31337;
/// Network name written to the descriptor.
pub const DEFAULT_NETWORK: &str = "anvil";
/// First pre-funded account of the development node.
pub const DEFAULT_PRIVATE_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
/// Delay between the deployment and the bytecode check.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// A hex-encoded private key. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SigningKey(String);

impl SigningKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key, for handing to the deploy tool.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Parse the key into a signer.
    pub fn signer(&self) -> Result<PrivateKeySigner, DeployError> {
        PrivateKeySigner::from_str(self.0.trim())
            .map_err(|e| DeployError::InvalidConfig(format!("invalid private key: {e}")))
    }
}

impl Default for SigningKey {
    fn default() -> Self {
        Self::new(DEFAULT_PRIVATE_KEY)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

/// Configuration for a deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Node JSON-RPC endpoint.
    pub rpc_url: String,
    /// Network name written to the descriptor.
    pub network: String,
    /// Chain id of the node, also passed to a node started by this run.
    pub chain_id: u64,
    /// Key used to sign the deployment transactions.
    pub private_key: SigningKey,
    /// Where the deployment descriptor is written.
    pub descriptor_path: PathBuf,
    /// Bound on a single liveness request.
    pub probe_timeout_ms: u64,
    /// Bound on the bytecode lookup.
    pub verify_timeout_ms: u64,
    /// Delay between the deployment and the bytecode check.
    pub settle_delay_ms: u64,
    /// Keep a node started by this run alive until interrupted.
    pub keep_node: bool,
    /// Node started when none is running.
    pub node: NodeConfig,
    /// Deploy tool and script.
    pub tool: ToolConfig,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            network: DEFAULT_NETWORK.to_string(),
            chain_id: DEFAULT_CHAIN_ID,
            private_key: SigningKey::default(),
            descriptor_path: PathBuf::from(DEFAULT_DESCRIPTOR_PATH),
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT.as_millis() as u64,
            verify_timeout_ms: DEFAULT_VERIFY_TIMEOUT.as_millis() as u64,
            settle_delay_ms: DEFAULT_SETTLE_DELAY.as_millis() as u64,
            keep_node: false,
            node: NodeConfig::default(),
            tool: ToolConfig::default(),
        }
    }
}

impl DeployConfig {
    /// Layered configuration sources.
    ///
    /// `path` must exist when given. Without it, [`CONFIG_FILENAME`] is read from the
    /// working directory if present.
    pub fn figment(path: Option<&Path>) -> Result<Figment, DeployError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        match path {
            Some(path) if !path.is_file() => {
                return Err(DeployError::InvalidConfig(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
            Some(path) => figment = figment.merge(Toml::file(path)),
            None if Path::new(CONFIG_FILENAME).is_file() => {
                figment = figment.merge(Toml::file(CONFIG_FILENAME));
            }
            None => {}
        }

        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load the configuration from every source and validate it.
    pub fn load(path: Option<&Path>) -> Result<Self, DeployError> {
        Self::from_figment(Self::figment(path)?)
    }

    pub fn from_figment(figment: Figment) -> Result<Self, DeployError> {
        let config: Self = figment
            .extract()
            .map_err(|e| DeployError::InvalidConfig(e.to_string()))?;
        config.validate()?;

        tracing::debug!(?config, "Configuration loaded");

        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), DeployError> {
        self.parsed_rpc_url()?;
        self.private_key.signer()?;

        if self.network.trim().is_empty() {
            return Err(DeployError::InvalidConfig(
                "network name must not be empty".to_string(),
            ));
        }
        if self.chain_id == 0 {
            return Err(DeployError::InvalidConfig(
                "chain id must be non-zero".to_string(),
            ));
        }
        if self.tool.script.trim().is_empty() {
            return Err(DeployError::InvalidConfig(
                "deployment script must not be empty".to_string(),
            ));
        }
        if self.node.port == 0 {
            return Err(DeployError::InvalidConfig(
                "node port must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn parsed_rpc_url(&self) -> Result<Url, DeployError> {
        Url::parse(&self.rpc_url).map_err(|e| {
            DeployError::InvalidConfig(format!("invalid RPC URL `{}`: {e}", self.rpc_url))
        })
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Directory holding the deploy tool's broadcast artifacts.
    pub fn broadcast_dir(&self) -> PathBuf {
        self.tool.broadcast_dir(self.chain_id)
    }
}

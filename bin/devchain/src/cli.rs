use std::path::PathBuf;

use clap::{Parser, Subcommand};
use devchain_deploy::{DeployConfig, DeployError, SigningKey};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "devchain")]
#[command(
    author,
    version,
    about = "Deploy a contract to a local development chain, exactly once"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(
        short,
        long,
        env = "DEVCHAIN_VERBOSITY",
        default_value_t = LevelFilter::INFO,
        global = true
    )]
    pub verbosity: LevelFilter,

    /// Path to a Devchain.toml configuration file.
    ///
    /// If not provided, Devchain.toml is read from the current directory when present.
    #[arg(long, alias = "conf", env = "DEVCHAIN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Overrides applied on top of the configuration file and environment.
    #[clap(flatten)]
    pub overrides: ConfigOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Make sure the contract is deployed, starting a node if needed (default).
    #[default]
    Deploy,
    /// Check whether the node answers on its RPC endpoint.
    Check,
    /// Show the recorded deployment and whether it is live.
    Status,
}

/// Command-line overrides for the deployment configuration.
#[derive(Debug, Clone, Default, Parser)]
pub struct ConfigOverrides {
    /// The node JSON-RPC endpoint.
    ///
    /// Defaults to http://localhost:<port>.
    #[arg(long, env = "DEVCHAIN_RPC_URL", global = true)]
    pub rpc_url: Option<String>,

    /// The port of a node started by this run.
    #[arg(long, env = "DEVCHAIN_PORT", global = true)]
    pub port: Option<u16>,

    /// The bind address of a node started by this run.
    #[arg(long, env = "DEVCHAIN_HOST", global = true)]
    pub host: Option<String>,

    /// The deployment script, as `path/to/Script.s.sol:ContractName`.
    #[arg(long, env = "DEVCHAIN_SCRIPT", global = true)]
    pub script: Option<String>,

    /// The Foundry project directory.
    #[arg(long, env = "DEVCHAIN_PROJECT_DIR", global = true)]
    pub project_dir: Option<PathBuf>,

    /// Where the deployment descriptor is written.
    #[arg(long, env = "DEVCHAIN_DESCRIPTOR", global = true)]
    pub descriptor: Option<PathBuf>,

    /// The private key used to sign the deployment.
    #[arg(long, env = "DEVCHAIN_PRIVATE_KEY", hide_env_values = true, global = true)]
    pub private_key: Option<String>,

    /// Keep a node started by this run alive until Ctrl+C.
    #[arg(
        long,
        env = "DEVCHAIN_KEEP_NODE",
        num_args = 0..=1,
        default_missing_value = "true",
        global = true
    )]
    pub keep_node: Option<bool>,
}

impl ConfigOverrides {
    /// Apply the flags that were given and re-validate.
    pub fn apply(&self, config: &mut DeployConfig) -> Result<(), DeployError> {
        if let Some(port) = self.port {
            config.node.port = port;
        }

        match (&self.rpc_url, self.port) {
            (Some(rpc_url), _) => config.rpc_url = rpc_url.clone(),
            (None, Some(port)) => config.rpc_url = format!("http://localhost:{port}"),
            (None, None) => {}
        }

        if let Some(host) = &self.host {
            config.node.host = host.clone();
        }
        if let Some(script) = &self.script {
            config.tool.script = script.clone();
        }
        if let Some(project_dir) = &self.project_dir {
            config.tool.project_dir = project_dir.clone();
        }
        if let Some(descriptor) = &self.descriptor {
            config.descriptor_path = descriptor.clone();
        }
        if let Some(private_key) = &self.private_key {
            config.private_key = SigningKey::new(private_key.clone());
        }
        if let Some(keep_node) = self.keep_node {
            config.keep_node = keep_node;
        }

        config.validate()
    }
}

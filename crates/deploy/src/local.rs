//! Backend driving real processes and the node's JSON-RPC endpoint.

use std::path::{Path, PathBuf};

use alloy_core::primitives::Address;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    DeployConfig, DeployError,
    config::SigningKey,
    locator::{LocatedTool, ToolLocator, ToolPath},
    probe::NodeProbe,
    services::{
        forge::{DeploymentOutput, DeploymentRunner, ToolConfig},
        node::{NodeConfig, NodeProcessHandle},
    },
    traits::{ChainClient, DeployBackend},
    verifier::{DeploymentVerifier, Verification},
};

/// Production [`DeployBackend`]: a local node, the deploy tool on this machine and JSON-RPC.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    probe: NodeProbe,
    verifier: DeploymentVerifier,
    locator: ToolLocator,
    node: NodeConfig,
    tool: ToolConfig,
    chain_id: u64,
    rpc_url: Url,
    private_key: SigningKey,
}

impl LocalBackend {
    pub fn from_config(config: &DeployConfig) -> Result<Self, DeployError> {
        let rpc_url = config.parsed_rpc_url()?;

        Ok(Self {
            probe: NodeProbe::new(rpc_url.as_str(), config.probe_timeout())?,
            verifier: DeploymentVerifier::new(&rpc_url, config.verify_timeout())?,
            locator: ToolLocator::new(),
            node: config.node.clone(),
            tool: config.tool.clone(),
            chain_id: config.chain_id,
            rpc_url,
            private_key: config.private_key.clone(),
        })
    }

    /// Replace the tool locator, e.g. to search a different home directory.
    pub fn with_locator(mut self, locator: ToolLocator) -> Self {
        self.locator = locator;
        self
    }

    /// Directory the node and the tool run from.
    fn work_dir(&self) -> PathBuf {
        if self.tool.project_dir.is_dir() {
            self.tool.project_dir.clone()
        } else {
            tracing::warn!(
                project_dir = %self.tool.project_dir.display(),
                "Project directory does not exist, using the current directory"
            );
            Path::new(".").to_path_buf()
        }
    }
}

impl ChainClient for LocalBackend {
    async fn is_reachable(&self) -> bool {
        self.probe.is_reachable().await
    }

    async fn verify_code(&self, address: Address) -> Result<Verification, anyhow::Error> {
        self.verifier.verify(address).await
    }
}

impl DeployBackend for LocalBackend {
    async fn start_node(
        &self,
        cancel: &CancellationToken,
    ) -> Result<NodeProcessHandle, DeployError> {
        self.node
            .start(self.chain_id, &self.work_dir(), cancel)
            .await
    }

    async fn locate_tool(&self) -> LocatedTool {
        self.locator.locate(&self.tool.tool).await
    }

    async fn run_deployment(
        &self,
        tool: &ToolPath,
        cancel: &CancellationToken,
    ) -> Result<DeploymentOutput, DeployError> {
        DeploymentRunner::new(tool.clone(), self.work_dir())
            .extra_args(self.tool.extra_args.iter().cloned())
            .run_script(
                &self.tool.script,
                self.rpc_url.as_str(),
                self.private_key.expose(),
                cancel,
            )
            .await
    }
}

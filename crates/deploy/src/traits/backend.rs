//! Backend traits used by the orchestrator.

use std::future::Future;

use alloy_core::primitives::Address;
use tokio_util::sync::CancellationToken;

use crate::{
    DeployError,
    locator::{LocatedTool, ToolPath},
    services::{forge::DeploymentOutput, node::NodeProcessHandle},
    verifier::Verification,
};

/// Read access to the chain through the node's RPC endpoint.
pub trait ChainClient: Send + Sync {
    /// Whether the node answers a liveness call.
    fn is_reachable(&self) -> impl Future<Output = bool> + Send;

    /// Classify the bytecode at `address`.
    fn verify_code(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<Verification, anyhow::Error>> + Send;
}

/// Everything the orchestrator needs to get a contract deployed.
pub trait DeployBackend: ChainClient {
    /// Start a node owned by this run and wait for its readiness marker.
    fn start_node(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<NodeProcessHandle, DeployError>> + Send;

    /// Find the deploy tool.
    fn locate_tool(&self) -> impl Future<Output = LocatedTool> + Send;

    /// Run the deployment script with the located tool.
    fn run_deployment(
        &self,
        tool: &ToolPath,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<DeploymentOutput, DeployError>> + Send;
}

//! Liveness probe against the node's JSON-RPC endpoint.

use std::time::Duration;

use url::Url;

use crate::{DeployError, rpc};

/// Default bound for a single liveness request.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Stateless liveness check for the node.
///
/// A node is reachable when `eth_blockNumber` answers with a well-formed hex
/// quantity within the timeout. Transport errors, timeouts, RPC errors and
/// malformed bodies all count as unreachable.
#[derive(Debug, Clone)]
pub struct NodeProbe {
    client: reqwest::Client,
    rpc_url: Url,
}

impl NodeProbe {
    /// Create a probe for `rpc_url`.
    ///
    /// An empty or unparsable URL is a configuration error, not a probe failure.
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self, DeployError> {
        if rpc_url.trim().is_empty() {
            return Err(DeployError::InvalidConfig(
                "node RPC URL must not be empty".to_string(),
            ));
        }

        let rpc_url = Url::parse(rpc_url).map_err(|e| {
            DeployError::InvalidConfig(format!("invalid node RPC URL `{rpc_url}`: {e}"))
        })?;

        Ok(Self {
            client: rpc::create_client(timeout)?,
            rpc_url,
        })
    }

    pub fn rpc_url(&self) -> &Url {
        &self.rpc_url
    }

    /// Fetch the current block number.
    pub async fn block_number(&self) -> Result<u64, anyhow::Error> {
        let quantity: String =
            rpc::json_rpc_call(&self.client, self.rpc_url.as_str(), "eth_blockNumber", vec![])
                .await?;
        rpc::parse_quantity(&quantity)
    }

    /// Whether the node answers a liveness call.
    pub async fn is_reachable(&self) -> bool {
        match self.block_number().await {
            Ok(block_number) => {
                tracing::trace!(rpc_url = %self.rpc_url, block_number, "Node is reachable");
                true
            }
            Err(e) => {
                tracing::debug!(rpc_url = %self.rpc_url, error = %e, "Node is not reachable");
                false
            }
        }
    }
}

//! Local development node (anvil) started on demand.

mod cmd;
mod supervisor;

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use cmd::NodeCmdBuilder;
pub use supervisor::{
    DEFAULT_READINESS_MARKER, DEFAULT_START_TIMEOUT, NodeCommand, NodeProcessHandle,
    NodeSupervisor, SupervisorState,
};

use crate::DeployError;

/// Default node binary.
pub const DEFAULT_NODE_BINARY: &str = "anvil";
/// Default bind address for an owned node.
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default port for the node.
pub const DEFAULT_PORT: u16 = 8545;

/// Configuration for the node started when none is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node binary name or path.
    pub binary: String,
    /// Address the node binds to.
    pub host: String,
    /// Port the node listens on.
    pub port: u16,
    /// Block time in seconds. The node mines on demand when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_time: Option<u64>,
    /// Substring of the node output that signals readiness.
    pub readiness_marker: String,
    /// Bound on the time to see the readiness marker.
    pub start_timeout_secs: u64,
    /// Liveness probes performed after the marker before giving up.
    pub ready_poll_attempts: usize,
    /// Delay between liveness probes.
    pub ready_poll_interval_ms: u64,
    /// Extra arguments to pass to the node.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            binary: DEFAULT_NODE_BINARY.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            block_time: None,
            readiness_marker: DEFAULT_READINESS_MARKER.to_string(),
            start_timeout_secs: DEFAULT_START_TIMEOUT.as_secs(),
            ready_poll_attempts: 10,
            ready_poll_interval_ms: 1000,
            extra_args: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }

    /// Build the node process command.
    pub fn command(&self, chain_id: u64, work_dir: &Path) -> NodeCommand {
        let args = NodeCmdBuilder::new()
            .host(&self.host)
            .port(self.port)
            .chain_id(Some(chain_id))
            .block_time(self.block_time)
            .extra_args(self.extra_args.clone())
            .build();

        NodeCommand::new(&self.binary, args).work_dir(work_dir)
    }

    /// Start the node in `work_dir` and wait for its readiness marker.
    pub async fn start(
        &self,
        chain_id: u64,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<NodeProcessHandle, DeployError> {
        let mut supervisor = NodeSupervisor::new(&self.readiness_marker, self.start_timeout());
        supervisor
            .start(&self.command(chain_id, work_dir), cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_uses_config() {
        let config = NodeConfig {
            port: 9545,
            extra_args: vec!["--silent".to_string()],
            ..Default::default()
        };

        let command = config.command(31337, Path::new("sc"));

        assert_eq!(command.program, "anvil");
        assert_eq!(
            command.args,
            vec![
                "--host", "0.0.0.0", "--port", "9545", "--chain-id", "31337", "--silent"
            ]
        );
        assert_eq!(command.work_dir.as_deref(), Some(Path::new("sc")));
    }
}

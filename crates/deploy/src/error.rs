//! Error taxonomy for a deployment run.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Installation guidance shown whenever the deploy tool cannot be executed.
const TOOL_INSTALL_HINT: &str = "Make sure Foundry is installed:\n  \
    1. Install Foundry: https://book.getfoundry.sh/getting-started/installation\n  \
    2. Or run: foundryup\n  \
    3. Check that the tool is on your PATH: forge --version";

/// Errors surfaced by the deployment orchestrator and its components.
#[derive(Debug, Error, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum DeployError {
    /// The node did not answer after it was expected to be up.
    #[error("node at {rpc_url} is not reachable: {reason}")]
    NodeUnreachable { rpc_url: String, reason: String },

    /// The owned node process could not be spawned or exited before it was ready.
    #[error("node process failed to start: {reason}")]
    NodeStartFailed { reason: String, output: String },

    /// The owned node never printed its readiness marker.
    #[error("node did not report readiness within {timeout:?}")]
    NodeStartTimeout { timeout: Duration, output: String },

    /// No usable deploy tool could be executed.
    #[error("deploy tool `{tool}` could not be executed: {reason}")]
    ToolNotFound { tool: String, reason: String },

    /// The deploy tool exited with a non-zero code.
    #[error("deployment command exited with code {exit_code}")]
    DeploymentCommandFailed { exit_code: i32, output: String },

    /// Neither the tool output nor the broadcast artifacts contained an address.
    #[error("no contract address found (searched: {})", .searched.join("; "))]
    AddressNotFound { searched: Vec<String> },

    /// The resolved address has no bytecode, or the check could not run.
    #[error("could not confirm bytecode at {address}: {reason}")]
    VerificationInconclusive { address: String, reason: String },

    /// The deployment descriptor could not be written.
    #[error("failed to write deployment descriptor to {}: {reason}", .path.display())]
    ConfigWriteFailed { path: PathBuf, reason: String },

    /// The run was cancelled by an interrupt or termination signal.
    #[error("interrupted")]
    Interrupted,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeployError {
    /// Stable, kebab-case name of the error kind.
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// Whether the error aborts the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::VerificationInconclusive { .. })
    }

    /// Output captured from an external process, if the error carries any.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Self::NodeStartFailed { output, .. }
            | Self::NodeStartTimeout { output, .. }
            | Self::DeploymentCommandFailed { output, .. } => {
                (!output.trim().is_empty()).then_some(output.as_str())
            }
            _ => None,
        }
    }

    /// Remediation hint for the operator.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NodeUnreachable { .. } => {
                Some("Start the node manually (for example: cd sc && anvil) and retry.")
            }
            Self::NodeStartFailed { .. } => Some(
                "Check that the node binary is installed (foundryup) and that the port is free.",
            ),
            Self::NodeStartTimeout { .. } => Some(
                "The node did not report readiness in time. Check its output or start it manually.",
            ),
            Self::ToolNotFound { .. } => Some(TOOL_INSTALL_HINT),
            Self::DeploymentCommandFailed { .. } => Some(
                "Inspect the deploy tool output above, fix the script or the contract and retry.",
            ),
            Self::AddressNotFound { .. } => Some(
                "The deployment ran but no address was found. Check the broadcast directory.",
            ),
            Self::VerificationInconclusive { .. } => Some(
                "The descriptor was saved anyway. Deploy again if the node restarted.",
            ),
            Self::ConfigWriteFailed { .. } => {
                Some("Check that the descriptor directory exists and is writable.")
            }
            Self::InvalidConfig(_) => Some("Check the configuration file, environment and flags."),
            Self::Interrupted | Self::Other(_) => None,
        }
    }
}

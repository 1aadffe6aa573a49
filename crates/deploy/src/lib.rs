//! devchain-deploy - Contract deployment onto a local development chain.
//!
//! This crate makes sure a contract is deployed exactly once to a local node and that
//! the resulting deployment descriptor can be found by other tools. It probes the node
//! (starting one when none is running), finds the deploy tool, runs the deployment
//! script, extracts and verifies the contract address, then records it atomically.

mod error;
pub use error::DeployError;

pub mod config;
pub use config::{DeployConfig, SigningKey};

mod local;
pub use local::LocalBackend;

pub mod locator;
pub use locator::{LocateStrategy, LocatedTool, ToolLocator, ToolPath};

pub mod orchestrator;
pub use orchestrator::{DeployOutcome, DeployState, Orchestrator, OrchestratorSettings};

pub mod probe;
pub use probe::NodeProbe;

mod process;
pub use process::{OutputLine, OutputStream};

pub mod resolver;
pub use resolver::{AddressResolver, AddressStrategy, ResolvedAddress};

pub mod rpc;

pub mod services;
pub use services::{
    forge::{DeploymentOutput, DeploymentRunner, ToolConfig},
    node::{NodeConfig, NodeProcessHandle, NodeSupervisor, SupervisorState},
};

mod shutdown;
pub use shutdown::install_signal_handlers;

pub mod store;
pub use store::{AtomicFile, ConfigStore, DeploymentDescriptor};

pub mod traits;
pub use traits::{ChainClient, DeployBackend};

pub mod verifier;
pub use verifier::{DeploymentVerifier, Verification, classify_code};

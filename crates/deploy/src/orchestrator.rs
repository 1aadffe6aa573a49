//! The deployment state machine.
//!
//! ```text
//! Idle -> ProbingNode -> NodeUp ------------------------------------+
//!                     -> NodeDown -> StartingNode -> WaitingReady --+
//!                                                                   v
//!                               CheckingExistingDeployment -> AlreadyDeployed -> Done
//!                                                          -> NeedsDeploy -> LocatingTool
//!   -> RunningDeployment -> ExtractingAddress -> VerifyingDeployment -> PersistingConfig -> Done
//! ```
//!
//! Any step may fail; a node started by the run is terminated on every exit path.

use std::{future::Future, time::Duration};

use alloy_core::primitives::Address;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    DeployConfig, DeployError, LocalBackend,
    resolver::AddressResolver,
    rpc,
    services::node::NodeProcessHandle,
    store::{ConfigStore, DeploymentDescriptor},
    traits::DeployBackend,
    verifier::Verification,
};

/// Every state the orchestrator passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DeployState {
    Idle,
    ProbingNode,
    NodeUp,
    NodeDown,
    StartingNode,
    WaitingReady,
    CheckingExistingDeployment,
    AlreadyDeployed,
    NeedsDeploy,
    LocatingTool,
    RunningDeployment,
    ExtractingAddress,
    VerifyingDeployment,
    PersistingConfig,
    /// Deployed, keeping the node started by this run alive until cancelled.
    Serving,
    Done,
    Failed,
}

/// How a successful run ended.
#[derive(Debug)]
pub enum DeployOutcome {
    /// The previous deployment is live; nothing was deployed.
    AlreadyDeployed(DeploymentDescriptor),
    /// A new deployment was made and recorded.
    Deployed {
        descriptor: DeploymentDescriptor,
        /// `None` when the bytecode check could not run.
        verification: Option<Verification>,
        /// Name of the strategy that found the address.
        address_source: String,
        /// Set when the deployment could not be confirmed on-chain.
        warning: Option<DeployError>,
    },
}

impl DeployOutcome {
    pub fn descriptor(&self) -> &DeploymentDescriptor {
        match self {
            Self::AlreadyDeployed(descriptor) | Self::Deployed { descriptor, .. } => descriptor,
        }
    }
}

/// Values the orchestrator needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub rpc_url: Url,
    pub network: String,
    pub chain_id: u64,
    pub ready_poll_attempts: usize,
    pub ready_poll_interval: Duration,
    pub settle_delay: Duration,
    pub keep_node: bool,
}

impl OrchestratorSettings {
    pub fn from_config(config: &DeployConfig) -> Result<Self, DeployError> {
        Ok(Self {
            rpc_url: config.parsed_rpc_url()?,
            network: config.network.clone(),
            chain_id: config.chain_id,
            ready_poll_attempts: config.node.ready_poll_attempts,
            ready_poll_interval: config.node.ready_poll_interval(),
            settle_delay: config.settle_delay(),
            keep_node: config.keep_node,
        })
    }
}

/// Sequences one deployment run.
#[derive(Debug)]
pub struct Orchestrator<B> {
    backend: B,
    store: ConfigStore,
    resolver: AddressResolver,
    settings: OrchestratorSettings,
    state: DeployState,
    node: Option<NodeProcessHandle>,
}

impl Orchestrator<LocalBackend> {
    /// Orchestrator backed by real processes.
    pub fn from_config(config: &DeployConfig) -> Result<Self, DeployError> {
        config.validate()?;

        let signer = config.private_key.signer()?;
        tracing::debug!(deployer = %signer.address(), "Deployer account");

        Ok(Self::new(
            LocalBackend::from_config(config)?,
            ConfigStore::new(&config.descriptor_path),
            AddressResolver::with_defaults(config.broadcast_dir()),
            OrchestratorSettings::from_config(config)?,
        ))
    }
}

impl<B: DeployBackend> Orchestrator<B> {
    pub fn new(
        backend: B,
        store: ConfigStore,
        resolver: AddressResolver,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            backend,
            store,
            resolver,
            settings,
            state: DeployState::Idle,
            node: None,
        }
    }

    pub fn state(&self) -> DeployState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Handle of the node started by this run, if any.
    pub fn node_handle(&self) -> Option<&NodeProcessHandle> {
        self.node.as_ref()
    }

    /// Deploy, then with `keep_node` serve the node started by this run until `cancel`.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<DeployOutcome, DeployError> {
        let outcome = self.deploy(cancel).await?;
        self.serve(cancel).await;
        Ok(outcome)
    }

    /// Run the deployment steps to completion or until `cancel` fires.
    ///
    /// A node started by this run is terminated before returning, except after
    /// a success with `keep_node`: it is then left for [`serve`](Self::serve).
    pub async fn deploy(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<DeployOutcome, DeployError> {
        let result = self.execute(cancel).await;

        match &result {
            Ok(_) if self.settings.keep_node && self.node.is_some() => {}
            Ok(_) => {
                self.cleanup().await;
                self.transition(DeployState::Done);
            }
            Err(e) => {
                self.transition(DeployState::Failed);
                tracing::error!(kind = e.kind(), error = %e, "Deployment failed");
                self.cleanup().await;
            }
        }

        result
    }

    /// Keep a node left running by [`deploy`](Self::deploy) up until `cancel`, then stop it.
    ///
    /// Returns immediately when no such node exists.
    pub async fn serve(&mut self, cancel: &CancellationToken) {
        if !self.node.as_ref().is_some_and(|node| !node.is_terminated()) {
            return;
        }

        self.transition(DeployState::Serving);
        tracing::info!(
            rpc_url = %self.settings.rpc_url,
            "Node started by this run keeps running. Press Ctrl+C to stop."
        );
        cancel.cancelled().await;

        self.cleanup().await;
        self.transition(DeployState::Done);
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> Result<DeployOutcome, DeployError> {
        self.transition(DeployState::ProbingNode);

        if cancellable(cancel, self.backend.is_reachable()).await? {
            self.transition(DeployState::NodeUp);
            tracing::info!(rpc_url = %self.settings.rpc_url, "Node is already running");
        } else {
            self.transition(DeployState::NodeDown);
            tracing::info!(
                rpc_url = %self.settings.rpc_url,
                "Node is not running, starting one..."
            );

            self.transition(DeployState::StartingNode);
            let handle = self.backend.start_node(cancel).await?;
            self.node = Some(handle);

            self.transition(DeployState::WaitingReady);
            self.wait_for_node(cancel).await?;
        }

        self.transition(DeployState::CheckingExistingDeployment);
        if let Some(existing) = self.store.check_existing() {
            let deployed =
                cancellable(cancel, self.store.is_deployed(&existing, &self.backend)).await?;
            if deployed {
                self.transition(DeployState::AlreadyDeployed);
                tracing::info!(
                    address = %existing.contract_address,
                    "Contract is already deployed, skipping deployment"
                );
                return Ok(DeployOutcome::AlreadyDeployed(existing));
            }

            tracing::info!(
                address = %existing.contract_address,
                "Recorded contract not found on-chain, redeploying"
            );
        }

        self.transition(DeployState::NeedsDeploy);
        self.transition(DeployState::LocatingTool);
        let tool = cancellable(cancel, self.backend.locate_tool()).await?;
        tracing::info!(tool = %tool.path, strategy = %tool.strategy, "Deploy tool selected");

        self.transition(DeployState::RunningDeployment);
        let output = self.backend.run_deployment(&tool.path, cancel).await?;

        self.transition(DeployState::ExtractingAddress);
        tracing::debug!(strategies = ?self.resolver.strategy_names(), "Resolving contract address");
        let resolved = self.resolver.resolve(&output.combined_output)?;

        self.transition(DeployState::VerifyingDeployment);
        let (verification, warning) = self.verify(resolved.address, cancel).await?;

        self.transition(DeployState::PersistingConfig);
        let descriptor = DeploymentDescriptor::new(
            resolved.address,
            self.settings.rpc_url.clone(),
            &self.settings.network,
            self.settings.chain_id,
        );
        self.store.persist(&descriptor)?;

        tracing::info!(
            address = %descriptor.contract_address,
            source = %resolved.source,
            path = %self.store.path().display(),
            "Contract deployed"
        );

        Ok(DeployOutcome::Deployed {
            descriptor,
            verification,
            address_source: resolved.source,
            warning,
        })
    }

    /// Poll the node started by this run until it answers.
    async fn wait_for_node(&self, cancel: &CancellationToken) -> Result<(), DeployError> {
        let backend = &self.backend;
        let ready = rpc::wait_until_ready(
            "node",
            self.settings.ready_poll_attempts,
            self.settings.ready_poll_interval,
            move || async move {
                if backend.is_reachable().await {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("node did not answer"))
                }
            },
        );

        cancellable(cancel, ready)
            .await?
            .map_err(|e| DeployError::NodeUnreachable {
                rpc_url: self.settings.rpc_url.to_string(),
                reason: format!("{e:#}"),
            })
    }

    /// Check the bytecode after the settle delay. Never fails except on cancellation.
    async fn verify(
        &self,
        address: Address,
        cancel: &CancellationToken,
    ) -> Result<(Option<Verification>, Option<DeployError>), DeployError> {
        cancellable(cancel, tokio::time::sleep(self.settings.settle_delay)).await?;

        let (verification, reason) =
            match cancellable(cancel, self.backend.verify_code(address)).await? {
                Ok(Verification::Empty) => (
                    Some(Verification::Empty),
                    "no bytecode at the address".to_string(),
                ),
                Ok(verification) => {
                    tracing::info!(%address, %verification, "Deployment verified on-chain");
                    return Ok((Some(verification), None));
                }
                Err(e) => (None, format!("{e:#}")),
            };

        let warning = DeployError::VerificationInconclusive {
            address: address.to_string(),
            reason,
        };
        tracing::warn!(
            kind = warning.kind(),
            error = %warning,
            "Deployment could not be verified, saving the descriptor anyway"
        );

        Ok((verification, Some(warning)))
    }

    async fn cleanup(&mut self) {
        if let Some(handle) = &self.node {
            handle.terminate().await;
        }
    }

    fn transition(&mut self, state: DeployState) {
        tracing::debug!(from = %self.state, state = %state, "Deployment state changed");
        self.state = state;
    }
}

/// Race `fut` against cancellation. An already cancelled token wins.
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, DeployError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DeployError::Interrupted),
        output = fut => Ok(output),
    }
}

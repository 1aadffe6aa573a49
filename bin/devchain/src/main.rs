//! devchain makes sure a contract is deployed to a local development chain, exactly once.

mod cli;

use std::process::ExitCode;

use clap::Parser;
use comfy_table::Table;
use devchain_deploy::{
    ConfigStore, DeployConfig, DeployError, DeployOutcome, DeploymentVerifier, NodeProbe,
    Orchestrator, install_signal_handlers,
};
use tokio_util::sync::CancellationToken;

use cli::{Cli, Command};

const EXIT_SUCCESS: u8 = 0;
const EXIT_FAILURE: u8 = 1;
/// Exit status of a run stopped by Ctrl+C or SIGTERM.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let cancel = install_signal_handlers();

    let code = match run(cli, &cancel).await {
        Ok(code) => code,
        Err(e) => {
            report(&e);
            exit_code(&e)
        }
    };

    ExitCode::from(code)
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<u8, DeployError> {
    let mut config = DeployConfig::load(cli.config.as_deref())?;
    cli.overrides.apply(&mut config)?;

    match cli.command.unwrap_or_default() {
        Command::Deploy => deploy(&config, cancel).await,
        Command::Check => check(&config).await,
        Command::Status => status(&config).await,
    }
}

async fn deploy(config: &DeployConfig, cancel: &CancellationToken) -> Result<u8, DeployError> {
    tracing::info!(
        rpc_url = %config.rpc_url,
        script = %config.tool.script,
        project_dir = %config.tool.project_dir.display(),
        descriptor = %config.descriptor_path.display(),
        "Starting deployment..."
    );

    let mut orchestrator = Orchestrator::from_config(config)?;
    let outcome = orchestrator.deploy(cancel).await?;
    print_outcome(&outcome, config);

    // Only blocks with `keep_node` on a node this run started.
    orchestrator.serve(cancel).await;

    Ok(EXIT_SUCCESS)
}

fn print_outcome(outcome: &DeployOutcome, config: &DeployConfig) {
    let descriptor = outcome.descriptor();
    match outcome {
        DeployOutcome::AlreadyDeployed(_) => {
            println!("Contract already deployed at {}", descriptor.contract_address);
        }
        DeployOutcome::Deployed { warning, .. } => {
            println!("Contract deployed at {}", descriptor.contract_address);
            if let Some(warning) = warning {
                eprintln!("warning: {warning}");
            }
        }
    }
    println!("Descriptor: {}", config.descriptor_path.display());
}

async fn check(config: &DeployConfig) -> Result<u8, DeployError> {
    let probe = NodeProbe::new(&config.rpc_url, config.probe_timeout())?;

    match probe.block_number().await {
        Ok(block_number) => {
            println!("Node is running at {} (block {block_number})", probe.rpc_url());
            Ok(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Node is not running at {}: {e:#}", probe.rpc_url());
            eprintln!(
                "Start it with: cd {} && {}",
                config.tool.project_dir.display(),
                config.node.binary
            );
            Ok(EXIT_FAILURE)
        }
    }
}

async fn status(config: &DeployConfig) -> Result<u8, DeployError> {
    let store = ConfigStore::new(&config.descriptor_path);
    let mut table = Table::new();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec![
        "Descriptor".to_string(),
        store.path().display().to_string(),
    ]);

    let descriptor = match store.load() {
        Ok(Some(descriptor)) => descriptor,
        Ok(None) => {
            table.add_row(vec!["Status", "not deployed"]);
            println!("{table}");
            return Ok(EXIT_FAILURE);
        }
        Err(e) => {
            table.add_row(vec!["Status".to_string(), format!("unreadable: {e:#}")]);
            println!("{table}");
            return Ok(EXIT_FAILURE);
        }
    };

    table.add_row(vec![
        "Contract address".to_string(),
        descriptor.contract_address.to_string(),
    ]);
    table.add_row(vec![
        "RPC URL".to_string(),
        descriptor.rpc_endpoint().to_string(),
    ]);
    table.add_row(vec!["Network".to_string(), descriptor.network.clone()]);
    table.add_row(vec!["Chain id".to_string(), descriptor.chain_id.to_string()]);
    table.add_row(vec![
        "Deployed at".to_string(),
        descriptor.deployed_at.to_rfc3339(),
    ]);

    let probe = NodeProbe::new(&config.rpc_url, config.probe_timeout())?;
    let reachable = probe.is_reachable().await;
    table.add_row(vec![
        "Node".to_string(),
        if reachable { "reachable" } else { "not reachable" }.to_string(),
    ]);

    let live = if reachable {
        let verifier = DeploymentVerifier::new(probe.rpc_url(), config.verify_timeout())?;
        match verifier.verify(descriptor.contract_address).await {
            Ok(verification) => {
                table.add_row(vec!["Bytecode".to_string(), verification.to_string()]);
                verification.is_verified()
            }
            Err(e) => {
                table.add_row(vec!["Bytecode".to_string(), format!("unknown: {e:#}")]);
                false
            }
        }
    } else {
        false
    };

    println!("{table}");

    Ok(if live { EXIT_SUCCESS } else { EXIT_FAILURE })
}

/// Print a structured diagnostic: kind, message, captured output and hint.
fn report(e: &DeployError) {
    if matches!(e, DeployError::Interrupted) {
        eprintln!("Interrupted.");
        return;
    }

    eprintln!("error[{}]: {e}", e.kind());
    if let Some(output) = e.captured_output() {
        eprintln!("\n--- captured output ---\n{}\n-----------------------", output.trim_end());
    }
    if let Some(hint) = e.hint() {
        eprintln!("\nhint: {hint}");
    }
}

fn exit_code(e: &DeployError) -> u8 {
    match e {
        DeployError::Interrupted => EXIT_INTERRUPTED,
        _ => EXIT_FAILURE,
    }
}

//! Node probe and deployment verifier against a stub JSON-RPC node.

mod common;

use std::time::Duration;

use alloy_core::primitives::address;
use anyhow::Result;
use devchain_deploy::{DeploymentVerifier, NodeProbe, Verification};
use url::Url;

use common::{RpcStub, init_test_tracing};

const TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_probe_reaches_running_node() -> Result<()> {
    init_test_tracing();
    let stub = RpcStub::start().await;

    let probe = NodeProbe::new(&stub.url(), TIMEOUT)?;

    assert!(probe.is_reachable().await);
    assert_eq!(probe.block_number().await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_verifier_classifies_bytecode() -> Result<()> {
    init_test_tracing();
    let stub = RpcStub::start().await;
    let deployed = address!("0x5FbDB2315678afecb367f032d93F642f64180aa3");
    let missing = address!("0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512");
    stub.set_code(&deployed.to_string(), "0x608060405234801561001057600080fd5b50");

    let verifier = DeploymentVerifier::new(&Url::parse(&stub.url())?, TIMEOUT)?;

    assert_eq!(
        verifier.verify(deployed).await?,
        Verification::Verified { code_len: 36 }
    );
    assert_eq!(verifier.verify(missing).await?, Verification::Empty);
    Ok(())
}

#[tokio::test]
async fn test_verifier_reports_unreachable_node() -> Result<()> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let url = Url::parse(&format!("http://{}", listener.local_addr()?))?;
    drop(listener);

    let verifier = DeploymentVerifier::new(&url, Duration::from_millis(500))?;

    assert!(
        verifier
            .verify(address!("0x5FbDB2315678afecb367f032d93F642f64180aa3"))
            .await
            .is_err()
    );
    Ok(())
}

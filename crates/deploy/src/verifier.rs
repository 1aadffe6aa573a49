//! On-chain confirmation that a deployment landed.

use std::time::Duration;

use alloy_core::primitives::Address;
use anyhow::Context;
use url::Url;

use crate::rpc;

/// Default bound for the bytecode lookup.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether an address holds contract bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Verification {
    /// Bytecode present, `code_len` hex characters after `0x`.
    Verified { code_len: usize },
    /// No bytecode at the address.
    Empty,
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }
}

/// Classify an `eth_getCode` result.
pub fn classify_code(code: &str) -> Verification {
    let code = code.trim();
    match code {
        "" | "0x" | "0x0" => Verification::Empty,
        _ => Verification::Verified {
            code_len: code.strip_prefix("0x").unwrap_or(code).len(),
        },
    }
}

/// Looks up bytecode through the node's JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct DeploymentVerifier {
    client: reqwest::Client,
    rpc_url: Url,
}

impl DeploymentVerifier {
    pub fn new(rpc_url: &Url, timeout: Duration) -> Result<Self, anyhow::Error> {
        Ok(Self {
            client: rpc::create_client(timeout)?,
            rpc_url: rpc_url.clone(),
        })
    }

    /// Fetch the code at `address` on the latest block.
    pub async fn code_at(&self, address: Address) -> Result<String, anyhow::Error> {
        rpc::json_rpc_call(
            &self.client,
            self.rpc_url.as_str(),
            "eth_getCode",
            vec![
                serde_json::json!(address.to_string()),
                serde_json::json!("latest"),
            ],
        )
        .await
        .with_context(|| format!("Failed to fetch code at {address}"))
    }

    /// Check whether `address` holds bytecode.
    ///
    /// Transport and RPC failures are errors; the caller decides whether they are fatal.
    pub async fn verify(&self, address: Address) -> Result<Verification, anyhow::Error> {
        let verification = classify_code(&self.code_at(address).await?);
        tracing::debug!(%address, %verification, "Bytecode checked");
        Ok(verification)
    }
}

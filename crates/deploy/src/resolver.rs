//! Extraction of the deployed contract address.
//!
//! Strategies are tried in order and the first hit wins. The default chain reads
//! the tool output with increasingly loose patterns, then falls back to the most
//! recent broadcast artifact the tool wrote.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::LazyLock,
};

use alloy_core::primitives::Address;
use anyhow::Context;
use regex::Regex;
use serde::Deserialize;

use crate::DeployError;

/// Output patterns, most specific first. Group 1 is the address.
const DEFAULT_PATTERN_SOURCES: [(&str, &str); 4] = [
    (
        "contract-deployed-to",
        r"(?i)Contract deployed to:\s*(0x[0-9a-f]{40})\b",
    ),
    ("deployed-to", r"(?i)Deployed to:\s*(0x[0-9a-f]{40})\b"),
    (
        "contract-address-label",
        r#"(?i)contractAddress["'\s:=]+(0x[0-9a-f]{40})\b"#,
    ),
    (
        "keyword-proximity",
        r"(?i)(?:deployed|contract|address)[:\s]+(0x[0-9a-f]{40})\b",
    ),
];

static DEFAULT_PATTERNS: LazyLock<Vec<OutputPattern>> = LazyLock::new(|| {
    DEFAULT_PATTERN_SOURCES
        .into_iter()
        .filter_map(|(name, pattern)| match OutputPattern::new(name, pattern) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                tracing::error!(name, error = %e, "Skipping invalid address pattern");
                None
            }
        })
        .collect()
});

/// One way of finding the deployed address.
pub trait AddressStrategy: Send + Sync + fmt::Debug {
    /// Stable name reported alongside the address.
    fn name(&self) -> &str;

    /// Where this strategy looks, for diagnostics.
    fn location(&self) -> String;

    /// Look for an address. `Ok(None)` means the strategy found nothing.
    fn extract(&self, output: &str) -> anyhow::Result<Option<Address>>;
}

/// Matches a regular expression against the tool output.
#[derive(Debug, Clone)]
pub struct OutputPattern {
    name: &'static str,
    regex: Regex,
}

impl OutputPattern {
    /// Build a pattern whose first capture group is the address.
    pub fn new(name: &'static str, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            regex: Regex::new(pattern)?,
        })
    }

    /// The built-in patterns in priority order.
    pub fn defaults() -> Vec<Self> {
        DEFAULT_PATTERNS.clone()
    }
}

impl AddressStrategy for OutputPattern {
    fn name(&self) -> &str {
        self.name
    }

    fn location(&self) -> String {
        format!("tool output /{}/", self.regex.as_str())
    }

    fn extract(&self, output: &str) -> anyhow::Result<Option<Address>> {
        let Some(found) = self
            .regex
            .captures(output)
            .and_then(|captures| captures.get(1))
        else {
            return Ok(None);
        };

        let address = Address::from_str(found.as_str())
            .with_context(|| format!("Matched text is not an address: {}", found.as_str()))?;

        Ok(Some(address))
    }
}

/// A broadcast artifact written by the deploy tool, reduced to what is read here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastArtifact {
    #[serde(default)]
    pub transactions: Vec<BroadcastTransaction>,
    #[serde(default)]
    pub summary: Option<BroadcastSummary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastTransaction {
    #[serde(default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub transaction: Option<NestedTransaction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedTransaction {
    #[serde(default)]
    pub contract_address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BroadcastSummary {
    #[serde(default)]
    pub transactions: Vec<BroadcastTransaction>,
}

impl BroadcastTransaction {
    fn address(&self) -> Option<Address> {
        self.contract_address
            .as_deref()
            .and_then(parse_address)
            .or_else(|| {
                self.transaction
                    .as_ref()
                    .and_then(|tx| tx.contract_address.as_deref())
                    .and_then(parse_address)
            })
    }
}

impl BroadcastArtifact {
    /// First contract address in the transactions, then in the summary.
    pub fn contract_address(&self) -> Option<Address> {
        self.transactions
            .iter()
            .find_map(BroadcastTransaction::address)
            .or_else(|| {
                self.summary
                    .iter()
                    .flat_map(|summary| summary.transactions.iter())
                    .find_map(BroadcastTransaction::address)
            })
    }
}

fn parse_address(value: &str) -> Option<Address> {
    Address::from_str(value.trim()).ok()
}

/// Reads the most recent artifact in a broadcast directory.
#[derive(Debug, Clone)]
pub struct BroadcastArtifacts {
    dir: PathBuf,
}

impl BroadcastArtifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The artifact file that sorts last by name, if any.
    pub fn latest(&self) -> anyhow::Result<Option<PathBuf>> {
        if !self.dir.is_dir() {
            tracing::debug!(dir = %self.dir.display(), "Broadcast directory does not exist");
            return Ok(None);
        }

        let mut files = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect::<Vec<_>>();

        files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

        Ok(files.into_iter().next())
    }
}

impl AddressStrategy for BroadcastArtifacts {
    fn name(&self) -> &str {
        "broadcast-artifact"
    }

    fn location(&self) -> String {
        format!("broadcast artifacts in {}", self.dir.display())
    }

    fn extract(&self, _output: &str) -> anyhow::Result<Option<Address>> {
        let Some(path) = self.latest()? else {
            return Ok(None);
        };

        tracing::debug!(path = %path.display(), "Reading broadcast artifact");

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let artifact: BroadcastArtifact = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        Ok(artifact.contract_address())
    }
}

/// An address and the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub address: Address,
    pub source: String,
}

/// Runs address strategies in priority order.
#[derive(Debug)]
pub struct AddressResolver {
    strategies: Vec<Box<dyn AddressStrategy>>,
}

impl AddressResolver {
    pub fn new(strategies: Vec<Box<dyn AddressStrategy>>) -> Self {
        Self { strategies }
    }

    /// Output patterns followed by the artifacts in `broadcast_dir`.
    pub fn with_defaults(broadcast_dir: impl Into<PathBuf>) -> Self {
        let mut strategies: Vec<Box<dyn AddressStrategy>> = OutputPattern::defaults()
            .into_iter()
            .map(|pattern| Box::new(pattern) as Box<dyn AddressStrategy>)
            .collect();
        strategies.push(Box::new(BroadcastArtifacts::new(broadcast_dir)));

        Self::new(strategies)
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Return the first address any strategy finds in `output`.
    pub fn resolve(&self, output: &str) -> Result<ResolvedAddress, DeployError> {
        let mut searched = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            match strategy.extract(output) {
                Ok(Some(address)) => {
                    tracing::info!(%address, source = strategy.name(), "Contract address found");
                    return Ok(ResolvedAddress {
                        address,
                        source: strategy.name().to_string(),
                    });
                }
                Ok(None) => {
                    tracing::debug!(strategy = strategy.name(), "No address found");
                    searched.push(strategy.location());
                }
                Err(e) => {
                    tracing::warn!(
                        strategy = strategy.name(),
                        error = %format!("{e:#}"),
                        "Address strategy failed"
                    );
                    searched.push(format!("{} ({e:#})", strategy.location()));
                }
            }
        }

        Err(DeployError::AddressNotFound { searched })
    }
}

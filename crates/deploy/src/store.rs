//! Persisted deployment descriptor.
//!
//! The descriptor is the only file this crate writes. It is replaced atomically so
//! that readers either see the previous deployment or the new one, never a torn file.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use tempfile::NamedTempFile;
use url::Url;

use crate::{DeployError, traits::ChainClient};

/// Default location of the descriptor, relative to the working directory.
pub const DEFAULT_DESCRIPTOR_PATH: &str = "config/contract-config.json";

/// Mode of a newly created descriptor: readable by other local processes.
#[cfg(unix)]
const DESCRIPTOR_MODE: u32 = 0o644;

/// Where the contract lives and how to reach the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDescriptor {
    pub contract_address: Address,
    #[serde(serialize_with = "serialize_endpoint")]
    pub rpc_url: Url,
    pub network: String,
    pub chain_id: u64,
    pub deployed_at: DateTime<Utc>,
}

impl DeploymentDescriptor {
    /// Descriptor for a deployment that happened now.
    pub fn new(
        contract_address: Address,
        rpc_url: Url,
        network: impl Into<String>,
        chain_id: u64,
    ) -> Self {
        Self {
            contract_address,
            rpc_url,
            network: network.into(),
            chain_id,
            deployed_at: Utc::now(),
        }
    }

    /// The node endpoint as clients configure it, e.g. `http://localhost:8545`.
    pub fn rpc_endpoint(&self) -> &str {
        endpoint(&self.rpc_url)
    }
}

/// A bare origin without the trailing slash `Url` adds.
fn endpoint(url: &Url) -> &str {
    let raw = url.as_str();
    if url.path() == "/" && url.query().is_none() && url.fragment().is_none() {
        raw.strip_suffix('/').unwrap_or(raw)
    } else {
        raw
    }
}

fn serialize_endpoint<S: Serializer>(url: &Url, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(endpoint(url))
}

/// A file written to a temporary sibling and renamed over the target on commit.
///
/// Dropping it without calling [`commit`](Self::commit) removes the temporary
/// file and leaves the target untouched.
#[derive(Debug)]
pub struct AtomicFile {
    target: PathBuf,
    temp: NamedTempFile,
}

impl AtomicFile {
    /// Create the temporary file next to `target`, creating the directory if needed.
    pub fn create(target: impl Into<PathBuf>) -> io::Result<Self> {
        let target = target.into();
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        fs::create_dir_all(&dir)?;
        let temp = NamedTempFile::new_in(&dir)?;

        Ok(Self { target, temp })
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.temp.as_file_mut().write_all(bytes)
    }

    /// Flush to disk and atomically replace the target.
    ///
    /// The replacement keeps the target's permissions. A new file gets
    /// `0o644` on unix instead of the owner-only mode of temporary files.
    pub fn commit(self) -> io::Result<()> {
        self.copy_target_permissions()?;
        self.temp.as_file().sync_all()?;
        self.temp.persist(&self.target).map_err(|e| e.error)?;
        Ok(())
    }

    #[cfg(unix)]
    fn copy_target_permissions(&self) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let permissions = match fs::metadata(&self.target) {
            Ok(metadata) => metadata.permissions(),
            Err(_) => fs::Permissions::from_mode(DESCRIPTOR_MODE),
        };
        self.temp.as_file().set_permissions(permissions)
    }

    #[cfg(not(unix))]
    fn copy_target_permissions(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Reads and writes the deployment descriptor.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the descriptor from disk.
    pub fn load(&self) -> Result<Option<DeploymentDescriptor>, anyhow::Error> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let descriptor = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;

        Ok(Some(descriptor))
    }

    /// The previous descriptor, if there is a usable one.
    ///
    /// An unreadable or malformed file counts as absent so that the next run redeploys.
    pub fn check_existing(&self) -> Option<DeploymentDescriptor> {
        match self.load() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %format!("{e:#}"),
                    "Ignoring unreadable deployment descriptor"
                );
                None
            }
        }
    }

    /// Whether the node is up and the descriptor's address holds bytecode.
    pub async fn is_deployed<C: ChainClient>(
        &self,
        descriptor: &DeploymentDescriptor,
        chain: &C,
    ) -> bool {
        if !chain.is_reachable().await {
            tracing::debug!("Node not reachable, cannot confirm the previous deployment");
            return false;
        }

        match chain.verify_code(descriptor.contract_address).await {
            Ok(verification) => verification.is_verified(),
            Err(e) => {
                tracing::debug!(
                    address = %descriptor.contract_address,
                    error = %format!("{e:#}"),
                    "Could not check the previous deployment"
                );
                false
            }
        }
    }

    /// Atomically replace the descriptor.
    pub fn persist(&self, descriptor: &DeploymentDescriptor) -> Result<(), DeployError> {
        let write_failed = |reason: String| DeployError::ConfigWriteFailed {
            path: self.path.clone(),
            reason,
        };

        let mut json =
            serde_json::to_vec_pretty(descriptor).map_err(|e| write_failed(e.to_string()))?;
        json.push(b'\n');

        let mut file = AtomicFile::create(&self.path).map_err(|e| write_failed(e.to_string()))?;
        file.write_all(&json).map_err(|e| write_failed(e.to_string()))?;
        file.commit().map_err(|e| write_failed(e.to_string()))?;

        tracing::info!(
            path = %self.path.display(),
            address = %descriptor.contract_address,
            "Deployment descriptor saved"
        );

        Ok(())
    }
}

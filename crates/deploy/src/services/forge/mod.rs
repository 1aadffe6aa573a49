//! Contract deployment through a one-shot `forge script` run.

mod cmd;

use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
};

use serde::{Deserialize, Serialize};
use tokio::{process::Command, sync::mpsc};
use tokio_util::sync::CancellationToken;

pub use cmd::ForgeScriptCmdBuilder;

use crate::{
    DeployError,
    locator::ToolPath,
    process::{self, OutputStream},
};

/// Default deploy tool.
pub const DEFAULT_TOOL: &str = "forge";
/// Default deployment script identifier.
pub const DEFAULT_SCRIPT: &str = "script/FileHashStorage.s.sol:FileHashStorageScript";
/// Default Foundry project directory.
pub const DEFAULT_PROJECT_DIR: &str = "sc";

/// Shell messages that mean the tool itself could not be executed.
const NOT_FOUND_MARKERS: [&str; 2] = ["command not found", "not recognized"];

/// Configuration for the deploy tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Tool name looked up by the locator.
    pub tool: String,
    /// Script identifier, `path/to/Script.s.sol:ContractName`.
    pub script: String,
    /// Foundry project directory. The tool and the node run from here.
    pub project_dir: PathBuf,
    /// Broadcast artifact directory. Derived from the script and chain id when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_dir: Option<PathBuf>,
    /// Extra arguments to pass to the script run.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            tool: DEFAULT_TOOL.to_string(),
            script: DEFAULT_SCRIPT.to_string(),
            project_dir: PathBuf::from(DEFAULT_PROJECT_DIR),
            broadcast_dir: None,
            extra_args: Vec::new(),
        }
    }
}

impl ToolConfig {
    /// File name of the script, e.g. `FileHashStorage.s.sol`.
    pub fn script_file_name(&self) -> &str {
        let path = self.script.split(':').next().unwrap_or_default();
        Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(path)
    }

    /// Directory the tool writes its broadcast artifacts to for `chain_id`.
    pub fn broadcast_dir(&self, chain_id: u64) -> PathBuf {
        match &self.broadcast_dir {
            Some(dir) => dir.clone(),
            None => self
                .project_dir
                .join("broadcast")
                .join(self.script_file_name())
                .join(chain_id.to_string()),
        }
    }
}

/// Captured result of a successful tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentOutput {
    /// Stdout and stderr lines, in arrival order.
    pub combined_output: String,
    pub exit_code: i32,
}

/// Runs the deploy tool from the project directory.
#[derive(Debug, Clone)]
pub struct DeploymentRunner {
    tool: ToolPath,
    work_dir: PathBuf,
    extra_args: Vec<String>,
}

impl DeploymentRunner {
    pub fn new(tool: ToolPath, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            work_dir: work_dir.into(),
            extra_args: Vec::new(),
        }
    }

    /// Arguments appended to every script run.
    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Run `script` against `rpc_url`, broadcasting with `private_key`.
    pub async fn run_script(
        &self,
        script: &str,
        rpc_url: &str,
        private_key: &str,
        cancel: &CancellationToken,
    ) -> Result<DeploymentOutput, DeployError> {
        tracing::info!(tool = %self.tool, script, rpc_url, "Running deployment script...");

        let args = ForgeScriptCmdBuilder::new(script)
            .rpc_url(rpc_url)
            .private_key(private_key)
            .extra_args(self.extra_args.iter().cloned())
            .build();

        self.run(&args, cancel).await
    }

    /// Run the tool with `args` and capture its merged output.
    ///
    /// A non-zero exit is an error carrying the full output. Arguments are not
    /// logged since they may contain the signing key.
    pub async fn run(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<DeploymentOutput, DeployError> {
        let mut child = Command::new(self.tool.program())
            .args(args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let (tx, mut rx) = mpsc::channel(process::OUTPUT_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            process::forward_lines(stdout, OutputStream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            process::forward_lines(stderr, OutputStream::Stderr, tx.clone());
        }
        drop(tx);

        let mut lines = Vec::new();
        let status = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::warn!(tool = %self.tool, "Deployment interrupted, killing the tool");
                    if let Err(e) = child.kill().await {
                        tracing::debug!(error = %e, "Failed to kill the deploy tool");
                    }
                    return Err(DeployError::Interrupted);
                }
                line = rx.recv() => match line {
                    Some(line) => {
                        tracing::debug!(stream = %line.stream, "{}: {}", self.tool, line.text);
                        lines.push(line.text);
                    }
                    None => break child.wait().await,
                },
            }
        };

        let combined_output = lines.join("\n");
        let status = status.map_err(|e| {
            DeployError::Other(anyhow::anyhow!("failed to wait for `{}`: {}", self.tool, e))
        })?;
        let exit_code = status.code().unwrap_or(-1);

        if !status.success() {
            if NOT_FOUND_MARKERS
                .iter()
                .any(|marker| combined_output.contains(marker))
            {
                return Err(DeployError::ToolNotFound {
                    tool: self.tool.to_string(),
                    reason: combined_output,
                });
            }

            return Err(DeployError::DeploymentCommandFailed {
                exit_code,
                output: combined_output,
            });
        }

        tracing::info!(tool = %self.tool, "Deployment command finished");

        Ok(DeploymentOutput {
            combined_output,
            exit_code,
        })
    }

    fn spawn_error(&self, e: io::Error) -> DeployError {
        match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => DeployError::ToolNotFound {
                tool: self.tool.to_string(),
                reason: e.to_string(),
            },
            _ => DeployError::Other(anyhow::anyhow!(
                "failed to spawn `{}` in {}: {}",
                self.tool,
                self.work_dir.display(),
                e
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_broadcast_dir_is_derived_from_script() {
        let config = ToolConfig::default();

        assert_eq!(config.script_file_name(), "FileHashStorage.s.sol");
        assert_eq!(
            config.broadcast_dir(31337),
            Path::new("sc/broadcast/FileHashStorage.s.sol/31337")
        );
    }

    #[test]
    fn test_broadcast_dir_override() {
        let config = ToolConfig {
            broadcast_dir: Some(PathBuf::from("/tmp/artifacts")),
            ..Default::default()
        };

        assert_eq!(config.broadcast_dir(1), Path::new("/tmp/artifacts"));
    }

    #[cfg(unix)]
    fn sh_runner() -> DeploymentRunner {
        DeploymentRunner::new(ToolPath::Bare("sh".to_string()), ".")
    }

    #[cfg(unix)]
    fn sh_args(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_merges_both_streams_in_order() {
        let output = sh_runner()
            .run(
                &sh_args("echo compiling; sleep 0.1; echo warning >&2; sleep 0.1; echo done"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(output.exit_code, 0);
        assert_eq!(output.combined_output, "compiling\nwarning\ndone");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_output_keeps_a_successful_run() {
        let output = sh_runner()
            .run(
                &sh_args(
                    "printf 'Compiling \\377\\n'; \
                     i=0; while [ $i -lt 3000 ]; do echo \"line $i\"; i=$((i+1)); done; \
                     echo 'Contract deployed to: 0x5FbDB2315678afecb367f032d93F642f64180aa3'",
                ),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(output.exit_code, 0);
        assert!(output.combined_output.starts_with("Compiling \u{fffd}"));
        assert!(output.combined_output.contains("line 2999"));
        assert!(
            output
                .combined_output
                .ends_with("Contract deployed to: 0x5FbDB2315678afecb367f032d93F642f64180aa3")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_command_failure() {
        let err = sh_runner()
            .run(
                &sh_args("echo 'Error: script reverted' >&2; exit 3"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            DeployError::DeploymentCommandFailed { exit_code, output } => {
                assert_eq!(exit_code, 3);
                assert!(output.contains("script reverted"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_not_found_output_is_tool_not_found() {
        let err = sh_runner()
            .run(
                &sh_args("echo 'sh: 1: forge: command not found' >&2; exit 127"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::ToolNotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_tool_is_tool_not_found() {
        let runner =
            DeploymentRunner::new(ToolPath::Bare("devchain-missing-forge".to_string()), ".");

        let err = runner
            .run_script(
                DEFAULT_SCRIPT,
                "http://localhost:8545",
                "0x01",
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            DeployError::ToolNotFound { tool, .. } => assert_eq!(tool, "devchain-missing-forge"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_kills_the_tool() {
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = sh_runner()
            .run(&sh_args("exec sleep 30"), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Interrupted));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}

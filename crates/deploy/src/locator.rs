//! Discovery of the deploy tool executable.
//!
//! Lookup order:
//! 1. `<tool> --version` resolved through `PATH` by the OS.
//! 2. `which <tool>` (`where <tool>` on Windows), when the reported path exists.
//! 3. Conventional install directories (Foundry and cargo bin directories,
//!    system bin directories).
//! 4. The bare tool name, so that executing it later fails with the real
//!    "command not found" diagnostics instead of a lookup error.

use std::{
    ffi::OsStr,
    fmt,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use tokio::process::Command;

/// Bound on each lookup subprocess.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Resolved location of the deploy tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolPath {
    /// Resolved by the OS through `PATH` at execution time.
    Bare(String),
    /// Absolute path to the executable.
    Absolute(PathBuf),
}

impl ToolPath {
    /// Program to hand to the process spawner.
    pub fn program(&self) -> &OsStr {
        match self {
            Self::Bare(name) => OsStr::new(name),
            Self::Absolute(path) => path.as_os_str(),
        }
    }
}

impl fmt::Display for ToolPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bare(name) => write!(f, "{name}"),
            Self::Absolute(path) => write!(f, "{}", path.display()),
        }
    }
}

/// The lookup step that produced a [`ToolPath`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum LocateStrategy {
    VersionProbe,
    SystemLookup,
    KnownLocation,
    Fallback,
}

/// Result of a tool lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedTool {
    pub path: ToolPath,
    pub strategy: LocateStrategy,
}

impl LocatedTool {
    /// Whether a lookup step confirmed the tool, as opposed to the bare-name fallback.
    pub fn is_found(&self) -> bool {
        self.strategy != LocateStrategy::Fallback
    }
}

/// Finds the deploy tool on the local machine.
#[derive(Debug, Clone)]
pub struct ToolLocator {
    home_dir: Option<PathBuf>,
}

impl Default for ToolLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolLocator {
    pub fn new() -> Self {
        Self {
            home_dir: dirs::home_dir(),
        }
    }

    /// Use `home_dir` instead of the current user's home for conventional locations.
    pub fn with_home_dir(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: Some(home_dir.into()),
        }
    }

    /// Locate `tool`. Never fails: see the module docs for the fallback.
    pub async fn locate(&self, tool: &str) -> LocatedTool {
        if version_probe(tool).await {
            tracing::debug!(tool, "Tool resolved through PATH");
            return LocatedTool {
                path: ToolPath::Bare(tool.to_string()),
                strategy: LocateStrategy::VersionProbe,
            };
        }

        if let Some(path) = system_lookup(tool).await {
            tracing::debug!(tool, path = %path.display(), "Tool resolved by system lookup");
            return LocatedTool {
                path: ToolPath::Absolute(path),
                strategy: LocateStrategy::SystemLookup,
            };
        }

        if let Some(path) = self.known_locations(tool).into_iter().find(|p| p.is_file()) {
            tracing::debug!(tool, path = %path.display(), "Tool found in a conventional location");
            return LocatedTool {
                path: ToolPath::Absolute(path),
                strategy: LocateStrategy::KnownLocation,
            };
        }

        tracing::warn!(tool, "Tool not found, falling back to the bare command name");
        LocatedTool {
            path: ToolPath::Bare(tool.to_string()),
            strategy: LocateStrategy::Fallback,
        }
    }

    /// Conventional install locations for `tool` on this platform.
    pub fn known_locations(&self, tool: &str) -> Vec<PathBuf> {
        let file_name = executable_name(tool);
        let mut locations = Vec::new();

        if let Some(home) = &self.home_dir {
            locations.push(home.join(".foundry").join("bin").join(&file_name));
            locations.push(home.join(".cargo").join("bin").join(&file_name));
        }

        if cfg!(windows) {
            if let Some(profile) = std::env::var_os("USERPROFILE") {
                let candidate = Path::new(&profile)
                    .join(".foundry")
                    .join("bin")
                    .join(&file_name);
                if !locations.contains(&candidate) {
                    locations.push(candidate);
                }
            }
            locations.push(Path::new(r"C:\Program Files\Foundry\bin").join(&file_name));
        } else {
            locations.push(Path::new("/usr/local/bin").join(&file_name));
            locations.push(Path::new("/usr/bin").join(&file_name));
        }

        locations
    }
}

fn executable_name(tool: &str) -> String {
    if cfg!(windows) && !tool.to_ascii_lowercase().ends_with(".exe") {
        format!("{tool}.exe")
    } else {
        tool.to_string()
    }
}

/// Run `program args` quietly and return its stdout on success.
async fn run_quiet(program: &str, args: &[&str]) -> Option<String> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(LOOKUP_TIMEOUT, child).await {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(Ok(output)) => {
            tracing::trace!(program, ?args, status = %output.status, "Lookup command failed");
            None
        }
        Ok(Err(e)) => {
            tracing::trace!(program, ?args, error = %e, "Lookup command could not run");
            None
        }
        Err(_) => {
            tracing::trace!(program, ?args, "Lookup command timed out");
            None
        }
    }
}

async fn version_probe(tool: &str) -> bool {
    run_quiet(tool, &["--version"]).await.is_some()
}

async fn system_lookup(tool: &str) -> Option<PathBuf> {
    let finder = if cfg!(windows) { "where" } else { "which" };
    let stdout = run_quiet(finder, &[tool]).await?;

    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(PathBuf::from)
        .filter(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_missing_tool_falls_back_to_bare_name() {
        let home = TempDir::new("devchain-home").unwrap();
        let locator = ToolLocator::with_home_dir(home.path());

        let located = locator.locate("devchain-missing-tool").await;

        assert_eq!(located.strategy, LocateStrategy::Fallback);
        assert_eq!(located.path, ToolPath::Bare("devchain-missing-tool".to_string()));
        assert!(!located.is_found());
    }

    #[tokio::test]
    async fn test_tool_in_foundry_home_is_found() {
        let home = TempDir::new("devchain-home").unwrap();
        let bin_dir = home.path().join(".foundry").join("bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        let tool_path = bin_dir.join(executable_name("devchain-test-forge"));
        std::fs::write(&tool_path, "").unwrap();

        let locator = ToolLocator::with_home_dir(home.path());
        let located = locator.locate("devchain-test-forge").await;

        assert_eq!(located.strategy, LocateStrategy::KnownLocation);
        assert_eq!(located.path, ToolPath::Absolute(tool_path));
        assert!(located.is_found());
    }

    #[test]
    fn test_known_locations_start_with_home_dirs() {
        let locator = ToolLocator::with_home_dir("/home/dev");
        let locations = locator.known_locations("forge");

        assert_eq!(
            locations[0],
            Path::new("/home/dev").join(".foundry").join("bin").join(executable_name("forge"))
        );
        assert_eq!(
            locations[1],
            Path::new("/home/dev").join(".cargo").join("bin").join(executable_name("forge"))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_lookup_finds_sh() {
        let path = system_lookup("sh").await.expect("sh should be on PATH");
        assert!(path.is_absolute());
    }
}

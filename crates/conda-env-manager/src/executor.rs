//! Conda process integration.
//!
//! Drives the `conda` binary to create, remove and list environments. Every
//! call runs under a timeout; environment creation in particular can hang
//! on solver or network stalls, and a hung create would otherwise stall the
//! whole repair loop.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use envfix_core::{manifest, CreateResult, EnvironmentCreator, EnvironmentSpec};

use crate::error::{CondaError, Result};

const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_REMOVE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes conda commands with per-operation timeouts.
#[derive(Debug, Clone)]
pub struct CondaExecutor {
    binary: String,
    create_timeout: Duration,
    remove_timeout: Duration,
    list_timeout: Duration,
}

impl Default for CondaExecutor {
    fn default() -> Self {
        Self {
            binary: "conda".to_string(),
            create_timeout: DEFAULT_CREATE_TIMEOUT,
            remove_timeout: DEFAULT_REMOVE_TIMEOUT,
            list_timeout: DEFAULT_LIST_TIMEOUT,
        }
    }
}

impl CondaExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different binary, e.g. `mamba` or an absolute path.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self
    }

    /// Whether the configured binary responds to `--version`.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    /// Create the environment described by `spec`.
    ///
    /// Renders the manifest to a temporary file and runs
    /// `conda env create -f <file> --yes`. The environment name comes from
    /// the manifest itself.
    pub async fn create_environment(&self, spec: &EnvironmentSpec) -> Result<()> {
        let text = manifest::render(spec);
        let mut file = tempfile::Builder::new()
            .prefix("envfix-")
            .suffix(".yml")
            .tempfile()?;
        file.write_all(text.as_bytes())?;
        file.flush()?;

        info!(name = %spec.name, "creating environment");
        let output = self
            .run(
                &[
                    "env",
                    "create",
                    "-f",
                    &file.path().to_string_lossy(),
                    "--yes",
                ],
                self.create_timeout,
            )
            .await?;

        if !output.status.success() {
            return Err(CondaError::CommandFailed(merge_output(&output)));
        }
        Ok(())
    }

    /// Remove an environment by name. Absence is not an error.
    pub async fn remove_environment(&self, name: &str) -> Result<()> {
        debug!(name = %name, "removing environment");
        let output = self
            .run(&["env", "remove", "-n", name, "--yes"], self.remove_timeout)
            .await?;

        if !output.status.success() {
            let text = merge_output(&output);
            let lowered = text.to_lowercase();
            if lowered.contains("not found") || lowered.contains("does not exist") {
                return Ok(());
            }
            return Err(CondaError::CommandFailed(text));
        }
        Ok(())
    }

    /// Whether an environment with this name already exists.
    pub async fn environment_exists(&self, name: &str) -> Result<bool> {
        let output = self
            .run(&["env", "list", "--json"], self.list_timeout)
            .await?;
        if !output.status.success() {
            return Err(CondaError::CommandFailed(merge_output(&output)));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        list_contains(&stdout, name)
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<std::process::Output> {
        let result = tokio::time::timeout(
            timeout,
            Command::new(&self.binary).args(args).output(),
        )
        .await
        .map_err(|_| CondaError::Timeout(timeout.as_secs()))?;

        result.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CondaError::CondaNotFound
            } else {
                CondaError::Io(e)
            }
        })
    }
}

/// Parse `conda env list --json` output and look for `name` among the
/// environment path basenames.
fn list_contains(stdout: &str, name: &str) -> Result<bool> {
    #[derive(serde::Deserialize)]
    struct EnvList {
        envs: Vec<String>,
    }

    let list: EnvList = serde_json::from_str(stdout)?;
    Ok(list.envs.iter().any(|path| {
        std::path::Path::new(path)
            .file_name()
            .is_some_and(|base| base == name)
    }))
}

fn merge_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut text = String::new();
    if !stderr.trim().is_empty() {
        text.push_str(stderr.trim());
    }
    if !stdout.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stdout.trim());
    }
    text
}

/// The repair loop's creation collaborator, backed by the conda binary.
///
/// Failures never propagate: every error is folded into the raw text of a
/// failed [`CreateResult`] so the classifier can have a look at it.
#[async_trait]
impl EnvironmentCreator for CondaExecutor {
    async fn create(&self, spec: &EnvironmentSpec) -> CreateResult {
        match self.create_environment(spec).await {
            Ok(()) => CreateResult::ok(),
            Err(err) => {
                warn!(name = %spec.name, error = %err, "environment creation failed");
                CreateResult::failed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_contains_matches_basename() {
        let stdout = r#"{"envs": ["/opt/conda", "/opt/conda/envs/trainer", "/opt/conda/envs/other"]}"#;
        assert!(list_contains(stdout, "trainer").unwrap());
        assert!(!list_contains(stdout, "missing").unwrap());
    }

    #[test]
    fn test_list_contains_rejects_bad_json() {
        assert!(list_contains("not json", "trainer").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_merge_output_combines_streams() {
        let output = std::process::Output {
            status: exit_status(1),
            stdout: b"solver output\n".to_vec(),
            stderr: b"PackagesNotFoundError: cudnn=8.6\n".to_vec(),
        };
        let text = merge_output(&output);
        assert!(text.starts_with("PackagesNotFoundError"));
        assert!(text.contains("solver output"));
    }

    #[tokio::test]
    async fn test_missing_binary_reports_not_found() {
        let executor = CondaExecutor::new().with_binary("definitely-not-conda-xyz");
        assert!(!executor.is_available().await);

        let err = executor.remove_environment("demo").await.unwrap_err();
        assert!(matches!(err, CondaError::CondaNotFound));
    }

    #[tokio::test]
    async fn test_failed_create_becomes_create_result() {
        let executor = CondaExecutor::new().with_binary("definitely-not-conda-xyz");
        let spec = EnvironmentSpec::new("demo");
        let result = executor.create(&spec).await;
        assert!(!result.success);
        assert!(result.raw_error.contains("not installed"));
    }

    #[cfg(unix)]
    fn exit_status(code: i32) -> std::process::ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(code << 8)
    }
}

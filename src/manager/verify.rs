use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CheckResult {
    /// Last lines of stderr, or stdout when stderr is empty.
    pub fn summary(&self, lines: usize) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let all: Vec<&str> = text.lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

/// Run the configured post-apply command (e.g. `cargo check`) in `dir`.
pub async fn run_check(command: &[String], dir: &Path, timeout: Duration) -> Result<CheckResult> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| anyhow!("post-apply check command is empty"))?;

    info!("Running post-apply check '{}' in {}", command.join(" "), dir.display());
    let output = tokio::time::timeout(
        timeout,
        Command::new(program)
            .args(args)
            .current_dir(dir)
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| anyhow!("post-apply check timed out after {}s", timeout.as_secs()))?
    .with_context(|| format!("Failed to run {}", program))?;

    let result = parse_output(output);
    if !result.success {
        error!("Post-apply check failed:\n{}", result.summary(20));
    }
    Ok(result)
}

fn parse_output(output: Output) -> CheckResult {
    CheckResult {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    }
}

//! Command-based discovery.
//!
//! Runs a user-provided shell command and treats every non-empty stdout
//! line as a work item. Lines starting with `#` are comments.

use async_trait::async_trait;

use super::{DiscoveryError, DiscoveryResult, WorkItem, WorkItemSource};

/// Discovers work items by running a shell command.
pub struct CommandDiscoverer {
    command: String,
}

impl CommandDiscoverer {
    /// Creates a discoverer running `command` through `sh -c`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn parse_output(&self, output: &str) -> Vec<WorkItem> {
        output
            .lines()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(WorkItem::from)
            .collect()
    }
}

#[async_trait]
impl WorkItemSource for CommandDiscoverer {
    async fn discover(&self) -> DiscoveryResult<Vec<WorkItem>> {
        // Run through the shell to support pipes, globs, etc.
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .output()
            .await
            .map_err(|e| DiscoveryError::CommandFailed(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(DiscoveryError::CommandFailed(format!(
                "`{}` exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let items = self.parse_output(&stdout);

        if items.is_empty() {
            tracing::warn!("Discovery command printed no work items. stderr: {}", stderr);
        }

        Ok(items)
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
